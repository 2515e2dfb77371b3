//! Rendering agent state into chat messages

use super::{InvocationResult, ToolInvocation};
use crate::llm::Message;
use crate::session::Turn;
use crate::tools::ToolSpec;
use std::fmt::Write;

const SELECT_INSTRUCTIONS: &str = "You answer questions about a code repository. \
You cannot see the repository directly; use the tools below to gather evidence, \
one tool per reply. Prefer the narrowest tool: read or parse a file the question names, \
search only when no file is named.

Reply with exactly one JSON object and nothing else:
{\"action\":\"tool\",\"tool\":\"<tool name>\",\"arguments\":{...},\"thought\":\"<why>\"}
or, once the evidence is sufficient:
{\"action\":\"answer\",\"answer\":\"<final answer>\"}";

const SYNTHESIZE_INSTRUCTIONS: &str = "You answer questions about a code repository \
using only the tool observations provided. Cite file paths. If the observations do not \
contain the answer, say what is missing instead of guessing.";

pub(crate) fn select_messages(
    question: &str,
    history: &[Turn],
    invocations: &[ToolInvocation],
    tools: &[ToolSpec],
    feedback: Option<&str>,
    max_observation_chars: usize,
) -> Vec<Message> {
    let mut system = String::from(SELECT_INSTRUCTIONS);
    system.push_str("\n\nTools:\n");
    for tool in tools {
        let _ = writeln!(
            system,
            "- {}: {}\n  arguments: {}",
            tool.name, tool.description, tool.parameters
        );
    }

    let mut user = String::new();
    render_history(&mut user, history);
    let _ = writeln!(user, "Question: {}", question);
    render_invocations(&mut user, invocations, max_observation_chars);
    if let Some(problem) = feedback {
        let _ = writeln!(
            user,
            "\nYour previous reply was rejected: {}. Reply with exactly one JSON object in the format described.",
            problem
        );
    }

    vec![Message::system(system), Message::user(user)]
}

pub(crate) fn synthesize_messages(
    question: &str,
    history: &[Turn],
    invocations: &[ToolInvocation],
    incomplete: Option<&str>,
    max_observation_chars: usize,
) -> Vec<Message> {
    let mut user = String::new();
    render_history(&mut user, history);
    let _ = writeln!(user, "Question: {}", question);
    render_invocations(&mut user, invocations, max_observation_chars);
    if let Some(reason) = incomplete {
        let _ = writeln!(
            user,
            "\nThe investigation stopped early ({}). Answer from the evidence above and say that it may be incomplete.",
            reason
        );
    }
    user.push_str("\nWrite the final answer.");

    vec![Message::system(SYNTHESIZE_INSTRUCTIONS), Message::user(user)]
}

fn render_history(out: &mut String, history: &[Turn]) {
    if history.is_empty() {
        return;
    }
    out.push_str("Earlier in this conversation:\n");
    for turn in history {
        let _ = writeln!(out, "Q: {}\nA: {}", turn.question, turn.answer);
    }
    out.push('\n');
}

fn render_invocations(out: &mut String, invocations: &[ToolInvocation], max_chars: usize) {
    if invocations.is_empty() {
        return;
    }
    out.push_str("\nSteps so far:\n");
    for (i, inv) in invocations.iter().enumerate() {
        let _ = writeln!(out, "\nStep {}: {}({})", inv.step, inv.tool_name, inv.arguments);
        let repeat = invocations[..i]
            .iter()
            .find(|prev| prev.tool_name == inv.tool_name && prev.arguments == inv.arguments);
        if let Some(prev) = repeat {
            let _ = writeln!(
                out,
                "(repeat of step {}; the result is unchanged, choose a different action)",
                prev.step
            );
        }
        match &inv.result {
            InvocationResult::Output(text) => {
                let _ = writeln!(out, "Observation:\n{}", truncate_observation(text, max_chars));
            }
            InvocationResult::Error(text) => {
                let _ = writeln!(out, "Error: {}", truncate_observation(text, max_chars));
            }
        }
    }
}

/// Keep the head and tail of a long observation, dropping the middle
pub fn truncate_observation(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head_len = max_chars * 2 / 3;
    let tail_len = max_chars - head_len;
    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - tail_len).collect();
    format!(
        "{}\n[... {} characters omitted ...]\n{}",
        head,
        total - head_len - tail_len,
        tail
    )
}
