//! Parsing the model's selection reply
//!
//! Accepted shapes:
//! `{"action":"tool","tool":NAME,"arguments":{...},"thought":...}` and
//! `{"action":"answer","answer":...}`, bare or inside a fenced block or
//! surrounding prose. Any other reply, including prose that quotes code with
//! braces, is a final answer.

use crate::tools::RepoTool;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Tool {
        tool: RepoTool,
        arguments: Value,
        thought: Option<String>,
    },
    Answer(String),
}

/// Why a reply could not be used as a decision
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionProblem {
    #[error("the reply was empty")]
    Empty,

    #[error("the reply looks like a decision but is not a valid JSON object: {0}")]
    InvalidJson(String),

    #[error("the decision is missing the \"{0}\" field")]
    MissingField(&'static str),

    #[error("unknown action \"{0}\"; use \"tool\" or \"answer\"")]
    UnknownAction(String),

    #[error("unknown tool \"{name}\"; available tools: {available}")]
    UnknownTool { name: String, available: String },

    #[error("\"arguments\" must be a JSON object")]
    ArgumentsNotObject,
}

pub fn parse_decision(reply: &str) -> Result<Decision, DecisionProblem> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(DecisionProblem::Empty);
    }
    if !looks_like_decision(reply) {
        return Ok(Decision::Answer(reply.to_string()));
    }

    let object = extract_object(reply)?;
    interpret(object)
}

/// Whether the reply is trying to be a JSON decision at all
fn looks_like_decision(reply: &str) -> bool {
    reply.starts_with('{') || reply.contains("```json") || reply.contains("\"action\"")
}

/// First JSON object in the reply, preferring fenced blocks
fn extract_object(reply: &str) -> Result<Map<String, Value>, DecisionProblem> {
    let mut last_error = String::from("no object found");
    for candidate in fenced_blocks(reply).into_iter().chain([reply]) {
        for (start, _) in candidate.match_indices('{') {
            let mut stream =
                serde_json::Deserializer::from_str(&candidate[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(Value::Object(map))) => return Ok(map),
                Some(Err(e)) => last_error = e.to_string(),
                _ => {}
            }
        }
    }
    Err(DecisionProblem::InvalidJson(last_error))
}

fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let after = &after[body_start..];
        let Some(end) = after.find("```") else {
            break;
        };
        blocks.push(after[..end].trim());
        rest = &after[end + 3..];
    }
    blocks
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn interpret(map: Map<String, Value>) -> Result<Decision, DecisionProblem> {
    let action = string_field(&map, "action").map(|a| a.to_lowercase());
    let action = match action {
        Some(action) => action,
        None if map.contains_key("tool") => "tool".to_string(),
        None if map.contains_key("answer") => "answer".to_string(),
        None => return Err(DecisionProblem::MissingField("action")),
    };

    match action.as_str() {
        "answer" | "final_answer" | "final" => string_field(&map, "answer")
            .map(Decision::Answer)
            .ok_or(DecisionProblem::MissingField("answer")),
        "tool" | "tool_call" | "call" => {
            let name = string_field(&map, "tool").ok_or(DecisionProblem::MissingField("tool"))?;
            let tool = RepoTool::from_name(&name).ok_or_else(|| DecisionProblem::UnknownTool {
                name: name.clone(),
                available: RepoTool::ALL.map(RepoTool::name).join(", "),
            })?;
            let arguments = match map.get("arguments") {
                None | Some(Value::Null) => Value::Object(Map::new()),
                Some(Value::Object(args)) => Value::Object(args.clone()),
                Some(_) => return Err(DecisionProblem::ArgumentsNotObject),
            };
            Ok(Decision::Tool {
                tool,
                arguments,
                thought: string_field(&map, "thought"),
            })
        }
        other => Err(DecisionProblem::UnknownAction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_decision() {
        let reply = r#"{"action":"tool","tool":"file_read","arguments":{"file_path":"a.py"},"thought":"read it"}"#;
        assert_eq!(
            parse_decision(reply).unwrap(),
            Decision::Tool {
                tool: RepoTool::FileRead,
                arguments: json!({"file_path": "a.py"}),
                thought: Some("read it".to_string()),
            }
        );
    }

    #[test]
    fn test_fenced_and_embedded_json() {
        let fenced = "I will search.\n```json\n{\"action\":\"tool\",\"tool\":\"file_search\",\"arguments\":{\"query\":\"db\"}}\n```";
        assert!(matches!(
            parse_decision(fenced).unwrap(),
            Decision::Tool { tool: RepoTool::FileSearch, .. }
        ));

        let embedded = "Done. {\"action\": \"answer\", \"answer\": \"It connects to Postgres.\"} Thanks";
        assert_eq!(
            parse_decision(embedded).unwrap(),
            Decision::Answer("It connects to Postgres.".to_string())
        );
    }

    #[test]
    fn test_prose_is_a_final_answer() {
        assert_eq!(
            parse_decision("  The module loads configuration.  ").unwrap(),
            Decision::Answer("The module loads configuration.".to_string())
        );
    }

    #[test]
    fn test_code_quoting_prose_is_a_final_answer() {
        let reply = "The entry point is `fn main() { run(); }` in src/main.rs.";
        assert_eq!(parse_decision(reply).unwrap(), Decision::Answer(reply.to_string()));

        let fenced = "It is a struct:\n```rust\npub struct Config {\n    pub port: u16,\n}\n```";
        assert_eq!(parse_decision(fenced).unwrap(), Decision::Answer(fenced.to_string()));

        // A quoted JSON value without an action is still just an answer
        let quoted = "The payload looks like {\"id\": 7}.";
        assert_eq!(parse_decision(quoted).unwrap(), Decision::Answer(quoted.to_string()));
    }

    #[test]
    fn test_broken_decision_attempts_are_rejected() {
        assert!(matches!(
            parse_decision("```json\n{\"action\": \"tool\", \n```").unwrap_err(),
            DecisionProblem::InvalidJson(_)
        ));
        assert!(matches!(
            parse_decision("Calling {\"action\": \"tool\", \"tool\": }").unwrap_err(),
            DecisionProblem::InvalidJson(_)
        ));
    }

    #[test]
    fn test_problems_are_named() {
        assert_eq!(parse_decision("").unwrap_err(), DecisionProblem::Empty);
        assert!(matches!(
            parse_decision("{not json").unwrap_err(),
            DecisionProblem::InvalidJson(_)
        ));
        assert!(matches!(
            parse_decision(r#"{"action":"tool","tool":"shell","arguments":{}}"#).unwrap_err(),
            DecisionProblem::UnknownTool { .. }
        ));
        assert_eq!(
            parse_decision(r#"{"action":"tool","arguments":{}}"#).unwrap_err(),
            DecisionProblem::MissingField("tool")
        );
        assert_eq!(
            parse_decision(r#"{"action":"tool","tool":"file_read","arguments":"a.py"}"#)
                .unwrap_err(),
            DecisionProblem::ArgumentsNotObject
        );
        assert_eq!(
            parse_decision(r#"{"action":"dance"}"#).unwrap_err(),
            DecisionProblem::UnknownAction("dance".to_string())
        );
    }
}
