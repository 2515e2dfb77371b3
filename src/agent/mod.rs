//! The bounded think-act-observe-synthesize loop
//!
//! Each question gets a fresh [`AgentState`]. Every step asks the model for
//! one decision, runs the chosen tool and records the observation. The run
//! ends when the model answers, or with a forced synthesis once the step or
//! time budget is spent. Tool failures become observations; only selection
//! and synthesis exhaustion fail a run.

mod decision;
mod prompt;

pub use decision::{parse_decision, Decision, DecisionProblem};
pub use prompt::truncate_observation;

use crate::config::{AgentConfig, LlmConfig};
use crate::llm::{CompletionRequest, LanguageModel, LlmError, Phase};
use crate::session::Turn;
use crate::tools::{RepoTool, ToolSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const TRANSPORT_BACKOFF_MS: u64 = 100;

/// Outcome of one tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum InvocationResult {
    Output(String),
    Error(String),
}

impl InvocationResult {
    pub fn text(&self) -> &str {
        match self {
            InvocationResult::Output(t) | InvocationResult::Error(t) => t,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, InvocationResult::Error(_))
    }
}

/// One executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// 1-based
    pub step: usize,
    pub tool_name: String,
    pub arguments: Value,
    pub result: InvocationResult,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Answered,
    Failed,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Running => "running",
            AgentStatus::Answered => "answered",
            AgentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The selection step could not produce a usable decision
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("no valid tool selection after {attempts} attempts: {problem}")]
    Malformed {
        attempts: usize,
        problem: DecisionProblem,
    },

    #[error("language model unavailable during tool selection: {0}")]
    ModelUnavailable(#[source] LlmError),
}

/// The final answer could not be produced
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("language model unavailable during synthesis: {0}")]
    ModelUnavailable(#[source] LlmError),

    #[error("language model returned an empty answer")]
    EmptyAnswer,
}

/// Why a run ended in forced synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetExhausted {
    Steps,
    Time,
}

impl BudgetExhausted {
    fn describe(self) -> &'static str {
        match self {
            BudgetExhausted::Steps => "step limit reached",
            BudgetExhausted::Time => "time budget spent",
        }
    }
}

/// Per-question state, mutated only by the orchestrator
#[derive(Debug, Clone)]
pub struct AgentState {
    pub question: String,
    pub history: Vec<Turn>,
    pub invocations: Vec<ToolInvocation>,
    pub step_count: usize,
    pub status: AgentStatus,
}

impl AgentState {
    pub fn new(question: impl Into<String>, history: Vec<Turn>) -> Self {
        Self {
            question: question.into(),
            history,
            invocations: Vec::new(),
            step_count: 0,
            status: AgentStatus::Running,
        }
    }
}

/// Result of one question
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub answer: String,
    pub status: AgentStatus,
    pub transcript: Vec<ToolInvocation>,
    pub budget_exhausted: Option<BudgetExhausted>,
}

/// Drives the loop for one repository; shareable across concurrent questions
pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    tools: ToolSet,
    config: AgentConfig,
    llm_retries: u32,
    request_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: ToolSet,
        config: AgentConfig,
        llm: &LlmConfig,
    ) -> Self {
        Self {
            model,
            tools,
            config,
            llm_retries: llm.max_retries,
            request_timeout: llm.request_timeout(),
        }
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Answer one question, seeded with prior conversation turns
    pub async fn run(&self, question: &str, history: &[Turn]) -> AgentRun {
        let started = Instant::now();
        let deadline = started + self.config.max_duration();
        let keep = history.len().saturating_sub(self.config.history_turns);
        let mut state = AgentState::new(question, history[keep..].to_vec());
        info!("Question: {}", question);

        let exhausted = loop {
            if state.step_count >= self.config.max_steps {
                break BudgetExhausted::Steps;
            }
            if Instant::now() >= deadline {
                break BudgetExhausted::Time;
            }

            match self.select(&state).await {
                Ok(Decision::Answer(answer)) => {
                    info!(
                        "Answered after {} step(s) in {:?}",
                        state.step_count,
                        started.elapsed()
                    );
                    state.status = AgentStatus::Answered;
                    return finish(state, answer, None);
                }
                Ok(Decision::Tool {
                    tool,
                    arguments,
                    thought,
                }) => {
                    if let Some(thought) = thought {
                        debug!("Thought: {}", thought);
                    }
                    let invocation = self.execute(state.step_count + 1, tool, arguments).await;
                    state.invocations.push(invocation);
                    state.step_count += 1;
                }
                Err(e) => {
                    warn!("Run failed during selection: {}", e);
                    state.status = AgentStatus::Failed;
                    let message = format!("I could not complete this question: {}", e);
                    return finish(state, message, None);
                }
            }
        };

        info!("Forcing synthesis: {}", exhausted.describe());
        match self.synthesize(&state, exhausted).await {
            Ok(answer) => {
                state.status = AgentStatus::Answered;
                let answer = format!(
                    "{}\n\nNote: the investigation stopped early ({}), so the evidence may be incomplete.",
                    answer.trim_end(),
                    exhausted.describe()
                );
                finish(state, answer, Some(exhausted))
            }
            Err(e) => {
                warn!("Run failed during synthesis: {}", e);
                state.status = AgentStatus::Failed;
                let message = format!("I could not produce an answer: {}", e);
                finish(state, message, Some(exhausted))
            }
        }
    }

    /// Ask for a decision, feeding each rejected reply's problem back to the model
    async fn select(&self, state: &AgentState) -> Result<Decision, SelectionError> {
        let specs = self.tools.specs();
        let mut feedback: Option<DecisionProblem> = None;
        let attempts = self.config.max_selection_retries + 1;

        for attempt in 1..=attempts {
            let feedback_text = feedback.as_ref().map(|p| p.to_string());
            let request = CompletionRequest {
                phase: Phase::Select,
                messages: prompt::select_messages(
                    &state.question,
                    &state.history,
                    &state.invocations,
                    &specs,
                    feedback_text.as_deref(),
                    self.config.max_observation_chars,
                ),
                question: state.question.clone(),
                invocations: state.invocations.clone(),
                tools: self.tools.names(),
                feedback: feedback_text,
            };

            let reply = self
                .call_model(&request)
                .await
                .map_err(SelectionError::ModelUnavailable)?;
            match parse_decision(&reply) {
                Ok(decision) => return Ok(decision),
                Err(problem) => {
                    warn!(
                        "Rejected selection (attempt {}/{}): {}",
                        attempt, attempts, problem
                    );
                    feedback = Some(problem);
                }
            }
        }

        Err(SelectionError::Malformed {
            attempts,
            problem: feedback.unwrap_or(DecisionProblem::Empty),
        })
    }

    async fn synthesize(
        &self,
        state: &AgentState,
        exhausted: BudgetExhausted,
    ) -> Result<String, SynthesisError> {
        let request = CompletionRequest {
            phase: Phase::Synthesize,
            messages: prompt::synthesize_messages(
                &state.question,
                &state.history,
                &state.invocations,
                Some(exhausted.describe()),
                self.config.max_observation_chars,
            ),
            question: state.question.clone(),
            invocations: state.invocations.clone(),
            tools: self.tools.names(),
            feedback: None,
        };
        let reply = self
            .call_model(&request)
            .await
            .map_err(SynthesisError::ModelUnavailable)?;

        // A decision-shaped reply still carries the answer text
        let answer = match parse_decision(&reply) {
            Ok(Decision::Answer(answer)) => answer,
            _ => reply.trim().to_string(),
        };
        if answer.is_empty() {
            return Err(SynthesisError::EmptyAnswer);
        }
        Ok(answer)
    }

    /// One model call with per-call timeout, retrying transient failures
    async fn call_model(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            let result =
                match tokio::time::timeout(self.request_timeout, self.model.complete(request)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout(self.request_timeout)),
                };
            match result {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() && attempt < self.llm_retries => {
                    let delay = Duration::from_millis(TRANSPORT_BACKOFF_MS << attempt.min(6));
                    warn!(
                        "{} call failed ({}); retrying in {:?}",
                        self.model.name(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute(&self, step: usize, tool: RepoTool, arguments: Value) -> ToolInvocation {
        let started = Instant::now();
        let tools = self.tools.clone();
        let args = arguments.clone();
        let outcome = tokio::task::spawn_blocking(move || tools.run(tool, &args)).await;

        let result = match outcome {
            Ok(Ok(output)) => InvocationResult::Output(output),
            Ok(Err(e)) => {
                debug!("{} failed: {}", tool, e);
                InvocationResult::Error(e.to_string())
            }
            Err(e) => InvocationResult::Error(format!("tool execution was interrupted: {}", e)),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        debug!("Step {}: {} {} ({} ms)", step, tool, arguments, duration_ms);

        ToolInvocation {
            step,
            tool_name: tool.name().to_string(),
            arguments,
            result,
            duration_ms,
        }
    }
}

fn finish(state: AgentState, answer: String, exhausted: Option<BudgetExhausted>) -> AgentRun {
    AgentRun {
        answer,
        status: state.status,
        transcript: state.invocations,
        budget_exhausted: exhausted,
    }
}
