use super::{CompletionRequest, LanguageModel, LlmError, Phase};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Replays queued replies in order; used to drive the agent deterministically
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    seen: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::new();
        for reply in replies {
            model.push_reply(reply);
        }
        model
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock_script().push_back(Ok(reply.into()));
    }

    pub fn push_failure(&self, error: LlmError) {
        self.lock_script().push_back(Err(error));
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self, phase: Phase) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.phase == phase)
            .count()
    }

    pub fn remaining(&self) -> usize {
        self.lock_script().len()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, LlmError>>> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.lock_script()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Other("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(phase: Phase) -> CompletionRequest {
        CompletionRequest {
            phase,
            messages: Vec::new(),
            question: "q".to_string(),
            invocations: Vec::new(),
            tools: Vec::new(),
            feedback: None,
        }
    }

    #[tokio::test]
    async fn test_replays_in_order_then_exhausts() {
        let model = ScriptedModel::with_replies(["first"]);
        model.push_failure(LlmError::RateLimited);

        assert_eq!(model.complete(&request(Phase::Select)).await.unwrap(), "first");
        assert!(matches!(
            model.complete(&request(Phase::Select)).await,
            Err(LlmError::RateLimited)
        ));
        assert!(model.complete(&request(Phase::Synthesize)).await.is_err());
        assert_eq!(model.calls(Phase::Select), 2);
        assert_eq!(model.calls(Phase::Synthesize), 1);
        assert_eq!(model.remaining(), 0);
    }
}
