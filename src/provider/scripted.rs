use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use super::Provider;
use crate::errors::{PipelineError, Result};
use crate::wire::{ChatRequest, Stage};

/// In-memory provider for tests and offline runs: replies are queued per
/// stage and handed out in order. Every request is recorded.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<HashMap<Stage, VecDeque<String>>>,
    seen: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, stage: Stage, text: impl Into<String>) -> Self {
        self.replies.lock().entry(stage).or_default().push_back(text.into());
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().clone()
    }

    pub fn calls(&self, stage: Stage) -> usize {
        self.seen.lock().iter().filter(|r| r.stage == stage).count()
    }

    pub fn remaining(&self, stage: Stage) -> usize {
        self.replies.lock().get(&stage).map(VecDeque::len).unwrap_or(0)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<String> {
        self.seen.lock().push(req.clone());
        self.replies
            .lock()
            .get_mut(&req.stage)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| PipelineError::Provider(format!("no scripted reply left for stage `{}`", req.stage)))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(stage: Stage) -> ChatRequest {
        ChatRequest {
            stage,
            model: "m".into(),
            temperature: 0.0,
            system: String::new(),
            human: "h".into(),
        }
    }

    #[tokio::test]
    async fn hands_out_replies_in_order() {
        let p = ScriptedProvider::new()
            .reply(Stage::Feedback, "first")
            .reply(Stage::Feedback, "second");
        assert_eq!(p.complete(&req(Stage::Feedback)).await.unwrap(), "first");
        assert_eq!(p.complete(&req(Stage::Feedback)).await.unwrap(), "second");
        assert!(p.complete(&req(Stage::Feedback)).await.is_err());
        assert_eq!(p.calls(Stage::Feedback), 3);
    }
}
