use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::ModelClient;
use crate::errors::ModelError;

/// Replays canned responses in order; an exhausted script yields
/// [`ModelError::EmptyResponse`].
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a failing call that reports `stderr`.
    pub fn then_fail(self, stderr: impl Into<String>) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(stderr.into()));
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().ok().and_then(|mut queue| queue.pop_front());
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(stderr)) => Err(ModelError::NonZeroExit { code: 1, stderr }),
            None => Err(ModelError::EmptyResponse),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order() {
        let model = ScriptedModel::new(["first", "second"]).then_fail("boom");
        assert_eq!(model.complete("").await.unwrap(), "first");
        assert_eq!(model.complete("").await.unwrap(), "second");
        assert!(matches!(model.complete("").await, Err(ModelError::NonZeroExit { .. })));
        assert!(matches!(model.complete("").await, Err(ModelError::EmptyResponse)));
        assert_eq!(model.calls(), 4);
    }
}
