//! Stub [`Dispatch`] for stage unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pipeline::{
    BackendName, Dispatch, DispatchError, GeneratedText, Prompt, RunId, TaskClass, TokenCount,
};

/// Replays queued replies in order, then repeats `fallback` (or fails with
/// `NoRoute` when there is none). Records every prompt it receives.
pub(crate) struct ScriptedRouter {
    replies: Mutex<VecDeque<Result<String, DispatchError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<(TaskClass, Prompt)>>,
}

impl ScriptedRouter {
    /// Always answers `reply`.
    pub(crate) fn always(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(reply.to_owned()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Answers from `replies` in order.
    pub(crate) fn sequence(replies: Vec<Result<String, DispatchError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Prompts received so far.
    pub(crate) fn prompts(&self) -> Vec<(TaskClass, Prompt)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatch for ScriptedRouter {
    async fn dispatch(
        &self,
        _run: RunId,
        task_class: TaskClass,
        prompt: Prompt,
    ) -> Result<GeneratedText, DispatchError> {
        self.prompts.lock().unwrap().push((task_class, prompt));
        let next = self.replies.lock().unwrap().pop_front();
        let text = match (next, &self.fallback) {
            (Some(reply), _) => reply?,
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => return Err(DispatchError::NoRoute { task_class }),
        };
        Ok(GeneratedText {
            text,
            backend: BackendName::new("scripted").unwrap(),
            tokens: TokenCount::new(10),
        })
    }
}
