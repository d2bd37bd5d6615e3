use async_trait::async_trait;
use std::fmt::Debug;

use crate::domain::DomainError;

/// Text-in, text-out language model call.
///
/// `tag` names the calling step (e.g. `select_table`) so the provider side
/// can attribute usage and logs.
#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn call(&self, prompt: &str, tag: &str) -> Result<String, DomainError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// LLM double answering per tag from a queue of scripted replies.
    ///
    /// Each call pops the next reply for its tag; the last reply repeats once
    /// the queue is down to one entry. Prompts are recorded for assertions.
    #[derive(Debug, Default)]
    pub struct ScriptedLlmClient {
        replies: Mutex<HashMap<String, VecDeque<Result<String, String>>>>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedLlmClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_reply(self, tag: impl Into<String>, reply: impl Into<String>) -> Self {
            self.replies
                .lock()
                .unwrap()
                .entry(tag.into())
                .or_default()
                .push_back(Ok(reply.into()));
            self
        }

        pub fn with_error(self, tag: impl Into<String>, error: impl Into<String>) -> Self {
            self.replies
                .lock()
                .unwrap()
                .entry(tag.into())
                .or_default()
                .push_back(Err(error.into()));
            self
        }

        /// Prompts received for `tag`, in call order
        pub fn prompts_for(&self, tag: &str) -> Vec<String> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == tag)
                .map(|(_, p)| p.clone())
                .collect()
        }

        pub fn call_count(&self, tag: &str) -> usize {
            self.prompts_for(tag).len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlmClient {
        async fn call(&self, prompt: &str, tag: &str) -> Result<String, DomainError> {
            self.prompts
                .lock()
                .unwrap()
                .push((tag.to_string(), prompt.to_string()));

            let mut replies = self.replies.lock().unwrap();
            let queue = replies
                .get_mut(tag)
                .ok_or_else(|| DomainError::provider("mock", format!("No reply for {}", tag)))?;

            let reply = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };

            match reply {
                Some(Ok(text)) => Ok(text),
                Some(Err(error)) => Err(DomainError::provider("mock", error)),
                None => Err(DomainError::provider("mock", format!("No reply for {}", tag))),
            }
        }
    }

    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_scripted_replies_repeat_last() {
            let llm = ScriptedLlmClient::new()
                .with_reply("select_table", "amt")
                .with_reply("select_table", "trsc");

            assert_eq!(llm.call("p1", "select_table").await.unwrap(), "amt");
            assert_eq!(llm.call("p2", "select_table").await.unwrap(), "trsc");
            assert_eq!(llm.call("p3", "select_table").await.unwrap(), "trsc");
            assert_eq!(llm.prompts_for("select_table"), vec!["p1", "p2", "p3"]);
        }

        #[tokio::test]
        async fn test_unscripted_tag_fails() {
            let llm = ScriptedLlmClient::new();
            assert!(llm.call("p", "respond").await.is_err());
        }
    }
}
