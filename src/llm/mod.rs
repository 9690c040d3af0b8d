//! Reasoning service used by the pattern analyzer.
//!
//! The analyzer only needs "prompt in, text out". Keeping that behind a
//! trait lets tests substitute a scripted service.

pub mod ollama;

pub use ollama::OllamaClient;

use crate::error::AnalysisError;
use async_trait::async_trait;

#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Send a prompt and return the raw completion text.
    async fn complete(&self, prompt: &str) -> Result<String, AnalysisError>;

    /// Model identifier recorded on synthesized patterns.
    fn model(&self) -> &str;
}

#[cfg(test)]
pub mod mock {
    //! Scripted reasoning service for tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct MockReasoning {
        responses: Mutex<VecDeque<Result<String, AnalysisError>>>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl MockReasoning {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn with_response(self, response: impl Into<String>) -> Self {
            self.responses.lock().unwrap().push_back(Ok(response.into()));
            self
        }

        pub fn with_error(self, error: AnalysisError) -> Self {
            self.responses.lock().unwrap().push_back(Err(error));
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn last_prompt(&self) -> Option<String> {
            self.prompts.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl ReasoningService for MockReasoning {
        async fn complete(&self, prompt: &str) -> Result<String, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AnalysisError::ServiceUnavailable("no scripted response".into())))
        }

        fn model(&self) -> &str {
            "mock"
        }
    }
}
