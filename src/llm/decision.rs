//! Decision Engine：带超时与重试的模型调用
//!
//! 每次调用受 request_timeout 约束（超时按瞬时错误处理）；瞬时错误指数退避重试，
//! 永久错误立即失败。最终失败以 AgentError::Decision 返回，携带尝试次数。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::core::{AgentError, DecisionError};
use crate::llm::{LlmClient, LlmError, Message};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次失败后的等待：initial * 2^(attempt-1)，不超过 max_backoff
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

pub struct DecisionEngine {
    client: Arc<dyn LlmClient>,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl DecisionEngine {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }

    /// 请求一次决策（模型原始文本）
    pub async fn decide(&self, messages: &[Message]) -> Result<String, AgentError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.request_timeout, self.client.complete(messages)).await {
                Ok(r) => r,
                Err(_) => Err(LlmError::Timeout(format!(
                    "no response within {}s",
                    self.request_timeout.as_secs_f32()
                ))),
            };

            match result {
                Ok(text) => {
                    debug!(
                        attempt,
                        preview = %text.chars().take(200).collect::<String>(),
                        "decision received"
                    );
                    return Ok(text);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let wait = self.retry.backoff_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "transient model error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    let source = if e.is_transient() {
                        DecisionError::Transient(e.to_string())
                    } else {
                        DecisionError::Permanent(e.to_string())
                    };
                    error!(attempt, error = %e, "decision failed");
                    return Err(AgentError::Decision {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff_for(1), Duration::from_secs(1));
        assert_eq!(retry.backoff_for(3), Duration::from_secs(4));
        assert_eq!(retry.backoff_for(7), Duration::from_secs(60));
        assert_eq!(retry.backoff_for(40), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let client = Arc::new(ScriptedLlmClient::from_steps(vec![
            Err(LlmError::RateLimited("429".into())),
            Err(LlmError::Unavailable("503".into())),
            Ok("<finish>ok</finish>".into()),
        ]));
        let engine = DecisionEngine::new(client.clone()).with_retry(fast_retry(5));
        let text = engine.decide(&[Message::user("go")]).await.unwrap();
        assert_eq!(text, "<finish>ok</finish>");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let client = Arc::new(ScriptedLlmClient::from_steps(vec![
            Err(LlmError::Auth("bad key".into())),
            Ok("unused".into()),
        ]));
        let engine = DecisionEngine::new(client.clone()).with_retry(fast_retry(5));
        let err = engine.decide(&[Message::user("go")]).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Decision {
                attempts: 1,
                source: DecisionError::Permanent(_)
            }
        ));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let client = Arc::new(ScriptedLlmClient::from_steps(
            (0..4).map(|_| Err(LlmError::Timeout("slow".into()))).collect(),
        ));
        let engine = DecisionEngine::new(client.clone()).with_retry(fast_retry(3));
        let err = engine.decide(&[Message::user("go")]).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Decision {
                attempts: 3,
                source: DecisionError::Transient(_)
            }
        ));
        assert_eq!(err.kind(), "decision_exhausted");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_request_timeout_counts_as_transient() {
        let client = Arc::new(ScriptedLlmClient::new(["late"]).with_delay(Duration::from_millis(200)));
        let engine = DecisionEngine::new(client)
            .with_retry(fast_retry(2))
            .with_request_timeout(Duration::from_millis(20));
        let err = engine.decide(&[Message::user("go")]).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Decision {
                attempts: 2,
                source: DecisionError::Transient(_)
            }
        ));
    }
}
