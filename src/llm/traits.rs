//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / 脚本化测试客户端）实现 LlmClient::complete；
//! 失败以 LlmError 返回，is_transient() 决定 DecisionEngine 是否重试。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::llm::Message;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// 5xx、过载或连接失败
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::Timeout(_) | LlmError::Unavailable(_)
        )
    }

    /// 按错误文本归类（provider 错误类型不统一，只能看描述）
    ///
    /// 状态码按整词匹配，`max_tokens 1500` 之类的数字不会被当成 5xx。
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let [rate_limited, timeout, unavailable, auth] = classify_patterns();

        if rate_limited.is_match(&message) {
            LlmError::RateLimited(message)
        } else if timeout.is_match(&message) {
            LlmError::Timeout(message)
        } else if unavailable.is_match(&message) {
            LlmError::Unavailable(message)
        } else if auth.is_match(&message) {
            LlmError::Auth(message)
        } else {
            LlmError::InvalidRequest(message)
        }
    }
}

fn classify_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\b429\b|rate[ _]limit|too many requests|quota",
            r"(?i)timed out|timeout|deadline",
            r"(?i)\b50[0234]\b|internal server|bad gateway|unavailable|overloaded|connection|reset by peer|\beof\b",
            r"(?i)\b40[13]\b|unauthorized|api[ _]key|permission",
        ]
        .map(|p| Regex::new(p).expect("static regex"))
    })
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    fn model_name(&self) -> &str {
        "unknown"
    }

    /// 累计 token 使用：(prompt, completion, total)；不统计的实现返回 0
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert!(LlmError::classify("HTTP 429 Too Many Requests").is_transient());
        assert!(LlmError::classify("operation timed out").is_transient());
        assert!(LlmError::classify("503 Service Unavailable").is_transient());
        assert!(LlmError::classify("error sending request: connection refused").is_transient());

        let auth = LlmError::classify("401 Unauthorized: invalid api key");
        assert!(matches!(auth, LlmError::Auth(_)));
        assert!(!auth.is_transient());
        assert!(!LlmError::classify("model `gpt-9` does not exist").is_transient());
    }

    #[test]
    fn test_classify_matches_status_codes_as_words() {
        let err = LlmError::classify("max_tokens 1500 exceeds limit of 8192");
        assert!(matches!(err, LlmError::InvalidRequest(_)));
        assert!(!LlmError::classify("context length 4290 too long").is_transient());
        assert!(!LlmError::classify("invalid field geoffrey in request").is_transient());

        assert!(matches!(
            LlmError::classify("status 502: upstream error"),
            LlmError::Unavailable(_)
        ));
        assert!(matches!(
            LlmError::classify("stream ended: unexpected EOF"),
            LlmError::Unavailable(_)
        ));
        assert!(matches!(LlmError::classify("HTTP 403"), LlmError::Auth(_)));
    }
}
