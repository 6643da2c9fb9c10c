//! 脚本化 LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预设的回复或错误；脚本用尽后返回 repeat 回复（若设置）否则返回永久错误。
//! 记录每次调用收到的消息，便于断言 prompt 内容。

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message};

#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    steps: Mutex<VecDeque<Result<String, LlmError>>>,
    repeat: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_steps(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn from_steps(steps: Vec<Result<String, LlmError>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    /// 每次都返回同一回复
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self::default().then_repeat(reply)
    }

    /// 脚本用尽后一直返回该回复
    pub fn then_repeat(mut self, reply: impl Into<String>) -> Self {
        self.repeat = Some(reply.into());
        self
    }

    /// 每次调用先等待 delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match (next, &self.repeat) {
            (Some(step), _) => step,
            (None, Some(reply)) => Ok(reply.clone()),
            (None, None) => Err(LlmError::InvalidRequest("script exhausted".to_string())),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
