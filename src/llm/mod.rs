//! LLM 层：客户端抽象、OpenAI 兼容实现与 Decision Engine

pub mod decision;
pub mod message;
pub mod mock;
pub mod openai;
pub mod providers;
pub mod traits;

pub use decision::{DecisionEngine, RetryConfig};
pub use message::{Message, Role};
pub use mock::ScriptedLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use providers::create_llm_from_config;
pub use traits::{LlmClient, LlmError};
