//! 任务记忆
//!
//! - **turn**：Turn / Summary / MemoryEntry / RecallHit
//! - **log**：TurnLog 持久化日志（内存 / SQLite）
//! - **summarizer**：历史压缩（模型辅助 / 抽取式）
//! - **store**：MemoryStore，活动上下文与检索
//! - **tokenizer**：分词与 token 估算

pub mod log;
pub mod store;
pub mod summarizer;
pub mod tokenizer;
pub mod turn;

pub use log::{InMemoryTurnLog, SqliteTurnLog, TurnLog};
pub use store::{MemoryConfig, MemoryStats, MemoryStore};
pub use summarizer::{ExtractiveSummarizer, LlmSummarizer, Summarizer};
pub use turn::{MemoryEntry, RecallHit, RecallSource, Summary, Turn};
