//! 决策循环：提示词构建与任务主循环

pub mod loop_;
pub mod prompt;

pub use loop_::TaskLoop;
pub use prompt::{build_messages, SYSTEM_PROMPT};
