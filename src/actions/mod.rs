//! 动作协议与执行
//!
//! - **types**：Action / Observation
//! - **parser**：从模型输出解析第一个动作块
//! - **workspace**：工作区沙箱
//! - **shell** / **search**：bash、grep、glob 的底层实现
//! - **executor**：ActionExecutor，执行动作并输出审计日志

pub mod executor;
pub mod parser;
pub mod search;
pub mod shell;
pub mod types;
pub mod workspace;

pub use executor::{ActionExecutor, ExecutionContext};
pub use parser::parse_action;
pub use shell::ShellRunner;
pub use types::{Action, ActionKind, CommandOutput, GrepMatch, Observation, Outcome};
pub use workspace::Workspace;
