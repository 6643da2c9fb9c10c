//! 核心编排层：错误分类、任务状态机、任务注册表、Orchestrator

pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod state;

pub use error::{ActionError, AgentError, DecisionError, ParseError, StorageError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, TaskMemory};
pub use registry::TaskRegistry;
pub use state::{Task, TaskId, TaskResult, TaskStatus, TaskStatusView, TaskSummary};
