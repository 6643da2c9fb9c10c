//! 错误分类
//!
//! - ParseError / ActionError：在循环内就地恢复，作为 Observation 反馈给模型自我纠正
//! - DecisionError：瞬时错误重试，超出上限或永久错误使任务 FAILED
//! - StorageError：记忆存储读写失败，始终使任务 FAILED
//!
//! AgentError 是对调用方（API / CLI）暴露的顶层错误；kind() 给出写入任务结果的稳定标识。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 动作块解析失败（不会产生部分填充的 Action）
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseError {
    #[error("no action block found")]
    NoActionBlock,

    #[error("unknown action kind <{0}>")]
    UnknownKind(String),

    #[error("<{kind}> is missing required field `{field}`")]
    MissingField { kind: String, field: String },

    #[error("<{kind}> field `{field}` expects {expected}, got {value:?}")]
    InvalidField {
        kind: String,
        field: String,
        expected: String,
        value: String,
    },
}

/// 动作执行失败；作为该轮的 Observation 记录，不会中止任务
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0} is outside the workspace root")]
    PermissionDenied(String),

    #[error("old_string was not found in {path}")]
    NoMatch { path: String },

    #[error("old_string matches {count} times in {path}; it must match exactly once")]
    AmbiguousMatch { path: String, count: usize },

    #[error("io error: {0}")]
    Io(String),

    #[error("command timed out after {secs}s and was killed")]
    Timeout { secs: u64 },
}

impl ActionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::NotFound(_) => "not_found",
            ActionError::PermissionDenied(_) => "permission_denied",
            ActionError::NoMatch { .. } => "no_match",
            ActionError::AmbiguousMatch { .. } => "ambiguous_match",
            ActionError::Io(_) => "io_error",
            ActionError::Timeout { .. } => "timeout",
        }
    }
}

/// Decision Engine 的最终失败分类
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecisionError {
    /// 瞬时错误（超时、限流、5xx），重试次数已耗尽
    #[error("transient failure: {0}")]
    Transient(String),

    /// 永久错误（鉴权、请求格式），不重试
    #[error("permanent failure: {0}")]
    Permanent(String),
}

/// 记忆存储错误：任何追加/读取失败都对任务致命
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("turn {got} appended out of order for task {task_id} (expected {expected})")]
    OutOfOrder {
        task_id: String,
        expected: u32,
        got: u32,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 模型辅助压缩失败（与存储失败同样视为致命）
    #[error("summarization failed: {0}")]
    Summarization(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// 顶层错误：任务终止原因与编排层调用错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("decision engine gave up after {attempts} attempt(s): {source}")]
    Decision {
        attempts: u32,
        #[source]
        source: DecisionError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task {0} is already running")]
    TaskAlreadyRunning(String),

    #[error("task {id} has already left PENDING (status {status})")]
    TaskAlreadyStarted { id: String, status: String },

    #[error("task {0} was cancelled")]
    Cancelled(String),

    #[error("workspace error: {0}")]
    Workspace(#[from] ActionError),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 写入 TaskResult::Failed 的错误类别
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Decision {
                source: DecisionError::Transient(_),
                ..
            } => "decision_exhausted",
            AgentError::Decision {
                source: DecisionError::Permanent(_),
                ..
            } => "decision_permanent",
            AgentError::Storage(_) => "storage",
            AgentError::TaskNotFound(_) => "task_not_found",
            AgentError::TaskAlreadyRunning(_) => "task_already_running",
            AgentError::TaskAlreadyStarted { .. } => "task_already_started",
            AgentError::Cancelled(_) => "cancelled",
            AgentError::Workspace(_) => "workspace",
            AgentError::Config(_) => "config",
        }
    }

    /// 只有决策耗尽、存储失败与取消会终止任务；其余错误由循环自行消化
    pub fn is_fatal_to_task(&self) -> bool {
        matches!(
            self,
            AgentError::Decision { .. }
                | AgentError::Storage(_)
                | AgentError::Cancelled(_)
                | AgentError::Workspace(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_error_kinds() {
        let exhausted = AgentError::Decision {
            attempts: 5,
            source: DecisionError::Transient("rate limited".into()),
        };
        assert_eq!(exhausted.kind(), "decision_exhausted");
        assert!(exhausted.to_string().contains("5 attempt"));

        let permanent = AgentError::Decision {
            attempts: 1,
            source: DecisionError::Permanent("invalid api key".into()),
        };
        assert_eq!(permanent.kind(), "decision_permanent");
        assert!(permanent.is_fatal_to_task());
    }

    #[test]
    fn test_storage_error_is_surfaced_verbatim() {
        let err = AgentError::from(StorageError::Backend("disk full".into()));
        assert_eq!(err.kind(), "storage");
        assert_eq!(err.to_string(), "storage backend error: disk full");
    }

    #[test]
    fn test_action_error_kind() {
        let err = ActionError::AmbiguousMatch {
            path: "a.txt".into(),
            count: 2,
        };
        assert_eq!(err.kind(), "ambiguous_match");
        assert!(err.to_string().contains("2 times"));
    }
}
