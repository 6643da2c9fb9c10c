//! 任务状态机：PENDING → RUNNING → {COMPLETED | FAILED | TIMEOUT}
//!
//! 终态不可再迁移；Task 记录由 TaskRegistry 持有，对外只暴露克隆出的视图。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 任务 ID（`task_<uuid>`）
pub type TaskId = String;

pub fn new_task_id() -> TaskId {
    format!("task_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => next == TaskStatus::Running,
            TaskStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务的终态结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskResult {
    Completed { message: String },
    Failed { kind: String, message: String },
    Timeout { last_observation: Option<String> },
}

impl TaskResult {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        TaskResult::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            TaskResult::Completed { .. } => TaskStatus::Completed,
            TaskResult::Failed { .. } => TaskStatus::Failed,
            TaskResult::Timeout { .. } => TaskStatus::Timeout,
        }
    }
}

impl From<&crate::core::AgentError> for TaskResult {
    fn from(err: &crate::core::AgentError) -> Self {
        TaskResult::failed(err.kind(), err.to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub instruction: String,
    pub max_turns: u32,
    pub status: TaskStatus,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    pub updated_at: i64,
    pub turn_count: u32,
    /// 最近一轮观察的渲染文本
    pub last_observation: Option<String>,
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn new(instruction: impl Into<String>, max_turns: u32) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_task_id(),
            instruction: instruction.into(),
            max_turns,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            turn_count: 0,
            last_observation: None,
            result: None,
        }
    }

    pub fn status_view(&self) -> TaskStatusView {
        TaskStatusView {
            id: self.id.clone(),
            status: self.status,
            turn_count: self.turn_count,
            max_turns: self.max_turns,
            last_observation: self.last_observation.clone(),
            result: self.result.clone(),
        }
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            instruction: self.instruction.clone(),
            status: self.status,
            turn_count: self.turn_count,
            created_at: self.created_at,
        }
    }
}

/// getTaskStatus 的返回视图
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskStatusView {
    pub id: TaskId,
    pub status: TaskStatus,
    pub turn_count: u32,
    pub max_turns: u32,
    pub last_observation: Option<String>,
    pub result: Option<TaskResult>,
}

/// listTasks 的条目
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub instruction: String,
    pub status: TaskStatus,
    pub turn_count: u32,
    pub created_at: i64,
}
