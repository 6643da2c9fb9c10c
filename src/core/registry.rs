//! 任务注册表：任务记录、状态迁移与取消令牌
//!
//! 状态迁移在同一把写锁内完成，保证同一任务只会被一个循环驱动。

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::state::{Task, TaskId, TaskResult, TaskStatus, TaskStatusView, TaskSummary};
use crate::core::AgentError;

struct TaskEntry {
    task: Task,
    cancel: CancellationToken,
}

/// 内存任务注册表（任务元数据不落盘，轮次由 MemoryStore 持久化）
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个 PENDING 任务并返回其 ID
    pub async fn create(&self, instruction: impl Into<String>, max_turns: u32) -> TaskId {
        let task = Task::new(instruction, max_turns);
        let id = task.id.clone();
        self.tasks.write().await.insert(
            id.clone(),
            TaskEntry {
                task,
                cancel: CancellationToken::new(),
            },
        );
        debug!(task_id = %id, max_turns, "task registered");
        id
    }

    pub async fn get(&self, id: &str) -> Result<Task, AgentError> {
        self.tasks
            .read()
            .await
            .get(id)
            .map(|e| e.task.clone())
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))
    }

    /// PENDING → RUNNING；返回该任务的取消令牌
    pub async fn begin(&self, id: &str) -> Result<(Task, CancellationToken), AgentError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(id)
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?;

        match entry.task.status {
            TaskStatus::Pending => {
                entry.task.status = TaskStatus::Running;
                entry.task.updated_at = chrono::Utc::now().timestamp_millis();
                Ok((entry.task.clone(), entry.cancel.clone()))
            }
            TaskStatus::Running => Err(AgentError::TaskAlreadyRunning(id.to_string())),
            status => Err(AgentError::TaskAlreadyStarted {
                id: id.to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// 每轮持久化成功后更新进度
    pub async fn record_turn(&self, id: &str, turn_count: u32, last_observation: String) {
        if let Some(entry) = self.tasks.write().await.get_mut(id) {
            entry.task.turn_count = turn_count;
            entry.task.last_observation = Some(last_observation);
            entry.task.updated_at = chrono::Utc::now().timestamp_millis();
        }
    }

    /// RUNNING → 终态；终态之后的结果会被忽略
    pub async fn finish(&self, id: &str, result: TaskResult) -> Result<Task, AgentError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(id)
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?;

        let next = result.status();
        if entry.task.status.can_transition_to(next) {
            entry.task.status = next;
            entry.task.result = Some(result);
            entry.task.updated_at = chrono::Utc::now().timestamp_millis();
        } else {
            warn!(
                task_id = %id,
                from = %entry.task.status,
                to = %next,
                "ignoring invalid task transition"
            );
        }
        Ok(entry.task.clone())
    }

    /// 请求取消：运行中的循环在下一轮开始前观察到并以 FAILED(cancelled) 结束
    pub async fn cancel(&self, id: &str) -> Result<(), AgentError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(id)
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?;
        if !entry.task.status.is_terminal() {
            entry.cancel.cancel();
        }
        Ok(())
    }

    pub async fn status(&self, id: &str) -> Result<TaskStatusView, AgentError> {
        self.get(id).await.map(|t| t.status_view())
    }

    /// 按创建时间排序
    pub async fn list(&self) -> Vec<TaskSummary> {
        let mut out: Vec<TaskSummary> = self
            .tasks
            .read()
            .await
            .values()
            .map(|e| e.task.summary())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_begin_is_exclusive() {
        let registry = TaskRegistry::new();
        let id = registry.create("x", 3).await;

        let (task, _token) = registry.begin(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);

        let err = registry.begin(&id).await.unwrap_err();
        assert!(matches!(err, AgentError::TaskAlreadyRunning(_)));
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let registry = TaskRegistry::new();
        let id = registry.create("x", 3).await;
        registry.begin(&id).await.unwrap();

        let done = registry
            .finish(&id, TaskResult::Completed { message: "ok".into() })
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        let after = registry
            .finish(&id, TaskResult::failed("storage", "late"))
            .await
            .unwrap();
        assert_eq!(after.status, TaskStatus::Completed);
        assert_eq!(after.result, Some(TaskResult::Completed { message: "ok".into() }));

        let err = registry.begin(&id).await.unwrap_err();
        assert!(matches!(err, AgentError::TaskAlreadyStarted { .. }));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let registry = TaskRegistry::new();
        assert!(matches!(
            registry.status("task_missing").await,
            Err(AgentError::TaskNotFound(_))
        ));
        assert!(registry.cancel("task_missing").await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_trips_token() {
        let registry = TaskRegistry::new();
        let id = registry.create("x", 3).await;
        let (_, token) = registry.begin(&id).await.unwrap();
        registry.cancel(&id).await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_list_orders_by_creation() {
        let registry = TaskRegistry::new();
        let a = registry.create("a", 1).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let b = registry.create("b", 1).await;
        let ids: Vec<_> = registry.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a, b]);
    }
}
