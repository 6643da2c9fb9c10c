//! 任务主循环
//!
//! 每轮：检查取消 → 检查轮数上限 → 构建活动上下文 → 决策 → 解析 → 执行 → 持久化 → 更新进度。
//! 解析失败与动作失败作为观察回填，循环继续；决策失败、存储失败与取消使任务终止。

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actions::{parse_action, ActionExecutor, ExecutionContext, Observation, Workspace};
use crate::core::{AgentError, Task, TaskRegistry, TaskResult};
use crate::llm::DecisionEngine;
use crate::memory::{MemoryStore, Turn};
use crate::react::prompt::build_messages;

/// 日志中决策预览的最大字符数
const DECISION_PREVIEW_CHARS: usize = 200;

/// 循环所需的协作者（借用自 Orchestrator）
pub struct TaskLoop<'a> {
    pub engine: &'a DecisionEngine,
    pub executor: &'a ActionExecutor,
    pub memory: &'a MemoryStore,
    pub registry: &'a TaskRegistry,
    pub system_prompt: &'a str,
    pub max_observation_chars: usize,
}

impl<'a> TaskLoop<'a> {
    /// 驱动任务直到终态；返回值即写入注册表的结果
    pub async fn run(&self, task: &Task, workspace: &Workspace, cancel: &CancellationToken) -> TaskResult {
        let storage_failure = |e| TaskResult::from(&AgentError::Storage(e));

        // begin 只接受 PENDING 任务，轮次总是从 1 开始
        let mut turn_count = 0u32;
        let mut last_observation: Option<String> = None;

        let ctx = ExecutionContext {
            task_id: &task.id,
            workspace,
        };

        loop {
            if cancel.is_cancelled() {
                info!(task_id = %task.id, turn_count, "task cancelled");
                return TaskResult::from(&AgentError::Cancelled(task.id.clone()));
            }
            if turn_count >= task.max_turns {
                warn!(task_id = %task.id, max_turns = task.max_turns, "turn budget exhausted");
                return TaskResult::Timeout { last_observation };
            }

            let index = turn_count + 1;
            info!(task_id = %task.id, turn = index, max_turns = task.max_turns, "turn started");

            let context = match self.memory.active_context(&task.id).await {
                Ok(c) => c,
                Err(e) => return storage_failure(e),
            };
            let messages = build_messages(
                self.system_prompt,
                &task.instruction,
                &context,
                self.max_observation_chars,
            );

            let decision = match self.engine.decide(&messages).await {
                Ok(text) => text,
                Err(e) => return TaskResult::from(&e),
            };

            let (action, observation) = match parse_action(&decision) {
                Ok(action) => match self.executor.execute(&ctx, &action).await {
                    Ok(obs) => (Some(action), obs),
                    Err(e) => return storage_failure(e),
                },
                Err(e) => {
                    warn!(
                        task_id = %task.id,
                        turn = index,
                        error = %e,
                        preview = %decision.chars().take(DECISION_PREVIEW_CHARS).collect::<String>(),
                        "unparseable decision"
                    );
                    (None, Observation::ParseFailure(e))
                }
            };

            if let Observation::ActionFailure(e) = &observation {
                warn!(task_id = %task.id, turn = index, kind = e.kind(), error = %e, "action failed");
            }

            let finished = observation.finish_message().map(str::to_string);
            let rendered = observation.render(self.max_observation_chars);
            let turn = Turn::new(task.id.clone(), index, decision, action, observation);
            if let Err(e) = self.memory.append(turn).await {
                return storage_failure(e);
            }

            turn_count = index;
            self.registry
                .record_turn(&task.id, turn_count, rendered.clone())
                .await;
            last_observation = Some(rendered);

            if let Some(message) = finished {
                info!(task_id = %task.id, turns = turn_count, "task finished");
                return TaskResult::Completed { message };
            }
        }
    }
}
