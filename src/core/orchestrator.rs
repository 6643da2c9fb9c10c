//! Orchestrator：任务生命周期的对外入口
//!
//! 负责：按配置装配 LLM / Decision Engine / MemoryStore / ActionExecutor，创建任务、
//! 驱动任务主循环（同步等待或后台 spawn）、取消、查询状态与记忆。
//! 同一任务同时只会有一个循环在跑（由 TaskRegistry::begin 保证）。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::actions::{ActionExecutor, Workspace};
use crate::config::{AppConfig, SummarizerKind};
use crate::core::registry::TaskRegistry;
use crate::core::state::{Task, TaskId, TaskResult, TaskStatusView, TaskSummary};
use crate::core::{AgentError, StorageError};
use crate::llm::{create_llm_from_config, DecisionEngine, LlmClient, RetryConfig};
use crate::memory::{
    ExtractiveSummarizer, InMemoryTurnLog, LlmSummarizer, MemoryConfig, MemoryEntry, MemoryStats,
    MemoryStore, RecallHit, SqliteTurnLog, Summarizer, Turn, TurnLog,
};
use crate::react::{TaskLoop, SYSTEM_PROMPT};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub workspace_root: PathBuf,
    pub isolate_task_workspaces: bool,
    pub default_max_turns: u32,
    pub max_observation_chars: usize,
    pub system_prompt: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("./workspace"),
            isolate_task_workspaces: true,
            default_max_turns: 50,
            max_observation_chars: 12_000,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            workspace_root: cfg.app.workspace_root.clone(),
            isolate_task_workspaces: cfg.app.isolate_task_workspaces,
            default_max_turns: cfg.app.default_max_turns.max(1),
            max_observation_chars: cfg.execution.max_observation_chars,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: TaskRegistry,
    engine: Arc<DecisionEngine>,
    memory: Arc<MemoryStore>,
    executor: ActionExecutor,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        engine: Arc<DecisionEngine>,
        memory: Arc<MemoryStore>,
        executor: ActionExecutor,
    ) -> Self {
        Self {
            config,
            registry: TaskRegistry::new(),
            engine,
            memory,
            executor,
        }
    }

    /// 按配置装配全部组件（LLM 客户端来自 [llm] 段）
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let client = create_llm_from_config(&cfg.llm)?;
        Self::with_client(cfg, client)
    }

    /// 使用给定的 LLM 客户端装配（测试与嵌入场景）
    pub fn with_client(cfg: &AppConfig, client: Arc<dyn LlmClient>) -> Result<Self, AgentError> {
        let engine = Arc::new(
            DecisionEngine::new(client)
                .with_retry(RetryConfig::from(&cfg.llm.retry))
                .with_request_timeout(cfg.llm.request_timeout()),
        );

        let log: Arc<dyn TurnLog> = match &cfg.memory.db_path {
            Some(path) => Arc::new(SqliteTurnLog::open(path)?),
            None => Arc::new(InMemoryTurnLog::new()),
        };
        let summarizer: Arc<dyn Summarizer> = match cfg.memory.summarizer {
            SummarizerKind::Model => Arc::new(LlmSummarizer::new(engine.clone())),
            SummarizerKind::Extractive => Arc::new(ExtractiveSummarizer),
        };
        let memory = Arc::new(MemoryStore::new(
            log,
            summarizer,
            MemoryConfig::from(&cfg.memory),
        ));
        let executor = ActionExecutor::new(memory.clone(), cfg.execution.command_timeout_secs)
            .with_max_search_results(cfg.execution.max_search_results);

        Ok(Self::new(OrchestratorConfig::from(cfg), engine, memory, executor))
    }

    /// 创建 PENDING 任务；max_turns 未指定时用配置默认值
    pub async fn create_task(&self, instruction: impl Into<String>, max_turns: Option<u32>) -> TaskId {
        let max_turns = max_turns.unwrap_or(self.config.default_max_turns).max(1);
        let id = self.registry.create(instruction, max_turns).await;
        info!(task_id = %id, max_turns, "task created");
        id
    }

    /// 在当前协程中运行任务直到终态，返回终态快照
    pub async fn run_task(&self, id: &str) -> Result<Task, AgentError> {
        let (task, cancel) = self.registry.begin(id).await?;
        info!(
            task_id = %task.id,
            instruction = %task.instruction.chars().take(80).collect::<String>(),
            "task started"
        );

        let result = match Workspace::open(self.workspace_path(id)) {
            Ok(workspace) => {
                let task_loop = TaskLoop {
                    engine: &self.engine,
                    executor: &self.executor,
                    memory: &self.memory,
                    registry: &self.registry,
                    system_prompt: &self.config.system_prompt,
                    max_observation_chars: self.config.max_observation_chars,
                };
                task_loop.run(&task, &workspace, &cancel).await
            }
            Err(e) => TaskResult::from(&AgentError::Workspace(e)),
        };

        if let TaskResult::Failed { kind, message } = &result {
            error!(task_id = %id, kind = %kind, message = %message, "task failed");
        }
        let finished = self.registry.finish(id, result).await?;
        let (prompt_tokens, completion_tokens, total_tokens) = self.engine.client().token_usage();
        info!(
            task_id = %id,
            status = %finished.status,
            turns = finished.turn_count,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            "task ended"
        );
        Ok(finished)
    }

    /// 在后台运行任务
    pub fn spawn_task(self: &Arc<Self>, id: TaskId) -> JoinHandle<Result<Task, AgentError>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_task(&id).await })
    }

    /// 创建并在后台运行
    pub async fn submit(
        self: &Arc<Self>,
        instruction: impl Into<String>,
        max_turns: Option<u32>,
    ) -> (TaskId, JoinHandle<Result<Task, AgentError>>) {
        let id = self.create_task(instruction, max_turns).await;
        let handle = self.spawn_task(id.clone());
        (id, handle)
    }

    /// 请求取消；任务在下一轮开始前以 FAILED(cancelled) 结束
    pub async fn cancel_task(&self, id: &str) -> Result<(), AgentError> {
        self.registry.cancel(id).await?;
        info!(task_id = %id, "cancellation requested");
        Ok(())
    }

    pub async fn task_status(&self, id: &str) -> Result<TaskStatusView, AgentError> {
        self.registry.status(id).await
    }

    pub async fn task(&self, id: &str) -> Result<Task, AgentError> {
        self.registry.get(id).await
    }

    pub async fn list_tasks(&self) -> Vec<TaskSummary> {
        self.registry.list().await
    }

    /// 任务的记忆视图
    pub async fn memory(&self, id: &str) -> Result<TaskMemory<'_>, AgentError> {
        self.registry.get(id).await?;
        Ok(TaskMemory {
            store: &self.memory,
            task_id: id.to_string(),
        })
    }

    /// 任务工作区路径
    pub fn workspace_path(&self, id: &str) -> PathBuf {
        if self.config.isolate_task_workspaces {
            self.config.workspace_root.join(id)
        } else {
            self.config.workspace_root.clone()
        }
    }
}

/// 绑定到单个任务的 MemoryStore 句柄
pub struct TaskMemory<'a> {
    store: &'a MemoryStore,
    task_id: String,
}

impl TaskMemory<'_> {
    pub async fn active_context(&self) -> Result<Vec<MemoryEntry>, StorageError> {
        self.store.active_context(&self.task_id).await
    }

    pub fn recall(&self, query: &str, limit: Option<usize>) -> Result<Vec<RecallHit>, StorageError> {
        self.store.recall(&self.task_id, query, limit)
    }

    pub fn turns(&self) -> Result<Vec<Turn>, StorageError> {
        self.store.turns(&self.task_id)
    }

    pub fn stats(&self) -> Result<MemoryStats, StorageError> {
        self.store.stats(&self.task_id)
    }
}
