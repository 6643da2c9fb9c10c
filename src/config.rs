//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读默认 TOML，再读显式指定的文件，最后用环境变量 `ORCA__*` 覆盖
//! （双下划线表示嵌套，如 `ORCA__LLM__PROVIDER=deepseek`、`ORCA__MEMORY__CONTEXT_BUDGET_TOKENS=8000`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::RetryConfig;
use crate::memory::MemoryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub execution: ExecutionSection,
    pub memory: MemorySection,
}

/// [app] 段：工作区与任务默认值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub workspace_root: PathBuf,
    /// 每个任务使用 `<workspace_root>/<task_id>` 作为独立工作区
    pub isolate_task_workspaces: bool,
    pub default_max_turns: u32,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("./workspace"),
            isolate_task_workspaces: true,
            default_max_turns: 50,
        }
    }
}

/// [llm] 段：提供方、模型与调用策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / deepseek / qwen
    pub provider: String,
    /// 未设置时使用提供方默认模型
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            base_url: None,
            temperature: 0.1,
            request_timeout_secs: 120,
            retry: RetrySection::default(),
        }
    }
}

impl LlmSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// [llm.retry] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
        }
    }
}

impl From<&RetrySection> for RetryConfig {
    fn from(s: &RetrySection) -> Self {
        RetryConfig {
            max_attempts: s.max_attempts.max(1),
            initial_backoff: Duration::from_millis(s.initial_backoff_ms),
            max_backoff: Duration::from_millis(s.max_backoff_ms),
        }
    }
}

/// [execution] 段：动作执行限制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    pub command_timeout_secs: u64,
    /// 回填给模型的单条观察最大字符数
    pub max_observation_chars: usize,
    pub max_search_results: usize,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: 300,
            max_observation_chars: 12_000,
            max_search_results: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerKind {
    /// 模型辅助压缩
    Model,
    /// 逐轮抽取，不调用模型
    Extractive,
}

/// [memory] 段：上下文预算与持久化
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub context_budget_tokens: usize,
    pub keep_recent_turns: usize,
    pub recall_limit: usize,
    pub summarizer: SummarizerKind,
    /// SQLite 文件路径；未设置时仅保存在内存
    pub db_path: Option<PathBuf>,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            context_budget_tokens: 6000,
            keep_recent_turns: 4,
            recall_limit: 5,
            summarizer: SummarizerKind::Model,
            db_path: None,
        }
    }
}

impl From<&MemorySection> for MemoryConfig {
    fn from(s: &MemorySection) -> Self {
        MemoryConfig {
            context_budget_tokens: s.context_budget_tokens,
            keep_recent_turns: s.keep_recent_turns,
            recall_limit: s.recall_limit.max(1),
        }
    }
}

/// 加载配置：默认文件（config/、../config/、当前目录）→ 指定文件 → 环境变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ORCA")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.default_max_turns, 50);
        assert_eq!(cfg.execution.command_timeout_secs, 300);
        assert_eq!(cfg.execution.max_observation_chars, 12_000);
        assert_eq!(cfg.llm.retry.max_attempts, 5);
        assert_eq!(cfg.memory.summarizer, SummarizerKind::Model);
        assert!(cfg.memory.db_path.is_none());
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orca.toml");
        std::fs::write(
            &path,
            "[llm]\nprovider = \"deepseek\"\n\n[llm.retry]\nmax_attempts = 2\n\n[memory]\nsummarizer = \"extractive\"\nkeep_recent_turns = 2\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.provider, "deepseek");
        assert_eq!(cfg.llm.retry.max_attempts, 2);
        assert_eq!(cfg.llm.retry.max_backoff_ms, 60_000);
        assert_eq!(cfg.memory.summarizer, SummarizerKind::Extractive);
        assert_eq!(cfg.memory.keep_recent_turns, 2);
        assert_eq!(cfg.execution.command_timeout_secs, 300);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(load_config(Some(PathBuf::from("/nonexistent/orca.toml"))).is_err());
    }
}
