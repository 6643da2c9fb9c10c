//! 动作执行器
//!
//! execute(ctx, action) 在任务工作区内完成动作并给出 Observation；动作失败（NotFound、
//! Timeout 等）是观察结果而非错误，只有记忆存储失败会作为 Err 返回。
//! 每次调用输出一条结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use crate::actions::search;
use crate::actions::shell::ShellRunner;
use crate::actions::types::{Action, Observation, Outcome};
use crate::actions::workspace::Workspace;
use crate::core::{ActionError, StorageError};
use crate::memory::MemoryStore;

/// 单次执行所需的任务上下文
pub struct ExecutionContext<'a> {
    pub task_id: &'a str,
    pub workspace: &'a Workspace,
}

pub struct ActionExecutor {
    memory: Arc<MemoryStore>,
    shell: ShellRunner,
    max_search_results: usize,
}

impl ActionExecutor {
    pub fn new(memory: Arc<MemoryStore>, command_timeout_secs: u64) -> Self {
        Self {
            memory,
            shell: ShellRunner::new(command_timeout_secs),
            max_search_results: 200,
        }
    }

    pub fn with_max_search_results(mut self, max_search_results: usize) -> Self {
        self.max_search_results = max_search_results.max(1);
        self
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        action: &Action,
    ) -> Result<Observation, StorageError> {
        let start = Instant::now();
        let result = self.dispatch(ctx, action).await?;

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err(e) => (false, e.kind()),
        };
        let audit = serde_json::json!({
            "event": "action_audit",
            "task_id": ctx.task_id,
            "kind": action.kind().as_str(),
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(action),
        });
        tracing::info!(audit = %audit.to_string(), "action");

        Ok(match result {
            Ok(outcome) => Observation::Success(outcome),
            Err(e) => Observation::ActionFailure(e),
        })
    }

    /// 外层 Result 是存储失败（致命），内层是动作失败（观察）
    async fn dispatch(
        &self,
        ctx: &ExecutionContext<'_>,
        action: &Action,
    ) -> Result<Result<Outcome, ActionError>, StorageError> {
        let ws = ctx.workspace;
        let outcome = match action {
            Action::Read {
                file_path,
                offset,
                limit,
            } => read_file(ws, file_path, *offset, *limit),
            Action::Write { file_path, content } => write_file(ws, file_path, content),
            Action::Edit {
                file_path,
                old_string,
                new_string,
                replace_all,
            } => edit_file(ws, file_path, old_string, new_string, *replace_all),
            Action::Bash { cmd, timeout_secs } => self
                .shell
                .run(cmd, ws.root(), *timeout_secs)
                .await
                .map(Outcome::Command),
            Action::Grep {
                pattern,
                path,
                include,
            } => search::grep(ws, path, pattern, include.as_deref(), self.max_search_results).map(
                |(matches, truncated)| Outcome::Matches {
                    pattern: pattern.clone(),
                    matches,
                    truncated,
                },
            ),
            Action::Glob { pattern, path } => {
                search::glob_paths(ws, path, pattern, self.max_search_results).map(
                    |(paths, truncated)| Outcome::Paths {
                        pattern: pattern.clone(),
                        paths,
                        truncated,
                    },
                )
            }
            Action::MemoryQuery { query, limit } => {
                let hits = self.memory.recall(ctx.task_id, query, *limit)?;
                Ok(Outcome::Recall {
                    query: query.clone(),
                    hits,
                })
            }
            Action::Finish { message } => Ok(Outcome::Finished {
                message: message.clone(),
            }),
        };
        Ok(outcome)
    }
}

fn io_error(path: &str, e: std::io::Error) -> ActionError {
    match e.kind() {
        std::io::ErrorKind::NotFound => ActionError::NotFound(path.to_string()),
        _ => ActionError::Io(format!("{}: {}", path, e)),
    }
}

fn read_file(
    ws: &Workspace,
    path: &str,
    offset: Option<usize>,
    limit: Option<usize>,
) -> Result<Outcome, ActionError> {
    let full = ws.resolve(path)?;
    if !full.exists() {
        return Err(ActionError::NotFound(path.to_string()));
    }
    let content = std::fs::read_to_string(&full).map_err(|e| io_error(path, e))?;
    let total_lines = content.lines().count();

    let content = if offset.is_some() || limit.is_some() {
        let skip = offset.unwrap_or(1).saturating_sub(1);
        let take = limit.unwrap_or(usize::MAX);
        content.lines().skip(skip).take(take).collect::<Vec<_>>().join("\n")
    } else {
        content
    };

    Ok(Outcome::FileContent {
        path: ws.display(&full),
        content,
        total_lines,
    })
}

fn write_file(ws: &Workspace, path: &str, content: &str) -> Result<Outcome, ActionError> {
    let full = ws.resolve(path)?;
    if full.is_dir() {
        return Err(ActionError::Io(format!("{} is a directory", path)));
    }
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(path, e))?;
    }
    std::fs::write(&full, content).map_err(|e| io_error(path, e))?;
    Ok(Outcome::FileWritten {
        path: ws.display(&full),
        bytes: content.len(),
    })
}

fn edit_file(
    ws: &Workspace,
    path: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<Outcome, ActionError> {
    let full = ws.resolve(path)?;
    if !full.is_file() {
        return Err(ActionError::NotFound(path.to_string()));
    }
    let content = std::fs::read_to_string(&full).map_err(|e| io_error(path, e))?;
    let count = content.matches(old).count();
    let display = ws.display(&full);

    if count == 0 {
        return Err(ActionError::NoMatch { path: display });
    }
    if count > 1 && !replace_all {
        return Err(ActionError::AmbiguousMatch {
            path: display,
            count,
        });
    }

    let updated = if replace_all {
        content.replace(old, new)
    } else {
        content.replacen(old, new, 1)
    };
    std::fs::write(&full, updated).map_err(|e| io_error(path, e))?;
    Ok(Outcome::FileEdited {
        path: display,
        replacements: count,
    })
}

fn args_preview(action: &Action) -> String {
    let s = serde_json::to_string(action).unwrap_or_default();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ExtractiveSummarizer, InMemoryTurnLog, MemoryConfig};

    fn setup() -> (tempfile::TempDir, Workspace, ActionExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let memory = Arc::new(MemoryStore::new(
            Arc::new(InMemoryTurnLog::new()),
            Arc::new(ExtractiveSummarizer),
            MemoryConfig::default(),
        ));
        (dir, ws, ActionExecutor::new(memory, 5))
    }

    async fn run(exec: &ActionExecutor, ws: &Workspace, action: Action) -> Observation {
        let ctx = ExecutionContext {
            task_id: "task_test",
            workspace: ws,
        };
        exec.execute(&ctx, &action).await.unwrap()
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, ws, exec) = setup();
        let obs = run(
            &exec,
            &ws,
            Action::Write {
                file_path: "notes/hello.txt".into(),
                content: "line1\nline2\nline3".into(),
            },
        )
        .await;
        assert_eq!(
            obs,
            Observation::Success(Outcome::FileWritten {
                path: "notes/hello.txt".into(),
                bytes: 17,
            })
        );

        let obs = run(
            &exec,
            &ws,
            Action::Read {
                file_path: "notes/hello.txt".into(),
                offset: Some(2),
                limit: Some(1),
            },
        )
        .await;
        assert_eq!(
            obs,
            Observation::Success(Outcome::FileContent {
                path: "notes/hello.txt".into(),
                content: "line2".into(),
                total_lines: 3,
            })
        );
    }

    #[tokio::test]
    async fn test_read_missing_and_escape() {
        let (_dir, ws, exec) = setup();
        let obs = run(
            &exec,
            &ws,
            Action::Read {
                file_path: "missing.txt".into(),
                offset: None,
                limit: None,
            },
        )
        .await;
        assert_eq!(obs.failure_kind(), Some("not_found"));

        let obs = run(
            &exec,
            &ws,
            Action::Write {
                file_path: "../escape.txt".into(),
                content: "x".into(),
            },
        )
        .await;
        assert_eq!(obs.failure_kind(), Some("permission_denied"));
    }

    #[tokio::test]
    async fn test_edit_match_rules() {
        let (_dir, ws, exec) = setup();
        std::fs::write(ws.root().join("a.txt"), "foo bar foo").unwrap();

        let edit = |old: &str, replace_all| Action::Edit {
            file_path: "a.txt".into(),
            old_string: old.into(),
            new_string: "baz".into(),
            replace_all,
        };

        let obs = run(&exec, &ws, edit("qux", false)).await;
        assert_eq!(obs.failure_kind(), Some("no_match"));

        let obs = run(&exec, &ws, edit("foo", false)).await;
        assert_eq!(obs.failure_kind(), Some("ambiguous_match"));
        assert_eq!(std::fs::read_to_string(ws.root().join("a.txt")).unwrap(), "foo bar foo");

        let obs = run(&exec, &ws, edit("bar", false)).await;
        assert!(!obs.is_failure());
        assert_eq!(std::fs::read_to_string(ws.root().join("a.txt")).unwrap(), "foo baz foo");

        let obs = run(&exec, &ws, edit("foo", true)).await;
        assert_eq!(
            obs,
            Observation::Success(Outcome::FileEdited {
                path: "a.txt".into(),
                replacements: 2,
            })
        );
        assert_eq!(std::fs::read_to_string(ws.root().join("a.txt")).unwrap(), "baz baz baz");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bash_nonzero_exit_is_success() {
        let (_dir, ws, exec) = setup();
        let obs = run(
            &exec,
            &ws,
            Action::Bash {
                cmd: "echo out; exit 7".into(),
                timeout_secs: None,
            },
        )
        .await;
        let Observation::Success(Outcome::Command(out)) = obs else {
            panic!("expected command output");
        };
        assert_eq!(out.exit_code, Some(7));
        assert_eq!(out.stdout, "out\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bash_timeout_observation() {
        let (_dir, ws, exec) = setup();
        let obs = run(
            &exec,
            &ws,
            Action::Bash {
                cmd: "sleep 20".into(),
                timeout_secs: Some(1),
            },
        )
        .await;
        assert_eq!(obs, Observation::ActionFailure(ActionError::Timeout { secs: 1 }));
    }

    #[tokio::test]
    async fn test_finish_and_empty_recall() {
        let (_dir, ws, exec) = setup();
        let obs = run(&exec, &ws, Action::Finish { message: "done".into() }).await;
        assert_eq!(obs.finish_message(), Some("done"));

        let obs = run(
            &exec,
            &ws,
            Action::MemoryQuery {
                query: "anything".into(),
                limit: None,
            },
        )
        .await;
        assert_eq!(
            obs,
            Observation::Success(Outcome::Recall {
                query: "anything".into(),
                hits: vec![],
            })
        );
    }
}
