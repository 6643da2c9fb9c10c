//! 动作与观察类型
//!
//! Action 是模型一轮决策的结构化结果；Observation 是执行结果（成功产出或分类失败），
//! 二者都随 Turn 一起持久化，因此都可序列化。

use serde::{Deserialize, Serialize};

use crate::core::{ActionError, ParseError};
use crate::memory::RecallHit;

/// 动作类别（块标签）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Read,
    Write,
    Edit,
    Bash,
    Grep,
    Glob,
    MemoryQuery,
    Finish,
}

impl ActionKind {
    /// 标签名（大小写不敏感，含别名）
    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag.to_ascii_lowercase().as_str() {
            "read" | "file" => ActionKind::Read,
            "write" => ActionKind::Write,
            "edit" => ActionKind::Edit,
            "bash" | "shell" => ActionKind::Bash,
            "grep" | "search" => ActionKind::Grep,
            "glob" | "find" => ActionKind::Glob,
            "memory-query" | "memory_query" | "memory" | "recall" => ActionKind::MemoryQuery,
            "finish" => ActionKind::Finish,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Read => "read",
            ActionKind::Write => "write",
            ActionKind::Edit => "edit",
            ActionKind::Bash => "bash",
            ActionKind::Grep => "grep",
            ActionKind::Glob => "glob",
            ActionKind::MemoryQuery => "memory-query",
            ActionKind::Finish => "finish",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Action {
    Read {
        file_path: String,
        offset: Option<usize>,
        limit: Option<usize>,
    },
    Write {
        file_path: String,
        content: String,
    },
    Edit {
        file_path: String,
        old_string: String,
        new_string: String,
        replace_all: bool,
    },
    Bash {
        cmd: String,
        timeout_secs: Option<u64>,
    },
    Grep {
        pattern: String,
        path: String,
        include: Option<String>,
    },
    Glob {
        pattern: String,
        path: String,
    },
    MemoryQuery {
        query: String,
        limit: Option<usize>,
    },
    Finish {
        message: String,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Read { .. } => ActionKind::Read,
            Action::Write { .. } => ActionKind::Write,
            Action::Edit { .. } => ActionKind::Edit,
            Action::Bash { .. } => ActionKind::Bash,
            Action::Grep { .. } => ActionKind::Grep,
            Action::Glob { .. } => ActionKind::Glob,
            Action::MemoryQuery { .. } => ActionKind::MemoryQuery,
            Action::Finish { .. } => ActionKind::Finish,
        }
    }

    /// 单行描述，用于日志与摘要
    pub fn label(&self) -> String {
        match self {
            Action::Read { file_path, .. } => format!("read {}", file_path),
            Action::Write { file_path, content } => {
                format!("write {} ({} bytes)", file_path, content.len())
            }
            Action::Edit { file_path, .. } => format!("edit {}", file_path),
            Action::Bash { cmd, .. } => format!("bash `{}`", truncate_chars(cmd, 80)),
            Action::Grep { pattern, path, .. } => format!("grep '{}' in {}", pattern, path),
            Action::Glob { pattern, path } => format!("glob '{}' in {}", pattern, path),
            Action::MemoryQuery { query, .. } => format!("memory-query '{}'", query),
            Action::Finish { .. } => "finish".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// 被信号杀死时为 None
    pub exit_code: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
}

/// 成功执行的产出
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    FileContent {
        path: String,
        content: String,
        total_lines: usize,
    },
    FileWritten {
        path: String,
        bytes: usize,
    },
    FileEdited {
        path: String,
        replacements: usize,
    },
    Command(CommandOutput),
    Matches {
        pattern: String,
        matches: Vec<GrepMatch>,
        truncated: bool,
    },
    Paths {
        pattern: String,
        paths: Vec<String>,
        truncated: bool,
    },
    Recall {
        query: String,
        hits: Vec<RecallHit>,
    },
    Finished {
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    Success(Outcome),
    ParseFailure(ParseError),
    ActionFailure(ActionError),
}

impl Observation {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Observation::Success(_))
    }

    /// 失败类别（成功为 None）
    pub fn failure_kind(&self) -> Option<&'static str> {
        match self {
            Observation::Success(_) => None,
            Observation::ParseFailure(_) => Some("parse_error"),
            Observation::ActionFailure(e) => Some(e.kind()),
        }
    }

    pub fn finish_message(&self) -> Option<&str> {
        match self {
            Observation::Success(Outcome::Finished { message }) => Some(message),
            _ => None,
        }
    }

    /// 渲染为回填给模型的文本，超过 max_chars 时截断
    pub fn render(&self, max_chars: usize) -> String {
        let text = match self {
            Observation::Success(outcome) => render_outcome(outcome),
            Observation::ParseFailure(e) => format!("ParseError: {}", e),
            Observation::ActionFailure(e) => format!("ActionError[{}]: {}", e.kind(), e),
        };
        truncate_chars(&text, max_chars)
    }
}

fn render_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::FileContent {
            path,
            content,
            total_lines,
        } => format!("File: {} ({} lines)\n```\n{}\n```", path, total_lines, content),
        Outcome::FileWritten { path, bytes } => {
            format!("File written: {} ({} bytes)", path, bytes)
        }
        Outcome::FileEdited { path, replacements } => {
            format!("File edited: {} ({} replacement(s))", path, replacements)
        }
        Outcome::Command(out) => {
            let code = out
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "killed".to_string());
            let mut text = format!("Exit code: {}\n{}", code, out.stdout);
            if !out.stderr.is_empty() {
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str("[STDERR]\n");
                text.push_str(&out.stderr);
            }
            text
        }
        Outcome::Matches {
            pattern,
            matches,
            truncated,
        } => {
            if matches.is_empty() {
                return format!("No matches found for pattern '{}'", pattern);
            }
            let mut text = format!("Found {} match(es) for pattern '{}':", matches.len(), pattern);
            for m in matches {
                text.push_str(&format!("\n{}:{}: {}", m.path, m.line, m.text));
            }
            if *truncated {
                text.push_str("\n... (more matches omitted)");
            }
            text
        }
        Outcome::Paths {
            pattern,
            paths,
            truncated,
        } => {
            if paths.is_empty() {
                return format!("No paths matched '{}'", pattern);
            }
            let mut text = format!("Found {} path(s) matching '{}':", paths.len(), pattern);
            for p in paths {
                text.push('\n');
                text.push_str(p);
            }
            if *truncated {
                text.push_str("\n... (more paths omitted)");
            }
            text
        }
        Outcome::Recall { query, hits } => {
            if hits.is_empty() {
                return format!("No memory matched '{}'", query);
            }
            let mut text = format!("Recalled {} excerpt(s) for '{}':", hits.len(), query);
            for hit in hits {
                text.push_str(&format!("\n[{}] {}", hit.source, hit.excerpt));
            }
            text
        }
        Outcome::Finished { message } => format!("FINISHED: {}", message),
    }
}

/// 按字符截断（不切断 UTF-8），附带被截掉的字符数
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}\n... [truncated {} chars]", kept, total - max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases() {
        assert_eq!(ActionKind::from_tag("FILE"), Some(ActionKind::Read));
        assert_eq!(ActionKind::from_tag("search"), Some(ActionKind::Grep));
        assert_eq!(ActionKind::from_tag("find"), Some(ActionKind::Glob));
        assert_eq!(ActionKind::from_tag("recall"), Some(ActionKind::MemoryQuery));
        assert_eq!(ActionKind::from_tag("deploy"), None);
    }

    #[test]
    fn test_render_command_with_stderr() {
        let obs = Observation::Success(Outcome::Command(CommandOutput {
            stdout: "out\n".into(),
            stderr: "boom".into(),
            exit_code: Some(2),
        }));
        assert_eq!(obs.render(1000), "Exit code: 2\nout\n[STDERR]\nboom");
    }

    #[test]
    fn test_render_truncates_on_char_boundary() {
        let obs = Observation::Success(Outcome::Finished {
            message: "完成".repeat(10),
        });
        let text = obs.render(12);
        assert!(text.starts_with("FINISHED: 完成"));
        assert!(text.contains("[truncated"));
    }

    #[test]
    fn test_failure_kind() {
        let obs = Observation::ActionFailure(ActionError::NotFound("a.txt".into()));
        assert!(obs.is_failure());
        assert_eq!(obs.failure_kind(), Some("not_found"));
        assert!(obs.render(200).starts_with("ActionError[not_found]"));

        let obs = Observation::ParseFailure(ParseError::NoActionBlock);
        assert_eq!(obs.failure_kind(), Some("parse_error"));
    }

    #[test]
    fn test_action_serde() {
        let action = Action::MemoryQuery {
            query: "schema".into(),
            limit: None,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"kind\":\"memory-query\""));
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }
}
