//! 动作块解析：`<kind> 字段... </kind>`
//!
//! 只解析第一个已知种类的闭合块，之前的 `<think>` 等标签与之后的块被忽略。字段为
//! `key: value` 行；`key: |` 或值为空时后续行构成多行块，直到遇到缩进不深于该 key 且
//! 尚未出现过的已知字段行或块结束，块内容去除首行缩进后逐字保留。finish 的整个正文即为
//! 结束消息。

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::actions::types::{Action, ActionKind};
use crate::core::ParseError;

fn open_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([A-Za-z][A-Za-z0-9_-]*)>").expect("static regex"))
}

struct Block<'a> {
    kind: ActionKind,
    body: &'a str,
}

/// 第一个已知动作种类的闭合块；无已知块时返回首个闭合的未知标签
fn first_block(text: &str) -> Result<Block<'_>, ParseError> {
    let mut unknown: Option<&str> = None;
    for caps in open_tag_re().captures_iter(text) {
        let (Some(open), Some(tag)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let close = format!("</{}>", tag.as_str());
        let Some(len) = text[open.end()..].find(&close) else {
            continue;
        };
        match ActionKind::from_tag(tag.as_str()) {
            Some(kind) => {
                return Ok(Block {
                    kind,
                    body: &text[open.end()..open.end() + len],
                })
            }
            // <think>、<code> 等说明性标签
            None => {
                unknown.get_or_insert(tag.as_str());
            }
        }
    }
    Err(match unknown {
        Some(tag) => ParseError::UnknownKind(tag.to_string()),
        None => ParseError::NoActionBlock,
    })
}

/// 解析模型输出中的第一个动作块
pub fn parse_action(text: &str) -> Result<Action, ParseError> {
    let block = first_block(text)?;
    let fields = Fields::parse(block.kind, block.body);
    build(block.kind, fields, block.body)
}

/// 字段名归一（含别名）
fn canonical_field(kind: ActionKind, key: &str) -> Option<&'static str> {
    use ActionKind::*;
    let key = key.trim().trim_matches(|c| c == '"' || c == '\'').to_ascii_lowercase();
    let name = match (kind, key.as_str()) {
        (Read | Write | Edit, "file_path" | "path" | "file") => "file_path",
        (Read, "offset") => "offset",
        (Read, "limit") => "limit",
        (Write, "content") => "content",
        (Edit, "old_string" | "old") => "old_string",
        (Edit, "new_string" | "new") => "new_string",
        (Edit, "replace_all") => "replace_all",
        (Bash, "cmd" | "command") => "cmd",
        (Bash, "timeout_secs" | "timeout") => "timeout_secs",
        (Grep | Glob, "pattern") => "pattern",
        (Grep | Glob, "path" | "dir") => "path",
        (Grep, "include") => "include",
        (MemoryQuery, "query") => "query",
        (MemoryQuery, "limit") => "limit",
        (Finish, "message") => "message",
        _ => return None,
    };
    Some(name)
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// 若该行是本类动作的字段行，返回 (字段名, 缩进, 冒号后的剩余部分)
fn field_line(kind: ActionKind, line: &str) -> Option<(&'static str, usize, &str)> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    let (key, rest) = trimmed.split_once(':')?;
    let name = canonical_field(kind, key)?;
    Some((name, indent_of(line), rest))
}

struct Fields {
    kind: ActionKind,
    values: HashMap<&'static str, String>,
}

impl Fields {
    fn parse(kind: ActionKind, body: &str) -> Self {
        let lines: Vec<&str> = body.split('\n').collect();
        let mut values: HashMap<&'static str, String> = HashMap::new();
        let mut i = 0;

        while i < lines.len() {
            let Some((name, indent, rest)) = field_line(kind, lines[i]) else {
                i += 1;
                continue;
            };
            i += 1;
            let start = i;
            let head = rest.trim();
            let is_block = head.is_empty() || head == "|" || head == "|-";
            while i < lines.len() {
                match field_line(kind, lines[i]) {
                    // 多行块里已出现过的字段名属于内容（如 YAML 中的 path:）
                    Some((next, _, _)) if is_block && (next == name || values.contains_key(next)) => {
                        i += 1
                    }
                    Some((_, next_indent, _)) if next_indent <= indent => break,
                    _ => i += 1,
                }
            }
            let continuation = &lines[start..i];
            let value = if is_block {
                block_value(continuation)
            } else {
                let tail = block_value(continuation);
                if tail.is_empty() {
                    unquote(head).to_string()
                } else {
                    format!("{}\n{}", head, tail)
                }
            };
            // 重复字段以第一次出现为准
            values.entry(name).or_insert(value);
        }

        Self { kind, values }
    }

    fn kind_name(&self) -> String {
        self.kind.as_str().to_string()
    }

    fn missing(&self, field: &str) -> ParseError {
        ParseError::MissingField {
            kind: self.kind_name(),
            field: field.to_string(),
        }
    }

    fn invalid(&self, field: &str, value: &str, expected: &str) -> ParseError {
        ParseError::InvalidField {
            kind: self.kind_name(),
            field: field.to_string(),
            expected: expected.to_string(),
            value: value.to_string(),
        }
    }

    /// 必填且非空白
    fn required(&mut self, field: &str) -> Result<String, ParseError> {
        match self.values.remove(field) {
            Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
            _ => Err(self.missing(field)),
        }
    }

    /// 必须出现但允许为空（内容类字段，逐字保留）
    fn required_verbatim(&mut self, field: &str) -> Result<String, ParseError> {
        self.values.remove(field).ok_or_else(|| self.missing(field))
    }

    fn optional(&mut self, field: &str) -> Option<String> {
        self.values
            .remove(field)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn optional_number<T: std::str::FromStr>(&mut self, field: &str) -> Result<Option<T>, ParseError> {
        match self.optional(field) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|_| self.invalid(field, &raw, "a non-negative integer")),
        }
    }

    fn optional_bool(&mut self, field: &str) -> Result<Option<bool>, ParseError> {
        match self.optional(field) {
            None => Ok(None),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                _ => Err(self.invalid(field, &raw, "a boolean")),
            },
        }
    }
}

/// 多行块：丢弃首尾空行，按首个非空行的缩进去除前缀
fn block_value(lines: &[&str]) -> String {
    let start = lines
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(start, |p| p + 1);
    let lines = &lines[start..end.max(start)];
    let Some(first) = lines.first() else {
        return String::new();
    };
    let base = &first[..indent_of(first)];

    lines
        .iter()
        .map(|line| {
            if let Some(stripped) = line.strip_prefix(base) {
                stripped
            } else if line.trim().is_empty() {
                ""
            } else {
                line.trim_start()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn build(kind: ActionKind, mut f: Fields, body: &str) -> Result<Action, ParseError> {
    let action = match kind {
        ActionKind::Read => Action::Read {
            file_path: f.required("file_path")?,
            offset: f.optional_number("offset")?,
            limit: f.optional_number("limit")?,
        },
        ActionKind::Write => Action::Write {
            file_path: f.required("file_path")?,
            content: f.required_verbatim("content")?,
        },
        ActionKind::Edit => {
            let file_path = f.required("file_path")?;
            let old_string = f.required_verbatim("old_string")?;
            if old_string.is_empty() {
                return Err(f.missing("old_string"));
            }
            Action::Edit {
                file_path,
                old_string,
                new_string: f.required_verbatim("new_string")?,
                replace_all: f.optional_bool("replace_all")?.unwrap_or(false),
            }
        }
        ActionKind::Bash => {
            let cmd = f.required("cmd")?;
            let timeout_secs = f.optional_number::<u64>("timeout_secs")?;
            if timeout_secs == Some(0) {
                return Err(f.invalid("timeout_secs", "0", "a positive integer"));
            }
            Action::Bash { cmd, timeout_secs }
        }
        ActionKind::Grep => Action::Grep {
            pattern: f.required("pattern")?,
            path: f.optional("path").unwrap_or_else(|| ".".to_string()),
            include: f.optional("include"),
        },
        ActionKind::Glob => Action::Glob {
            pattern: f.required("pattern")?,
            path: f.optional("path").unwrap_or_else(|| ".".to_string()),
        },
        ActionKind::MemoryQuery => {
            // 无字段时整个正文即查询
            let query = match f.values.contains_key("query") {
                true => f.required("query")?,
                false if !body.trim().is_empty() && f.values.is_empty() => body.trim().to_string(),
                false => return Err(f.missing("query")),
            };
            Action::MemoryQuery {
                query,
                limit: f.optional_number("limit")?,
            }
        }
        ActionKind::Finish => {
            let message = match f.values.contains_key("message") {
                true => f.required("message")?,
                false => body.trim().to_string(),
            };
            if message.is_empty() {
                return Err(f.missing("message"));
            }
            Action::Finish { message }
        }
    };
    Ok(action)
}
