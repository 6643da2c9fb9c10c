//! 内容搜索（grep）与路径匹配（glob）
//!
//! 递归遍历跳过隐藏目录、target、node_modules；结果按路径排序并截断到上限。

use std::path::Path;

use glob::{MatchOptions, Pattern};
use regex::Regex;
use walkdir::{DirEntry, WalkDir};

use crate::actions::types::GrepMatch;
use crate::actions::workspace::Workspace;
use crate::core::ActionError;

/// 单文件大小上限，超过的文件不搜索
const MAX_FILE_SIZE: u64 = 1024 * 1024;

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name == "target" || name == "node_modules"
}

/// 非法正则按字面量匹配
fn compile_pattern(pattern: &str) -> Result<Regex, ActionError> {
    Regex::new(pattern)
        .or_else(|_| Regex::new(&regex::escape(pattern)))
        .map_err(|e| ActionError::Io(format!("invalid pattern: {}", e)))
}

/// 非法 glob 按字面量匹配
fn compile_glob(pattern: &str) -> Result<Pattern, ActionError> {
    Pattern::new(pattern)
        .or_else(|_| Pattern::new(&Pattern::escape(pattern)))
        .map_err(|e| ActionError::Io(format!("invalid glob pattern: {}", e)))
}

/// 在 path（文件或目录）下按行搜索，返回 (匹配, 是否截断)
pub fn grep(
    workspace: &Workspace,
    path: &str,
    pattern: &str,
    include: Option<&str>,
    max_results: usize,
) -> Result<(Vec<GrepMatch>, bool), ActionError> {
    let base = workspace.resolve(path)?;
    if !base.exists() {
        return Err(ActionError::NotFound(path.to_string()));
    }
    let re = compile_pattern(pattern)?;
    let include = include.map(compile_glob).transpose()?;

    let mut files: Vec<_> = WalkDir::new(&base)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.metadata().map(|m| m.len() <= MAX_FILE_SIZE).unwrap_or(false))
        .filter(|e| match &include {
            // 直接指定单个文件时不受 include 过滤
            Some(p) if e.depth() > 0 => p.matches(&e.file_name().to_string_lossy()),
            _ => true,
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();

    let mut matches = Vec::new();
    for file in files {
        // 二进制或非 UTF-8 文件跳过
        let Ok(content) = std::fs::read_to_string(&file) else {
            continue;
        };
        for (n, line) in content.lines().enumerate() {
            if !re.is_match(line) {
                continue;
            }
            if matches.len() >= max_results {
                return Ok((matches, true));
            }
            matches.push(GrepMatch {
                path: workspace.display(&file),
                line: n + 1,
                text: line.trim_end().to_string(),
            });
        }
    }
    Ok((matches, false))
}

/// 以 path 为基准匹配相对路径；基准目录不存在时返回空
pub fn glob_paths(
    workspace: &Workspace,
    path: &str,
    pattern: &str,
    max_results: usize,
) -> Result<(Vec<String>, bool), ActionError> {
    let base = workspace.resolve(path)?;
    if !base.is_dir() {
        return Ok((Vec::new(), false));
    }
    let pattern = compile_glob(pattern)?;
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    let mut paths: Vec<String> = WalkDir::new(&base)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .strip_prefix(&base)
                .map(|rel| matches_relative(&pattern, rel, options))
                .unwrap_or(false)
        })
        .map(|e| workspace.display(e.path()))
        .collect();
    paths.sort();

    let truncated = paths.len() > max_results;
    paths.truncate(max_results);
    Ok((paths, truncated))
}

fn matches_relative(pattern: &Pattern, rel: &Path, options: MatchOptions) -> bool {
    let rel = rel.to_string_lossy().replace('\\', "/");
    pattern.matches_with(&rel, options)
}
