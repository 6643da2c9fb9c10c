//! 轮次记录与摘要
//!
//! Turn 一经写入即不可变；Summary 覆盖 [from_turn, to_turn] 的连续区间。
//! 活动上下文由至多一个 Summary 加其后的原始 Turn 组成。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::actions::types::truncate_chars;
use crate::actions::{Action, Observation};
use crate::memory::tokenizer::estimate_tokens;

/// 渲染观察时的上限（估算 token、摘要、检索共用）
const TRANSCRIPT_OBSERVATION_CHARS: usize = 2000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub task_id: String,
    /// 从 1 开始，任务内连续
    pub index: u32,
    /// 模型原始输出
    pub decision: String,
    /// 解析失败时为 None
    pub action: Option<Action>,
    pub observation: Observation,
    pub timestamp: i64,
}

impl Turn {
    pub fn new(
        task_id: impl Into<String>,
        index: u32,
        decision: impl Into<String>,
        action: Option<Action>,
        observation: Observation,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            index,
            decision: decision.into(),
            action,
            observation,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 单行概要：`read a.txt -> ok`
    pub fn outline(&self) -> String {
        let action = self
            .action
            .as_ref()
            .map(Action::label)
            .unwrap_or_else(|| "(unparsed decision)".to_string());
        let outcome = self.observation.failure_kind().unwrap_or("ok");
        format!("{} -> {}", action, outcome)
    }

    /// 用于检索与摘要的文本
    pub fn transcript(&self) -> String {
        format!(
            "{}\n{}",
            self.decision,
            self.observation.render(TRANSCRIPT_OBSERVATION_CHARS)
        )
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.transcript())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub from_turn: u32,
    pub to_turn: u32,
    pub text: String,
    pub estimated_tokens: usize,
    pub created_at: i64,
}

impl Summary {
    pub fn new(from_turn: u32, to_turn: u32, body: &str) -> Self {
        let text = format!("[Summary of turns {}-{}]\n{}", from_turn, to_turn, body.trim());
        Self {
            from_turn,
            to_turn,
            estimated_tokens: estimate_tokens(&text),
            text,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 活动上下文条目
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum MemoryEntry {
    Summary(Summary),
    Turn(Turn),
}

impl MemoryEntry {
    pub fn estimated_tokens(&self) -> usize {
        match self {
            MemoryEntry::Summary(s) => s.estimated_tokens,
            MemoryEntry::Turn(t) => t.estimated_tokens(),
        }
    }
}

/// 检索命中的来源
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RecallSource {
    Turn { index: u32 },
    Summary { from_turn: u32, to_turn: u32 },
}

impl RecallSource {
    /// 用于排序的新近度
    pub fn recency(&self) -> u32 {
        match self {
            RecallSource::Turn { index } => *index,
            RecallSource::Summary { to_turn, .. } => *to_turn,
        }
    }
}

impl fmt::Display for RecallSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecallSource::Turn { index } => write!(f, "turn {}", index),
            RecallSource::Summary { from_turn, to_turn } => {
                write!(f, "summary {}-{}", from_turn, to_turn)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallHit {
    pub source: RecallSource,
    pub score: usize,
    pub excerpt: String,
}

impl RecallHit {
    pub fn new(source: RecallSource, score: usize, text: &str, max_chars: usize) -> Self {
        Self {
            source,
            score,
            excerpt: truncate_chars(text.trim(), max_chars),
        }
    }
}
