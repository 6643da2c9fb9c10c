//! MemoryStore：轮次持久化、活动上下文与检索
//!
//! - append：按任务串行追加（每个任务一把异步写锁）
//! - active_context：最新摘要 + 其后的原始轮次；超出 token 预算时把除最近 K 轮外的
//!   历史（连同上一份摘要）折叠成一份新摘要并持久化，已有摘要的前缀不会被重复压缩
//! - recall：在全部原始轮次与摘要中按词重叠打分，分数相同时较新者优先

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::StorageError;
use crate::memory::log::TurnLog;
use crate::memory::summarizer::Summarizer;
use crate::memory::tokenizer::{overlap_score, tokenize_to_set};
use crate::memory::turn::{MemoryEntry, RecallHit, RecallSource, Summary, Turn};

const RECALL_EXCERPT_CHARS: usize = 600;

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// 活动上下文的 token 预算
    pub context_budget_tokens: usize,
    /// 压缩时保留的最近原始轮数
    pub keep_recent_turns: usize,
    /// recall 默认返回条数
    pub recall_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            context_budget_tokens: 6000,
            keep_recent_turns: 4,
            recall_limit: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub total_turns: u32,
    pub summaries: usize,
    /// 已被摘要覆盖的最后一轮（0 表示尚未压缩）
    pub summarized_through: u32,
}

pub struct MemoryStore {
    log: Arc<dyn TurnLog>,
    summarizer: Arc<dyn Summarizer>,
    config: MemoryConfig,
    writers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new(log: Arc<dyn TurnLog>, summarizer: Arc<dyn Summarizer>, config: MemoryConfig) -> Self {
        Self {
            log,
            summarizer,
            config,
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn writer(&self, task_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(task_id.to_string())
            .or_default()
            .clone()
    }

    pub async fn append(&self, turn: Turn) -> Result<(), StorageError> {
        let writer = self.writer(&turn.task_id);
        let _guard = writer.lock().await;
        self.log.append_turn(&turn)?;
        debug!(task_id = %turn.task_id, index = turn.index, "turn appended");
        Ok(())
    }

    pub fn turn_count(&self, task_id: &str) -> Result<u32, StorageError> {
        self.log.turn_count(task_id)
    }

    pub fn turns(&self, task_id: &str) -> Result<Vec<Turn>, StorageError> {
        self.log.read_turns(task_id, 1, None)
    }

    /// 构建活动上下文；必要时压缩（压缩失败即返回错误）
    pub async fn active_context(&self, task_id: &str) -> Result<Vec<MemoryEntry>, StorageError> {
        let writer = self.writer(task_id);
        let _guard = writer.lock().await;

        let previous = self.log.summaries(task_id)?.pop();
        let boundary = previous.as_ref().map_or(0, |s| s.to_turn);
        let raw = self.log.read_turns(task_id, boundary + 1, None)?;

        let total = previous.as_ref().map_or(0, |s| s.estimated_tokens)
            + raw.iter().map(Turn::estimated_tokens).sum::<usize>();
        if total <= self.config.context_budget_tokens {
            return Ok(assemble(previous, raw));
        }

        let keep = self.config.keep_recent_turns.min(raw.len());
        let split = raw.len() - keep;
        if split == 0 {
            warn!(
                task_id,
                total_tokens = total,
                budget = self.config.context_budget_tokens,
                "context over budget but only recent turns remain"
            );
            return Ok(assemble(previous, raw));
        }

        let (eligible, recent) = raw.split_at(split);
        let body = self.summarizer.condense(previous.as_ref(), eligible).await?;
        let from = previous
            .as_ref()
            .map_or(eligible[0].index, |s| s.from_turn);
        let to = eligible[eligible.len() - 1].index;
        let summary = Summary::new(from, to, &body);
        self.log.append_summary(task_id, &summary)?;

        info!(
            task_id,
            from_turn = from,
            to_turn = to,
            before_tokens = total,
            summary_tokens = summary.estimated_tokens,
            "history summarized"
        );
        Ok(assemble(Some(summary), recent.to_vec()))
    }

    /// 检索全部历史（含已被摘要覆盖的原始轮次）
    pub fn recall(
        &self,
        task_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<RecallHit>, StorageError> {
        let limit = limit.unwrap_or(self.config.recall_limit);
        let needle = query.trim().to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let query_tokens = tokenize_to_set(&needle);

        let score = |text: &str| {
            let mut score = overlap_score(&query_tokens, &tokenize_to_set(text));
            if text.to_lowercase().contains(&needle) {
                score += 1;
            }
            score
        };

        let mut hits = Vec::new();
        for turn in self.log.read_turns(task_id, 1, None)? {
            let text = turn.transcript();
            let s = score(&text);
            if s > 0 {
                hits.push(RecallHit::new(
                    RecallSource::Turn { index: turn.index },
                    s,
                    &text,
                    RECALL_EXCERPT_CHARS,
                ));
            }
        }
        for summary in self.log.summaries(task_id)? {
            let s = score(&summary.text);
            if s > 0 {
                hits.push(RecallHit::new(
                    RecallSource::Summary {
                        from_turn: summary.from_turn,
                        to_turn: summary.to_turn,
                    },
                    s,
                    &summary.text,
                    RECALL_EXCERPT_CHARS,
                ));
            }
        }

        // 分数降序，其次新近度降序；同一新近度时原始轮次优先于摘要
        hits.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.source.recency().cmp(&a.source.recency()))
                .then_with(|| {
                    let rank = |h: &RecallHit| matches!(h.source, RecallSource::Summary { .. });
                    rank(a).cmp(&rank(b))
                })
        });
        hits.truncate(limit);
        Ok(hits)
    }

    pub fn stats(&self, task_id: &str) -> Result<MemoryStats, StorageError> {
        let summaries = self.log.summaries(task_id)?;
        Ok(MemoryStats {
            total_turns: self.log.turn_count(task_id)?,
            summarized_through: summaries.last().map_or(0, |s| s.to_turn),
            summaries: summaries.len(),
        })
    }
}

fn assemble(summary: Option<Summary>, turns: Vec<Turn>) -> Vec<MemoryEntry> {
    summary
        .map(MemoryEntry::Summary)
        .into_iter()
        .chain(turns.into_iter().map(MemoryEntry::Turn))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, Observation, Outcome};
    use crate::memory::log::InMemoryTurnLog;
    use crate::memory::summarizer::ExtractiveSummarizer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn write_turn(task: &str, index: u32, path: &str, content: &str) -> Turn {
        Turn::new(
            task,
            index,
            format!("<write>\nfile_path: {}\ncontent: |\n  {}\n</write>", path, content),
            Some(Action::Write {
                file_path: path.into(),
                content: content.into(),
            }),
            Observation::Success(Outcome::FileWritten {
                path: path.into(),
                bytes: content.len(),
            }),
        )
    }

    fn store(budget: usize, keep: usize) -> MemoryStore {
        MemoryStore::new(
            Arc::new(InMemoryTurnLog::new()),
            Arc::new(ExtractiveSummarizer),
            MemoryConfig {
                context_budget_tokens: budget,
                keep_recent_turns: keep,
                recall_limit: 5,
            },
        )
    }

    /// 统计调用次数的摘要器
    struct CountingSummarizer(AtomicUsize);

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn condense(&self, previous: Option<&Summary>, turns: &[Turn]) -> Result<String, StorageError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            ExtractiveSummarizer.condense(previous, turns).await
        }
    }

    #[tokio::test]
    async fn test_under_budget_returns_all_turns_in_order() {
        let store = store(100_000, 2);
        for i in 1..=3 {
            store.append(write_turn("t", i, "a.txt", "x")).await.unwrap();
        }
        let ctx = store.active_context("t").await.unwrap();
        let idx: Vec<u32> = ctx
            .iter()
            .map(|e| match e {
                MemoryEntry::Turn(t) => t.index,
                MemoryEntry::Summary(_) => 0,
            })
            .collect();
        assert_eq!(idx, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_over_budget_yields_one_summary_plus_recent() {
        let store = store(200, 4);
        let filler = "lorem ipsum dolor sit amet ".repeat(8);
        for i in 1..=10 {
            let path = if i == 2 { "db/schema.sql".to_string() } else { format!("f{}.txt", i) };
            store.append(write_turn("t", i, &path, &filler)).await.unwrap();
        }

        let ctx = store.active_context("t").await.unwrap();
        assert_eq!(ctx.len(), 5);
        let MemoryEntry::Summary(summary) = &ctx[0] else {
            panic!("first entry should be a summary");
        };
        assert_eq!((summary.from_turn, summary.to_turn), (1, 6));
        assert!(summary.text.starts_with("[Summary of turns 1-6]"));
        let recent: Vec<u32> = ctx[1..]
            .iter()
            .filter_map(|e| match e {
                MemoryEntry::Turn(t) => Some(t.index),
                _ => None,
            })
            .collect();
        assert_eq!(recent, vec![7, 8, 9, 10]);

        // 被压缩的轮次仍可检索
        let hits = store.recall("t", "schema.sql", None).unwrap();
        assert!(hits
            .iter()
            .any(|h| h.source == RecallSource::Turn { index: 2 }));

        let stats = store.stats("t").unwrap();
        assert_eq!(stats.total_turns, 10);
        assert_eq!(stats.summaries, 1);
        assert_eq!(stats.summarized_through, 6);
    }

    #[tokio::test]
    async fn test_summarization_is_idempotent() {
        let summarizer = Arc::new(CountingSummarizer(AtomicUsize::new(0)));
        let store = MemoryStore::new(
            Arc::new(InMemoryTurnLog::new()),
            summarizer.clone(),
            MemoryConfig {
                context_budget_tokens: 120,
                keep_recent_turns: 2,
                recall_limit: 5,
            },
        );
        let filler = "alpha beta gamma delta ".repeat(10);
        for i in 1..=6 {
            store.append(write_turn("t", i, "a.txt", &filler)).await.unwrap();
        }

        let first = store.active_context("t").await.unwrap();
        let second = store.active_context("t").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(summarizer.0.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats("t").unwrap().summaries, 1);

        // 新轮次到来后，新的摘要折叠上一份摘要，活动上下文仍只有一份
        store.append(write_turn("t", 7, "b.txt", &filler)).await.unwrap();
        let third = store.active_context("t").await.unwrap();
        let summaries: Vec<_> = third
            .iter()
            .filter_map(|e| match e {
                MemoryEntry::Summary(s) => Some((s.from_turn, s.to_turn)),
                _ => None,
            })
            .collect();
        assert_eq!(summaries, vec![(1, 5)]);
        assert!(matches!(&third[0], MemoryEntry::Summary(s) if s.text.contains("Turn 1:")));
    }

    #[tokio::test]
    async fn test_recall_ranks_by_score_then_recency() {
        let store = store(100_000, 2);
        store.append(write_turn("t", 1, "auth/login.rs", "fn login() {}")).await.unwrap();
        store.append(write_turn("t", 2, "README.md", "project notes")).await.unwrap();
        store.append(write_turn("t", 3, "auth/login_test.rs", "fn login() {}")).await.unwrap();

        let hits = store.recall("t", "login", None).unwrap();
        let order: Vec<_> = hits.iter().map(|h| h.source.clone()).collect();
        assert_eq!(
            order,
            vec![RecallSource::Turn { index: 3 }, RecallSource::Turn { index: 1 }]
        );

        let hits = store.recall("t", "login", Some(1)).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.recall("t", "nonexistent-term", None).unwrap().is_empty());
        assert!(store.recall("other", "login", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_rejects_gaps() {
        let store = store(1000, 2);
        store.append(write_turn("t", 1, "a", "x")).await.unwrap();
        let err = store.append(write_turn("t", 3, "a", "x")).await.unwrap_err();
        assert!(matches!(err, StorageError::OutOfOrder { .. }));
        assert_eq!(store.turn_count("t").unwrap(), 1);
    }
}
