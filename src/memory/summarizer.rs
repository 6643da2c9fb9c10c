//! 历史压缩
//!
//! 把上一份摘要与新近可压缩的轮次折叠为一份新摘要正文（标题由 Summary::new 添加）。
//! LlmSummarizer 借助模型生成；ExtractiveSummarizer 逐轮抽取，不依赖模型。

use std::sync::Arc;

use async_trait::async_trait;

use crate::actions::types::truncate_chars;
use crate::core::StorageError;
use crate::llm::{DecisionEngine, Message};
use crate::memory::turn::{Summary, Turn};

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn condense(&self, previous: Option<&Summary>, turns: &[Turn]) -> Result<String, StorageError>;
}

/// 逐轮一行：`Turn n: <action> -> <ok | 失败类别>`
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveSummarizer;

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn condense(&self, previous: Option<&Summary>, turns: &[Turn]) -> Result<String, StorageError> {
        let mut lines = Vec::with_capacity(turns.len() + 1);
        if let Some(prev) = previous {
            lines.push(strip_header(&prev.text).to_string());
        }
        lines.extend(turns.iter().map(|t| format!("Turn {}: {}", t.index, t.outline())));
        Ok(lines.join("\n"))
    }
}

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that summarizes an autonomous coding agent's history concisely.";

/// 每轮送入模型的决策/观察预览长度
const PREVIEW_CHARS: usize = 300;

pub struct LlmSummarizer {
    engine: Arc<DecisionEngine>,
}

impl LlmSummarizer {
    pub fn new(engine: Arc<DecisionEngine>) -> Self {
        Self { engine }
    }

    fn build_prompt(previous: Option<&Summary>, turns: &[Turn]) -> String {
        let (first, last) = match (turns.first(), turns.last()) {
            (Some(f), Some(l)) => (f.index, l.index),
            _ => (0, 0),
        };
        let mut prompt = format!(
            "Summarize the following agent turns ({}-{}). Focus on:\n\
             1. Actions taken\n\
             2. Key findings or results\n\
             3. Files created or modified\n\
             Keep it concise, under 200 words.\n",
            first, last
        );
        if let Some(prev) = previous {
            prompt.push_str("\nEarlier summary (fold it into the new one):\n");
            prompt.push_str(strip_header(&prev.text));
            prompt.push('\n');
        }
        for turn in turns {
            let action = turn
                .action
                .as_ref()
                .map(|a| a.label())
                .unwrap_or_else(|| "(unparsed decision)".to_string());
            prompt.push_str(&format!(
                "\nTurn {}:\nAction: {}\nResult: {}\n",
                turn.index,
                action,
                truncate_chars(&turn.observation.render(PREVIEW_CHARS * 4), PREVIEW_CHARS)
            ));
        }
        prompt
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn condense(&self, previous: Option<&Summary>, turns: &[Turn]) -> Result<String, StorageError> {
        let messages = vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(Self::build_prompt(previous, turns)),
        ];
        let text = self
            .engine
            .decide(&messages)
            .await
            .map_err(|e| StorageError::Summarization(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}

fn strip_header(text: &str) -> &str {
    match text.split_once('\n') {
        Some((head, rest)) if head.starts_with("[Summary of turns") => rest,
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, Observation, Outcome};
    use crate::core::ActionError;
    use crate::llm::{LlmError, ScriptedLlmClient};

    fn turns() -> Vec<Turn> {
        vec![
            Turn::new(
                "t",
                3,
                "<write>...</write>",
                Some(Action::Write {
                    file_path: "a.txt".into(),
                    content: "hi".into(),
                }),
                Observation::Success(Outcome::FileWritten {
                    path: "a.txt".into(),
                    bytes: 2,
                }),
            ),
            Turn::new(
                "t",
                4,
                "<bash>...</bash>",
                Some(Action::Bash {
                    cmd: "sleep 999".into(),
                    timeout_secs: Some(1),
                }),
                Observation::ActionFailure(ActionError::Timeout { secs: 1 }),
            ),
        ]
    }

    #[tokio::test]
    async fn test_extractive_folds_previous() {
        let previous = Summary::new(1, 2, "Turn 1: read a.txt -> ok\nTurn 2: finish -> ok");
        let body = ExtractiveSummarizer
            .condense(Some(&previous), &turns())
            .await
            .unwrap();
        assert_eq!(
            body,
            "Turn 1: read a.txt -> ok\nTurn 2: finish -> ok\n\
             Turn 3: write a.txt (2 bytes) -> ok\n\
             Turn 4: bash `sleep 999` -> timeout"
        );
    }

    #[tokio::test]
    async fn test_llm_summarizer_prompt_and_output() {
        let client = Arc::new(ScriptedLlmClient::new(["  Wrote a.txt; a sleep timed out.  "]));
        let engine = Arc::new(DecisionEngine::new(client.clone()));
        let body = LlmSummarizer::new(engine)
            .condense(None, &turns())
            .await
            .unwrap();
        assert_eq!(body, "Wrote a.txt; a sleep timed out.");

        let calls = client.calls();
        let prompt = &calls[0][1].content;
        assert!(prompt.contains("turns (3-4)"));
        assert!(prompt.contains("Action: write a.txt (2 bytes)"));
        assert!(prompt.contains("Result: ActionError[timeout]"));
    }

    #[tokio::test]
    async fn test_llm_summarizer_failure_is_storage_error() {
        let client = Arc::new(ScriptedLlmClient::from_steps(vec![Err(LlmError::Auth(
            "bad key".into(),
        ))]));
        let engine = Arc::new(DecisionEngine::new(client));
        let err = LlmSummarizer::new(engine)
            .condense(None, &turns())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Summarization(_)));
    }
}
