//! 提示词构建
//!
//! 每轮把 系统提示 + 任务指令 + 活动上下文（摘要 / 决策-观察对）组装成消息序列；
//! 解析失败的观察附带格式纠正提示，供模型下一轮自我纠正。

use crate::core::ParseError;
use crate::llm::Message;
use crate::memory::MemoryEntry;

pub const SYSTEM_PROMPT: &str = r#"You are an autonomous coding agent working inside a sandboxed workspace directory.
Each reply must contain exactly one action block. Only the first block in a reply is executed.

## Actions

<read>
file_path: src/main.rs
offset: 1
limit: 200
</read>

<write>
file_path: notes/plan.md
content: |
  File content goes here, indented consistently.
  The indentation of the first line is removed from every line.
</write>

<edit>
file_path: src/lib.rs
old_string: |
  exact text that appears once in the file
new_string: |
  replacement text
replace_all: false
</edit>

<bash>
cmd: cargo test
timeout_secs: 120
</bash>

<grep>
pattern: fn main
path: src
include: *.rs
</grep>

<glob>
pattern: **/*.toml
path: .
</glob>

<memory-query>
query: what did the test output say about the parser
</memory-query>

<finish>
Short description of what was done.
</finish>

## Rules
- Optional fields: read offset (1-based first line) and limit; edit replace_all; bash timeout_secs;
  grep path and include (file-name filter); glob path. Search paths default to the workspace root.
- Paths are relative to the workspace root; paths outside it are rejected.
- Explore before changing things, verify after changing them.
- Older turns may be condensed into a summary; use <memory-query> to recall details.
- Use <finish> once the task is complete."#;

const CONTINUE_HINT: &str = "Continue working or use <finish> when done.";

/// 解析失败时的纠正提示
pub fn correction_hint(err: &ParseError) -> &'static str {
    match err {
        ParseError::NoActionBlock => {
            "No action block was found. Reply with exactly one block such as <bash>\ncmd: ls\n</bash>, or <finish>...</finish> if you are done."
        }
        ParseError::UnknownKind(_) => {
            "Valid action tags are: read, write, edit, bash, grep, glob, memory-query, finish."
        }
        ParseError::MissingField { .. } | ParseError::InvalidField { .. } => {
            "Check the field names and values against the action format in the instructions."
        }
    }
}

/// 组装一次决策请求的消息
pub fn build_messages(
    system_prompt: &str,
    instruction: &str,
    context: &[MemoryEntry],
    max_observation_chars: usize,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(context.len() * 2 + 2);
    messages.push(Message::system(system_prompt));
    messages.push(Message::user(format!(
        "Task: {}\n\nStart working on this task now.",
        instruction
    )));

    for entry in context {
        match entry {
            MemoryEntry::Summary(summary) => {
                messages.push(Message::user(format!(
                    "Earlier progress (condensed):\n{}",
                    summary.text
                )));
            }
            MemoryEntry::Turn(turn) => {
                messages.push(Message::assistant(turn.decision.clone()));
                let mut feedback = format!(
                    "Action result (turn {}):\n{}",
                    turn.index,
                    turn.observation.render(max_observation_chars)
                );
                if let crate::actions::Observation::ParseFailure(e) = &turn.observation {
                    feedback.push_str("\n\n");
                    feedback.push_str(correction_hint(e));
                }
                feedback.push_str("\n\n");
                feedback.push_str(CONTINUE_HINT);
                messages.push(Message::user(feedback));
            }
        }
    }
    messages
}
