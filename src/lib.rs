//! Orca - Rust 自主编码智能体
//!
//! 给定自然语言指令，反复请求模型给出结构化动作，在沙箱工作区内执行，并把结果折叠回
//! 不断演进的上下文，直到任务被标记完成或轮数预算耗尽。
//!
//! 模块划分：
//! - **actions**: 动作协议（解析）、工作区沙箱与动作执行器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、任务状态机、任务注册表、Orchestrator
//! - **llm**: LLM 客户端抽象、OpenAI 兼容实现、Decision Engine（超时 + 重试）
//! - **memory**: 轮次日志、活动上下文压缩与检索
//! - **observability**: tracing 初始化
//! - **react**: 提示词构建与任务主循环

pub mod actions;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;

pub use crate::core::{AgentError, Orchestrator, Task, TaskResult, TaskStatus};
