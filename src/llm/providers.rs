//! 按配置选择模型提供方
//!
//! openai / deepseek / qwen 均走 OpenAI 兼容协议，区别只在默认 base_url、模型与 API Key 环境变量。

use std::sync::Arc;

use crate::config::LlmSection;
use crate::core::AgentError;
use crate::llm::{LlmClient, OpenAiClient};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const QWEN_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const QWEN_DEFAULT_MODEL: &str = "qwen-plus";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

struct Preset {
    base_url: Option<&'static str>,
    model: &'static str,
    key_vars: &'static [&'static str],
}

fn preset(provider: &str) -> Option<Preset> {
    let preset = match provider {
        "openai" => Preset {
            base_url: None,
            model: OPENAI_DEFAULT_MODEL,
            key_vars: &["OPENAI_API_KEY"],
        },
        "deepseek" => Preset {
            base_url: Some(DEEPSEEK_BASE_URL),
            model: DEEPSEEK_CHAT,
            key_vars: &["DEEPSEEK_API_KEY", "OPENAI_API_KEY"],
        },
        "qwen" | "dashscope" => Preset {
            base_url: Some(QWEN_BASE_URL),
            model: QWEN_DEFAULT_MODEL,
            key_vars: &["DASHSCOPE_API_KEY", "OPENAI_API_KEY"],
        },
        _ => return None,
    };
    Some(preset)
}

/// 根据 [llm] 配置创建客户端；API Key 只从环境变量读取
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    let provider = cfg.provider.trim().to_lowercase();
    let preset = preset(&provider)
        .ok_or_else(|| AgentError::Config(format!("unknown llm provider: {}", cfg.provider)))?;

    let api_key = preset
        .key_vars
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .ok_or_else(|| {
            AgentError::Config(format!(
                "no API key for provider {} (set {})",
                provider,
                preset.key_vars.join(" or ")
            ))
        })?;

    let base_url = cfg.base_url.as_deref().or(preset.base_url);
    let model = cfg.model.as_deref().unwrap_or(preset.model);
    tracing::info!(provider = %provider, model, "llm client configured");

    Ok(Arc::new(
        OpenAiClient::new(base_url, model, &api_key).with_temperature(cfg.temperature),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider() {
        let cfg = LlmSection {
            provider: "claude-local".into(),
            ..LlmSection::default()
        };
        let err = create_llm_from_config(&cfg).err().unwrap();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_presets() {
        assert_eq!(preset("deepseek").unwrap().base_url, Some(DEEPSEEK_BASE_URL));
        assert_eq!(preset("dashscope").unwrap().base_url, Some(QWEN_BASE_URL));
        assert!(preset("openai").unwrap().base_url.is_none());
    }
}
