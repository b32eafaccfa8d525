//! Provider selection from configuration.
//!
//! A turn talks to exactly one completion source. The configured default
//! provider is resolved here, with per-provider overrides for key, URL and
//! model taking precedence over the top-level settings.

use std::sync::Arc;

use cabm_config::AppConfig;
use cabm_core::error::ProviderError;
use cabm_core::provider::Provider;
use tracing::info;

use crate::openai_compat::OpenAiCompatProvider;

/// The resolved provider and the model it should be asked for.
pub struct ProviderSelection {
    pub provider: Arc<dyn Provider>,
    pub model: String,
}

/// Build the default provider from configuration.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderSelection, ProviderError> {
    let name = config.default_provider.as_str();
    let overrides = config.providers.get(name);

    let api_key = overrides
        .and_then(|p| p.api_key.clone())
        .or_else(|| config.api_key.clone());

    // Local servers accept any key; hosted ones don't
    let api_key = match api_key {
        Some(key) if !key.is_empty() => key,
        _ if is_local(name) => name.to_string(),
        _ => {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{name}' (set CABM_API_KEY or api_key in config.toml)"
            )));
        }
    };

    let base_url = overrides
        .and_then(|p| p.api_url.clone())
        .unwrap_or_else(|| default_base_url(name));

    let model = overrides
        .and_then(|p| p.default_model.clone())
        .unwrap_or_else(|| config.default_model.clone());

    info!(provider = name, model = %model, url = %base_url, "Provider selected");

    Ok(ProviderSelection {
        provider: Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)?),
        model,
    })
}

fn is_local(provider_name: &str) -> bool {
    matches!(provider_name, "ollama" | "vllm" | "llamacpp" | "llama.cpp")
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "siliconflow" => "https://api.siliconflow.cn/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => "https://api.openai.com/v1".into(),
    }
}
