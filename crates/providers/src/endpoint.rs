//! Chooses the chat-completions endpoint named in the config.

use std::sync::Arc;

use handoff_config::{ConfigError, HandoffConfig};
use handoff_core::provider::Provider;
use tracing::debug;

use crate::openai_compat::OpenAiCompatProvider;

/// A provider name the config may use without setting `base_url`.
struct KnownEndpoint {
    name: &'static str,
    base_url: &'static str,
    /// Local servers accept any key
    needs_api_key: bool,
}

const KNOWN_ENDPOINTS: &[KnownEndpoint] = &[
    KnownEndpoint {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        needs_api_key: true,
    },
    KnownEndpoint {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        needs_api_key: true,
    },
    KnownEndpoint {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        needs_api_key: true,
    },
    KnownEndpoint {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        needs_api_key: true,
    },
    KnownEndpoint {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        needs_api_key: true,
    },
    KnownEndpoint {
        name: "fireworks",
        base_url: "https://api.fireworks.ai/inference/v1",
        needs_api_key: true,
    },
    KnownEndpoint {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        needs_api_key: false,
    },
    KnownEndpoint {
        name: "vllm",
        base_url: "http://localhost:8000/v1",
        needs_api_key: false,
    },
    KnownEndpoint {
        name: "llamacpp",
        base_url: "http://localhost:8080/v1",
        needs_api_key: false,
    },
];

fn known(provider: &str) -> Option<&'static KnownEndpoint> {
    KNOWN_ENDPOINTS.iter().find(|e| e.name == provider)
}

/// Whether `provider` refuses requests without an API key.
///
/// Unknown names are assumed to need one.
pub fn requires_api_key(provider: &str) -> bool {
    known(provider).is_none_or(|e| e.needs_api_key)
}

/// Build the provider selected by `config`.
///
/// Every provider speaks the OpenAI chat-completions protocol. An explicit
/// `base_url` wins; otherwise the provider name must be a known endpoint.
pub fn build_provider(config: &HandoffConfig) -> Result<Arc<dyn Provider>, ConfigError> {
    let base_url = match (&config.base_url, known(&config.provider)) {
        (Some(url), _) => url.clone(),
        (None, Some(endpoint)) => endpoint.base_url.to_string(),
        (None, None) => {
            return Err(ConfigError::ValidationError(format!(
                "unknown provider '{}'; set base_url to its chat-completions endpoint",
                config.provider
            )));
        }
    };

    debug!(provider = %config.provider, %base_url, "Using provider");

    let api_key = config.api_key.clone().unwrap_or_default();
    Ok(Arc::new(OpenAiCompatProvider::new(
        &config.provider,
        base_url,
        api_key,
    )))
}
