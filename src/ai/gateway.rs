use std::time::Duration;

use log::{error, info, warn};

use super::provider::{ChatCompletionsProvider, GeminiProvider, Provider, ProviderError};
use crate::auth::Token;
use crate::config::{AiConfig, ProviderConfig, ProviderKind};

/// What the caller expects back; only changes the system framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Structured,
    Diff,
}

impl OutputMode {
    fn system_framing(self) -> &'static str {
        match self {
            Self::Structured => {
                "You are a CI failure analysis engine. Respond with a single JSON object and nothing else."
            }
            Self::Diff => {
                "You are a DevOps engineer fixing CI failures. Respond with a raw unified diff and nothing else."
            }
        }
    }
}

/// Result of walking the provider chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayReply {
    /// Non-empty text from the first provider that answered.
    Text { provider: String, text: String },
    /// Every provider failed; there is no model output to interpret.
    SafeMode,
}

/// Ordered fallback chain over interchangeable model providers.
pub struct Gateway {
    providers: Vec<Box<dyn Provider>>,
    timeout: Duration,
}

impl Gateway {
    pub fn new(providers: Vec<Box<dyn Provider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    /// Builds the chain from configuration, keeping the configured order.
    ///
    /// Providers whose API key variable is unset are left out with a warning;
    /// a gateway without providers always answers [`GatewayReply::SafeMode`].
    pub fn from_config(config: &AiConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);

        let providers = config
            .providers
            .iter()
            .filter_map(|provider| match build_provider(provider, timeout) {
                Ok(built) => Some(built),
                Err(e) => {
                    warn!("Skipping provider {}: {e}", provider.name);
                    None
                }
            })
            .collect::<Vec<_>>();

        info!(
            "AI gateway ready with {} provider(s): {}",
            providers.len(),
            providers
                .iter()
                .map(|p| p.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Self::new(providers, timeout)
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Sends the prompt to each provider in order until one returns text.
    ///
    /// A failing provider is never retried; the chain simply advances.
    pub async fn invoke(&self, prompt: &str, mode: OutputMode) -> GatewayReply {
        let system = mode.system_framing();

        for provider in &self.providers {
            info!("[AI] Calling {} ({mode:?})", provider.name());

            let result = match tokio::time::timeout(self.timeout, provider.complete(system, prompt)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.timeout.as_secs())),
            };

            match result {
                Ok(text) if !text.trim().is_empty() => {
                    info!("[AI] {} responded ({} chars)", provider.name(), text.len());
                    return GatewayReply::Text {
                        provider: provider.name().to_string(),
                        text,
                    };
                }
                Ok(_) => warn!("[AI] {} returned empty output, trying next provider", provider.name()),
                Err(e) => warn!("[AI] {} failed: {e}, trying next provider", provider.name()),
            }
        }

        error!("[AI] All providers failed, entering safe mode");
        GatewayReply::SafeMode
    }
}

fn build_provider(config: &ProviderConfig, timeout: Duration) -> Result<Box<dyn Provider>, ProviderError> {
    let api_key = Token::from_env(&config.api_key_env)
        .ok_or_else(|| ProviderError::MissingApiKey(config.api_key_env.clone()))?;

    Ok(match config.kind {
        ProviderKind::ChatCompletions => Box::new(ChatCompletionsProvider::new(config, api_key, timeout)?),
        ProviderKind::Gemini => Box::new(GeminiProvider::new(config, api_key, timeout)?),
    })
}
