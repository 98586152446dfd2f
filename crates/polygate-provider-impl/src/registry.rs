//! Wires operator `ProviderConfig` entries (spec §4.1, §6) to concrete
//! `ProviderAdapter` implementations and populates a `ProviderRegistry`.

use std::sync::Arc;

use polygate_provider_core::ProviderRegistry;
use polygate_provider_core::config::ProviderConfig;

use crate::providers::{
    AnthropicAdapter, AzureOpenAiAdapter, BedrockAdapter, CohereAdapter, GroqAdapter, MistralAdapter,
    OllamaAdapter, OpenAiAdapter, VertexAdapter,
};

/// Builds one adapter per configured provider and registers it. Unknown
/// provider tags (`Custom`) are registered as an OpenAI-compatible adapter
/// pointed at the operator-supplied base URL, since that's the only shape a
/// generic "bring your own OpenAI-compatible endpoint" entry can mean.
pub fn register_configured_providers(registry: &mut ProviderRegistry, providers: &polygate_provider_core::config::ProviderSet) {
    for config in providers.providers.values() {
        match config {
            ProviderConfig::OpenAi { base_url, .. } => {
                let adapter = match base_url {
                    Some(base_url) => OpenAiAdapter::with_base_url(base_url.clone()),
                    None => OpenAiAdapter::new(),
                };
                registry.register(Arc::new(adapter));
            }
            ProviderConfig::Anthropic { base_url, .. } => {
                let adapter = match base_url {
                    Some(base_url) => AnthropicAdapter::with_base_url(base_url.clone()),
                    None => AnthropicAdapter::new(),
                };
                registry.register(Arc::new(adapter));
            }
            ProviderConfig::AzureOpenAi { base_url, api_version, .. } => {
                registry.register(Arc::new(AzureOpenAiAdapter::new(base_url.clone(), api_version.clone())));
            }
            ProviderConfig::Bedrock { region, .. } => {
                registry.register(Arc::new(BedrockAdapter::new(region.clone())));
            }
            ProviderConfig::Vertex { region, .. } => {
                registry.register(Arc::new(VertexAdapter::new(region.clone())));
            }
            ProviderConfig::Cohere { base_url, .. } => {
                let adapter = match base_url {
                    Some(base_url) => CohereAdapter::with_base_url(base_url.clone()),
                    None => CohereAdapter::new(),
                };
                registry.register(Arc::new(adapter));
            }
            ProviderConfig::Mistral { base_url, .. } => {
                let adapter = match base_url {
                    Some(base_url) => MistralAdapter::with_base_url(base_url.clone()),
                    None => MistralAdapter::new(),
                };
                registry.register(Arc::new(adapter));
            }
            ProviderConfig::Ollama { base_url, .. } => {
                registry.register(Arc::new(OllamaAdapter::new(base_url.clone())));
            }
            ProviderConfig::Groq { base_url, .. } => {
                let adapter = match base_url {
                    Some(base_url) => GroqAdapter::with_base_url(base_url.clone()),
                    None => GroqAdapter::new(),
                };
                registry.register(Arc::new(adapter));
            }
            ProviderConfig::Custom { .. } => {
                // A custom entry only carries a base URL; the OpenAI-wire
                // family is the only shape that makes sense without further
                // per-provider knowledge.
                registry.register(Arc::new(OpenAiAdapter::with_base_url(config_custom_base_url(config))));
            }
        }
    }
}

fn config_custom_base_url(config: &ProviderConfig) -> String {
    match config {
        ProviderConfig::Custom { base_url, .. } => base_url.clone(),
        _ => unreachable!("config_custom_base_url called with a non-Custom variant"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polygate_provider_core::config::{ModelTable, ProviderSet};

    #[test]
    fn registers_one_adapter_per_configured_provider() {
        let mut providers = ProviderSet::default();
        providers.insert(ProviderConfig::OpenAi { base_url: None, model_table: ModelTable::default() });
        providers.insert(ProviderConfig::Groq { base_url: None, model_table: ModelTable::default() });

        let mut registry = ProviderRegistry::new();
        register_configured_providers(&mut registry, &providers);

        assert!(registry.get("openai").is_some());
        assert!(registry.get("groq").is_some());
        assert!(registry.get("anthropic").is_none());
    }
}
