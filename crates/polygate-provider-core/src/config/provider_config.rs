use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::model_table::ModelTable;

/// Per-provider static configuration (spec §4.1, §6): base URLs, the
/// provider-specific routing fields `ProviderAdapter::encode` needs, and the
/// model table exposed via `list_models`. One variant per concrete adapter
/// named in the spec, plus `Custom` for an OpenAI-compatible backend the
/// operator points at an arbitrary base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderConfig {
    OpenAi {
        #[serde(skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default)]
        model_table: ModelTable,
    },
    Anthropic {
        #[serde(skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default)]
        model_table: ModelTable,
    },
    AzureOpenAi {
        base_url: String,
        api_version: String,
        #[serde(default)]
        deployment_map: BTreeMap<String, String>,
        #[serde(default)]
        model_table: ModelTable,
    },
    Bedrock {
        region: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role_arn: Option<String>,
        #[serde(default)]
        model_table: ModelTable,
    },
    Vertex {
        project: String,
        region: String,
        #[serde(default)]
        model_table: ModelTable,
    },
    Cohere {
        #[serde(skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default)]
        model_table: ModelTable,
    },
    Mistral {
        #[serde(skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default)]
        model_table: ModelTable,
    },
    Ollama {
        base_url: String,
        #[serde(default)]
        model_table: ModelTable,
    },
    Groq {
        #[serde(skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default)]
        model_table: ModelTable,
    },
    Custom {
        id: String,
        base_url: String,
        #[serde(default)]
        model_table: ModelTable,
    },
}

impl ProviderConfig {
    /// The provider tag this config registers under (matches
    /// `Request::provider` and `ProviderAdapter::name`).
    pub fn tag(&self) -> &str {
        match self {
            ProviderConfig::OpenAi { .. } => "openai",
            ProviderConfig::Anthropic { .. } => "anthropic",
            ProviderConfig::AzureOpenAi { .. } => "azure_openai",
            ProviderConfig::Bedrock { .. } => "bedrock",
            ProviderConfig::Vertex { .. } => "vertex",
            ProviderConfig::Cohere { .. } => "cohere",
            ProviderConfig::Mistral { .. } => "mistral",
            ProviderConfig::Ollama { .. } => "ollama",
            ProviderConfig::Groq { .. } => "groq",
            ProviderConfig::Custom { id, .. } => id,
        }
    }

    pub fn model_table(&self) -> &ModelTable {
        match self {
            ProviderConfig::OpenAi { model_table, .. }
            | ProviderConfig::Anthropic { model_table, .. }
            | ProviderConfig::AzureOpenAi { model_table, .. }
            | ProviderConfig::Bedrock { model_table, .. }
            | ProviderConfig::Vertex { model_table, .. }
            | ProviderConfig::Cohere { model_table, .. }
            | ProviderConfig::Mistral { model_table, .. }
            | ProviderConfig::Ollama { model_table, .. }
            | ProviderConfig::Groq { model_table, .. }
            | ProviderConfig::Custom { model_table, .. } => model_table,
        }
    }
}

/// The operator's full provider configuration, keyed by provider tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSet {
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderSet {
    pub fn get(&self, tag: &str) -> Option<&ProviderConfig> {
        self.providers.get(tag)
    }

    pub fn insert(&mut self, config: ProviderConfig) {
        self.providers.insert(config.tag().to_string(), config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_matches_serialized_discriminant() {
        let config = ProviderConfig::Ollama { base_url: "http://localhost:11434".into(), model_table: ModelTable::default() };
        assert_eq!(config.tag(), "ollama");
    }

    #[test]
    fn custom_tag_is_operator_chosen_id() {
        let config = ProviderConfig::Custom {
            id: "my-openai-compatible".into(),
            base_url: "https://example.internal/v1".into(),
            model_table: ModelTable::default(),
        };
        assert_eq!(config.tag(), "my-openai-compatible");
    }
}
