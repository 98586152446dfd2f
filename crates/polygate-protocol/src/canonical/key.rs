use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Per-provider credential metadata that does not fit the generic
/// `{value, models, weight}` shape (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderSpecificConfig {
    None,
    AzureOpenAi { deployment_map: std::collections::BTreeMap<String, String>, api_version: String },
    Bedrock { region: String, role_arn: Option<String> },
    Vertex { project: String, region: String },
}

impl Default for ProviderSpecificConfig {
    fn default() -> Self {
        ProviderSpecificConfig::None
    }
}

/// A credential descriptor: opaque material plus the fields the
/// `KeySelector` (C2) needs to filter and weight candidates (spec §3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub id: i64,
    /// Opaque credential material or a reference to it (e.g. a secret-store
    /// key). Never logged; adapters read it only to sign requests.
    pub value: String,
    /// Empty set means "any model is permitted with this key".
    #[serde(default)]
    pub models: BTreeSet<String>,
    /// Must be strictly positive (spec §3 invariant b).
    pub weight: f64,
    #[serde(default)]
    pub provider_specific_config: ProviderSpecificConfig,
}

impl Key {
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.contains(model)
    }
}
