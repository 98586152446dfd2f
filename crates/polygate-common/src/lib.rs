use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI > ENV > file, applied once at startup (spec §1: config
/// loading/validation is an external collaborator; the core only consumes
/// the merged result).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Optional outbound proxy for upstream requests to providers.
    pub proxy: Option<String>,
    /// Database DSN for the `LogStore` (spec §4.8, §6) — the only
    /// persistent store this core owns.
    pub log_store_dsn: String,
    /// Whether to redact sensitive fields (credentials, raw bodies) in
    /// emitted events and logs.
    pub event_redact_sensitive: bool,
    /// Global switch for content logging (spec §4.8): when disabled, only
    /// id/provider/model/latency/usage/cost/status/error_kind are recorded.
    pub content_logging_enabled: bool,
}

/// Optional layer used for merging global config from CLI/env/file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub proxy: Option<String>,
    pub log_store_dsn: Option<String>,
    pub event_redact_sensitive: Option<bool>,
    pub content_logging_enabled: Option<bool>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.log_store_dsn.is_some() {
            self.log_store_dsn = other.log_store_dsn;
        }
        if other.event_redact_sensitive.is_some() {
            self.event_redact_sensitive = other.event_redact_sensitive;
        }
        if other.content_logging_enabled.is_some() {
            self.content_logging_enabled = other.content_logging_enabled;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            proxy: self.proxy,
            log_store_dsn: self
                .log_store_dsn
                .ok_or(GlobalConfigError::MissingField("log_store_dsn"))?,
            event_redact_sensitive: self.event_redact_sensitive.unwrap_or(true),
            content_logging_enabled: self.content_logging_enabled.unwrap_or(true),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            proxy: value.proxy,
            log_store_dsn: Some(value.log_store_dsn),
            event_redact_sensitive: Some(value.event_redact_sensitive),
            content_logging_enabled: Some(value.content_logging_enabled),
        }
    }
}
