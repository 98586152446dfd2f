use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical error taxonomy (spec §3, §7). Every gateway-visible failure is
/// classified into exactly one `ErrorKind`, carrying the `retryable` and
/// `allow_fallback` flags the retry engine and fallback coordinator consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    Authz,
    RateLimit,
    BadRequest,
    ProviderInternal,
    Network,
    Timeout,
    Cancelled,
    Unsupported,
    Internal,
}

impl ErrorKind {
    /// Default retryability for this kind absent any more specific signal
    /// (e.g. a streaming request that has already begun producing bytes).
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::ProviderInternal | ErrorKind::Network | ErrorKind::Timeout
        )
    }

    pub fn default_allow_fallback(self) -> bool {
        !matches!(
            self,
            ErrorKind::BadRequest | ErrorKind::Cancelled
        )
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Auth => 401,
            ErrorKind::Authz => 403,
            ErrorKind::RateLimit => 429,
            ErrorKind::BadRequest => 400,
            ErrorKind::ProviderInternal => 500,
            ErrorKind::Network => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::Cancelled => 499,
            ErrorKind::Unsupported => 501,
            ErrorKind::Internal => 500,
        }
    }
}

/// Caller-visible error envelope (spec §3, §6). Always carries `event_id`
/// for correlation with log records.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind:?}: {message} (code={code})")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub allow_fallback: bool,
    pub code: String,
    pub message: String,
    pub event_id: uuid::Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// `Retry-After` hint from the provider, seconds, when present
    /// (spec §4.3: must be used verbatim instead of exponential backoff).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.default_retryable(),
            allow_fallback: kind.default_allow_fallback(),
            code: code.into(),
            message: message.into(),
            event_id: uuid::Uuid::new_v4(),
            param: None,
            raw: None,
            http_status: Some(kind.http_status()),
            retry_after_secs: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled", "request was cancelled by the caller")
    }

    pub fn no_configured_key_for_model(provider: &str, model: &str) -> Self {
        Self::new(
            ErrorKind::Auth,
            "no_configured_key_for_model",
            format!("no key configured for provider '{provider}' and model '{model}'"),
        )
    }

    pub fn queue_full() -> Self {
        Self::new(ErrorKind::RateLimit, "queue_full", "worker pool queue is at capacity")
    }

    pub fn unsupported_provider(provider: &str) -> Self {
        Self::new(ErrorKind::Unsupported, "unsupported_provider", format!("unknown provider '{provider}'"))
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }
}
