use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::provider::UpstreamTransportErrorKind;
use crate::{CredentialId, Headers, UnavailableReason};

/// Flattened usage accounting attached to an upstream event for log/metrics
/// consumption, derived from `polygate_protocol::canonical::Usage` at the
/// point a response or stream finishes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<polygate_protocol::Usage> for UsageSummary {
    fn from(usage: polygate_protocol::Usage) -> Self {
        match usage {
            polygate_protocol::Usage::Tokens { prompt_tokens, completion_tokens, total_tokens } => {
                UsageSummary { prompt_tokens, completion_tokens, total_tokens }
            }
            polygate_protocol::Usage::Audio { input_tokens, output_tokens, total_tokens } => {
                UsageSummary { prompt_tokens: input_tokens, completion_tokens: output_tokens, total_tokens }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Downstream(DownstreamEvent),
    Upstream(UpstreamEvent),
    Operational(OperationalEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamEvent {
    pub trace_id: Option<String>,
    pub at: SystemTime,
    pub request_method: String,
    pub request_headers: Headers,
    pub request_path: String,
    pub request_query: Option<String>,
    pub request_body: Option<Vec<u8>>,
    pub response_status: Option<u16>,
    pub response_headers: Headers,
    pub response_body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamEvent {
    pub trace_id: Option<String>,
    pub at: SystemTime,
    pub provider: String,
    pub credential_id: Option<CredentialId>,
    pub internal: bool,
    pub attempt_no: u32,
    pub operation: String,
    pub request_method: String,
    pub request_headers: Headers,
    pub request_path: String,
    pub request_query: Option<String>,
    pub request_body: Option<Vec<u8>>,
    pub response_status: Option<u16>,
    pub response_headers: Headers,
    pub response_body: Option<Vec<u8>>,
    pub usage: Option<UsageSummary>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub transport_kind: Option<UpstreamTransportErrorKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationalEvent {
    UnavailableStart(UnavailableStartEvent),
    UnavailableEnd(UnavailableEndEvent),
    ModelUnavailableStart(ModelUnavailableStartEvent),
    ModelUnavailableEnd(ModelUnavailableEndEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableStartEvent {
    pub at: SystemTime,
    pub credential_id: CredentialId,
    pub reason: UnavailableReason,
    pub until: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableEndEvent {
    pub at: SystemTime,
    pub credential_id: CredentialId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUnavailableStartEvent {
    pub at: SystemTime,
    pub credential_id: CredentialId,
    pub model: String,
    pub reason: UnavailableReason,
    pub until: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUnavailableEndEvent {
    pub at: SystemTime,
    pub credential_id: CredentialId,
    pub model: String,
}
