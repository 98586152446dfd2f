//! Core provider abstractions for polygate.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP client.
//! Provider implementations construct `UpstreamHttpRequest`s (and decode
//! responses back into the canonical schema), while a higher layer performs IO.

pub mod config;
pub mod credential;
pub mod errors;
pub mod events;
pub mod headers;
pub mod provider;
pub mod registry;

pub use config::{ProviderConfig, ProviderSet};
pub use credential::{
    AcquireError, Credential, CredentialId, CredentialPool, CredentialState, KeySelectError,
    KeySelector, UnavailableReason,
};
pub use errors::{ProviderError, ProviderResult};
pub use events::{
    DownstreamEvent, Event, EventHub, EventSink, ModelUnavailableEndEvent,
    ModelUnavailableStartEvent, OperationalEvent, TerminalEventSink, UnavailableEndEvent,
    UnavailableStartEvent, UpstreamEvent, UsageSummary,
};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use provider::{
    HttpMethod, ProviderAdapter, StreamFraming, UnavailableDecision, UpstreamBody, UpstreamCtx,
    UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse, UpstreamTransportErrorKind,
    default_decide_unavailable,
};
pub use registry::ProviderRegistry;
