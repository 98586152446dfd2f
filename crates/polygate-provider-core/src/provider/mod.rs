use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use polygate_protocol::{Request, Response, StreamDecodeOutcome};

use crate::credential::UnavailableReason;
use crate::errors::ProviderResult;
use crate::headers::{Headers, header_get};

pub type ByteStream = tokio::sync::mpsc::Receiver<Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn parse(method: &str) -> Option<Self> {
        if method.eq_ignore_ascii_case("GET") {
            Some(HttpMethod::Get)
        } else if method.eq_ignore_ascii_case("POST") {
            Some(HttpMethod::Post)
        } else if method.eq_ignore_ascii_case("PUT") {
            Some(HttpMethod::Put)
        } else if method.eq_ignore_ascii_case("PATCH") {
            Some(HttpMethod::Patch)
        } else if method.eq_ignore_ascii_case("DELETE") {
            Some(HttpMethod::Delete)
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

/// The encoded wire request an adapter produces from a canonical [`Request`]
/// (spec §4.1: `encode(request, key) → wire_bytes + http_metadata`).
#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

/// Call-scoped context threaded through adapter calls: identifiers useful
/// for event/log correlation, not part of the wire payload itself.
#[derive(Debug, Clone)]
pub struct UpstreamCtx {
    pub trace_id: Option<String>,
    pub provider: String,
    pub credential_id: Option<i64>,
    pub attempt_no: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// Transport-level failures (no HTTP response).
    Transport {
        kind: UpstreamTransportErrorKind,
        message: String,
    },
    /// HTTP error response captured as bytes (usually non-2xx).
    Http {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnavailableDecision {
    pub duration: Duration,
    pub reason: UnavailableReason,
}

/// How an adapter's streaming bytes are framed on the wire (spec §4.1, §4.7).
/// Determines how the transport layer splits a response body into the units
/// `decode_stream_chunk` expects, one call per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFraming {
    /// One `data: ...` line payload (already split out of the SSE framing)
    /// per call, via `polygate_protocol::sse::SseParser`.
    Sse,
    /// One complete wire frame per call, with no further splitting — e.g.
    /// Bedrock's `vnd.amazon.eventstream` messages.
    Raw,
}

const RATE_LIMIT_FALLBACK_SECS: u64 = 30;
const SHORT_COOLDOWN_SECS: u64 = 10;
const AUTH_INVALID_YEARS: u64 = 9_999;

/// Default HTTP-failure → cooldown-decision classification (spec §4.1, §7),
/// shared by every adapter unless it overrides `decide_unavailable`.
pub fn default_decide_unavailable(failure: &UpstreamFailure) -> Option<UnavailableDecision> {
    match failure {
        UpstreamFailure::Http { status, headers, .. } => {
            if *status == 404 {
                return None;
            }
            if *status == 429 {
                let duration = parse_retry_after(headers)
                    .unwrap_or_else(|| Duration::from_secs(RATE_LIMIT_FALLBACK_SECS));
                return Some(UnavailableDecision { duration, reason: UnavailableReason::RateLimit });
            }
            if *status == 401 || *status == 403 {
                return Some(UnavailableDecision {
                    duration: auth_invalid_duration(),
                    reason: UnavailableReason::AuthInvalid,
                });
            }
            if (500..600).contains(status) {
                return Some(UnavailableDecision {
                    duration: Duration::from_secs(SHORT_COOLDOWN_SECS),
                    reason: UnavailableReason::Upstream5xx,
                });
            }
            None
        }
        UpstreamFailure::Transport { kind, .. } => match kind {
            UpstreamTransportErrorKind::Timeout
            | UpstreamTransportErrorKind::ReadTimeout
            | UpstreamTransportErrorKind::Connect
            | UpstreamTransportErrorKind::Dns
            | UpstreamTransportErrorKind::Tls => Some(UnavailableDecision {
                duration: Duration::from_secs(SHORT_COOLDOWN_SECS),
                reason: UnavailableReason::Timeout,
            }),
            UpstreamTransportErrorKind::Other => None,
        },
    }
}

fn parse_retry_after(headers: &Headers) -> Option<Duration> {
    let value = header_get(headers, "retry-after")?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let secs = value.parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

fn auth_invalid_duration() -> Duration {
    Duration::from_secs(AUTH_INVALID_YEARS * 365 * 24 * 60 * 60)
}

/// One adapter per upstream backend (spec §4.1, C1). Adapters translate
/// between the canonical [`Request`]/[`Response`] schema and a provider's
/// native wire format; nothing above this boundary ever sees a
/// provider-native shape except inside `extra_fields.raw`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this adapter handles the given request type at all.
    fn supports(&self, request_type: polygate_protocol::RequestType) -> bool;

    /// Builds the wire request (URL, headers, signed/authenticated body) for
    /// a canonical request against a selected credential `Key`.
    async fn encode(
        &self,
        ctx: &UpstreamCtx,
        key: &crate::credential::Credential,
        request: &Request,
    ) -> ProviderResult<UpstreamHttpRequest>;

    /// Parses a complete (non-streaming) upstream HTTP response into the
    /// canonical `Response`, or fails if the body couldn't be decoded.
    fn decode_response(
        &self,
        ctx: &UpstreamCtx,
        request: &Request,
        status: u16,
        headers: &Headers,
        body: &[u8],
    ) -> ProviderResult<Response>;

    /// Parses one frame of a streaming upstream response (spec §4.1, §4.7).
    fn decode_stream_chunk(&self, ctx: &UpstreamCtx, request: &Request, bytes: &[u8]) -> StreamDecodeOutcome;

    /// Classifies an upstream failure into a credential cooldown decision.
    /// Overridable because status-code/error-body semantics vary by
    /// provider; the default matches spec §4.1/§7 for conventional REST
    /// error responses.
    fn decide_unavailable(&self, _request: &Request, failure: &UpstreamFailure) -> Option<UnavailableDecision> {
        default_decide_unavailable(failure)
    }

    /// How this adapter's streaming responses are framed. Every adapter
    /// except Bedrock rides plain SSE.
    fn stream_framing(&self) -> StreamFraming {
        StreamFraming::Sse
    }
}
