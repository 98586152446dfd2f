use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use polygate_protocol::{ErrorKind, GatewayError, Request, Response};
use polygate_provider_core::{
    CredentialId, CredentialPool, KeySelectError, KeySelector, ProviderAdapter, ProviderError,
    UpstreamCtx, UpstreamFailure, UpstreamHttpResponse, UpstreamTransportErrorKind,
};
use rand::Rng;

use crate::context::RequestContext;
use crate::upstream_client::UpstreamClient;

/// Bound on the number of times `retry_backoff_delay`'s exponent is allowed
/// to double before it saturates against `max_backoff` anyway. Matches the
/// growth curve the upstream proxy engine this is modeled on used.
const BACKOFF_EXPONENT_CAP: u32 = 6;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Drives one provider dispatch through key selection, the upstream call,
/// and retries within that single provider (spec §4.3, C3). Fallback to a
/// *different* provider is the fallback coordinator's job, layered above
/// this one.
pub struct RetryEngine {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub credentials: Arc<CredentialPool>,
    pub upstream: Arc<dyn UpstreamClient>,
}

enum Attempt {
    Response(UpstreamHttpResponse),
    Failed { error: GatewayError, credential_id: Option<CredentialId> },
}

impl RetryEngine {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        credentials: Arc<CredentialPool>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self { adapter, credentials, upstream }
    }

    /// Runs the request to a complete (non-streaming) `Response`.
    pub async fn execute(
        &self,
        ctx: &mut RequestContext,
        request: &Request,
        policy: RetryPolicy,
    ) -> Result<Response, GatewayError> {
        let resp = self.run(ctx, request, policy).await?;
        let body = resp.body_bytes();
        self.adapter
            .decode_response(&self.upstream_ctx(ctx, 0), request, resp.status, &resp.headers, &body)
            .map_err(provider_error_to_gateway)
    }

    /// Runs the request until the first byte of a successful response;
    /// returns the raw upstream response so the caller can stream it. Once
    /// this returns `Ok`, no further retries happen — a mid-stream failure
    /// is terminal (spec §4.3 rule 6, §4.7).
    pub async fn execute_stream(
        &self,
        ctx: &mut RequestContext,
        request: &Request,
        policy: RetryPolicy,
    ) -> Result<UpstreamHttpResponse, GatewayError> {
        match self.run_raw(ctx, request, policy).await? {
            Attempt::Response(resp) => Ok(resp),
            Attempt::Failed { error, .. } => Err(error),
        }
    }

    async fn run(
        &self,
        ctx: &mut RequestContext,
        request: &Request,
        policy: RetryPolicy,
    ) -> Result<UpstreamHttpResponse, GatewayError> {
        match self.run_raw(ctx, request, policy).await? {
            Attempt::Response(resp) => Ok(resp),
            Attempt::Failed { error, .. } => Err(error),
        }
    }

    async fn run_raw(
        &self,
        ctx: &mut RequestContext,
        request: &Request,
        policy: RetryPolicy,
    ) -> Result<Attempt, GatewayError> {
        let mut excluded: HashSet<CredentialId> = HashSet::new();
        let mut attempt_no: u32 = 0;

        loop {
            attempt_no += 1;

            if ctx.is_cancelled() {
                return Err(GatewayError::cancelled());
            }

            let selector = KeySelector::new(&self.credentials);
            let (credential_id, credential) =
                match selector.select(&request.provider, &request.model, &excluded).await {
                    Ok(pair) => pair,
                    Err(KeySelectError::ProviderUnknown { .. }) => {
                        return Err(GatewayError::unsupported_provider(&request.provider));
                    }
                    Err(KeySelectError::NoConfiguredKeyForModel { provider, model }) => {
                        return Err(GatewayError::no_configured_key_for_model(&provider, &model));
                    }
                };
            ctx.selected_key_id = Some(credential_id);

            let upstream_ctx = self.upstream_ctx(ctx, attempt_no);
            let wire_request = match self.adapter.encode(&upstream_ctx, &credential, request).await {
                Ok(req) => req,
                Err(err) => return Err(provider_error_to_gateway(err)),
            };

            let send_result = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return Err(GatewayError::cancelled());
                }
                result = self.upstream.send(wire_request) => result,
            };

            let attempt = match send_result {
                Ok(resp) if (200..300).contains(&resp.status) => {
                    return Ok(Attempt::Response(resp));
                }
                Ok(resp) => {
                    let body = resp.body_bytes();
                    let failure = UpstreamFailure::Http { status: resp.status, headers: resp.headers, body };
                    self.handle_failure(request, &failure, credential_id).await;
                    Attempt::Failed {
                        error: classify_failure(&failure),
                        credential_id: Some(credential_id),
                    }
                }
                Err(failure) => {
                    self.handle_failure(request, &failure, credential_id).await;
                    Attempt::Failed {
                        error: classify_failure(&failure),
                        credential_id: Some(credential_id),
                    }
                }
            };

            let Attempt::Failed { error, credential_id: failed_id } = attempt else {
                unreachable!("non-failure attempts returned above")
            };

            if matches!(error.kind, ErrorKind::Auth | ErrorKind::RateLimit) {
                if let Some(id) = failed_id {
                    excluded.insert(id);
                }
            }

            let should_retry =
                (matches!(error.kind, ErrorKind::Auth | ErrorKind::RateLimit) || error.retryable)
                    && attempt_no <= policy.max_retries;
            if !should_retry {
                return Ok(Attempt::Failed { error, credential_id: failed_id });
            }

            let delay = match error.kind {
                ErrorKind::Auth => Duration::ZERO,
                _ => backoff_delay(attempt_no, &policy, error.retry_after_secs),
            };
            if !delay.is_zero() {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(GatewayError::cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    async fn handle_failure(&self, request: &Request, failure: &UpstreamFailure, credential_id: CredentialId) {
        if let Some(decision) = self.adapter.decide_unavailable(request, failure) {
            self.credentials
                .mark_model_unavailable(credential_id, request.model.clone(), decision.duration, decision.reason)
                .await;
        }
    }

    fn upstream_ctx(&self, ctx: &RequestContext, attempt_no: u32) -> UpstreamCtx {
        UpstreamCtx {
            trace_id: ctx.trace_id.clone(),
            provider: self.adapter.name().to_string(),
            credential_id: ctx.selected_key_id,
            attempt_no,
        }
    }
}

trait ResponseBytes {
    fn body_bytes(&self) -> bytes::Bytes;
}

impl ResponseBytes for UpstreamHttpResponse {
    fn body_bytes(&self) -> bytes::Bytes {
        match &self.body {
            polygate_provider_core::UpstreamBody::Bytes(bytes) => bytes.clone(),
            polygate_provider_core::UpstreamBody::Stream(_) => bytes::Bytes::new(),
        }
    }
}

/// Classifies an upstream failure into the canonical error taxonomy (spec
/// §7's exact status table).
pub fn classify_failure(failure: &UpstreamFailure) -> GatewayError {
    match failure {
        UpstreamFailure::Http { status, body, .. } => {
            let message = http_body_message(body);
            let kind = match *status {
                401 => ErrorKind::Auth,
                403 => ErrorKind::Authz,
                429 => ErrorKind::RateLimit,
                s if (500..600).contains(&s) => ErrorKind::ProviderInternal,
                _ => ErrorKind::BadRequest,
            };
            let mut error = GatewayError::new(kind, format!("upstream_status_{status}"), message)
                .with_http_status(*status);
            if kind == ErrorKind::RateLimit {
                if let Some(secs) = parse_retry_after_from_failure(failure) {
                    error = error.with_retry_after(secs);
                }
            }
            error
        }
        UpstreamFailure::Transport { kind, message } => {
            let gateway_kind = match kind {
                UpstreamTransportErrorKind::Timeout | UpstreamTransportErrorKind::ReadTimeout => {
                    ErrorKind::Timeout
                }
                _ => ErrorKind::Network,
            };
            GatewayError::new(gateway_kind, "upstream_transport_error", message.clone())
        }
    }
}

fn parse_retry_after_from_failure(failure: &UpstreamFailure) -> Option<u64> {
    let UpstreamFailure::Http { headers, .. } = failure else {
        return None;
    };
    polygate_provider_core::header_get(headers, "retry-after")?.trim().parse::<u64>().ok()
}

pub fn provider_error_to_gateway(err: ProviderError) -> GatewayError {
    match err {
        ProviderError::Unsupported(what) => {
            GatewayError::new(ErrorKind::Unsupported, "unsupported", what.to_string())
        }
        ProviderError::InvalidConfig(msg) => GatewayError::new(ErrorKind::Internal, "invalid_config", msg),
        ProviderError::MissingCredentialField(field) => GatewayError::new(
            ErrorKind::Internal,
            "missing_credential_field",
            format!("missing credential field: {field}"),
        ),
        ProviderError::Other(msg) => GatewayError::new(ErrorKind::Internal, "provider_error", msg),
    }
}

/// `min(max_backoff, initial_backoff * 2^min(attempt_no - 1, cap)) + jitter`,
/// where jitter is uniform in `[0, initial_backoff)`. A `Retry-After` header
/// always wins when present (spec §4.3 rule 4).
fn backoff_delay(attempt_no: u32, policy: &RetryPolicy, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_secs(secs).min(policy.max_backoff);
    }
    let exponent = (attempt_no.saturating_sub(1)).min(BACKOFF_EXPONENT_CAP);
    let scaled = policy.initial_backoff.saturating_mul(1u32 << exponent);
    let base = scaled.min(policy.max_backoff);
    let jitter_upper_ms = policy.initial_backoff.as_millis().max(1) as u64;
    let jitter_ms = rand::rng().random_range(0..jitter_upper_ms);
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }

    #[test]
    fn retry_after_hint_is_clamped_to_max_backoff() {
        let policy = policy();
        let delay = backoff_delay(1, &policy, Some(3600));
        assert_eq!(delay, policy.max_backoff);
    }

    #[test]
    fn retry_after_hint_under_max_backoff_is_used_verbatim() {
        let policy = policy();
        let delay = backoff_delay(1, &policy, Some(1));
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn exponential_backoff_doubles_and_saturates_at_max() {
        let policy = policy();
        // attempt 1: base = initial_backoff (2^0), jitter in [0, initial_backoff)
        let d1 = backoff_delay(1, &policy, None);
        assert!(d1 >= policy.initial_backoff && d1 < policy.initial_backoff * 2);
        // large attempt numbers must saturate at max_backoff, never exceed
        // max_backoff + one jitter window.
        let d_big = backoff_delay(20, &policy, None);
        assert!(d_big >= policy.max_backoff);
        assert!(d_big < policy.max_backoff + policy.initial_backoff);
    }

    #[test]
    fn classify_failure_maps_http_statuses_per_spec_table() {
        let unauthorized = UpstreamFailure::Http { status: 401, headers: Default::default(), body: bytes::Bytes::new() };
        assert_eq!(classify_failure(&unauthorized).kind, ErrorKind::Auth);

        let forbidden = UpstreamFailure::Http { status: 403, headers: Default::default(), body: bytes::Bytes::new() };
        assert_eq!(classify_failure(&forbidden).kind, ErrorKind::Authz);

        let throttled = UpstreamFailure::Http { status: 429, headers: Default::default(), body: bytes::Bytes::new() };
        let throttled = classify_failure(&throttled);
        assert_eq!(throttled.kind, ErrorKind::RateLimit);
        assert!(throttled.retryable);
        assert!(throttled.allow_fallback);

        let server_error = UpstreamFailure::Http { status: 503, headers: Default::default(), body: bytes::Bytes::new() };
        assert_eq!(classify_failure(&server_error).kind, ErrorKind::ProviderInternal);

        let bad_request = UpstreamFailure::Http { status: 422, headers: Default::default(), body: bytes::Bytes::new() };
        let bad_request = classify_failure(&bad_request);
        assert_eq!(bad_request.kind, ErrorKind::BadRequest);
        assert!(!bad_request.retryable);
    }
}

fn http_body_message(body: &bytes::Bytes) -> String {
    const MAX_CHARS: usize = 500;
    let text = String::from_utf8_lossy(body);
    if text.chars().count() > MAX_CHARS {
        format!("{}...", text.chars().take(MAX_CHARS).collect::<String>())
    } else {
        text.into_owned()
    }
}
