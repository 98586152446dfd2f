use std::collections::HashMap;
use std::sync::Arc;

use polygate_protocol::{GatewayError, Request, Response};
use polygate_provider_core::{CredentialPool, ProviderAdapter, ProviderRegistry, UpstreamHttpResponse};

use crate::context::RequestContext;
use crate::pool::PoolRegistry;
use crate::retry::{RetryEngine, RetryPolicy};
use crate::upstream_client::UpstreamClient;

/// A stream that has successfully started (first byte received) against one
/// candidate in the fallback chain; the orchestrator reads its body and
/// decodes it through `adapter`.
pub struct EstablishedStream {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub response: UpstreamHttpResponse,
    pub fallback_index: Option<u32>,
    /// The candidate request that actually established the stream (the
    /// primary, or whichever fallback succeeded before any bytes flowed).
    pub request: Request,
}

/// Walks `[primary] ++ fallbacks` in order, retrying within each candidate
/// via [`RetryEngine`] before moving to the next one (spec §4.6, C6).
/// Advancing to the next candidate stops as soon as an error arrives with
/// `allow_fallback == false` (spec §4.6 rule 3).
pub struct FallbackCoordinator {
    registry: Arc<ProviderRegistry>,
    credentials: Arc<CredentialPool>,
    upstream: Arc<dyn UpstreamClient>,
    pools: Arc<PoolRegistry>,
    retry_policies: Arc<HashMap<String, RetryPolicy>>,
}

impl FallbackCoordinator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        credentials: Arc<CredentialPool>,
        upstream: Arc<dyn UpstreamClient>,
        pools: Arc<PoolRegistry>,
        retry_policies: Arc<HashMap<String, RetryPolicy>>,
    ) -> Self {
        Self { registry, credentials, upstream, pools, retry_policies }
    }

    fn policy_for(&self, provider: &str) -> RetryPolicy {
        self.retry_policies.get(provider).copied().unwrap_or_default()
    }

    fn candidates(&self, request: &Request) -> Vec<Request> {
        let mut candidates = vec![request.clone()];
        if let Some(fallbacks) = &request.fallbacks {
            for target in fallbacks {
                candidates.push(request.retarget(target.provider.clone(), target.model.clone()));
            }
        }
        candidates
    }

    pub async fn dispatch(
        &self,
        ctx: &mut RequestContext,
        request: &Request,
    ) -> Result<Response, GatewayError> {
        let candidates = self.candidates(request);
        let mut last_error: Option<GatewayError> = None;

        for (index, candidate) in candidates.into_iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(GatewayError::cancelled());
            }
            ctx.fallback_index = if index == 0 { None } else { Some(index as u32) };

            let Some(adapter) = self.registry.get(&candidate.provider) else {
                let error = GatewayError::unsupported_provider(&candidate.provider);
                if !error.allow_fallback {
                    return Err(error);
                }
                last_error = Some(error);
                continue;
            };

            let engine = RetryEngine::new(adapter, self.credentials.clone(), self.upstream.clone());
            let policy = self.policy_for(&candidate.provider);
            let pool = self.pools.get_or_create(&candidate.provider).await;

            let mut job_ctx = ctx.clone();
            let job_request = candidate.clone();
            let result = pool
                .submit(async move { engine.execute(&mut job_ctx, &job_request, policy).await })
                .await;

            let result = match result {
                Ok(inner) => inner,
                Err(queue_error) => Err(queue_error),
            };

            match result {
                Ok(mut response) => {
                    response.extra_fields.fallback_index = ctx.fallback_index;
                    return Ok(response);
                }
                Err(error) => {
                    if !error.allow_fallback {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::unsupported_provider(&request.provider)
        }))
    }

    pub async fn dispatch_stream(
        &self,
        ctx: &mut RequestContext,
        request: &Request,
    ) -> Result<EstablishedStream, GatewayError> {
        let candidates = self.candidates(request);
        let mut last_error: Option<GatewayError> = None;

        for (index, candidate) in candidates.into_iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(GatewayError::cancelled());
            }
            ctx.fallback_index = if index == 0 { None } else { Some(index as u32) };

            let Some(adapter) = self.registry.get(&candidate.provider) else {
                let error = GatewayError::unsupported_provider(&candidate.provider);
                if !error.allow_fallback {
                    return Err(error);
                }
                last_error = Some(error);
                continue;
            };

            let engine =
                RetryEngine::new(adapter.clone(), self.credentials.clone(), self.upstream.clone());
            let policy = self.policy_for(&candidate.provider);
            let pool = self.pools.get_or_create(&candidate.provider).await;

            let mut job_ctx = ctx.clone();
            let job_request = candidate.clone();
            let result = pool
                .submit(async move { engine.execute_stream(&mut job_ctx, &job_request, policy).await })
                .await;

            let result = match result {
                Ok(inner) => inner,
                Err(queue_error) => Err(queue_error),
            };

            match result {
                Ok(response) => {
                    return Ok(EstablishedStream {
                        adapter,
                        response,
                        fallback_index: ctx.fallback_index,
                        request: candidate,
                    });
                }
                Err(error) => {
                    if !error.allow_fallback {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::unsupported_provider(&request.provider)
        }))
    }
}
