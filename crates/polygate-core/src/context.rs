use std::collections::BTreeMap;

use polygate_provider_core::CredentialId;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-request state threaded through the plugin chain, the fallback
/// coordinator and every retry attempt (spec §3, §5). One `RequestContext`
/// is created per inbound call and reused across every fallback candidate;
/// `fallback_index` and `selected_key_id` are updated in place as the
/// dispatch progresses.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    /// `None` while dispatching the primary target, `Some(n)` once the
    /// coordinator has moved on to the nth fallback (spec §4.6).
    pub fallback_index: Option<u32>,
    pub parent_request_id: Option<Uuid>,
    pub selected_key_id: Option<CredentialId>,
    pub virtual_key_id: Option<String>,
    pub trace_id: Option<String>,
    pub cancel: CancellationToken,
    pub extra: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            fallback_index: None,
            parent_request_id: None,
            selected_key_id: None,
            virtual_key_id: None,
            trace_id: None,
            cancel: CancellationToken::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Replaces the context's cancellation token with a caller-supplied one,
    /// so a dropped client connection can cancel the in-flight dispatch
    /// (spec §5, §8 scenario 6) instead of the unreachable token a freshly
    /// constructed context carries by default.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
