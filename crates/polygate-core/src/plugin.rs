use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use polygate_protocol::{GatewayError, Request, Response};

use crate::context::RequestContext;

const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a single plugin's pre-hook (spec §4.4, C4).
pub enum PreHookOutcome {
    /// Proceed to the next plugin (or, for the last plugin, to dispatch)
    /// with this (possibly rewritten) request.
    Continue(Request),
    /// Stop the chain here and answer with this response directly; no
    /// further pre-hooks run and no upstream call is ever made.
    ShortCircuit(Response),
    /// Stop the chain here with an error.
    Err(GatewayError),
}

/// One named unit in the pre/post hook chain. Plugins see every request
/// before dispatch and every response (or the short-circuited/errored
/// outcome) after it, in the order they're registered for `pre_hook` and
/// the reverse order for `post_hook` (spec §4.4 rule 3).
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    async fn pre_hook(&self, ctx: &mut RequestContext, request: Request) -> PreHookOutcome;

    /// Runs on the way back out, even when an earlier plugin short-circuited
    /// or errored: `outcome` is `Ok` only when a real upstream response (or
    /// an earlier plugin's short-circuit) is flowing back, `Err` otherwise.
    /// A plugin may transform the payload but must not swallow an `Err` by
    /// turning it into `Ok` silently — see spec §4.4 rule 4.
    async fn post_hook(
        &self,
        ctx: &mut RequestContext,
        outcome: Result<Response, GatewayError>,
    ) -> Result<Response, GatewayError>;

    /// Runs once at shutdown, reverse registration order, each bounded by a
    /// timeout so one stuck plugin cannot hang teardown indefinitely.
    async fn cleanup(&self) {}
}

/// Outcome of running the pre-hook half of the chain.
pub enum PreChainResult {
    /// Every plugin continued; `request` is what should be dispatched.
    Continue(Request),
    /// Plugin at `from_index` short-circuited with `response`. `post_hook`
    /// must still run for plugins `0..=from_index`, in reverse order.
    ShortCircuited { response: Response, from_index: usize },
    /// Plugin at `from_index` errored. Same post_hook bound as above.
    Errored { error: GatewayError, from_index: usize },
}

/// Ordered list of plugins run around every dispatch (spec §4.4, C4).
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Runs every plugin's `pre_hook` in registration order, stopping at the
    /// first short-circuit or error.
    pub async fn run_pre(&self, ctx: &mut RequestContext, mut request: Request) -> PreChainResult {
        for (index, plugin) in self.plugins.iter().enumerate() {
            match plugin.pre_hook(ctx, request).await {
                PreHookOutcome::Continue(next) => request = next,
                PreHookOutcome::ShortCircuit(response) => {
                    return PreChainResult::ShortCircuited { response, from_index: index };
                }
                PreHookOutcome::Err(error) => {
                    return PreChainResult::Errored { error, from_index: index };
                }
            }
        }
        PreChainResult::Continue(request)
    }

    /// Runs `post_hook` on plugins `0..=start_index` in reverse order (spec
    /// §4.4 rule 3). `start_index` is the full chain's last index for a
    /// request that made it all the way to dispatch, or the short-circuit
    /// triggering plugin's index otherwise.
    pub async fn run_post(
        &self,
        ctx: &mut RequestContext,
        start_index: usize,
        mut outcome: Result<Response, GatewayError>,
    ) -> Result<Response, GatewayError> {
        if self.plugins.is_empty() {
            return outcome;
        }
        let start_index = start_index.min(self.plugins.len() - 1);
        for plugin in self.plugins[..=start_index].iter().rev() {
            outcome = plugin.post_hook(ctx, outcome).await;
        }
        outcome
    }

    /// Tears down every plugin in reverse registration order, each bounded
    /// by a fixed timeout so a stuck plugin cannot block shutdown forever.
    pub async fn cleanup_all(&self) {
        for plugin in self.plugins.iter().rev() {
            let _ = tokio::time::timeout(CLEANUP_TIMEOUT, plugin.cleanup()).await;
        }
    }
}
