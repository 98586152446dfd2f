//! `LoggerPlugin` (C8, spec §4.8): the one plugin that owns observability.
//! Its pre-hook allocates a pooled `LogMessage`, dispatches it to the
//! `StorageBus` asynchronously and returns immediately; its post-hook builds
//! an `UpdateData` from the final outcome (synthesized response for
//! streaming requests) and dispatches that too. Neither hook ever awaits a
//! database round trip.
//!
//! Grounded on the teacher's plugin-free logging call sites, restructured
//! into the spec's pre/post-hook shape; the pooled-message and
//! batched-writer plumbing underneath is `polygate-storage`'s, kept
//! unmodified.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use polygate_protocol::{GatewayError, Message, Output, Request, Response};
use polygate_storage::{LogStatus, SharedBus, UpdateData};
use tokio::sync::Mutex;

use crate::context::RequestContext;
use crate::plugin::{Plugin, PreHookOutcome};
use crate::pricing::PricingCatalog;

struct PendingLog {
    started_at: Instant,
}

/// `LoggerPlugin` should be registered as one plugin among possibly several
/// (spec §4.2); where it sits in the chain only affects which other
/// plugins see a log-enriched request, since it never mutates the request
/// itself.
pub struct LoggerPlugin {
    bus: SharedBus,
    pricing: Arc<dyn PricingCatalog>,
    content_logging_enabled: bool,
    pending: Mutex<HashMap<String, PendingLog>>,
}

impl LoggerPlugin {
    pub fn new(bus: SharedBus, pricing: Arc<dyn PricingCatalog>, content_logging_enabled: bool) -> Self {
        Self { bus, pricing, content_logging_enabled, pending: Mutex::new(HashMap::new()) }
    }

    fn request_json(&self, request: &Request) -> (Option<serde_json::Value>, Option<serde_json::Value>, Option<serde_json::Value>) {
        if !self.content_logging_enabled {
            return (None, None, None);
        }
        let input_history = serde_json::to_value(&request.input).ok();
        let params = serde_json::to_value(&request.parameters).ok();
        let tools = request.parameters.tools.as_ref().and_then(|t| serde_json::to_value(t).ok());
        (input_history, params, tools)
    }
}

fn request_type_str(request: &Request) -> String {
    serde_json::to_value(request.request_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_streaming_input(request: &Request) -> bool {
    request.request_type.is_streaming()
}

fn output_message(output: &Output) -> Option<&Message> {
    match output {
        Output::Chat { choices } | Output::TextCompletion { choices } | Output::Responses { choices } => {
            choices.first().map(|c| &c.message)
        }
        _ => None,
    }
}

#[async_trait]
impl Plugin for LoggerPlugin {
    fn name(&self) -> &'static str {
        "logger"
    }

    async fn pre_hook(&self, ctx: &mut RequestContext, request: Request) -> PreHookOutcome {
        let id = ctx.request_id.to_string();
        let mut msg = self.bus.log_messages.get();
        let (input_history, params, tools) = self.request_json(&request);

        msg.id = id.clone();
        msg.timestamp = unix_now();
        msg.request_type = request_type_str(&request);
        msg.provider = request.provider.clone();
        msg.model = request.model.clone();
        msg.input_history = input_history;
        msg.params = params;
        msg.tools = tools;
        msg.metadata = if ctx.extra.is_empty() {
            None
        } else {
            serde_json::to_value(&ctx.extra).ok()
        };
        msg.stream = is_streaming_input(&request);

        self.bus.dispatch_create(msg);
        self.pending.lock().await.insert(id, PendingLog { started_at: Instant::now() });

        PreHookOutcome::Continue(request)
    }

    async fn post_hook(
        &self,
        ctx: &mut RequestContext,
        outcome: Result<Response, GatewayError>,
    ) -> Result<Response, GatewayError> {
        let id = ctx.request_id.to_string();
        let started_at = self.pending.lock().await.remove(&id).map(|p| p.started_at);
        let latency_ms = started_at.map(|t| t.elapsed().as_millis() as i64);

        let mut data = self.bus.update_data.get();
        data.latency_ms = latency_ms;
        data.fallback_index = ctx.fallback_index.map(|idx| idx as i32);

        match &outcome {
            Ok(response) => {
                data.status = Some(LogStatus::Success);
                data.usage = response.usage.as_ref().and_then(|u| serde_json::to_value(u).ok());
                data.cost = Some(self.pricing.cost(response));
                if self.content_logging_enabled {
                    if let Some(message) = output_message(&response.output) {
                        data.output_message = serde_json::to_value(message).ok();
                        data.tool_calls = message
                            .tool_calls
                            .as_ref()
                            .and_then(|calls| serde_json::to_value(calls).ok());
                    }
                    data.raw_response = serde_json::to_value(response).ok();
                }
            }
            Err(error) => {
                data.status = Some(LogStatus::Error);
                data.error_details = serde_json::to_value(ErrorDetails::from(error)).ok();
            }
        }

        self.bus.dispatch_update(id, data);
        outcome
    }
}

/// Serializable projection of `GatewayError` for the `error_details` column
/// (spec §4.8, §7): carries everything a log reader needs to correlate with
/// the caller-visible error envelope via `event_id`.
#[derive(serde::Serialize)]
struct ErrorDetails<'a> {
    kind: polygate_protocol::ErrorKind,
    code: &'a str,
    message: &'a str,
    event_id: uuid::Uuid,
    retryable: bool,
    allow_fallback: bool,
    http_status: Option<u16>,
}

impl<'a> From<&'a GatewayError> for ErrorDetails<'a> {
    fn from(error: &'a GatewayError) -> Self {
        Self {
            kind: error.kind,
            code: &error.code,
            message: &error.message,
            event_id: error.event_id,
            retryable: error.retryable,
            allow_fallback: error.allow_fallback,
            http_status: error.http_status,
        }
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
