//! Per-request ordered delta merge into a final response (spec §4.7, C7).
//!
//! Grounded on the teacher's `stream2nostream/openai_chat_completions` state
//! machine, generalized from OpenAI's wire shape to the canonical
//! [`ChunkEvent`]/[`Response`] schema and fixing a merge bug observed there:
//! a tool-call/function-call name delta overwrote any previously-set name
//! instead of only filling an empty one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use polygate_protocol::{
    Choice, ChunkEvent, ErrorKind, ExtraFields, FinishReason, GatewayError, Message, Output, Response,
    Role, ToolCall, ToolCallFunction, Usage,
};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct ToolCallBuilder {
    id: String,
    /// The provider's real call id, when a delta supplied one (spec §4.7);
    /// `id` above is only the grouping key, which some wire formats key by
    /// a positional index instead of the real id on argument-only deltas.
    call_id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Per-request accumulator state (spec §3 `StreamAccumulatorState`).
#[derive(Debug)]
pub struct AccumulatorState {
    request_id: Uuid,
    model: String,
    first_chunk_time: Instant,
    last_chunk_time: Instant,
    role: Option<Role>,
    text_builder: String,
    tool_call_order: Vec<String>,
    tool_calls_by_id: HashMap<String, ToolCallBuilder>,
    refusal_builder: String,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    error: Option<GatewayError>,
    is_complete: bool,
}

impl AccumulatorState {
    fn new(request_id: Uuid, model: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            request_id,
            model: model.into(),
            first_chunk_time: now,
            last_chunk_time: now,
            role: None,
            text_builder: String::new(),
            tool_call_order: Vec::new(),
            tool_calls_by_id: HashMap::new(),
            refusal_builder: String::new(),
            usage: None,
            finish_reason: None,
            error: None,
            is_complete: false,
        }
    }

    /// Appends one chunk under the accumulator's mutex (spec: "chunks are
    /// appended in arrival order"). Returns the synthesized response once
    /// the final chunk has been observed.
    pub fn push(&mut self, chunk: ChunkEvent) -> Option<Response> {
        self.last_chunk_time = Instant::now();

        if self.is_complete {
            // Error chunk already closed the accumulator; ignore further input.
            return None;
        }

        if let Some(error) = chunk.error {
            self.error = Some(error);
            self.is_complete = true;
            return Some(self.synthesize());
        }

        if self.role.is_none() {
            self.role = chunk.role;
        }
        if let Some(text) = chunk.text_delta {
            self.text_builder.push_str(&text);
        }
        for delta in chunk.tool_call_deltas {
            self.merge_tool_call(delta);
        }
        if let Some(refusal) = chunk.refusal_delta {
            self.refusal_builder.push_str(&refusal);
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        if self.finish_reason.is_none() {
            self.finish_reason = chunk.finish_reason;
        }

        if self.finish_reason.is_some() || self.usage.is_some() {
            self.is_complete = true;
            return Some(self.synthesize());
        }
        None
    }

    fn merge_tool_call(&mut self, delta: polygate_protocol::ToolCallDelta) {
        let entry = self.tool_calls_by_id.entry(delta.id.clone()).or_insert_with(|| {
            self.tool_call_order.push(delta.id.clone());
            ToolCallBuilder { id: delta.id.clone(), call_id: None, name: None, arguments: String::new() }
        });
        // Same fill-once rule as `name` below: the real id only ever
        // appears on one delta (typically the first), so once captured it
        // must not be clobbered by a later delta that carries none.
        if let Some(call_id) = delta.call_id {
            let has_call_id = entry.call_id.as_deref().is_some_and(|id| !id.is_empty());
            if !call_id.is_empty() && !has_call_id {
                entry.call_id = Some(call_id);
            }
        }
        // "later non-empty names replace empty ones but MUST NOT overwrite a
        // non-empty prior name" (spec §4.7).
        if let Some(name) = delta.name {
            let has_name = entry.name.as_deref().is_some_and(|n| !n.is_empty());
            if !name.is_empty() && !has_name {
                entry.name = Some(name);
            }
        }
        if let Some(arguments) = delta.arguments_delta {
            entry.arguments.push_str(&arguments);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn idle_for(&self) -> Duration {
        self.last_chunk_time.elapsed()
    }

    pub fn error(&self) -> Option<&GatewayError> {
        self.error.as_ref()
    }

    fn synthesize(&self) -> Response {
        let latency_ms = self.first_chunk_time.elapsed().as_millis() as u64;

        if let Some(error) = &self.error {
            return Response {
                id: self.request_id.to_string(),
                model: self.model.clone(),
                created: unix_now(),
                usage: None,
                output: Output::Chat { choices: Vec::new() },
                extra_fields: ExtraFields {
                    latency_ms: Some(latency_ms),
                    raw_response: Some(serde_json::json!({ "error": error })),
                    ..Default::default()
                },
            };
        }

        let tool_calls: Vec<ToolCall> = self
            .tool_call_order
            .iter()
            .filter_map(|id| self.tool_calls_by_id.get(id))
            .map(|builder| ToolCall {
                id: builder.call_id.clone().unwrap_or_else(|| builder.id.clone()),
                function: ToolCallFunction {
                    name: builder.name.clone().unwrap_or_default(),
                    arguments: builder.arguments.clone(),
                },
            })
            .collect();

        let message = Message {
            role: self.role.unwrap_or(Role::Assistant),
            content: if self.text_builder.is_empty() {
                None
            } else {
                Some(polygate_protocol::Content::Text(self.text_builder.clone()))
            },
            name: None,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        };

        Response {
            id: self.request_id.to_string(),
            model: self.model.clone(),
            created: unix_now(),
            usage: self.usage.clone(),
            output: Output::Chat {
                choices: vec![Choice {
                    index: 0,
                    message,
                    finish_reason: self.finish_reason,
                }],
            },
            extra_fields: ExtraFields { latency_ms: Some(latency_ms), ..Default::default() },
        }
    }

    /// Explicit end-of-stream signal from the adapter with no trailing
    /// finish_reason/usage-bearing chunk (spec §4.7: "or an explicit
    /// end-of-stream event from the adapter"). No-op if already complete.
    pub fn finalize_if_incomplete(&mut self) -> Option<Response> {
        if self.is_complete {
            return None;
        }
        self.is_complete = true;
        Some(self.synthesize())
    }

    /// Force-destruction on TTL expiry (spec §4.7): synthesizes an `internal`
    /// error response as if the stream had ended with an error chunk.
    pub fn force_timeout(&mut self) -> Response {
        self.error = Some(GatewayError::new(
            ErrorKind::Internal,
            "accumulator_ttl_expired",
            "stream accumulator exceeded its idle TTL and was force-destroyed",
        ));
        self.is_complete = true;
        self.synthesize()
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Concurrent mapping keyed by request_id (spec §5 shared resource ii): one
/// accumulator per streaming request, each with its own internal mutex.
#[derive(Clone)]
pub struct AccumulatorRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Arc<Mutex<AccumulatorState>>>>>,
    ttl: Duration,
}

impl AccumulatorRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())), ttl }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }

    pub async fn create(&self, request_id: Uuid, model: impl Into<String>) -> Arc<Mutex<AccumulatorState>> {
        let state = Arc::new(Mutex::new(AccumulatorState::new(request_id, model)));
        self.inner.write().await.insert(request_id, state.clone());
        state
    }

    pub async fn get(&self, request_id: Uuid) -> Option<Arc<Mutex<AccumulatorState>>> {
        self.inner.read().await.get(&request_id).cloned()
    }

    pub async fn destroy(&self, request_id: Uuid) {
        self.inner.write().await.remove(&request_id);
    }

    /// Sweeps accumulators idle longer than the configured TTL (default 5
    /// minutes), force-destroying each and returning its terminal response
    /// so the caller-facing stream/post-hook can be notified. Intended to be
    /// run from a ticker every 1 minute (spec §4.7).
    pub async fn sweep_expired(&self) -> Vec<(Uuid, Response)> {
        let expired: Vec<(Uuid, Arc<Mutex<AccumulatorState>>)> = {
            let guard = self.inner.read().await;
            guard
                .iter()
                .filter(|(_, state)| {
                    // Best-effort check without holding the per-state lock across await;
                    // re-checked under lock below before force-destroying.
                    state.try_lock().map(|s| s.idle_for() > self.ttl).unwrap_or(false)
                })
                .map(|(id, state)| (*id, state.clone()))
                .collect()
        };

        let mut results = Vec::new();
        for (id, state) in expired {
            let mut guard = state.lock().await;
            if guard.idle_for() <= self.ttl || guard.is_complete() {
                continue;
            }
            let response = guard.force_timeout();
            drop(guard);
            self.destroy(id).await;
            results.push((id, response));
        }
        results
    }

    /// Spawns the background sweep ticker (spec: "swept every 1 minute").
    pub fn spawn_sweeper(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                let _ = self.sweep_expired().await;
            }
        })
    }
}

impl Default for AccumulatorRegistry {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polygate_protocol::ToolCallDelta;

    fn text_chunk(text: &str) -> ChunkEvent {
        ChunkEvent { text_delta: Some(text.to_string()), ..Default::default() }
    }

    #[test]
    fn merges_text_in_arrival_order() {
        let mut state = AccumulatorState::new(Uuid::new_v4(), "gpt-4o-mini");
        assert!(state.push(ChunkEvent { role: Some(Role::Assistant), ..Default::default() }).is_none());
        assert!(state.push(text_chunk("Hel")).is_none());
        assert!(state.push(text_chunk("lo")).is_none());
        let response = state
            .push(ChunkEvent { finish_reason: Some(FinishReason::Stop), ..Default::default() })
            .expect("final chunk should synthesize a response");
        let Output::Chat { choices } = response.output else { panic!("expected chat output") };
        assert_eq!(choices[0].message.content, Some(polygate_protocol::Content::Text("Hello".into())));
    }

    #[test]
    fn groups_tool_call_deltas_by_id_and_does_not_clobber_name() {
        let mut state = AccumulatorState::new(Uuid::new_v4(), "gpt-4o-mini");
        state.push(ChunkEvent {
            tool_call_deltas: vec![ToolCallDelta { id: "1".into(), call_id: None, name: Some("f".into()), arguments_delta: Some("{".into()) }],
            ..Default::default()
        });
        state.push(ChunkEvent {
            tool_call_deltas: vec![ToolCallDelta { id: "1".into(), call_id: None, name: None, arguments_delta: Some("}".into()) }],
            ..Default::default()
        });
        // A later empty-name delta must not erase the name already captured.
        state.push(ChunkEvent {
            tool_call_deltas: vec![ToolCallDelta { id: "1".into(), call_id: None, name: Some(String::new()), arguments_delta: None }],
            ..Default::default()
        });
        let response = state
            .push(ChunkEvent { finish_reason: Some(FinishReason::ToolCalls), usage: None, ..Default::default() })
            .expect("final chunk should synthesize a response");
        let Output::Chat { choices } = response.output else { panic!("expected chat output") };
        let tool_calls = choices[0].message.tool_calls.as_ref().expect("tool calls");
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].id, "1");
        assert_eq!(tool_calls[0].function.name, "f");
        assert_eq!(tool_calls[0].function.arguments, "{}");
    }

    #[test]
    fn groups_tool_call_deltas_by_positional_index_and_prefers_real_call_id() {
        // Mirrors the OpenAI-compatible and Anthropic wire formats: the real
        // id only appears on the delta that opens the call, later argument
        // fragments carry just the positional index. The accumulator must
        // group all of them under that index and still surface the real id.
        let mut state = AccumulatorState::new(Uuid::new_v4(), "gpt-4o-mini");
        state.push(ChunkEvent {
            tool_call_deltas: vec![ToolCallDelta {
                id: "0".into(),
                call_id: Some("call_abc123".into()),
                name: Some("get_weather".into()),
                arguments_delta: Some("{\"city\":".into()),
            }],
            ..Default::default()
        });
        state.push(ChunkEvent {
            tool_call_deltas: vec![ToolCallDelta {
                id: "0".into(),
                call_id: None,
                name: None,
                arguments_delta: Some("\"nyc\"}".into()),
            }],
            ..Default::default()
        });
        let response = state
            .push(ChunkEvent { finish_reason: Some(FinishReason::ToolCalls), usage: None, ..Default::default() })
            .expect("final chunk should synthesize a response");
        let Output::Chat { choices } = response.output else { panic!("expected chat output") };
        let tool_calls = choices[0].message.tool_calls.as_ref().expect("tool calls");
        assert_eq!(tool_calls.len(), 1, "deltas sharing an index must merge into one tool call");
        assert_eq!(tool_calls[0].id, "call_abc123", "synthesized id must be the real call id, not the positional placeholder");
        assert_eq!(tool_calls[0].function.name, "get_weather");
        assert_eq!(tool_calls[0].function.arguments, "{\"city\":\"nyc\"}");
    }

    #[test]
    fn error_chunk_closes_accumulator_and_ignores_subsequent_chunks() {
        let mut state = AccumulatorState::new(Uuid::new_v4(), "gpt-4o-mini");
        state.push(text_chunk("partial"));
        let response = state
            .push(ChunkEvent { error: Some(GatewayError::new(ErrorKind::ProviderInternal, "boom", "boom")), ..Default::default() })
            .expect("error chunk should synthesize a terminal response");
        assert!(state.is_complete());
        assert!(state.push(text_chunk("ignored")).is_none());
        let Output::Chat { choices } = response.output else { panic!("expected chat output") };
        assert!(choices.is_empty());
    }
}
