use serde::{Deserialize, Serialize};

use super::error::GatewayError;
use super::message::Role;
use super::response::{FinishReason, Usage};

/// One delta of a tool-call as conveyed by a single chunk (spec §4.7).
///
/// `id` is the correlation key the accumulator groups deltas by, not
/// necessarily the provider-native call id: several wire formats (OpenAI's
/// `tool_calls[].index`, Anthropic's `content_block` `index`) only carry
/// their real id on the delta that opens the call and key every later
/// argument fragment by a positional index instead. Adapters key `id` on
/// that positional index consistently across every delta of one call, and
/// carry the real id (when a delta provides one) in `call_id` so the
/// synthesized response still gets the provider's actual id rather than the
/// positional placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments_delta: Option<String>,
}

/// A single streaming event produced by a `ProviderAdapter::decode_stream_chunk`
/// call (spec §4.1, §4.7). One field group per kind of delta a chunk may carry;
/// all are optional because a single chunk may carry more than one at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_delta: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_deltas: Vec<ToolCallDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal_delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GatewayError>,
}

impl ChunkEvent {
    /// "Final chunk" per spec §4.7: the first chunk with a finish reason,
    /// usage, or an explicit end-of-stream signal.
    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some() || self.usage.is_some()
    }
}

/// Terminal event a decoded stream may produce instead of a [`ChunkEvent`]
/// (spec §4.1: `decode_stream_chunk(bytes) → ChunkEvent | EndOfStream | Error`).
#[derive(Debug, Clone)]
pub enum StreamDecodeOutcome {
    Chunk(ChunkEvent),
    EndOfStream,
    Error(GatewayError),
}
