use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::{Message, ToolCall};

/// Token/audio usage accounting. Modeled as a tagged enum rather than two
/// optional fields so "exactly one of speech usage or transcription usage"
/// is a type-level invariant (spec §9 open question, resolved in DESIGN.md).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Usage {
    Tokens {
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
    },
    Audio {
        input_tokens: u32,
        output_tokens: u32,
        total_tokens: u32,
    },
}

impl Usage {
    pub fn tokens(prompt: u32, completion: u32) -> Self {
        Usage::Tokens {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub index: u32,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// Diagnostics carried alongside every response (spec §3): provider tag,
/// observed latency, raw wire blobs, and cache-debug annotations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_request: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    /// Index into the request's `fallbacks` list; `None` means the primary
    /// provider/model served the request (spec §4.6).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_index: Option<u32>,
}

/// Output union discriminated by `request_type` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Output {
    Chat { choices: Vec<Choice> },
    TextCompletion { choices: Vec<Choice> },
    Embedding { data: Vec<EmbeddingVector> },
    Speech { audio: bytes::Bytes, mime_type: String },
    Transcription { text: String, segments: Vec<TranscriptSegment> },
    Responses { choices: Vec<Choice> },
    Image { urls: Vec<String> },
    Rerank { scores: Vec<f64> },
    ListModels { models: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub created: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub output: Output,
    #[serde(default)]
    pub extra_fields: ExtraFields,
}
