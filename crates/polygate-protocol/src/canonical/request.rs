use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminates the shape of a [`Request`]'s input and the operation an
/// adapter must perform. One variant per `Orchestrator` (C9) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Chat,
    ChatStream,
    TextCompletion,
    Embedding,
    Speech,
    SpeechStream,
    Transcription,
    TranscriptionStream,
    Responses,
    ResponsesStream,
    Image,
    Rerank,
    ListModels,
}

impl RequestType {
    /// Whether this request type produces a caller-facing stream of chunks
    /// rather than a single terminal [`Response`].
    pub fn is_streaming(self) -> bool {
        matches!(
            self,
            RequestType::ChatStream
                | RequestType::SpeechStream
                | RequestType::TranscriptionStream
                | RequestType::ResponsesStream
        )
    }
}

/// An ordered alternate `{provider, model}` pair tried after a recoverable
/// failure (spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackTarget {
    pub provider: String,
    pub model: String,
}

/// Provider-agnostic generation parameters (spec §3). Every field is
/// optional; adapters translate the ones they support and ignore the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolFunctionDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunctionDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// The input union discriminated by [`RequestType`] (spec §3). Kept as one
/// tagged enum rather than per-operation request structs so a single
/// `Request` value can flow through the whole pipeline (pool, retry engine,
/// fallback coordinator) independent of its shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Input {
    Chat { messages: Vec<super::message::Message> },
    TextCompletion { prompt: String },
    Embedding { input: Vec<String> },
    Speech { text: String, voice: Option<String>, format: Option<String> },
    Transcription { audio: bytes::Bytes, format: Option<String>, language: Option<String> },
    Responses { messages: Vec<super::message::Message> },
    Image { prompt: String, n: Option<u32>, size: Option<String> },
    Rerank { query: String, documents: Vec<String>, top_n: Option<u32> },
    ListModels,
}

/// Immutable once submitted (spec §3 invariant a: `request_id` is the join
/// key across log, accumulator, and plugin-chain context).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: uuid::Uuid,
    pub request_type: RequestType,
    pub provider: String,
    pub model: String,
    pub input: Input,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallbacks: Option<Vec<FallbackTarget>>,
    /// Opaque, typed context bag read by the Account collaborator
    /// (spec §9: "all context values used by the core have a fixed
    /// registered schema").
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl Request {
    pub fn new(request_type: RequestType, provider: impl Into<String>, model: impl Into<String>, input: Input) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4(),
            request_type,
            provider: provider.into(),
            model: model.into(),
            input,
            parameters: Parameters::default(),
            fallbacks: None,
            context: BTreeMap::new(),
        }
    }

    /// Rewrites provider/model in place, preserving all other fields, per
    /// the fallback coordinator's step 1 (spec §4.6).
    pub fn retarget(&self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.provider = provider.into();
        next.model = model.into();
        next
    }
}
