//! Anthropic adapter (spec §4.1, C1). The Messages API is not wire-compatible
//! with the `openai_compat` family: system prompt is a top-level field
//! rather than a message, content is always a block array, and tool calls
//! round-trip as `tool_use`/`tool_result` content blocks rather than a
//! parallel `tool_calls` array. Streaming is a named-event protocol
//! (`message_start`, `content_block_start`, `content_block_delta`,
//! `content_block_stop`, `message_delta`, `message_stop`) instead of one
//! repeated delta shape.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use polygate_protocol::{
    Block, Choice, Content, ErrorKind, FinishReason, GatewayError, Input, Message, Output, Request,
    RequestType, Response, Role, StreamDecodeOutcome, ToolCall, ToolCallDelta, ToolCallFunction, Usage,
};
use polygate_provider_core::credential::Credential;
use polygate_provider_core::{
    Headers, ProviderAdapter, ProviderError, ProviderResult, UpstreamCtx, UpstreamHttpRequest, header_set,
};

use crate::openai_compat::{local_request, unix_now};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    base_url: String,
    anthropic_version: String,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self { base_url: DEFAULT_BASE_URL.to_string(), anthropic_version: DEFAULT_ANTHROPIC_VERSION.to_string() }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Self::new() }
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn block_to_wire(block: &Block) -> Value {
    match block {
        Block::Text { text } => json!({"type": "text", "text": text}),
        Block::ImageUrl { url } => json!({"type": "image", "source": {"type": "url", "url": url}}),
        Block::ImageBytes { data, mime_type } => {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
            json!({"type": "image", "source": {"type": "base64", "media_type": mime_type, "data": encoded}})
        }
        Block::Audio { .. } => json!({"type": "text", "text": ""}),
    }
}

fn content_blocks(content: &Content) -> Vec<Value> {
    match content {
        Content::Text(text) => vec![json!({"type": "text", "text": text})],
        Content::Blocks(blocks) => blocks.iter().map(block_to_wire).collect(),
    }
}

/// Splits canonical messages into (system prompt, remaining wire messages),
/// folding tool-call/tool-result messages into Anthropic's `tool_use`/
/// `tool_result` content-block shape.
fn split_system_and_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system = Vec::new();
    let mut wire = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                if let Some(text) = message.content.as_ref().and_then(Content::as_text) {
                    system.push(text.to_string());
                }
                continue;
            }
            Role::Tool => {
                let tool_call_id = message.tool_call_id.clone().unwrap_or_default();
                let text = message.content.as_ref().and_then(Content::as_text).unwrap_or_default();
                wire.push(json!({
                    "role": "user",
                    "content": [{"type": "tool_result", "tool_use_id": tool_call_id, "content": text}],
                }));
                continue;
            }
            _ => {}
        }

        let role = match message.role {
            Role::Assistant => "assistant",
            _ => "user",
        };

        let mut blocks = message.content.as_ref().map(content_blocks).unwrap_or_default();
        if let Some(tool_calls) = &message.tool_calls {
            for tc in tool_calls {
                let input: Value = serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Object(Map::new()));
                blocks.push(json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.function.name,
                    "input": input,
                }));
            }
        }
        wire.push(json!({"role": role, "content": blocks}));
    }

    let system = if system.is_empty() { None } else { Some(system.join("\n\n")) };
    (system, wire)
}

fn messages_body(model: &str, messages: &[Message], params: &polygate_protocol::Parameters, stream: bool) -> Value {
    let (system, wire_messages) = split_system_and_messages(messages);
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert("messages".into(), json!(wire_messages));
    body.insert("max_tokens".into(), json!(params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)));
    if let Some(system) = system {
        body.insert("system".into(), json!(system));
    }
    if stream {
        body.insert("stream".into(), json!(true));
    }
    if let Some(v) = params.temperature {
        body.insert("temperature".into(), json!(v));
    }
    if let Some(v) = params.top_p {
        body.insert("top_p".into(), json!(v));
    }
    if let Some(v) = &params.stop {
        body.insert("stop_sequences".into(), json!(v));
    }
    if let Some(tools) = &params.tools {
        body.insert(
            "tools".into(),
            json!(
                tools
                    .iter()
                    .map(|t| json!({
                        "name": t.function.name,
                        "description": t.function.description,
                        "input_schema": t.function.parameters.clone().unwrap_or(json!({"type": "object", "properties": {}})),
                    }))
                    .collect::<Vec<_>>()
            ),
        );
    }
    if let Some(v) = &params.tool_choice {
        body.insert("tool_choice".into(), v.clone());
    }
    Value::Object(body)
}

fn finish_reason_from_wire(value: Option<&str>) -> Option<FinishReason> {
    match value? {
        "end_turn" | "stop_sequence" => Some(FinishReason::Stop),
        "max_tokens" => Some(FinishReason::Length),
        "tool_use" => Some(FinishReason::ToolCalls),
        _ => Some(FinishReason::Stop),
    }
}

fn usage_from_wire(value: &Value) -> Option<Usage> {
    let input = value.get("input_tokens")?.as_u64()? as u32;
    let output = value.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
    Some(Usage::tokens(input, output))
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn supports(&self, request_type: RequestType) -> bool {
        matches!(request_type, RequestType::Chat | RequestType::ChatStream)
    }

    async fn encode(&self, _ctx: &UpstreamCtx, key: &Credential, request: &Request) -> ProviderResult<UpstreamHttpRequest> {
        let mut headers: Headers = Vec::new();
        header_set(&mut headers, "Content-Type", "application/json");
        header_set(&mut headers, "x-api-key", &key.value);
        header_set(&mut headers, "anthropic-version", &self.anthropic_version);

        match (&request.request_type, &request.input) {
            (RequestType::Chat | RequestType::ChatStream, Input::Chat { messages }) => {
                let stream = request.request_type.is_streaming();
                let body = messages_body(&request.model, messages, &request.parameters, stream);
                Ok(local_request(format!("{}/messages", self.base_url), headers, body, stream))
            }
            _ => Err(ProviderError::Unsupported("request type not supported by anthropic adapter")),
        }
    }

    fn decode_response(&self, _ctx: &UpstreamCtx, _request: &Request, _status: u16, _headers: &Headers, body: &[u8]) -> ProviderResult<Response> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| ProviderError::Other(format!("anthropic: invalid JSON body: {err}")))?;

        let id = value.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let model = value.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
        let usage = value.get("usage").and_then(usage_from_wire);
        let finish_reason = finish_reason_from_wire(value.get("stop_reason").and_then(Value::as_str));

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        if let Some(blocks) = value.get("content").and_then(Value::as_array) {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(t) = block.get("text").and_then(Value::as_str) {
                            text.push_str(t);
                        }
                    }
                    Some("tool_use") => {
                        let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                        let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                        let arguments = block.get("input").map(|v| v.to_string()).unwrap_or_else(|| "{}".to_string());
                        tool_calls.push(ToolCall { id, function: ToolCallFunction { name, arguments } });
                    }
                    _ => {}
                }
            }
        }

        let message = Message {
            role: Role::Assistant,
            content: if text.is_empty() { None } else { Some(Content::Text(text)) },
            name: None,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        };

        Ok(Response {
            id,
            model,
            created: unix_now(),
            usage,
            output: Output::Chat { choices: vec![Choice { index: 0, message, finish_reason }] },
            extra_fields: polygate_protocol::ExtraFields {
                provider: Some("anthropic".to_string()),
                raw_response: Some(value),
                ..Default::default()
            },
        })
    }

    fn decode_stream_chunk(&self, _ctx: &UpstreamCtx, _request: &Request, bytes: &[u8]) -> StreamDecodeOutcome {
        decode_event(&String::from_utf8_lossy(bytes))
    }
}

/// Anthropic's SSE payload carries its event kind inside the JSON body's
/// `type` field (the `event:` line duplicates it); this adapter reads the
/// body only, so it works whether or not the caller also kept the event
/// name.
fn decode_event(data: &str) -> StreamDecodeOutcome {
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(err) => {
            return StreamDecodeOutcome::Error(GatewayError::new(
                ErrorKind::ProviderInternal,
                "invalid_stream_chunk",
                format!("failed to decode anthropic stream chunk: {err}"),
            ));
        }
    };

    match value.get("type").and_then(Value::as_str) {
        Some("message_start") => {
            let usage = value
                .get("message")
                .and_then(|m| m.get("usage"))
                .and_then(usage_from_wire);
            StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { role: Some(Role::Assistant), usage, ..Default::default() })
        }
        Some("content_block_delta") => {
            let delta = value.get("delta");
            match delta.and_then(|d| d.get("type")).and_then(Value::as_str) {
                Some("text_delta") => {
                    let text_delta = delta.and_then(|d| d.get("text")).and_then(Value::as_str).map(str::to_string);
                    StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { text_delta, ..Default::default() })
                }
                Some("input_json_delta") => {
                    let index = value.get("index").and_then(Value::as_u64).unwrap_or(0);
                    let arguments_delta = delta.and_then(|d| d.get("partial_json")).and_then(Value::as_str).map(str::to_string);
                    StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent {
                        tool_call_deltas: vec![ToolCallDelta { id: index.to_string(), call_id: None, name: None, arguments_delta }],
                        ..Default::default()
                    })
                }
                _ => StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent::default()),
            }
        }
        Some("content_block_start") => {
            let block = value.get("content_block");
            if block.and_then(|b| b.get("type")).and_then(Value::as_str) == Some("tool_use") {
                // Keyed by `index`, same as the `input_json_delta` arguments
                // that follow for this block, so both land in one
                // accumulator entry; the real `toolu_...` id travels in
                // `call_id`.
                let index = value.get("index").and_then(Value::as_u64).unwrap_or(0);
                let call_id = block.and_then(|b| b.get("id")).and_then(Value::as_str).map(str::to_string);
                let name = block.and_then(|b| b.get("name")).and_then(Value::as_str).map(str::to_string);
                StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent {
                    tool_call_deltas: vec![ToolCallDelta { id: index.to_string(), call_id, name, arguments_delta: None }],
                    ..Default::default()
                })
            } else {
                StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent::default())
            }
        }
        Some("message_delta") => {
            let finish_reason = finish_reason_from_wire(
                value.get("delta").and_then(|d| d.get("stop_reason")).and_then(Value::as_str),
            );
            let usage = value.get("usage").and_then(usage_from_wire);
            StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { finish_reason, usage, ..Default::default() })
        }
        Some("message_stop") => StreamDecodeOutcome::EndOfStream,
        Some("error") => {
            let message = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("anthropic stream error")
                .to_string();
            StreamDecodeOutcome::Error(GatewayError::new(ErrorKind::ProviderInternal, "anthropic_stream_error", message))
        }
        _ => StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent::default()),
    }
}
