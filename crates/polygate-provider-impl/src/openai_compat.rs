//! Shared wire codec for the OpenAI chat-completions-compatible family:
//! OpenAI itself, Azure OpenAI, Mistral, Groq, and Ollama all speak (most
//! of) the same `/chat/completions` JSON shape. Grounded on the teacher's
//! `openai/create_chat_completions` wire types (spec §6: "the canonical
//! Response schema is structurally a superset of OpenAI's chat/completions
//! schema"); built against `serde_json::Value` rather than the teacher's
//! fully generated type tree, which over-specifies fields (audio,
//! reasoning effort, service tiers) none of these five adapters' spec
//! scope actually needs.

use bytes::Bytes;
use serde_json::{Map, Value, json};

use polygate_protocol::{
    Block, Choice, Content, ErrorKind, FinishReason, GatewayError, Message, Output, Response,
    Role, StreamDecodeOutcome, ToolCall, ToolCallDelta, ToolCallFunction, Usage,
};
use polygate_provider_core::{Headers, ProviderError, ProviderResult, UpstreamHttpRequest};

pub fn role_to_wire(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn wire_to_role(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "tool" => Role::Tool,
        "user" => Role::User,
        _ => Role::Assistant,
    }
}

fn content_to_wire(content: &Content) -> Value {
    match content {
        Content::Text(text) => json!(text),
        Content::Blocks(blocks) => Value::Array(
            blocks
                .iter()
                .map(|block| match block {
                    Block::Text { text } => json!({"type": "text", "text": text}),
                    Block::ImageUrl { url } => json!({"type": "image_url", "image_url": {"url": url}}),
                    Block::ImageBytes { data, mime_type } => {
                        use base64::Engine;
                        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
                        json!({"type": "image_url", "image_url": {"url": format!("data:{mime_type};base64,{encoded}")}})
                    }
                    Block::Audio { data, mime_type } => {
                        use base64::Engine;
                        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
                        json!({"type": "input_audio", "input_audio": {"data": encoded, "format": mime_type}})
                    }
                })
                .collect(),
        ),
    }
}

pub fn messages_to_wire(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut obj = Map::new();
            obj.insert("role".into(), json!(role_to_wire(m.role)));
            if let Some(content) = &m.content {
                obj.insert("content".into(), content_to_wire(content));
            } else {
                obj.insert("content".into(), Value::Null);
            }
            if let Some(name) = &m.name {
                obj.insert("name".into(), json!(name));
            }
            if let Some(tool_call_id) = &m.tool_call_id {
                obj.insert("tool_call_id".into(), json!(tool_call_id));
            }
            if let Some(tool_calls) = &m.tool_calls {
                obj.insert(
                    "tool_calls".into(),
                    json!(
                        tool_calls
                            .iter()
                            .map(|tc| json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {"name": tc.function.name, "arguments": tc.function.arguments},
                            }))
                            .collect::<Vec<_>>()
                    ),
                );
            }
            Value::Object(obj)
        })
        .collect()
}

/// Builds the `/chat/completions`-shaped request body for a canonical
/// chat request. `model` is passed separately because Azure resolves it to
/// a deployment name rather than echoing the canonical model string.
pub fn chat_body(
    model: &str,
    messages: &[Message],
    params: &polygate_protocol::Parameters,
    stream: bool,
) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert("messages".into(), json!(messages_to_wire(messages)));
    if stream {
        body.insert("stream".into(), json!(true));
        body.insert("stream_options".into(), json!({"include_usage": true}));
    }
    if let Some(v) = params.temperature {
        body.insert("temperature".into(), json!(v));
    }
    if let Some(v) = params.max_tokens {
        body.insert("max_tokens".into(), json!(v));
    }
    if let Some(v) = params.top_p {
        body.insert("top_p".into(), json!(v));
    }
    if let Some(v) = &params.stop {
        body.insert("stop".into(), json!(v));
    }
    if let Some(v) = params.frequency_penalty {
        body.insert("frequency_penalty".into(), json!(v));
    }
    if let Some(v) = params.presence_penalty {
        body.insert("presence_penalty".into(), json!(v));
    }
    if let Some(v) = &params.response_format {
        body.insert("response_format".into(), v.clone());
    }
    if let Some(tools) = &params.tools {
        body.insert(
            "tools".into(),
            json!(
                tools
                    .iter()
                    .map(|t| json!({
                        "type": t.kind,
                        "function": {
                            "name": t.function.name,
                            "description": t.function.description,
                            "parameters": t.function.parameters,
                        }
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

pub fn embedding_body(model: &str, input: &[String]) -> Value {
    json!({ "model": model, "input": input })
}

pub fn json_headers(bearer: Option<&str>) -> Headers {
    let mut headers: Headers = vec![("Content-Type".into(), "application/json".into())];
    if let Some(token) = bearer {
        headers.push(("Authorization".into(), format!("Bearer {token}")));
    }
    headers
}

pub fn finish_reason_from_wire(value: Option<&str>) -> Option<FinishReason> {
    match value? {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" | "function_call" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => Some(FinishReason::Stop),
    }
}

fn usage_from_wire(value: &Value) -> Option<Usage> {
    let prompt = value.get("prompt_tokens")?.as_u64()? as u32;
    let completion = value.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
    let total = value
        .get("total_tokens")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(prompt + completion);
    Some(Usage::Tokens { prompt_tokens: prompt, completion_tokens: completion, total_tokens: total })
}

fn message_from_wire(value: &Value) -> Message {
    let role = value.get("role").and_then(Value::as_str).map(wire_to_role).unwrap_or(Role::Assistant);
    let content = match value.get("content") {
        Some(Value::String(s)) => Some(Content::Text(s.clone())),
        _ => None,
    };
    let tool_calls = value.get("tool_calls").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(|tc| {
                let id = tc.get("id")?.as_str()?.to_string();
                let function = tc.get("function")?;
                let name = function.get("name")?.as_str()?.to_string();
                let arguments = function.get("arguments").and_then(Value::as_str).unwrap_or("").to_string();
                Some(ToolCall { id, function: ToolCallFunction { name, arguments } })
            })
            .collect::<Vec<_>>()
    });
    Message {
        role,
        content,
        name: None,
        tool_calls: tool_calls.filter(|v| !v.is_empty()),
        tool_call_id: None,
    }
}

pub fn decode_chat_response(provider: &'static str, body: &[u8]) -> ProviderResult<Response> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| ProviderError::Other(format!("{provider}: invalid JSON body: {err}")))?;
    let id = value.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    let model = value.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let created = value.get("created").and_then(Value::as_i64).unwrap_or(0);
    let usage = value.get("usage").and_then(usage_from_wire);
    let choices = value
        .get("choices")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(idx, c)| Choice {
                    index: c.get("index").and_then(Value::as_u64).unwrap_or(idx as u64) as u32,
                    message: c.get("message").map(message_from_wire).unwrap_or(Message {
                        role: Role::Assistant,
                        content: None,
                        name: None,
                        tool_calls: None,
                        tool_call_id: None,
                    }),
                    finish_reason: finish_reason_from_wire(c.get("finish_reason").and_then(Value::as_str)),
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(Response {
        id,
        model,
        created,
        usage,
        output: Output::Chat { choices },
        extra_fields: polygate_protocol::ExtraFields { provider: Some(provider.to_string()), raw_response: Some(value), ..Default::default() },
    })
}

pub fn decode_embedding_response(provider: &'static str, body: &[u8]) -> ProviderResult<Response> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| ProviderError::Other(format!("{provider}: invalid JSON body: {err}")))?;
    let model = value.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let usage = value.get("usage").and_then(usage_from_wire);
    let data = value
        .get("data")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(idx, item)| polygate_protocol::EmbeddingVector {
                    index: item.get("index").and_then(Value::as_u64).unwrap_or(idx as u64) as u32,
                    embedding: item
                        .get("embedding")
                        .and_then(Value::as_array)
                        .map(|a| a.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
                        .unwrap_or_default(),
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(Response {
        id: uuid::Uuid::new_v4().to_string(),
        model,
        created: unix_now(),
        usage,
        output: Output::Embedding { data },
        extra_fields: polygate_protocol::ExtraFields { provider: Some(provider.to_string()), raw_response: Some(value), ..Default::default() },
    })
}

/// Decodes one SSE event's `data:` payload into a [`StreamDecodeOutcome`]
/// (spec §4.1, §4.7). The caller is responsible for SSE framing
/// (`polygate_protocol::sse::SseParser`) and for recognizing the literal
/// `[DONE]` sentinel before calling this.
pub fn decode_chat_stream_event(data: &str) -> StreamDecodeOutcome {
    if data.trim() == "[DONE]" {
        return StreamDecodeOutcome::EndOfStream;
    }
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(err) => {
            return StreamDecodeOutcome::Error(GatewayError::new(
                ErrorKind::ProviderInternal,
                "invalid_stream_chunk",
                format!("failed to decode stream chunk: {err}"),
            ));
        }
    };

    let usage = value.get("usage").and_then(usage_from_wire);
    let choice = value.get("choices").and_then(Value::as_array).and_then(|arr| arr.first());
    let Some(choice) = choice else {
        return StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { usage, ..Default::default() });
    };

    let delta = choice.get("delta");
    let role = delta.and_then(|d| d.get("role")).and_then(Value::as_str).map(wire_to_role);
    let text_delta = delta.and_then(|d| d.get("content")).and_then(Value::as_str).map(str::to_string);
    let refusal_delta = delta.and_then(|d| d.get("refusal")).and_then(Value::as_str).map(str::to_string);
    let finish_reason = finish_reason_from_wire(choice.get("finish_reason").and_then(Value::as_str));

    let tool_call_deltas = delta
        .and_then(|d| d.get("tool_calls"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let index = tc.get("index").and_then(Value::as_u64)?;
                    // `id` only appears on the delta that opens a tool call;
                    // every later argument fragment carries just `index`.
                    // Key on `index` consistently so the accumulator groups
                    // every delta of one call into a single entry, and carry
                    // the real id separately when this delta has one.
                    let call_id = tc.get("id").and_then(Value::as_str).map(str::to_string);
                    let name = tc.get("function").and_then(|f| f.get("name")).and_then(Value::as_str).map(str::to_string);
                    let arguments_delta = tc.get("function").and_then(|f| f.get("arguments")).and_then(Value::as_str).map(str::to_string);
                    Some(ToolCallDelta { id: index.to_string(), call_id, name, arguments_delta })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent {
        role,
        text_delta,
        tool_call_deltas,
        refusal_delta,
        usage,
        finish_reason,
        error: None,
    })
}

pub fn local_request(url: impl Into<String>, headers: Headers, body: Value, is_stream: bool) -> UpstreamHttpRequest {
    UpstreamHttpRequest {
        method: polygate_provider_core::HttpMethod::Post,
        url: url.into(),
        headers,
        body: Some(Bytes::from(body.to_string())),
        is_stream,
    }
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
