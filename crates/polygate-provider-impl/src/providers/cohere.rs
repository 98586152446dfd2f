//! Cohere adapter (spec §4.1, C1): Chat API v2 (`POST /v2/chat`). Shares the
//! message-role vocabulary with the OpenAI family but keeps its own
//! `message`/`chat_history`-free, single `messages` array shape and a
//! distinct streaming event protocol (`content-delta`, `message-end`).

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use polygate_protocol::{
    Choice, Content, ErrorKind, FinishReason, GatewayError, Input, Message, Output, Request, RequestType,
    Response, Role, StreamDecodeOutcome, Usage,
};
use polygate_provider_core::credential::Credential;
use polygate_provider_core::{Headers, ProviderAdapter, ProviderError, ProviderResult, UpstreamCtx, UpstreamHttpRequest};

use crate::openai_compat::{json_headers, local_request, unix_now};

const DEFAULT_BASE_URL: &str = "https://api.cohere.com/v2";

pub struct CohereAdapter {
    base_url: String,
}

impl CohereAdapter {
    pub fn new() -> Self {
        Self { base_url: DEFAULT_BASE_URL.to_string() }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

impl Default for CohereAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn role_to_wire(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "chatbot",
        Role::Tool => "tool",
    }
}

fn wire_to_role(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "tool" => Role::Tool,
        "chatbot" | "assistant" => Role::Assistant,
        _ => Role::User,
    }
}

fn messages_to_wire(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let text = m.content.as_ref().and_then(Content::as_text).unwrap_or_default();
            json!({"role": role_to_wire(m.role), "content": text})
        })
        .collect()
}

fn chat_body(model: &str, messages: &[Message], params: &polygate_protocol::Parameters, stream: bool) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert("messages".into(), json!(messages_to_wire(messages)));
    if stream {
        body.insert("stream".into(), json!(true));
    }
    if let Some(v) = params.temperature {
        body.insert("temperature".into(), json!(v));
    }
    if let Some(v) = params.max_tokens {
        body.insert("max_tokens".into(), json!(v));
    }
    if let Some(v) = params.top_p {
        body.insert("p".into(), json!(v));
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
                        "type": "function",
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
    Value::Object(body)
}

fn finish_reason_from_wire(value: Option<&str>) -> Option<FinishReason> {
    match value? {
        "COMPLETE" => Some(FinishReason::Stop),
        "MAX_TOKENS" => Some(FinishReason::Length),
        "TOOL_CALL" => Some(FinishReason::ToolCalls),
        _ => Some(FinishReason::Stop),
    }
}

fn usage_from_wire(value: &Value) -> Option<Usage> {
    let tokens = value.get("tokens")?;
    let prompt = tokens.get("input_tokens")?.as_u64()? as u32;
    let completion = tokens.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
    Some(Usage::tokens(prompt, completion))
}

#[async_trait]
impl ProviderAdapter for CohereAdapter {
    fn name(&self) -> &'static str {
        "cohere"
    }

    fn supports(&self, request_type: RequestType) -> bool {
        matches!(request_type, RequestType::Chat | RequestType::ChatStream | RequestType::Embedding | RequestType::Rerank)
    }

    async fn encode(&self, _ctx: &UpstreamCtx, key: &Credential, request: &Request) -> ProviderResult<UpstreamHttpRequest> {
        let headers: Headers = json_headers(Some(&key.value));
        match (&request.request_type, &request.input) {
            (RequestType::Chat | RequestType::ChatStream, Input::Chat { messages }) => {
                let stream = request.request_type.is_streaming();
                let body = chat_body(&request.model, messages, &request.parameters, stream);
                Ok(local_request(format!("{}/chat", self.base_url), headers, body, stream))
            }
            (RequestType::Embedding, Input::Embedding { input }) => {
                let body = json!({"model": request.model, "texts": input, "input_type": "search_document"});
                Ok(local_request(format!("{}/embed", self.base_url), headers, body, false))
            }
            (RequestType::Rerank, Input::Rerank { query, documents, top_n }) => {
                let mut body = Map::new();
                body.insert("model".into(), json!(request.model));
                body.insert("query".into(), json!(query));
                body.insert("documents".into(), json!(documents));
                if let Some(top_n) = top_n {
                    body.insert("top_n".into(), json!(top_n));
                }
                Ok(local_request(format!("{}/rerank", self.base_url), headers, Value::Object(body), false))
            }
            _ => Err(ProviderError::Unsupported("request type not supported by cohere adapter")),
        }
    }

    fn decode_response(&self, _ctx: &UpstreamCtx, request: &Request, _status: u16, _headers: &Headers, body: &[u8]) -> ProviderResult<Response> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| ProviderError::Other(format!("cohere: invalid JSON body: {err}")))?;

        match request.request_type {
            RequestType::Embedding => {
                let data = value
                    .get("embeddings")
                    .and_then(|e| e.get("float"))
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .enumerate()
                            .map(|(idx, vector)| polygate_protocol::EmbeddingVector {
                                index: idx as u32,
                                embedding: vector.as_array().map(|v| v.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect()).unwrap_or_default(),
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                Ok(Response {
                    id: value.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                    model: request.model.clone(),
                    created: unix_now(),
                    usage: None,
                    output: Output::Embedding { data },
                    extra_fields: polygate_protocol::ExtraFields { provider: Some("cohere".into()), raw_response: Some(value), ..Default::default() },
                })
            }
            RequestType::Rerank => {
                let scores = value
                    .get("results")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(|r| r.get("relevance_score").and_then(Value::as_f64)).collect())
                    .unwrap_or_default();
                Ok(Response {
                    id: value.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                    model: request.model.clone(),
                    created: unix_now(),
                    usage: None,
                    output: Output::Rerank { scores },
                    extra_fields: polygate_protocol::ExtraFields { provider: Some("cohere".into()), raw_response: Some(value), ..Default::default() },
                })
            }
            _ => {
                let id = value.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                let usage = value.get("usage").and_then(usage_from_wire);
                let finish_reason = finish_reason_from_wire(value.get("finish_reason").and_then(Value::as_str));
                let text = value
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_array)
                    .map(|blocks| {
                        blocks
                            .iter()
                            .filter_map(|b| b.get("text").and_then(Value::as_str))
                            .collect::<Vec<_>>()
                            .join("")
                    })
                    .unwrap_or_default();
                let message = Message {
                    role: value
                        .get("message")
                        .and_then(|m| m.get("role"))
                        .and_then(Value::as_str)
                        .map(wire_to_role)
                        .unwrap_or(Role::Assistant),
                    content: if text.is_empty() { None } else { Some(Content::Text(text)) },
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                };
                Ok(Response {
                    id,
                    model: request.model.clone(),
                    created: unix_now(),
                    usage,
                    output: Output::Chat { choices: vec![Choice { index: 0, message, finish_reason }] },
                    extra_fields: polygate_protocol::ExtraFields { provider: Some("cohere".into()), raw_response: Some(value), ..Default::default() },
                })
            }
        }
    }

    fn decode_stream_chunk(&self, _ctx: &UpstreamCtx, _request: &Request, bytes: &[u8]) -> StreamDecodeOutcome {
        let data = String::from_utf8_lossy(bytes);
        let value: Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(err) => {
                return StreamDecodeOutcome::Error(GatewayError::new(
                    ErrorKind::ProviderInternal,
                    "invalid_stream_chunk",
                    format!("failed to decode cohere stream chunk: {err}"),
                ));
            }
        };
        match value.get("type").and_then(Value::as_str) {
            Some("content-delta") => {
                let text_delta = value
                    .get("delta")
                    .and_then(|d| d.get("message"))
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.get("text"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { text_delta, ..Default::default() })
            }
            Some("message-start") => {
                StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { role: Some(Role::Assistant), ..Default::default() })
            }
            Some("message-end") => {
                let finish_reason = finish_reason_from_wire(
                    value.get("delta").and_then(|d| d.get("finish_reason")).and_then(Value::as_str),
                );
                let usage = value.get("delta").and_then(|d| d.get("usage")).and_then(usage_from_wire);
                StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { finish_reason, usage, ..Default::default() })
            }
            _ => StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent::default()),
        }
    }
}
