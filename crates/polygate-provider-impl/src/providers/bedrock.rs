//! AWS Bedrock adapter (spec §4.1, C1). Targets the model-agnostic Converse
//! API (`/model/{id}/converse` and `/model/{id}/converse-stream`), which
//! gives every Bedrock-hosted family (Anthropic, Titan, Mistral, Llama) the
//! same request/response shape instead of one per vendor. Requests are
//! signed with AWS SigV4 rather than a bearer token — the credential's
//! `value` field holds `"{access_key_id}:{secret_access_key}"`, optionally
//! followed by `:{session_token}` for temporary credentials.
//!
//! Streaming responses are framed as `application/vnd.amazon.eventstream`
//! binary messages rather than SSE; each chunk handed to
//! `decode_stream_chunk` is expected to be one complete event-stream
//! message (headers + payload + checksum) as produced by the
//! `aws_event_stream_parser` crate.

use std::time::SystemTime;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_event_stream_parser::{HeaderValue as EventHeaderValue, parse_message};
use aws_sigv4::http_request::{PercentEncodingMode, SignableBody, SignableRequest, SigningSettings, sign};
use aws_sigv4::sign::v4;
use serde_json::{Map, Value, json};

use polygate_protocol::{
    Choice, Content, ErrorKind, FinishReason, GatewayError, Input, Message, Output, Request, RequestType,
    Response, Role, StreamDecodeOutcome, Usage,
};
use polygate_provider_core::credential::Credential;
use polygate_provider_core::{Headers, ProviderAdapter, ProviderError, ProviderResult, UpstreamCtx, UpstreamHttpRequest, header_set};

use crate::openai_compat::unix_now;

const SERVICE: &str = "bedrock";

pub struct BedrockAdapter {
    region: String,
}

impl BedrockAdapter {
    pub fn new(region: impl Into<String>) -> Self {
        Self { region: region.into() }
    }

    fn base_url(&self) -> String {
        format!("https://bedrock-runtime.{}.amazonaws.com", self.region)
    }
}

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

fn parse_credential(value: &str) -> ProviderResult<AwsCredentials> {
    let mut parts = value.splitn(3, ':');
    let access_key_id = parts.next().filter(|s| !s.is_empty()).ok_or(ProviderError::MissingCredentialField("bedrock access_key_id"))?;
    let secret_access_key = parts.next().filter(|s| !s.is_empty()).ok_or(ProviderError::MissingCredentialField("bedrock secret_access_key"))?;
    let session_token = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    Ok(AwsCredentials { access_key_id: access_key_id.to_string(), secret_access_key: secret_access_key.to_string(), session_token })
}

fn sign_request(region: &str, method: &str, url: &str, creds: &AwsCredentials, headers: &mut Headers, body: &[u8]) -> ProviderResult<()> {
    let identity: aws_smithy_runtime_api::client::identity::Identity = Credentials::new(
        creds.access_key_id.clone(),
        creds.secret_access_key.clone(),
        creds.session_token.clone(),
        None,
        "polygate-bedrock",
    )
    .into();

    let mut settings = SigningSettings::default();
    settings.percent_encoding_mode = PercentEncodingMode::Double;

    let signing_params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(SERVICE)
        .time(SystemTime::now())
        .settings(settings)
        .build()
        .map_err(|err| ProviderError::Other(format!("bedrock: failed to build signing params: {err}")))?;
    let signing_params: aws_sigv4::sign::SigningParams<'_> = signing_params.into();

    let header_refs: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let signable = SignableRequest::new(method, url, header_refs.into_iter(), SignableBody::Bytes(body))
        .map_err(|err| ProviderError::Other(format!("bedrock: invalid signable request: {err}")))?;

    let (instructions, _signature) = sign(signable, &signing_params)
        .map_err(|err| ProviderError::Other(format!("bedrock: signing failed: {err}")))?
        .into_parts();

    for (name, value) in instructions.headers() {
        header_set(headers, name.to_string(), value.to_string());
    }
    Ok(())
}

fn role_to_wire(role: Role) -> &'static str {
    match role {
        Role::Assistant => "assistant",
        _ => "user",
    }
}

fn wire_to_role(role: &str) -> Role {
    if role == "assistant" { Role::Assistant } else { Role::User }
}

fn converse_body(messages: &[Message], params: &polygate_protocol::Parameters) -> Value {
    let mut system = Vec::new();
    let mut wire_messages = Vec::new();
    for message in messages {
        if message.role == Role::System {
            if let Some(text) = message.content.as_ref().and_then(Content::as_text) {
                system.push(json!({"text": text}));
            }
            continue;
        }
        let text = message.content.as_ref().and_then(Content::as_text).unwrap_or_default();
        wire_messages.push(json!({"role": role_to_wire(message.role), "content": [{"text": text}]}));
    }

    let mut inference_config = Map::new();
    if let Some(v) = params.max_tokens {
        inference_config.insert("maxTokens".into(), json!(v));
    }
    if let Some(v) = params.temperature {
        inference_config.insert("temperature".into(), json!(v));
    }
    if let Some(v) = params.top_p {
        inference_config.insert("topP".into(), json!(v));
    }
    if let Some(v) = &params.stop {
        inference_config.insert("stopSequences".into(), json!(v));
    }

    let mut body = Map::new();
    body.insert("messages".into(), json!(wire_messages));
    if !system.is_empty() {
        body.insert("system".into(), json!(system));
    }
    if !inference_config.is_empty() {
        body.insert("inferenceConfig".into(), Value::Object(inference_config));
    }
    Value::Object(body)
}

fn finish_reason_from_wire(value: Option<&str>) -> Option<FinishReason> {
    match value? {
        "end_turn" | "stop_sequence" => Some(FinishReason::Stop),
        "max_tokens" => Some(FinishReason::Length),
        "tool_use" => Some(FinishReason::ToolCalls),
        "content_filtered" => Some(FinishReason::ContentFilter),
        _ => Some(FinishReason::Stop),
    }
}

fn usage_from_wire(value: &Value) -> Option<Usage> {
    let input = value.get("inputTokens")?.as_u64()? as u32;
    let output = value.get("outputTokens").and_then(Value::as_u64).unwrap_or(0) as u32;
    Some(Usage::tokens(input, output))
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn name(&self) -> &'static str {
        "bedrock"
    }

    fn supports(&self, request_type: RequestType) -> bool {
        matches!(request_type, RequestType::Chat | RequestType::ChatStream)
    }

    async fn encode(&self, _ctx: &UpstreamCtx, key: &Credential, request: &Request) -> ProviderResult<UpstreamHttpRequest> {
        match (&request.request_type, &request.input) {
            (RequestType::Chat | RequestType::ChatStream, Input::Chat { messages }) => {
                let stream = request.request_type.is_streaming();
                let creds = parse_credential(&key.value)?;
                let body = converse_body(messages, &request.parameters);
                let body_bytes = body.to_string().into_bytes();
                let path = if stream { "converse-stream" } else { "converse" };
                let url = format!("{}/model/{}/{}", self.base_url(), request.model, path);

                let mut headers: Headers = Vec::new();
                header_set(&mut headers, "Content-Type", "application/json");
                sign_request(&self.region, "POST", &url, &creds, &mut headers, &body_bytes)?;

                Ok(UpstreamHttpRequest {
                    method: polygate_provider_core::HttpMethod::Post,
                    url,
                    headers,
                    body: Some(bytes::Bytes::from(body_bytes)),
                    is_stream: stream,
                })
            }
            _ => Err(ProviderError::Unsupported("request type not supported by bedrock adapter")),
        }
    }

    fn decode_response(&self, _ctx: &UpstreamCtx, request: &Request, _status: u16, _headers: &Headers, body: &[u8]) -> ProviderResult<Response> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| ProviderError::Other(format!("bedrock: invalid JSON body: {err}")))?;

        let usage = value.get("usage").and_then(usage_from_wire);
        let finish_reason = finish_reason_from_wire(value.get("stopReason").and_then(Value::as_str));
        let text = value
            .get("output")
            .and_then(|o| o.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
            .map(|blocks| blocks.iter().filter_map(|b| b.get("text").and_then(Value::as_str)).collect::<Vec<_>>().join(""))
            .unwrap_or_default();
        let role = value
            .get("output")
            .and_then(|o| o.get("message"))
            .and_then(|m| m.get("role"))
            .and_then(Value::as_str)
            .map(wire_to_role)
            .unwrap_or(Role::Assistant);

        let message = Message {
            role,
            content: if text.is_empty() { None } else { Some(Content::Text(text)) },
            name: None,
            tool_calls: None,
            tool_call_id: None,
        };

        Ok(Response {
            id: uuid::Uuid::new_v4().to_string(),
            model: request.model.clone(),
            created: unix_now(),
            usage,
            output: Output::Chat { choices: vec![Choice { index: 0, message, finish_reason }] },
            extra_fields: polygate_protocol::ExtraFields { provider: Some("bedrock".to_string()), raw_response: Some(value), ..Default::default() },
        })
    }

    /// `bytes` is one full `vnd.amazon.eventstream` message frame (spec §4.1:
    /// the caller is responsible for splitting the wire stream into frames
    /// before calling this, the same framing contract SSE-based adapters get
    /// from `polygate_protocol::sse::SseParser`).
    fn decode_stream_chunk(&self, _ctx: &UpstreamCtx, _request: &Request, bytes: &[u8]) -> StreamDecodeOutcome {
        let message = match parse_message(bytes) {
            Ok((_, message)) => message,
            Err(err) => {
                return StreamDecodeOutcome::Error(GatewayError::new(
                    ErrorKind::ProviderInternal,
                    "invalid_stream_chunk",
                    format!("failed to parse bedrock event-stream frame: {err}"),
                ));
            }
        };

        let event_type = message
            .headers
            .headers
            .iter()
            .find(|h| h.key == ":event-type")
            .and_then(|h| match &h.value {
                EventHeaderValue::String(s) => Some(s.to_string()),
                _ => None,
            });

        let payload: Value = match serde_json::from_slice(&message.body) {
            Ok(v) => v,
            Err(err) => {
                return StreamDecodeOutcome::Error(GatewayError::new(
                    ErrorKind::ProviderInternal,
                    "invalid_stream_chunk",
                    format!("failed to decode bedrock event payload: {err}"),
                ));
            }
        };

        match event_type.as_deref() {
            Some("messageStart") => {
                StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { role: Some(Role::Assistant), ..Default::default() })
            }
            Some("contentBlockDelta") => {
                let text_delta = payload.get("delta").and_then(|d| d.get("text")).and_then(Value::as_str).map(str::to_string);
                StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { text_delta, ..Default::default() })
            }
            Some("messageStop") => {
                let finish_reason = finish_reason_from_wire(payload.get("stopReason").and_then(Value::as_str));
                StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { finish_reason, ..Default::default() })
            }
            Some("metadata") => {
                let usage = payload.get("usage").and_then(usage_from_wire);
                StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { usage, ..Default::default() })
            }
            _ => StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent::default()),
        }
    }

    fn stream_framing(&self) -> polygate_provider_core::StreamFraming {
        polygate_provider_core::StreamFraming::Raw
    }
}
