//! Vertex AI (Gemini) adapter (spec §4.1, C1). Two things set this adapter
//! apart from the rest of the family: auth is a short-lived OAuth2 access
//! token exchanged for a service-account JWT (not the credential value
//! itself, which holds the service-account key JSON), and the wire shape is
//! Gemini's `generateContent`/`streamGenerateContent` rather than a chat-
//! completions-family body. The token exchange is a side-channel HTTP call
//! this adapter makes directly — it isn't retried, pooled, or logged by the
//! orchestrator pipeline the way the main upstream call is.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use polygate_protocol::{
    Choice, Content, ErrorKind, FinishReason, GatewayError, Input, Message, Output, Request, RequestType,
    Response, Role, StreamDecodeOutcome, ToolCall, ToolCallDelta, ToolCallFunction, Usage,
};
use polygate_provider_core::credential::Credential;
use polygate_provider_core::{
    Headers, ProviderAdapter, ProviderError, ProviderResult, UpstreamCtx, UpstreamHttpRequest, header_set,
};

use crate::openai_compat::{local_request, unix_now};

const TOKEN_URI_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

pub struct VertexAdapter {
    region: String,
    http: wreq::Client,
    token_cache: RwLock<HashMap<String, CachedToken>>,
}

impl VertexAdapter {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            http: wreq::Client::new(),
            token_cache: RwLock::new(HashMap::new()),
        }
    }

    fn endpoint(&self, project: &str, model: &str, stream: bool) -> String {
        let method = if stream { "streamGenerateContent?alt=sse" } else { "generateContent" };
        format!(
            "https://{}-aiplatform.googleapis.com/v1/projects/{}/locations/{}/publishers/google/models/{}:{}",
            self.region, project, self.region, model, method
        )
    }

    async fn access_token(&self, service_account_json: &str) -> ProviderResult<String> {
        let sa: ServiceAccountKey = serde_json::from_str(service_account_json)
            .map_err(|err| ProviderError::Other(format!("vertex: invalid service account JSON: {err}")))?;

        let now = unix_now();
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.get(&sa.client_email)
                && cached.expires_at - TOKEN_EXPIRY_SKEW_SECS > now
            {
                return Ok(cached.access_token.clone());
            }
        }

        let claims = json!({
            "iss": sa.client_email,
            "scope": TOKEN_URI_SCOPE,
            "aud": sa.token_uri,
            "iat": now,
            "exp": now + 3600,
        });
        let key = EncodingKey::from_rsa_pem(sa.private_key.as_bytes())
            .map_err(|err| ProviderError::Other(format!("vertex: invalid service account private key: {err}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|err| ProviderError::Other(format!("vertex: failed to sign JWT assertion: {err}")))?;

        let response = self
            .http
            .post(&sa.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|err| ProviderError::Other(format!("vertex: token exchange request failed: {err}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|err| ProviderError::Other(format!("vertex: token exchange returned invalid JSON: {err}")))?;
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Other("vertex: token exchange response missing access_token".to_string()))?
            .to_string();
        let expires_in = body.get("expires_in").and_then(Value::as_i64).unwrap_or(3600);

        self.token_cache.write().await.insert(
            sa.client_email.clone(),
            CachedToken { access_token: access_token.clone(), expires_at: now + expires_in },
        );
        Ok(access_token)
    }

    fn project_for(&self, key: &Credential) -> Option<String> {
        if let polygate_protocol::ProviderSpecificConfig::Vertex { project, .. } = &key.provider_specific_config {
            Some(project.clone())
        } else {
            None
        }
    }
}

fn role_to_wire(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        _ => "user",
    }
}

fn contents_and_system(messages: &[Message]) -> (Option<Value>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for message in messages {
        if message.role == Role::System {
            if let Some(text) = message.content.as_ref().and_then(Content::as_text) {
                system_parts.push(json!({"text": text}));
            }
            continue;
        }
        let mut parts = Vec::new();
        if let Some(Content::Text(text)) = &message.content {
            parts.push(json!({"text": text}));
        }
        if let Some(tool_calls) = &message.tool_calls {
            for tc in tool_calls {
                let args: Value = serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Object(Map::new()));
                parts.push(json!({"functionCall": {"name": tc.function.name, "args": args}}));
            }
        }
        if message.role == Role::Tool {
            let name = message.name.clone().unwrap_or_default();
            let response_text = message.content.as_ref().and_then(Content::as_text).unwrap_or_default();
            contents.push(json!({
                "role": "user",
                "parts": [{"functionResponse": {"name": name, "response": {"result": response_text}}}],
            }));
            continue;
        }
        contents.push(json!({"role": role_to_wire(message.role), "parts": parts}));
    }
    let system = if system_parts.is_empty() { None } else { Some(json!({"parts": system_parts})) };
    (system, contents)
}

fn generate_content_body(messages: &[Message], params: &polygate_protocol::Parameters) -> Value {
    let (system_instruction, contents) = contents_and_system(messages);
    let mut generation_config = Map::new();
    if let Some(v) = params.temperature {
        generation_config.insert("temperature".into(), json!(v));
    }
    if let Some(v) = params.max_tokens {
        generation_config.insert("maxOutputTokens".into(), json!(v));
    }
    if let Some(v) = params.top_p {
        generation_config.insert("topP".into(), json!(v));
    }
    if let Some(v) = &params.stop {
        generation_config.insert("stopSequences".into(), json!(v));
    }

    let mut body = Map::new();
    body.insert("contents".into(), json!(contents));
    if let Some(system) = system_instruction {
        body.insert("systemInstruction".into(), system);
    }
    if !generation_config.is_empty() {
        body.insert("generationConfig".into(), Value::Object(generation_config));
    }
    if let Some(tools) = &params.tools {
        body.insert(
            "tools".into(),
            json!([{
                "functionDeclarations": tools.iter().map(|t| json!({
                    "name": t.function.name,
                    "description": t.function.description,
                    "parameters": t.function.parameters,
                })).collect::<Vec<_>>(),
            }]),
        );
    }
    Value::Object(body)
}

fn finish_reason_from_wire(value: Option<&str>) -> Option<FinishReason> {
    match value? {
        "STOP" => Some(FinishReason::Stop),
        "MAX_TOKENS" => Some(FinishReason::Length),
        "SAFETY" | "RECITATION" => Some(FinishReason::ContentFilter),
        _ => Some(FinishReason::Stop),
    }
}

fn usage_from_wire(value: &Value) -> Option<Usage> {
    let prompt = value.get("promptTokenCount")?.as_u64()? as u32;
    let completion = value.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0) as u32;
    Some(Usage::tokens(prompt, completion))
}

fn candidate_to_message_and_finish(candidate: &Value) -> (Message, Option<FinishReason>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    if let Some(parts) = candidate.get("content").and_then(|c| c.get("parts")).and_then(Value::as_array) {
        for part in parts {
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                text.push_str(t);
            }
            if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let arguments = call.get("args").map(|v| v.to_string()).unwrap_or_else(|| "{}".to_string());
                tool_calls.push(ToolCall { id: uuid::Uuid::new_v4().to_string(), function: ToolCallFunction { name, arguments } });
            }
        }
    }
    let finish_reason = finish_reason_from_wire(candidate.get("finishReason").and_then(Value::as_str));
    let message = Message {
        role: Role::Assistant,
        content: if text.is_empty() { None } else { Some(Content::Text(text)) },
        name: None,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    };
    (message, finish_reason)
}

#[async_trait]
impl ProviderAdapter for VertexAdapter {
    fn name(&self) -> &'static str {
        "vertex"
    }

    fn supports(&self, request_type: RequestType) -> bool {
        matches!(request_type, RequestType::Chat | RequestType::ChatStream)
    }

    async fn encode(&self, _ctx: &UpstreamCtx, key: &Credential, request: &Request) -> ProviderResult<UpstreamHttpRequest> {
        let project = self
            .project_for(key)
            .ok_or(ProviderError::MissingCredentialField("vertex project (provider_specific_config)"))?;
        let token = self.access_token(&key.value).await?;

        let mut headers: Headers = Vec::new();
        header_set(&mut headers, "Content-Type", "application/json");
        header_set(&mut headers, "Authorization", format!("Bearer {token}"));

        match (&request.request_type, &request.input) {
            (RequestType::Chat | RequestType::ChatStream, Input::Chat { messages }) => {
                let stream = request.request_type.is_streaming();
                let body = generate_content_body(messages, &request.parameters);
                let url = self.endpoint(&project, &request.model, stream);
                Ok(local_request(url, headers, body, stream))
            }
            _ => Err(ProviderError::Unsupported("request type not supported by vertex adapter")),
        }
    }

    fn decode_response(&self, _ctx: &UpstreamCtx, request: &Request, _status: u16, _headers: &Headers, body: &[u8]) -> ProviderResult<Response> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| ProviderError::Other(format!("vertex: invalid JSON body: {err}")))?;
        let usage = value.get("usageMetadata").and_then(usage_from_wire);
        let choices = value
            .get("candidates")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .enumerate()
                    .map(|(idx, candidate)| {
                        let (message, finish_reason) = candidate_to_message_and_finish(candidate);
                        Choice { index: idx as u32, message, finish_reason }
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(Response {
            id: uuid::Uuid::new_v4().to_string(),
            model: request.model.clone(),
            created: unix_now(),
            usage,
            output: Output::Chat { choices },
            extra_fields: polygate_protocol::ExtraFields {
                provider: Some("vertex".to_string()),
                raw_response: Some(value),
                ..Default::default()
            },
        })
    }

    fn decode_stream_chunk(&self, _ctx: &UpstreamCtx, _request: &Request, bytes: &[u8]) -> StreamDecodeOutcome {
        let data = String::from_utf8_lossy(bytes);
        let value: Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(err) => {
                return StreamDecodeOutcome::Error(GatewayError::new(
                    ErrorKind::ProviderInternal,
                    "invalid_stream_chunk",
                    format!("failed to decode vertex stream chunk: {err}"),
                ));
            }
        };
        let usage = value.get("usageMetadata").and_then(usage_from_wire);
        let Some(candidate) = value.get("candidates").and_then(Value::as_array).and_then(|arr| arr.first()) else {
            return StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent { usage, ..Default::default() });
        };
        let (message, finish_reason) = candidate_to_message_and_finish(candidate);
        let text_delta = message.content.and_then(|c| if let Content::Text(t) = c { Some(t) } else { None });
        let tool_call_deltas = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallDelta { id: tc.id, call_id: None, name: Some(tc.function.name), arguments_delta: Some(tc.function.arguments) })
            .collect();
        StreamDecodeOutcome::Chunk(polygate_protocol::ChunkEvent {
            role: Some(Role::Assistant),
            text_delta,
            tool_call_deltas,
            refusal_delta: None,
            usage,
            finish_reason,
            error: None,
        })
    }
}
