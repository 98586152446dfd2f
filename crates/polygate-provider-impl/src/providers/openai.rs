//! OpenAI adapter (spec §4.1, C1). Grounded on the teacher's
//! `providers/openai` dispatch table, narrowed from its five-protocol
//! translation matrix (Claude/Gemini/OpenAI-chat/OpenAI-responses/basic) to
//! the single `ProviderAdapter` capability set this spec names.

use async_trait::async_trait;

use polygate_protocol::{Input, Request, RequestType, Response, StreamDecodeOutcome};
use polygate_provider_core::credential::Credential;
use polygate_provider_core::{
    Headers, ProviderAdapter, ProviderError, ProviderResult, UpstreamCtx, UpstreamHttpRequest,
};

use crate::openai_compat;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self { base_url: DEFAULT_BASE_URL.to_string() }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn supports(&self, request_type: RequestType) -> bool {
        matches!(
            request_type,
            RequestType::Chat
                | RequestType::ChatStream
                | RequestType::Embedding
                | RequestType::Responses
                | RequestType::ResponsesStream
                | RequestType::ListModels
        )
    }

    async fn encode(&self, _ctx: &UpstreamCtx, key: &Credential, request: &Request) -> ProviderResult<UpstreamHttpRequest> {
        let headers: Headers = openai_compat::json_headers(Some(&key.value));
        match (&request.request_type, &request.input) {
            (RequestType::Chat | RequestType::ChatStream, Input::Chat { messages })
            | (RequestType::Responses | RequestType::ResponsesStream, Input::Responses { messages }) => {
                let stream = request.request_type.is_streaming();
                let body = openai_compat::chat_body(&request.model, messages, &request.parameters, stream);
                Ok(openai_compat::local_request(format!("{}/chat/completions", self.base_url), headers, body, stream))
            }
            (RequestType::Embedding, Input::Embedding { input }) => {
                let body = openai_compat::embedding_body(&request.model, input);
                Ok(openai_compat::local_request(format!("{}/embeddings", self.base_url), headers, body, false))
            }
            (RequestType::ListModels, Input::ListModels) => Ok(UpstreamHttpRequest {
                method: polygate_provider_core::HttpMethod::Get,
                url: format!("{}/models", self.base_url),
                headers,
                body: None,
                is_stream: false,
            }),
            _ => Err(ProviderError::Unsupported("request type not supported by openai adapter")),
        }
    }

    fn decode_response(&self, _ctx: &UpstreamCtx, request: &Request, _status: u16, _headers: &Headers, body: &[u8]) -> ProviderResult<Response> {
        match request.request_type {
            RequestType::Embedding => openai_compat::decode_embedding_response("openai", body),
            RequestType::ListModels => decode_models(body),
            _ => openai_compat::decode_chat_response("openai", body),
        }
    }

    fn decode_stream_chunk(&self, _ctx: &UpstreamCtx, _request: &Request, bytes: &[u8]) -> StreamDecodeOutcome {
        let data = String::from_utf8_lossy(bytes);
        openai_compat::decode_chat_stream_event(&data)
    }
}

fn decode_models(body: &[u8]) -> ProviderResult<Response> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|err| ProviderError::Other(format!("openai: invalid models JSON: {err}")))?;
    let models = value
        .get("data")
        .and_then(serde_json::Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m.get("id").and_then(serde_json::Value::as_str).map(str::to_string))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(Response {
        id: uuid::Uuid::new_v4().to_string(),
        model: String::new(),
        created: 0,
        usage: None,
        output: polygate_protocol::Output::ListModels { models },
        extra_fields: polygate_protocol::ExtraFields { provider: Some("openai".into()), ..Default::default() },
    })
}
