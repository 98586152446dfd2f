//! Ollama adapter: a locally-hosted runtime exposing an OpenAI-compatible
//! `/v1/chat/completions` endpoint (spec §4.1, C1). No credential is
//! required by the upstream itself; the gateway still routes through the
//! normal `KeySelector` so operators can rate-limit/weight multiple local
//! instances behind one provider tag if they choose to.

use async_trait::async_trait;

use polygate_protocol::{Input, Request, RequestType, Response, StreamDecodeOutcome};
use polygate_provider_core::credential::Credential;
use polygate_provider_core::{Headers, ProviderAdapter, ProviderError, ProviderResult, UpstreamCtx, UpstreamHttpRequest};

use crate::openai_compat;

pub struct OllamaAdapter {
    base_url: String,
}

impl OllamaAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn supports(&self, request_type: RequestType) -> bool {
        matches!(request_type, RequestType::Chat | RequestType::ChatStream | RequestType::Embedding | RequestType::ListModels)
    }

    async fn encode(&self, _ctx: &UpstreamCtx, key: &Credential, request: &Request) -> ProviderResult<UpstreamHttpRequest> {
        let bearer = if key.value.trim().is_empty() { None } else { Some(key.value.as_str()) };
        let headers: Headers = openai_compat::json_headers(bearer);
        match (&request.request_type, &request.input) {
            (RequestType::Chat | RequestType::ChatStream, Input::Chat { messages }) => {
                let stream = request.request_type.is_streaming();
                let body = openai_compat::chat_body(&request.model, messages, &request.parameters, stream);
                Ok(openai_compat::local_request(format!("{}/v1/chat/completions", self.base_url), headers, body, stream))
            }
            (RequestType::Embedding, Input::Embedding { input }) => {
                let body = openai_compat::embedding_body(&request.model, input);
                Ok(openai_compat::local_request(format!("{}/v1/embeddings", self.base_url), headers, body, false))
            }
            (RequestType::ListModels, Input::ListModels) => Ok(UpstreamHttpRequest {
                method: polygate_provider_core::HttpMethod::Get,
                url: format!("{}/v1/models", self.base_url),
                headers,
                body: None,
                is_stream: false,
            }),
            _ => Err(ProviderError::Unsupported("request type not supported by ollama adapter")),
        }
    }

    fn decode_response(&self, _ctx: &UpstreamCtx, request: &Request, _status: u16, _headers: &Headers, body: &[u8]) -> ProviderResult<Response> {
        match request.request_type {
            RequestType::Embedding => openai_compat::decode_embedding_response("ollama", body),
            RequestType::ListModels => decode_models(body),
            _ => openai_compat::decode_chat_response("ollama", body),
        }
    }

    fn decode_stream_chunk(&self, _ctx: &UpstreamCtx, _request: &Request, bytes: &[u8]) -> StreamDecodeOutcome {
        openai_compat::decode_chat_stream_event(&String::from_utf8_lossy(bytes))
    }
}

fn decode_models(body: &[u8]) -> ProviderResult<Response> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|err| ProviderError::Other(format!("ollama: invalid models JSON: {err}")))?;
    let models = value
        .get("data")
        .and_then(serde_json::Value::as_array)
        .map(|arr| arr.iter().filter_map(|m| m.get("id").and_then(serde_json::Value::as_str).map(str::to_string)).collect())
        .unwrap_or_default();
    Ok(Response {
        id: uuid::Uuid::new_v4().to_string(),
        model: String::new(),
        created: 0,
        usage: None,
        output: polygate_protocol::Output::ListModels { models },
        extra_fields: polygate_protocol::ExtraFields { provider: Some("ollama".into()), ..Default::default() },
    })
}
