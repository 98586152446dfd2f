//! Mistral adapter: OpenAI-compatible `/v1/chat/completions` wire shape
//! behind a bearer token (spec §4.1, C1).

use async_trait::async_trait;

use polygate_protocol::{Input, Request, RequestType, Response, StreamDecodeOutcome};
use polygate_provider_core::credential::Credential;
use polygate_provider_core::{Headers, ProviderAdapter, ProviderError, ProviderResult, UpstreamCtx, UpstreamHttpRequest};

use crate::openai_compat;

const DEFAULT_BASE_URL: &str = "https://api.mistral.ai/v1";

pub struct MistralAdapter {
    base_url: String,
}

impl MistralAdapter {
    pub fn new() -> Self {
        Self { base_url: DEFAULT_BASE_URL.to_string() }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

impl Default for MistralAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for MistralAdapter {
    fn name(&self) -> &'static str {
        "mistral"
    }

    fn supports(&self, request_type: RequestType) -> bool {
        matches!(request_type, RequestType::Chat | RequestType::ChatStream | RequestType::Embedding)
    }

    async fn encode(&self, _ctx: &UpstreamCtx, key: &Credential, request: &Request) -> ProviderResult<UpstreamHttpRequest> {
        let headers: Headers = openai_compat::json_headers(Some(&key.value));
        match (&request.request_type, &request.input) {
            (RequestType::Chat | RequestType::ChatStream, Input::Chat { messages }) => {
                let stream = request.request_type.is_streaming();
                let body = openai_compat::chat_body(&request.model, messages, &request.parameters, stream);
                Ok(openai_compat::local_request(format!("{}/chat/completions", self.base_url), headers, body, stream))
            }
            (RequestType::Embedding, Input::Embedding { input }) => {
                let body = openai_compat::embedding_body(&request.model, input);
                Ok(openai_compat::local_request(format!("{}/embeddings", self.base_url), headers, body, false))
            }
            _ => Err(ProviderError::Unsupported("request type not supported by mistral adapter")),
        }
    }

    fn decode_response(&self, _ctx: &UpstreamCtx, request: &Request, _status: u16, _headers: &Headers, body: &[u8]) -> ProviderResult<Response> {
        match request.request_type {
            RequestType::Embedding => openai_compat::decode_embedding_response("mistral", body),
            _ => openai_compat::decode_chat_response("mistral", body),
        }
    }

    fn decode_stream_chunk(&self, _ctx: &UpstreamCtx, _request: &Request, bytes: &[u8]) -> StreamDecodeOutcome {
        openai_compat::decode_chat_stream_event(&String::from_utf8_lossy(bytes))
    }
}
