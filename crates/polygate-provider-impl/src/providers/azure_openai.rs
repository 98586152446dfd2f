//! Azure OpenAI adapter (spec §4.1, C1): same JSON shape as OpenAI's
//! `/chat/completions`, but routed through `{base_url}/openai/deployments/
//! {deployment}/...` with an `api-key` header and an `api-version` query
//! parameter, and the model name resolved through the key's deployment map
//! (spec §3 `Key::provider_specific_config`).

use async_trait::async_trait;

use polygate_protocol::{Input, ProviderSpecificConfig, Request, RequestType, Response, StreamDecodeOutcome};
use polygate_provider_core::credential::Credential;
use polygate_provider_core::{Headers, ProviderAdapter, ProviderError, ProviderResult, UpstreamCtx, UpstreamHttpRequest, header_set};

use crate::openai_compat;

pub struct AzureOpenAiAdapter {
    base_url: String,
    api_version: String,
}

impl AzureOpenAiAdapter {
    pub fn new(base_url: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), api_version: api_version.into() }
    }

    fn deployment_for(&self, key: &Credential, model: &str) -> String {
        if let ProviderSpecificConfig::AzureOpenAi { deployment_map, .. } = &key.provider_specific_config
            && let Some(deployment) = deployment_map.get(model)
        {
            return deployment.clone();
        }
        model.to_string()
    }
}

#[async_trait]
impl ProviderAdapter for AzureOpenAiAdapter {
    fn name(&self) -> &'static str {
        "azure_openai"
    }

    fn supports(&self, request_type: RequestType) -> bool {
        matches!(request_type, RequestType::Chat | RequestType::ChatStream | RequestType::Embedding)
    }

    async fn encode(&self, _ctx: &UpstreamCtx, key: &Credential, request: &Request) -> ProviderResult<UpstreamHttpRequest> {
        let mut headers: Headers = Vec::new();
        header_set(&mut headers, "Content-Type", "application/json");
        header_set(&mut headers, "api-key", &key.value);
        let deployment = self.deployment_for(key, &request.model);

        match (&request.request_type, &request.input) {
            (RequestType::Chat | RequestType::ChatStream, Input::Chat { messages }) => {
                let stream = request.request_type.is_streaming();
                let body = openai_compat::chat_body(&request.model, messages, &request.parameters, stream);
                let url = format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    self.base_url, deployment, self.api_version
                );
                Ok(openai_compat::local_request(url, headers, body, stream))
            }
            (RequestType::Embedding, Input::Embedding { input }) => {
                let body = openai_compat::embedding_body(&request.model, input);
                let url = format!(
                    "{}/openai/deployments/{}/embeddings?api-version={}",
                    self.base_url, deployment, self.api_version
                );
                Ok(openai_compat::local_request(url, headers, body, false))
            }
            _ => Err(ProviderError::Unsupported("request type not supported by azure_openai adapter")),
        }
    }

    fn decode_response(&self, _ctx: &UpstreamCtx, request: &Request, _status: u16, _headers: &Headers, body: &[u8]) -> ProviderResult<Response> {
        match request.request_type {
            RequestType::Embedding => openai_compat::decode_embedding_response("azure_openai", body),
            _ => openai_compat::decode_chat_response("azure_openai", body),
        }
    }

    fn decode_stream_chunk(&self, _ctx: &UpstreamCtx, _request: &Request, bytes: &[u8]) -> StreamDecodeOutcome {
        openai_compat::decode_chat_stream_event(&String::from_utf8_lossy(bytes))
    }
}
