//! Built-in upstream provider implementations (spec §4.1, C1): one
//! `ProviderAdapter` per backend named in the spec's scope (OpenAI,
//! Anthropic, Azure OpenAI, Bedrock, Vertex, Cohere, Mistral, Ollama, Groq).
//!
//! This crate does not perform network IO. It builds `UpstreamHttpRequest`s
//! for upstream calls and decodes upstream bytes back into the canonical
//! schema; a higher layer (`polygate-core`) owns the actual transport.

mod openai_compat;
mod providers;
mod registry;

pub use providers::{
    AnthropicAdapter, AzureOpenAiAdapter, BedrockAdapter, CohereAdapter, GroqAdapter,
    MistralAdapter, OllamaAdapter, OpenAiAdapter, VertexAdapter,
};
pub use registry::register_configured_providers;
