mod anthropic;
mod azure_openai;
mod bedrock;
mod cohere;
mod groq;
mod mistral;
mod ollama;
mod openai;
mod vertex;

pub use anthropic::AnthropicAdapter;
pub use azure_openai::AzureOpenAiAdapter;
pub use bedrock::BedrockAdapter;
pub use cohere::CohereAdapter;
pub use groq::GroqAdapter;
pub use mistral::MistralAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;
pub use vertex::VertexAdapter;
