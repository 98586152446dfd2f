//! Wire-level reference types and the gateway's own canonical schema.
//!
//! `canonical` is the provider-agnostic `Request`/`Response`/`Message`/`Key`/
//! `Error` schema (spec §3) that flows through the whole pipeline. `openai`
//! holds the OpenAI chat-completions wire shapes, kept because the canonical
//! `Response` is structurally a superset of that schema (spec §6) and
//! because several adapters (OpenAI, Azure OpenAI, Mistral, Groq, Ollama)
//! share it nearly verbatim.

pub mod canonical;
pub mod openai;
pub mod sse;

pub use canonical::*;
