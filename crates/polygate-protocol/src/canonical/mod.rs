//! The gateway's own provider-agnostic schema (spec §3): `Request`,
//! `Response`, `Message`, `Key`, `Error`, and the streaming chunk event that
//! feeds the `StreamAccumulator`. Every `ProviderAdapter` translates between
//! this schema and its provider's wire format; nothing above the adapter
//! boundary ever sees a provider-native shape.

mod error;
mod key;
mod message;
mod request;
mod response;
mod stream;

pub use error::{ErrorKind, GatewayError};
pub use key::{Key, ProviderSpecificConfig};
pub use message::{Block, Content, Message, Role, ToolCall, ToolCallFunction};
pub use request::{FallbackTarget, Input, Parameters, Request, RequestType, ToolDefinition, ToolFunctionDef};
pub use response::{Choice, EmbeddingVector, ExtraFields, FinishReason, Output, Response, TranscriptSegment, Usage};
pub use stream::{ChunkEvent, StreamDecodeOutcome, ToolCallDelta};
