mod model_unavailable_queue;
mod pool;
mod selector;
mod state;
mod unavailable_queue;

pub use pool::{AcquireError, CredentialPool};
pub use selector::{KeySelectError, KeySelector};
pub use state::{CredentialId, CredentialState, UnavailableReason};

/// A credential is a [`polygate_protocol::Key`]: opaque material plus the
/// model filter and weight the `KeySelector` (C2) needs. The gateway treats
/// every provider's credentials uniformly through this one shape; the
/// provider-specific parts (Azure deployment map, Bedrock ARN, Vertex
/// project/region) live in `Key::provider_specific_config`.
pub type Credential = polygate_protocol::Key;
