//! The request execution pipeline (spec §2 C2-C6, C9): key selection, retry,
//! the plugin chain, the bounded worker pool, the fallback coordinator and
//! the public `Orchestrator` façade that ties them together. Everything a
//! hosting binary needs to run the gateway is assembled by [`bootstrap`].

pub mod bootstrap;
pub mod context;
pub mod fallback;
pub mod logger_plugin;
pub mod orchestrator;
pub mod plugin;
pub mod pool;
pub mod pricing;
pub mod retry;
pub mod upstream_client;

pub use context::RequestContext;
pub use fallback::{EstablishedStream, FallbackCoordinator};
pub use logger_plugin::LoggerPlugin;
pub use orchestrator::{ChatStream, Orchestrator, StreamEvent};
pub use plugin::{Plugin, PluginChain, PreChainResult, PreHookOutcome};
pub use pool::{PoolRegistry, SubmissionPolicy, WorkerPool, WorkerPoolConfig};
pub use pricing::{NoopPricingCatalog, PricingCatalog};
pub use retry::{RetryEngine, RetryPolicy};
