//! Stream-to-response merging: the `StreamAccumulator` (spec §4.7, C7) that
//! folds an ordered sequence of provider-agnostic [`polygate_protocol::ChunkEvent`]s
//! into a single terminal [`polygate_protocol::Response`], plus the registry
//! that keeps one accumulator alive per in-flight streaming request.

pub mod accumulator;

pub use accumulator::{AccumulatorRegistry, AccumulatorState};
