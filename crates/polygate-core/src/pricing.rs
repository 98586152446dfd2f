//! The pricing collaborator (spec §6: `PricingCatalog.Cost(response) →
//! float64`). Pricing datasheets are explicitly out of scope (spec §1); the
//! core only ever calls this one method on whatever catalog the hosting
//! process wires in.

use polygate_protocol::Response;

/// Computes a USD cost for a completed response. Implementations typically
/// look up per-token or per-character rates for `response.model` and apply
/// them to `response.usage`; the core has no opinion on the rate table.
pub trait PricingCatalog: Send + Sync {
    fn cost(&self, response: &Response) -> f64;
}

/// Used when no pricing catalog is configured: every response costs 0.0,
/// and `LoggerPlugin` records `cost: null` rather than a misleading number.
pub struct NoopPricingCatalog;

impl PricingCatalog for NoopPricingCatalog {
    fn cost(&self, _response: &Response) -> f64 {
        0.0
    }
}
