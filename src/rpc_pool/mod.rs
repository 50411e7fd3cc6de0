//! Multi-endpoint RPC access with failover and circuit breaking.
//!
//! Every configured endpoint wraps its own provider and carries a circuit
//! breaker ([`Endpoint`]). The [`EndpointPool`] selects among the currently
//! selectable endpoints by weight order with a round-robin cursor, bounds
//! every call by the endpoint's timeout, records the outcome against the
//! breaker, and fails over transparently until the attempt budget runs out.

mod builder;
mod endpoint;
mod pool;

pub use builder::{
    DEFAULT_ENDPOINT_TIMEOUT, DEFAULT_ENDPOINT_WEIGHT, DEFAULT_MAX_BLOCK_RANGE,
    EndpointPoolBuilder,
};
pub use endpoint::{CircuitBreakerConfig, Endpoint, EndpointConfig, HealthState};
pub use pool::EndpointPool;
