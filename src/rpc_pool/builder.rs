use std::time::Duration;

use alloy::providers::RootProvider;
use tracing::{debug, info};

use crate::{
    error::{IndexerError, IndexerResult},
    rpc_pool::{
        endpoint::{CircuitBreakerConfig, Endpoint, EndpointConfig},
        pool::EndpointPool,
    },
};

/// Default per-call deadline for an endpoint with no explicit timeout.
pub const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default `eth_getLogs` span for an endpoint with no explicit limit; safe
/// for free-tier providers.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 10;
/// Default selection weight.
pub const DEFAULT_ENDPOINT_WEIGHT: u32 = 10;

/// Builder for an [`EndpointPool`].
///
/// Collects endpoint configurations plus a shared circuit-breaker setting,
/// then connects an HTTP provider per endpoint on [`build`](Self::build).
pub struct EndpointPoolBuilder {
    endpoints: Vec<EndpointConfig>,
    breaker: CircuitBreakerConfig,
}

impl EndpointPoolBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { endpoints: Vec::new(), breaker: CircuitBreakerConfig::default() }
    }

    /// Adds one endpoint. Endpoints are weight-sorted by the pool, so the
    /// order of calls here does not matter.
    #[must_use]
    pub fn endpoint(mut self, config: EndpointConfig) -> Self {
        self.endpoints.push(config);
        self
    }

    /// Adds a single default-tuned endpoint from a bare URL; the shape used
    /// when only one RPC URL is configured.
    #[must_use]
    pub fn single_url(self, url: &str) -> Self {
        self.endpoint(EndpointConfig {
            name: "default".to_owned(),
            url: url.to_owned(),
            weight: DEFAULT_ENDPOINT_WEIGHT,
            max_range: DEFAULT_MAX_BLOCK_RANGE,
            timeout: DEFAULT_ENDPOINT_TIMEOUT,
        })
    }

    /// Sets the circuit-breaker parameters shared by every endpoint.
    #[must_use]
    pub fn circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Connects every endpoint and builds the pool.
    ///
    /// # Errors
    ///
    /// [`IndexerError::InvalidConfig`] when no endpoint was added or a URL
    /// does not parse.
    pub fn build(self) -> IndexerResult<EndpointPool> {
        if self.endpoints.is_empty() {
            return Err(IndexerError::InvalidConfig("no rpc endpoints configured".to_owned()));
        }

        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        for config in self.endpoints {
            let url = config.url.parse().map_err(|err| {
                IndexerError::InvalidConfig(format!("endpoint {}: bad url: {err}", config.name))
            })?;
            debug!(
                endpoint = %config.name,
                weight = config.weight,
                max_range = config.max_range,
                "connecting rpc endpoint"
            );
            let provider = RootProvider::new_http(url);
            endpoints.push(Endpoint::new(config, self.breaker, provider));
        }

        info!(endpoints = endpoints.len(), "endpoint pool initialized");
        Ok(EndpointPool::new(endpoints))
    }
}

impl Default for EndpointPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_pool_sorted_by_weight() {
        let pool = EndpointPoolBuilder::new()
            .endpoint(EndpointConfig {
                name: "light".to_owned(),
                url: "http://localhost:8545".to_owned(),
                weight: 1,
                max_range: 50,
                timeout: DEFAULT_ENDPOINT_TIMEOUT,
            })
            .endpoint(EndpointConfig {
                name: "heavy".to_owned(),
                url: "http://localhost:8546".to_owned(),
                weight: 10,
                max_range: 2000,
                timeout: DEFAULT_ENDPOINT_TIMEOUT,
            })
            .build()
            .unwrap();

        let names: Vec<&str> = pool.endpoints().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["heavy", "light"]);
    }

    #[test]
    fn rejects_empty_builder() {
        let err = EndpointPoolBuilder::new().build().unwrap_err();
        assert!(matches!(err, IndexerError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_unparsable_url() {
        let err = EndpointPoolBuilder::new().single_url("not a url").build().unwrap_err();
        assert!(matches!(err, IndexerError::InvalidConfig(_)));
    }
}
