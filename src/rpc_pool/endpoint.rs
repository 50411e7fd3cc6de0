use std::{
    sync::RwLock,
    time::{Duration, Instant},
};

use alloy::providers::RootProvider;
use tracing::{info, warn};

/// Static settings for one RPC endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    /// Selection priority; the pool sorts endpoints by descending weight.
    pub weight: u32,
    /// Maximum block span this RPC accepts for `eth_getLogs`.
    pub max_range: u64,
    /// Per-call deadline for requests against this endpoint.
    pub timeout: Duration,
}

/// Circuit-breaker tuning shared by every endpoint in a pool.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip a Healthy endpoint to Unhealthy.
    pub failure_threshold: u32,
    /// Consecutive successes that promote a Probing endpoint to Healthy.
    pub success_threshold: u32,
    /// Time an endpoint sits Unhealthy before it may be probed again.
    pub probe_after: Duration,
    /// Budget of probe calls admitted while Probing.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            probe_after: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

/// Health of an endpoint as seen by the selection logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
    /// Recovering: a limited number of live calls are let through to decide
    /// between Healthy and Unhealthy.
    Probing,
}

#[derive(Debug)]
struct Breaker {
    state: HealthState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_calls: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
}

/// One RPC endpoint: its provider, its limits, and its circuit breaker.
///
/// Breaker state is mutated under an exclusive lock; selectability reads
/// take the shared lock. `record_success` and `record_failure` are
/// linearizable with respect to state reads.
pub struct Endpoint {
    config: EndpointConfig,
    breaker_config: CircuitBreakerConfig,
    provider: RootProvider,
    breaker: RwLock<Breaker>,
}

impl Endpoint {
    #[must_use]
    pub fn new(
        config: EndpointConfig,
        breaker_config: CircuitBreakerConfig,
        provider: RootProvider,
    ) -> Self {
        Self {
            config,
            breaker_config,
            provider,
            breaker: RwLock::new(Breaker {
                state: HealthState::Healthy,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_calls: 0,
                last_failure: None,
                last_success: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn weight(&self) -> u32 {
        self.config.weight
    }

    pub fn max_range(&self) -> u64 {
        self.config.max_range
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Clone of the underlying provider, for issuing one call.
    pub(crate) fn provider(&self) -> RootProvider {
        self.provider.clone()
    }

    /// Whether the pool may route a call here: true in Healthy and Probing.
    ///
    /// An Unhealthy endpoint whose `probe_after` window has elapsed since its
    /// last failure moves to Probing as a side effect of this check.
    pub fn is_selectable(&self) -> bool {
        {
            let breaker = self.breaker.read().expect("endpoint lock poisoned");
            match breaker.state {
                HealthState::Healthy | HealthState::Probing => return true,
                HealthState::Unhealthy => {
                    if !self.probe_due(&breaker) {
                        return false;
                    }
                }
            }
        }

        let mut breaker = self.breaker.write().expect("endpoint lock poisoned");
        if breaker.state == HealthState::Unhealthy && self.probe_due(&breaker) {
            breaker.state = HealthState::Probing;
            breaker.half_open_calls = 0;
            breaker.consecutive_successes = 0;
            info!(
                endpoint = self.name(),
                half_open_max_calls = self.breaker_config.half_open_max_calls,
                "endpoint entering probing state"
            );
        }
        matches!(breaker.state, HealthState::Healthy | HealthState::Probing)
    }

    fn probe_due(&self, breaker: &Breaker) -> bool {
        breaker.last_failure.is_none_or(|at| at.elapsed() >= self.breaker_config.probe_after)
    }

    /// Marks one successful call and applies breaker transitions.
    pub fn record_success(&self) {
        let mut breaker = self.breaker.write().expect("endpoint lock poisoned");
        breaker.last_success = Some(Instant::now());
        breaker.consecutive_successes += 1;
        breaker.consecutive_failures = 0;

        match breaker.state {
            HealthState::Probing => {
                breaker.half_open_calls += 1;
                if breaker.consecutive_successes >= self.breaker_config.success_threshold {
                    breaker.state = HealthState::Healthy;
                    breaker.half_open_calls = 0;
                    breaker.consecutive_successes = 0;
                    info!(endpoint = self.name(), "endpoint recovered");
                }
            }
            // A success while formally Unhealthy (race with a probe window)
            // moves the endpoint into Probing rather than straight to Healthy.
            HealthState::Unhealthy => breaker.state = HealthState::Probing,
            HealthState::Healthy => {}
        }
    }

    /// Marks one failed call and applies breaker transitions.
    pub fn record_failure(&self) {
        let mut breaker = self.breaker.write().expect("endpoint lock poisoned");
        breaker.last_failure = Some(Instant::now());
        breaker.consecutive_failures += 1;
        breaker.consecutive_successes = 0;

        match breaker.state {
            HealthState::Probing => {
                breaker.state = HealthState::Unhealthy;
                breaker.half_open_calls = 0;
                warn!(endpoint = self.name(), "probe failed, endpoint unhealthy again");
            }
            HealthState::Healthy => {
                if breaker.consecutive_failures >= self.breaker_config.failure_threshold {
                    breaker.state = HealthState::Unhealthy;
                    warn!(
                        endpoint = self.name(),
                        failures = breaker.consecutive_failures,
                        "failure threshold reached, endpoint unhealthy"
                    );
                }
            }
            HealthState::Unhealthy => {}
        }
    }

    pub fn health(&self) -> HealthState {
        self.breaker.read().expect("endpoint lock poisoned").state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.breaker.read().expect("endpoint lock poisoned").consecutive_failures
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.breaker.read().expect("endpoint lock poisoned").last_success
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.breaker.read().expect("endpoint lock poisoned").last_failure
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.config.name)
            .field("weight", &self.config.weight)
            .field("max_range", &self.config.max_range)
            .field("health", &self.health())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::mocked_endpoint;
    use alloy::providers::mock::Asserter;

    fn endpoint(failure_threshold: u32, success_threshold: u32, probe_after: Duration) -> Endpoint {
        let breaker = CircuitBreakerConfig {
            failure_threshold,
            success_threshold,
            probe_after,
            half_open_max_calls: 3,
        };
        mocked_endpoint("test", 10, 100, breaker, &Asserter::new())
    }

    #[test]
    fn trips_after_consecutive_failures() {
        let endpoint = endpoint(3, 1, Duration::from_secs(60));

        endpoint.record_failure();
        endpoint.record_failure();
        assert_eq!(endpoint.health(), HealthState::Healthy);
        assert!(endpoint.is_selectable());

        endpoint.record_failure();
        assert_eq!(endpoint.health(), HealthState::Unhealthy);
        assert!(!endpoint.is_selectable());
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let endpoint = endpoint(3, 1, Duration::from_secs(60));

        endpoint.record_failure();
        endpoint.record_failure();
        endpoint.record_success();
        endpoint.record_failure();
        endpoint.record_failure();
        assert_eq!(endpoint.health(), HealthState::Healthy);
    }

    #[test]
    fn probes_after_cooldown_and_recovers_on_success() {
        let endpoint = endpoint(3, 1, Duration::from_millis(30));

        for _ in 0..3 {
            endpoint.record_failure();
        }
        assert!(!endpoint.is_selectable());

        std::thread::sleep(Duration::from_millis(50));
        assert!(endpoint.is_selectable());
        assert_eq!(endpoint.health(), HealthState::Probing);

        endpoint.record_success();
        assert_eq!(endpoint.health(), HealthState::Healthy);
    }

    #[test]
    fn any_probe_failure_reopens_the_breaker() {
        let endpoint = endpoint(1, 2, Duration::from_millis(10));

        endpoint.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(endpoint.is_selectable());

        endpoint.record_success();
        assert_eq!(endpoint.health(), HealthState::Probing, "one success of two required");

        endpoint.record_failure();
        assert_eq!(endpoint.health(), HealthState::Unhealthy);
        assert!(!endpoint.is_selectable());
    }
}
