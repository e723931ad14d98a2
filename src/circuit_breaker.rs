use failsafe::{backoff, failure_policy, Config};
use std::time::Duration;

/// Concrete breaker type held by the geocoder.
pub type GeocoderCircuitBreaker =
    failsafe::StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Consecutive failures before the geocoder breaker opens.
pub const GEOCODER_FAILURE_THRESHOLD: u32 = 5;

/// Creates a circuit breaker for geocoding calls.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 30s to 5m before a trial call is let through.
///
/// While OPEN, `is_call_permitted()` is false and the geocoder returns no coordinates
/// without touching the network.
pub fn create_geocoder_circuit_breaker() -> GeocoderCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(30), // Initial delay
        Duration::from_secs(300), // Maximum delay
    );

    let failure_policy =
        failure_policy::consecutive_failures(GEOCODER_FAILURE_THRESHOLD, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
