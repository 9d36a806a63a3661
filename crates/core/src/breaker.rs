//! Per-device circuit breaker
//!
//! Isolates a faulty device: after enough consecutive probe failures the
//! breaker opens and every device-facing call fails fast without touching
//! the network, until a later probe succeeds again.

use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls are allowed
    Closed,
    /// Calls are blocked until the reset timeout expires
    Open,
    /// One trial probe is allowed to test whether the device recovered
    HalfOpen,
}

/// Tracks consecutive failures for one device and trips after a threshold.
///
/// While open, probes are skipped entirely (no device contact). Once
/// `reset_timeout` has elapsed since the last failure the breaker moves to
/// half-open and admits exactly one trial probe: success closes the
/// circuit, failure re-opens it. Control operations never act as the
/// trial - they fail fast for as long as the breaker is not closed.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Consecutive failures before tripping
    failure_threshold: u32,
    /// Current count of consecutive failures
    failure_count: u32,
    /// Current circuit state
    state: CircuitState,
    /// When the circuit last recorded a failure
    last_failure_time: Option<std::time::Instant>,
    /// Duration after which an open circuit admits a trial probe
    reset_timeout: Duration,
}

impl CircuitBreaker {
    /// Create a breaker with the given failure threshold and a 30s reset timeout
    pub fn new(failure_threshold: u32) -> Self {
        Self::with_timeout(failure_threshold, Duration::from_secs(30))
    }

    /// Create a breaker with custom failure threshold and reset timeout
    pub fn with_timeout(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            failure_count: 0,
            state: CircuitState::Closed,
            last_failure_time: None,
            reset_timeout,
        }
    }

    /// Record a successful probe: resets the failure count and closes the circuit
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.state = CircuitState::Closed;
        self.last_failure_time = None;
    }

    /// Record a failed probe
    ///
    /// - Closed: increments the failure count, trips to open at the threshold
    /// - Half-open: the trial failed, back to open
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(std::time::Instant::now());

        match self.state {
            CircuitState::Closed => {
                if self.failure_count >= self.failure_threshold {
                    self.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
            }
            CircuitState::Open => {
                // Already open, just refresh the failure time
            }
        }
    }

    /// Check whether a probe should be skipped.
    ///
    /// Handles the timed open to half-open transition: when the reset
    /// timeout has elapsed this returns `false` once, admitting the trial.
    pub fn is_open(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => false,
            CircuitState::Open => {
                if let Some(last_failure) = self.last_failure_time {
                    if last_failure.elapsed() >= self.reset_timeout {
                        self.state = CircuitState::HalfOpen;
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Check whether calls are blocked, without admitting a trial.
    ///
    /// Control operations use this: they fail fast until a probe has
    /// actually closed the circuit again.
    pub fn is_open_readonly(&self) -> bool {
        !matches!(self.state, CircuitState::Closed)
    }

    /// Current circuit state
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.failure_count
    }

    /// The configured failure threshold
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_to_open_at_threshold() {
        let mut cb = CircuitBreaker::new(3);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.is_open());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open());
        assert_eq!(cb.consecutive_failures(), 3);
    }

    #[test]
    fn test_success_resets_count_and_closes() {
        let mut cb = CircuitBreaker::new(3);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.consecutive_failures(), 2);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);

        // Needs a fresh run of three failures to trip again
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_to_half_open_after_timeout() {
        let mut cb = CircuitBreaker::with_timeout(2, Duration::from_millis(10));

        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(15));

        // Trial probe admitted
        assert!(!cb.is_open());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_trial_success_closes() {
        let mut cb = CircuitBreaker::with_timeout(2, Duration::from_millis(5));

        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        cb.is_open();

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.is_open());
    }

    #[test]
    fn test_half_open_trial_failure_reopens() {
        let mut cb = CircuitBreaker::with_timeout(2, Duration::from_millis(5));

        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        cb.is_open();

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open());
    }

    #[test]
    fn test_readonly_check_blocks_until_probe_closes() {
        let mut cb = CircuitBreaker::with_timeout(2, Duration::from_millis(5));

        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(10));

        // Reset timeout elapsed, but operations stay blocked until a probe
        // actually closes the circuit
        assert!(cb.is_open_readonly());
        assert!(!cb.is_open());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_open_readonly());

        cb.record_success();
        assert!(!cb.is_open_readonly());
    }
}
