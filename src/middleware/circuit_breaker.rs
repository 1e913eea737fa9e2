// Circuit breaker guarding the remote pipeline service.
//
// The service runs long jobs on the same host as the caller; hammering it
// with requests while it is down only delays recovery. Closed passes
// requests through, Open fails fast, HalfOpen lets probes through after a
// cooldown.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive transport failures before opening.
    pub failure_threshold: usize,
    /// How long to stay open before probing.
    pub cooldown: Duration,
    /// Consecutive probe successes needed to close again.
    pub success_threshold: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<Mutex<Inner>>,
    config: BreakerConfig,
}

struct Inner {
    state: BreakerState,
    failures: usize,
    probe_successes: usize,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                probe_successes: 0,
                opened_at: None,
            })),
            config,
        }
    }

    /// Whether the next request may be issued. Transitions Open -> HalfOpen
    /// when the cooldown has elapsed.
    pub fn allow(&self) -> bool {
        let mut inner = self.state.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.state.lock();
        inner.failures = 0;
        if inner.state == BreakerState::HalfOpen {
            inner.probe_successes += 1;
            if inner.probe_successes >= self.config.success_threshold {
                inner.state = BreakerState::Closed;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.state.lock();
        inner.probe_successes = 0;
        match inner.state {
            BreakerState::HalfOpen => {
                // Probe failed; back to open for another cooldown.
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.failures += 1;
            }
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    warn!(failures = inner.failures, "circuit opened for remote service");
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {
                inner.failures += 1;
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state.lock().state
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
