//! Circuit breaker for provider bans and rate limits.
//!
//! A 403 trips the breaker immediately; repeated 429/5xx trip it after a
//! threshold. While open, a bulk fetch stops and the refresh fails instead
//! of walking the rest of the symbol list into the same wall. Nothing is
//! retried.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { failures: u32 },
    Open { since: Instant },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<State>,
    cooldown: Duration,
    threshold: u32,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration, threshold: u32) -> Self {
        Self {
            state: Mutex::new(State::Closed { failures: 0 }),
            cooldown,
            threshold: threshold.max(1),
        }
    }

    /// 30-minute cooldown, opens after 5 consecutive failures.
    pub fn for_provider() -> Self {
        Self::new(Duration::from_secs(30 * 60), 5)
    }

    /// Whether requests may be sent. An open breaker closes again once the
    /// cooldown has elapsed.
    pub fn is_allowed(&self) -> bool {
        let mut state = self.lock();
        match *state {
            State::Closed { .. } => true,
            State::Open { since } if since.elapsed() >= self.cooldown => {
                *state = State::Closed { failures: 0 };
                true
            }
            State::Open { .. } => false,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if let State::Closed { .. } = *state {
            *state = State::Closed { failures: 0 };
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        if let State::Closed { failures } = *state {
            let failures = failures + 1;
            *state = if failures >= self.threshold {
                State::Open {
                    since: Instant::now(),
                }
            } else {
                State::Closed { failures }
            };
        }
    }

    /// Open immediately (403 / IP ban).
    pub fn trip(&self) {
        *self.lock() = State::Open {
            since: Instant::now(),
        };
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let cb = CircuitBreaker::new(Duration::from_secs(60), 3);
        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_allowed());
        cb.record_failure();
        assert!(!cb.is_allowed());
    }

    #[test]
    fn success_resets_failures() {
        let cb = CircuitBreaker::new(Duration::from_secs(60), 2);
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert!(cb.is_allowed());
    }

    #[test]
    fn trip_then_cooldown() {
        let cb = CircuitBreaker::new(Duration::from_millis(10), 3);
        cb.trip();
        assert!(!cb.is_allowed());
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.is_allowed());
    }
}
