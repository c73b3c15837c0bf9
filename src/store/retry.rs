//! Retry policy and exponential backoff with jitter

use std::time::Duration;

use rand::Rng;

/// Bounds for the mutation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// CAS rounds before giving up with `ConcurrencyExhausted`
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Extra attempts for a single get/put after a transport failure
    pub transport_retries: u32,
    /// Default deadline for a whole mutation
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(1000),
            transport_retries: 3,
            deadline: None,
        }
    }
}

/// One backoff step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffStep {
    /// Sleep duration in milliseconds, jitter included
    pub sleep_ms: u64,
    /// Base backoff for the following step
    pub next_backoff_ms: u64,
}

/// Exponential backoff with additive jitter.
///
/// Jitter is `jitter_seed mod (current / 2 + 1)`; the base doubles each
/// step and is capped at `max_backoff_ms`.
pub fn compute_backoff_with_jitter(
    current_backoff_ms: u64,
    max_backoff_ms: u64,
    jitter_seed: u64,
) -> BackoffStep {
    let max_jitter = current_backoff_ms / 2 + 1;
    let jitter = jitter_seed % max_jitter;

    BackoffStep {
        sleep_ms: current_backoff_ms.saturating_add(jitter),
        next_backoff_ms: current_backoff_ms.saturating_mul(2).min(max_backoff_ms),
    }
}

/// Backoff state for one retry sequence
#[derive(Debug)]
pub(crate) struct Backoff {
    current_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub(crate) fn new(policy: &RetryPolicy) -> Self {
        Self {
            current_ms: policy.initial_backoff.as_millis() as u64,
            max_ms: policy.max_backoff.as_millis() as u64,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let seed: u64 = rand::thread_rng().gen();
        let step = compute_backoff_with_jitter(self.current_ms, self.max_ms, seed);
        self.current_ms = step.next_backoff_ms;
        Duration::from_millis(step.sleep_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let step = compute_backoff_with_jitter(100, 1000, 0);
        assert_eq!(step.sleep_ms, 100);
        assert_eq!(step.next_backoff_ms, 200);

        let step = compute_backoff_with_jitter(800, 1000, 0);
        assert_eq!(step.next_backoff_ms, 1000);

        let step = compute_backoff_with_jitter(1000, 1000, 0);
        assert_eq!(step.next_backoff_ms, 1000);
    }

    #[test]
    fn test_jitter_bounded() {
        for seed in [0, 1, 7, 50, 51, u64::MAX] {
            let step = compute_backoff_with_jitter(100, 1000, seed);
            assert!(step.sleep_ms >= 100 && step.sleep_ms <= 150, "{:?}", step);
        }
        assert_eq!(compute_backoff_with_jitter(100, 1000, 25).sleep_ms, 125);
    }

    #[test]
    fn test_zero_backoff() {
        let step = compute_backoff_with_jitter(0, 0, 12345);
        assert_eq!(step, BackoffStep { sleep_ms: 0, next_backoff_ms: 0 });
    }

    #[test]
    fn test_backoff_sequence_grows() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            ..Default::default()
        };
        let mut backoff = Backoff::new(&policy);
        let delays: Vec<Duration> = (0..4).map(|_| backoff.next_delay()).collect();
        assert!(delays[0] >= Duration::from_millis(10) && delays[0] <= Duration::from_millis(15));
        assert!(delays[1] >= Duration::from_millis(20));
        assert!(delays[3] >= Duration::from_millis(40) && delays[3] <= Duration::from_millis(60));
    }
}
