//! Exponential backoff with jitter, shared by the exchange adapter's
//! reconnect loop (§4.B) and boundary reconciliation's bounded retries
//! (§4.H) so the two call sites can't drift apart on the formula.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 60_000,
            jitter_fraction: 0.20,
        }
    }
}

impl BackoffPolicy {
    /// `min(base * 2^attempt, cap)` with +/-`jitter_fraction` jitter, per §4.B.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.cap_ms);
        let jitter_span = (capped as f64 * self.jitter_fraction) as i64;
        let jitter = if jitter_span > 0 {
            rand::thread_rng().gen_range(-jitter_span..=jitter_span)
        } else {
            0
        };
        let millis = (capped as i64 + jitter).max(0) as u64;
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_then_caps() {
        let policy = BackoffPolicy::default();
        let d0 = policy.delay_for_attempt(0).as_millis() as i64;
        let d5 = policy.delay_for_attempt(5).as_millis() as i64;
        let d20 = policy.delay_for_attempt(20).as_millis() as i64;

        assert!(d0 <= (policy.base_ms as f64 * 1.2) as i64);
        assert!(d5 > d0);
        // Capped delay should stay within jitter band of the cap.
        let cap = policy.cap_ms as i64;
        let band = (cap as f64 * policy.jitter_fraction) as i64;
        assert!(d20 >= cap - band && d20 <= cap + band);
    }
}
