//! Randomized exponential backoff.

use kvop_constants::retry::RETRY_MULTIPLIER_PERCENT;
use kvop_constants::retry::RETRY_RANDOMIZATION_PERCENT;

/// Result of one backoff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffStep {
    /// Sleep duration in milliseconds, randomized around the current interval.
    pub sleep_ms: u64,
    /// Interval for the next step.
    pub next_interval_ms: u64,
}

/// Compute one step of exponential backoff with +/-20% randomization.
///
/// `jitter_seed` is any random value, it is reduced modulo the jitter window.
/// The next interval grows by 1.5x, rounded up so that any non-zero interval
/// grows, and is capped at `max_interval_ms`.
///
/// # Example
///
/// ```
/// use kvop_op::verified::compute_backoff_step;
///
/// let step = compute_backoff_step(100, 1000, 20);
/// assert_eq!(step.sleep_ms, 100); // 80 + 20
/// assert_eq!(step.next_interval_ms, 150);
/// ```
///
/// # Tiger Style
///
/// - Saturating arithmetic, no overflow panics
/// - Sleep never exceeds 120% of the current interval
pub fn compute_backoff_step(current_interval_ms: u64, max_interval_ms: u64, jitter_seed: u64) -> BackoffStep {
    let delta = current_interval_ms.saturating_mul(RETRY_RANDOMIZATION_PERCENT) / 100;
    let window = delta.saturating_mul(2).saturating_add(1);
    let sleep_ms = current_interval_ms.saturating_sub(delta).saturating_add(jitter_seed % window);

    let grown = current_interval_ms.saturating_mul(RETRY_MULTIPLIER_PERCENT).saturating_add(99) / 100;
    BackoffStep {
        sleep_ms,
        next_interval_ms: grown.min(max_interval_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_bounds() {
        let low = compute_backoff_step(100, 1000, 0);
        assert_eq!(low.sleep_ms, 80);
        let high = compute_backoff_step(100, 1000, 40);
        assert_eq!(high.sleep_ms, 120);
        // 41 % 41 wraps to the low end
        assert_eq!(compute_backoff_step(100, 1000, 41).sleep_ms, 80);
    }

    #[test]
    fn test_backoff_growth_capped() {
        assert_eq!(compute_backoff_step(20, 1000, 0).next_interval_ms, 30);
        assert_eq!(compute_backoff_step(800, 1000, 0).next_interval_ms, 1000);
        assert_eq!(compute_backoff_step(1000, 1000, 0).next_interval_ms, 1000);
    }

    #[test]
    fn test_backoff_small_interval_grows() {
        assert_eq!(compute_backoff_step(1, 1000, 0).next_interval_ms, 2);
        assert_eq!(compute_backoff_step(2, 1000, 0).next_interval_ms, 3);
        assert_eq!(compute_backoff_step(3, 1000, 0).next_interval_ms, 5);
    }

    #[test]
    fn test_backoff_zero_interval() {
        let step = compute_backoff_step(0, 1000, 12345);
        assert_eq!(step.sleep_ms, 0);
        assert_eq!(step.next_interval_ms, 0);
    }

    #[test]
    fn test_backoff_overflow_safety() {
        let step = compute_backoff_step(u64::MAX, u64::MAX, u64::MAX);
        assert!(step.sleep_ms > 0);
        assert!(step.next_interval_ms > 0);
    }
}
