//! Exponential backoff with full jitter:
//! `min(backoff_max, backoff_base * 2^(attempt-1)) + uniform(0, delay/2)`.

use std::time::Duration;

use rand::Rng;

pub fn compute_backoff(attempt: u32, backoff_base: Duration, backoff_max: Duration) -> Duration {
    let pow = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    let exp_nanos = (backoff_base.as_nanos()).saturating_mul(pow as u128);
    let capped_nanos = exp_nanos.min(backoff_max.as_nanos());
    let capped = Duration::from_nanos(capped_nanos.min(u64::MAX as u128) as u64);

    let jitter_max_nanos = capped.as_nanos() / 2;
    if jitter_max_nanos == 0 {
        return capped;
    }
    let jitter_nanos = rand::thread_rng().gen_range(0..=jitter_max_nanos.min(u64::MAX as u128) as u64);
    capped + Duration::from_nanos(jitter_nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_base_plus_jitter() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(10);
        for _ in 0..50 {
            let d = compute_backoff(1, base, max);
            assert!(d >= base);
            assert!(d <= base + base / 2);
        }
    }

    #[test]
    fn grows_exponentially_until_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        let d = compute_backoff(10, base, max);
        assert!(d >= max);
        assert!(d <= max + max / 2);
    }

    #[test]
    fn zero_base_has_no_jitter() {
        let d = compute_backoff(3, Duration::ZERO, Duration::from_secs(1));
        assert_eq!(d, Duration::ZERO);
    }
}
