//! Retry delays.

use rand::Rng;
use std::time::Duration;

/// Delay before retry number `attempt + 1`: `min(2^attempt, max)` seconds.
///
/// With `jitter`, up to 10% of the exponential delay is added before the cap
/// is applied, so the result never exceeds `max`.
pub fn retry_delay(attempt: u32, max: Duration, jitter: bool) -> Duration {
    let exponential = Duration::from_secs(2u64.saturating_pow(attempt));
    if !jitter {
        return exponential.min(max);
    }

    let jitter_range = (exponential.as_millis() / 10).min(u128::from(u64::MAX)) as u64;
    let extra = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    exponential
        .saturating_add(Duration::from_millis(extra))
        .min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_until_cap() {
        let cap = Duration::from_secs(30);
        assert_eq!(retry_delay(0, cap, false), Duration::from_secs(1));
        assert_eq!(retry_delay(1, cap, false), Duration::from_secs(2));
        assert_eq!(retry_delay(3, cap, false), Duration::from_secs(8));
        assert_eq!(retry_delay(5, cap, false), cap);
        assert_eq!(retry_delay(64, cap, false), cap);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let cap = Duration::from_secs(30);
        for _ in 0..20 {
            let delay = retry_delay(2, cap, true);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay < Duration::from_millis(4400));
        }
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let cap = Duration::from_secs(30);
        for attempt in [5, 6, 40, 64] {
            for _ in 0..20 {
                assert!(retry_delay(attempt, cap, true) <= cap);
            }
        }
        // 16s plus at most 1.6s of jitter against a 17s cap
        let tight = Duration::from_secs(17);
        for _ in 0..50 {
            let delay = retry_delay(4, tight, true);
            assert!(delay >= Duration::from_secs(16));
            assert!(delay <= tight);
        }
    }
}
