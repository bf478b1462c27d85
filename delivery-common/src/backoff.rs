//! Pure retry-schedule math. No wall-clock state, no I/O — kept
//! deliberately tiny so the processor and its tests agree on schedule
//! arithmetic.

use std::time::Duration;

/// The base delay, in milliseconds, for the first retry.
pub const BASE_DELAY_MS: i64 = 1000;

/// A job in MAIN may be attempted at most this many times before it is
/// dead-lettered.
pub const MAX_ATTEMPTS: i32 = 5;

/// Delay, in milliseconds, before attempt `n` (n >= 1): `BASE * 2^(n-1)`.
///
/// `n = 0` returns `BASE / 2`. Negative `n` clamps by treating `-k` as
/// `BASE / 2^(k+1)`, so the delay never goes negative.
pub fn delay_ms(n: i64) -> i64 {
    if n > 0 {
        let exponent = (n - 1).min(62) as u32;
        BASE_DELAY_MS.saturating_mul(1i64 << exponent)
    } else {
        let shift = (1 - n).min(62) as u32;
        (BASE_DELAY_MS >> shift).max(0)
    }
}

/// `delay_ms` wrapped as a `std::time::Duration` for callers that hand it
/// straight to the job store or a scheduler.
pub fn delay(n: i64) -> Duration {
    Duration::from_millis(delay_ms(n).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_documented_contract() {
        assert_eq!(delay_ms(1), 1000);
        assert_eq!(delay_ms(2), 2000);
        assert_eq!(delay_ms(3), 4000);
        assert_eq!(delay_ms(4), 8000);
        assert_eq!(delay_ms(5), 16000);
    }

    #[test]
    fn zero_returns_half_base() {
        assert_eq!(delay_ms(0), 500);
    }

    #[test]
    fn negative_attempts_never_panic_and_stay_non_negative() {
        for n in -10..=0 {
            assert!(delay_ms(n) >= 0, "delay_ms({n}) went negative");
        }
    }

    #[test]
    fn dead_letter_wall_clock_sums_to_thirty_seconds() {
        let total: i64 = (2..=MAX_ATTEMPTS as i64).map(delay_ms).sum();
        assert_eq!(total, 30_000);
    }
}
