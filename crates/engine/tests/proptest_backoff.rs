use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use common::RetryClass;
use engine::fetcher::{backoff_delay, backoff_multiplier, BackoffRanges};

proptest! {
    /// A 429 cool-down is always shorter than a 403 cool-down at the same attempt.
    #[test]
    fn rate_limit_backs_off_less_than_block(attempt in 1u32..20, seed in any::<u64>()) {
        let ranges = BackoffRanges::default();
        let mut rng = StdRng::seed_from_u64(seed);
        let limited = backoff_delay(RetryClass::RateLimited, attempt, &ranges, &mut rng);
        let blocked = backoff_delay(RetryClass::Blocked, attempt, &ranges, &mut rng);
        prop_assert!(limited < blocked);
    }

    #[test]
    fn delay_stays_inside_scaled_window(attempt in 1u32..20, seed in any::<u64>()) {
        let ranges = BackoffRanges::default();
        let mut rng = StdRng::seed_from_u64(seed);
        let delay = backoff_delay(RetryClass::Transient, attempt, &ranges, &mut rng).as_millis() as f64;
        let m = backoff_multiplier(attempt);
        prop_assert!(delay >= (1_000.0 * m).floor());
        prop_assert!(delay <= (3_000.0 * m).ceil());
    }

    #[test]
    fn multiplier_grows_with_attempts(attempt in 1u32..1_000) {
        prop_assert!(backoff_multiplier(attempt + 1) > backoff_multiplier(attempt));
    }
}
