//! Bounded jittered-geometric retry ladder.
//!
//! The unjittered ladder is `min(base * 2^level, max)`, which is
//! non-decreasing and capped. Jitter subtracts up to a quarter of the
//! delay so synchronized clients spread out without any delay ever
//! exceeding the unjittered value.

use rand::Rng;

use tally_types::config::RetryConfig;

/// Unjittered delay in seconds for a retry level.
pub fn delay(config: &RetryConfig, level: u32) -> u64 {
    let mut delay = config.base_delay_secs;
    for _ in 0..level {
        if delay >= config.max_delay_secs {
            break;
        }
        delay = delay.saturating_mul(2);
    }
    delay.min(config.max_delay_secs)
}

/// Delay with subtractive jitter in the top quarter of the window.
pub fn jittered_delay(config: &RetryConfig, level: u32, rng: &mut impl Rng) -> u64 {
    let base = delay(config, level);
    let jitter_cap = base / 4;
    base - rng.gen_range(0..=jitter_cap)
}

/// Whether the ladder is exhausted at this level.
pub fn exhausted(config: &RetryConfig, level: u32) -> bool {
    level >= config.max_retries
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            base_delay_secs: 60,
            max_delay_secs: 21_600,
            max_retries: 5,
        }
    }

    #[test]
    fn test_delay_monotone_and_capped() {
        let config = config();
        let mut previous = 0;
        for level in 0..20 {
            let d = delay(&config, level);
            assert!(d >= previous, "level {level} regressed");
            assert!(d <= config.max_delay_secs);
            previous = d;
        }
        assert_eq!(delay(&config, 0), 60);
        assert_eq!(delay(&config, 1), 120);
        assert_eq!(delay(&config, 19), 21_600);
    }

    #[test]
    fn test_jitter_stays_in_window() {
        let config = config();
        let mut rng = StdRng::seed_from_u64(7);
        for level in 0..10 {
            let base = delay(&config, level);
            for _ in 0..100 {
                let d = jittered_delay(&config, level, &mut rng);
                assert!(d <= base);
                assert!(d >= base - base / 4);
            }
        }
    }

    #[test]
    fn test_exhaustion_boundary() {
        let config = config();
        assert!(!exhausted(&config, 4));
        assert!(exhausted(&config, 5));
        assert!(exhausted(&config, 6));
    }

    #[test]
    fn test_no_overflow_at_high_levels() {
        let config = RetryConfig {
            base_delay_secs: u64::MAX / 2,
            max_delay_secs: u64::MAX,
            max_retries: 5,
        };
        assert_eq!(delay(&config, 63), u64::MAX);
    }
}
