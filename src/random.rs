//! A `RandomSource` port so jitter and proxy-throttle delays are
//! reproducible in tests.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Source of randomness for jitter, throttling delays and ID suffixes.
/// Injected everywhere the engine would otherwise reach for `rand::thread_rng()`.
pub trait RandomSource: Send + Sync {
    /// A uniformly random duration in `[lo, hi]`. `hi < lo` is treated as `lo`.
    fn duration_in(&self, lo: Duration, hi: Duration) -> Duration;
}

/// The production source: `rand::thread_rng()` per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn duration_in(&self, lo: Duration, hi: Duration) -> Duration {
        if hi <= lo {
            return lo;
        }
        let lo_ms = lo.as_millis() as u64;
        let hi_ms = hi.as_millis() as u64;
        let ms = rand::thread_rng().gen_range(lo_ms..=hi_ms);
        Duration::from_millis(ms)
    }
}

pub fn thread_random() -> Arc<dyn RandomSource> {
    Arc::new(ThreadRandom)
}

/// A source that always returns a fixed duration (clamped into the
/// requested range). Deterministic jitter for scheduler/proxy-pool tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub Duration);

impl RandomSource for FixedRandom {
    fn duration_in(&self, lo: Duration, hi: Duration) -> Duration {
        if hi <= lo {
            return lo;
        }
        self.0.clamp(lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_random_clamps_into_range() {
        let r = FixedRandom(Duration::from_secs(100));
        let got = r.duration_in(Duration::from_secs(3), Duration::from_secs(5));
        assert_eq!(got, Duration::from_secs(5));
    }

    #[test]
    fn thread_random_stays_in_bounds() {
        let r = ThreadRandom;
        for _ in 0..50 {
            let got = r.duration_in(Duration::from_millis(10), Duration::from_millis(20));
            assert!(got >= Duration::from_millis(10) && got <= Duration::from_millis(20));
        }
    }
}
