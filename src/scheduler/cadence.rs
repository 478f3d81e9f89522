//! Priority-to-interval cadence table and jitter (spec §4.5).

use crate::domain::account::Priority;
use crate::random::RandomSource;
use std::time::Duration;

/// Base interval for a priority level. Unknown priority falls back to
/// priority 1's interval; `Priority`'s constructor already rejects anything
/// outside 1..=5, so this match only needs the defined cases plus a
/// catch-all for the fallback the spec names explicitly.
pub fn base_interval(priority: Priority) -> Duration {
    match priority.get() {
        5 => Duration::from_secs(60 * 60),
        4 => Duration::from_secs(3 * 60 * 60),
        3 => Duration::from_secs(12 * 60 * 60),
        2 => Duration::from_secs(24 * 60 * 60),
        _ => Duration::from_secs(72 * 60 * 60),
    }
}

/// Apply `±pct` jitter to `base` via `random`.
pub fn jitter(base: Duration, pct: f64, random: &dyn RandomSource) -> Duration {
    let base_ms = base.as_millis() as u64;
    let delta_ms = (base_ms as f64 * pct) as u64;
    let lo = Duration::from_millis(base_ms.saturating_sub(delta_ms));
    let hi = Duration::from_millis(base_ms.saturating_add(delta_ms));
    random.duration_in(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::FixedRandom;

    #[test]
    fn maps_each_defined_priority_to_its_interval() {
        assert_eq!(base_interval(Priority::new(5).unwrap()), Duration::from_secs(3600));
        assert_eq!(base_interval(Priority::new(4).unwrap()), Duration::from_secs(3 * 3600));
        assert_eq!(base_interval(Priority::new(3).unwrap()), Duration::from_secs(12 * 3600));
        assert_eq!(base_interval(Priority::new(2).unwrap()), Duration::from_secs(24 * 3600));
        assert_eq!(base_interval(Priority::new(1).unwrap()), Duration::from_secs(72 * 3600));
    }

    #[test]
    fn jitter_stays_within_the_requested_band() {
        let base = Duration::from_secs(1000);
        let random = FixedRandom(Duration::from_secs(1100));
        let got = jitter(base, 0.1, &random);
        assert_eq!(got, Duration::from_secs(1100));
    }
}
