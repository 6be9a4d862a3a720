//! Refresh delay sampling.

use crate::scheduler::settings::{IntervalSettings, MIN_INTERVAL_SECS};
use rand::Rng;

/// Sample the next refresh delay in whole seconds.
///
/// The base is drawn uniformly from `[min_seconds, max_seconds]`. With a
/// non-zero `jitter_percent`, a perturbation drawn uniformly from
/// `±base * jitter_percent / 100` is added. The sum is rounded and floored
/// at [`MIN_INTERVAL_SECS`].
pub fn sample_delay_secs<R: Rng + ?Sized>(
    rng: &mut R,
    min_seconds: u32,
    max_seconds: u32,
    jitter_percent: u32,
) -> u32 {
    let low = f64::from(min_seconds.min(max_seconds));
    let high = f64::from(min_seconds.max(max_seconds));
    let base = if high > low {
        rng.gen_range(low..=high)
    } else {
        low
    };

    let amplitude = base * f64::from(jitter_percent) / 100.0;
    let jitter = if amplitude > 0.0 {
        rng.gen_range(-amplitude..=amplitude)
    } else {
        0.0
    };

    let rounded = (base + jitter).round();
    if rounded <= f64::from(MIN_INTERVAL_SECS) {
        MIN_INTERVAL_SECS
    } else if rounded >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        // In range (3, u32::MAX) after the checks above.
        rounded as u32
    }
}

/// Sample a delay for validated settings.
pub fn sample_for<R: Rng + ?Sized>(rng: &mut R, settings: IntervalSettings) -> u32 {
    sample_delay_secs(
        rng,
        settings.min_seconds,
        settings.max_seconds,
        settings.jitter_percent,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn no_jitter_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        for (min, max) in [(3, 3), (3, 10), (10, 10), (300, 700), (5, 6)] {
            for _ in 0..500 {
                let d = sample_delay_secs(&mut rng, min, max, 0);
                assert!((min..=max).contains(&d), "{d} outside [{min}, {max}]");
            }
        }
    }

    #[test]
    fn fixed_interval_without_jitter_is_exact() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..50 {
            assert_eq!(sample_delay_secs(&mut rng, 10, 10, 0), 10);
        }
    }

    #[test]
    fn never_below_floor_with_heavy_jitter() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..2_000 {
            assert!(sample_delay_secs(&mut rng, 3, 3, 80) >= 3);
            assert!(sample_delay_secs(&mut rng, 3, 5, 80) >= 3);
        }
    }

    #[test]
    fn jitter_bounded_by_percentage_of_base() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..1_000 {
            let d = sample_delay_secs(&mut rng, 100, 100, 10);
            assert!((90..=110).contains(&d), "{d} outside jitter band");
        }
    }

    #[test]
    fn jitter_actually_perturbs() {
        let mut rng = StdRng::seed_from_u64(5);
        let distinct: std::collections::BTreeSet<u32> = (0..200)
            .map(|_| sample_delay_secs(&mut rng, 100, 100, 50))
            .collect();
        assert!(distinct.len() > 10);
    }

    #[test]
    fn seeded_sources_are_reproducible() {
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        let left: Vec<u32> = (0..20).map(|_| sample_delay_secs(&mut a, 3, 900, 40)).collect();
        let right: Vec<u32> = (0..20).map(|_| sample_delay_secs(&mut b, 3, 900, 40)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn inverted_bounds_are_tolerated() {
        let mut rng = StdRng::seed_from_u64(6);
        let d = sample_delay_secs(&mut rng, 20, 10, 0);
        assert!((10..=20).contains(&d));
    }
}
