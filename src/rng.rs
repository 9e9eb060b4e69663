//! Seeded randomness.
//!
//! The engine never reads a global random source: callers hand it an
//! already-seeded [`SimRng`]. Seed *policy* (how a seed is derived from a
//! run name, or from a replayed run's name in replay mode) lives here only
//! as a convenience constructor, not as something the engine reaches for on
//! its own.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};

/// Thin wrapper so the rest of the crate depends on `SimRng`, not on a
/// specific RNG algorithm.
pub struct SimRng {
    inner: ChaCha8Rng,
}

impl SimRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Deterministic seed derivation from a run name: seeded with a
    /// deterministic function of the run name, or, in replay mode, of the
    /// replayed run's name.
    pub fn from_run_name(name: &str) -> Self {
        Self::from_seed(seed_from_str(name))
    }

    /// Draw the next exponential inter-arrival gap (ticks) for a Poisson
    /// arrival process with the given rate (events per tick).
    pub fn exponential_gap(&mut self, rate_per_tick: f64) -> u64 {
        debug_assert!(rate_per_tick > 0.0, "arrival rate must be positive");
        let dist = Exp::new(rate_per_tick).expect("rate must be finite and positive");
        dist.sample(&mut self.inner).floor() as u64
    }

    /// Draw an exponential service time (ticks) with the given mean.
    pub fn exponential_service_time(&mut self, mean_ticks: f64) -> u64 {
        debug_assert!(mean_ticks > 0.0, "mean service time must be positive");
        let dist = Exp::new(1.0 / mean_ticks).expect("mean must be finite and positive");
        dist.sample(&mut self.inner).floor() as u64
    }

    /// Draw from the bimodal 9:1 mixture of `short`/`long` service times
    /// (`[500] * 9 + [5500]`).
    pub fn bimodal_service_time(&mut self, short: u64, long: u64) -> u64 {
        if self.inner.gen_range(0..10) < 9 {
            short
        } else {
            long
        }
    }

    /// Pick a uniformly random index in `0..len`.
    pub fn uniform_index(&mut self, len: usize) -> usize {
        self.inner.gen_range(0..len)
    }
}

/// FNV-1a: simple, dependency-free, and stable across Rust versions, unlike
/// `DefaultHasher` (whose algorithm is explicitly unspecified). Determinism
/// across runs of the same seed/config is a property this crate's tests
/// rely on, so the hash used to turn a run name into a seed must not
/// silently change out from under it.
fn seed_from_str(name: &str) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in name.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_run_name_same_seed() {
        assert_eq!(seed_from_str("run-a"), seed_from_str("run-a"));
        assert_ne!(seed_from_str("run-a"), seed_from_str("run-b"));
    }

    #[test]
    fn bimodal_is_mostly_short() {
        let mut rng = SimRng::from_seed(42);
        let mut short_count = 0;
        for _ in 0..10_000 {
            if rng.bimodal_service_time(500, 5500) == 500 {
                short_count += 1;
            }
        }
        // expect close to 90%, allow generous slack for a finite sample
        assert!((8_500..=9_500).contains(&short_count), "{short_count}");
    }

    #[test]
    fn reproducible_sequence() {
        let mut a = SimRng::from_seed(7);
        let mut b = SimRng::from_seed(7);
        for _ in 0..50 {
            assert_eq!(
                a.exponential_service_time(1000.0),
                b.exponential_service_time(1000.0)
            );
        }
    }
}
