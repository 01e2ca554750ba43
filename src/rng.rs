//! Deterministic, explicitly-threaded RNG derivation.
//!
//! Every randomized step derives its seed from a base seed plus a use-specific salt
//! (iteration index, epoch number, attempt number) rather than reading from a shared
//! global generator, so two runs with the same base seed and adapter/LM responses
//! produce identical states.

use rand::SeedableRng;
use rand::rngs::StdRng;

/// Combines a base seed with one or more salts using `SplitMix64`-style mixing, then
/// seeds a fresh [`StdRng`] from the result.
///
/// Using distinct salts per call site (epoch number, attempt number, ...) means two
/// randomized decisions in the same run never share a sub-stream by accident, while
/// staying fully reproducible from `(base_seed, salts)` alone.
pub fn derive_rng(base_seed: u64, salts: &[u64]) -> StdRng {
    let mut mixed = base_seed;
    for &salt in salts {
        mixed = splitmix64(mixed ^ salt.wrapping_mul(0x9E3779B97F4A7C15));
    }
    StdRng::seed_from_u64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
