//! Randomized trial sequences.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::types::FrameworkEntry;

/// Builds a fresh trial sequence: every framework repeated `repetitions`
/// times, then uniformly shuffled.
///
/// With a seed the order is reproducible, which is handy when debugging a
/// submission against a fixed ordering.
pub fn build_trial_sequence(
    frameworks: &[FrameworkEntry],
    repetitions: usize,
    seed: Option<u64>,
) -> Vec<FrameworkEntry> {
    let mut sequence: Vec<FrameworkEntry> = Vec::with_capacity(frameworks.len() * repetitions);
    for _ in 0..repetitions {
        sequence.extend(frameworks.iter().cloned());
    }

    match seed {
        Some(seed) => sequence.shuffle(&mut ChaCha8Rng::seed_from_u64(seed)),
        None => sequence.shuffle(&mut rand::rng()),
    }

    sequence
}
