//! Training-data minibatch selection.

use rand::seq::SliceRandom;

use crate::rng::derive_rng;

/// Chooses the next minibatch of training ids. Holds its own small cursor state,
/// written only by itself.
#[derive(Debug, Clone)]
pub enum BatchSampler {
    /// Consecutive windows of size `m`, wrapping around the id universe.
    SimpleCircular { minibatch_size: usize, cursor: usize },
    /// A fresh deterministic permutation of all ids each epoch, consumed in
    /// consecutive windows of size `m`; a new epoch starts a fresh permutation
    /// whenever the next full window wouldn't fit in the remainder of this one.
    EpochShuffled {
        base_seed: u64,
        minibatch_size: usize,
        epoch: u64,
        permutation: Vec<usize>,
        cursor: usize,
    },
}

impl BatchSampler {
    pub fn simple_circular(minibatch_size: usize) -> Self {
        Self::SimpleCircular {
            minibatch_size: minibatch_size.max(1),
            cursor: 0,
        }
    }

    pub fn epoch_shuffled(base_seed: u64, minibatch_size: usize) -> Self {
        Self::EpochShuffled {
            base_seed,
            minibatch_size: minibatch_size.max(1),
            epoch: 0,
            permutation: Vec::new(),
            cursor: 0,
        }
    }

    /// Returns the next window of positional indices into `universe_len`. Panics if
    /// `universe_len == 0` — an empty training set is a configuration error the
    /// engine should reject before ever constructing a sampler.
    pub fn next_batch_indices(&mut self, universe_len: usize) -> Vec<usize> {
        assert!(universe_len > 0, "batch sampler requires a non-empty id universe");

        match self {
            Self::SimpleCircular {
                minibatch_size,
                cursor,
            } => {
                let m = (*minibatch_size).min(universe_len).max(1);
                let batch: Vec<usize> = (0..m).map(|i| (*cursor + i) % universe_len).collect();
                *cursor = (*cursor + m) % universe_len;
                batch
            }
            Self::EpochShuffled {
                base_seed,
                minibatch_size,
                epoch,
                permutation,
                cursor,
            } => {
                let m = (*minibatch_size).min(universe_len).max(1);

                if permutation.len() != universe_len || *cursor + m > permutation.len() {
                    *permutation = (0..universe_len).collect();
                    let mut rng = derive_rng(*base_seed, &[*epoch]);
                    permutation.shuffle(&mut rng);
                    *cursor = 0;
                    *epoch += 1;
                }

                let batch = permutation[*cursor..*cursor + m].to_vec();
                *cursor += m;
                batch
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_circular_wraps_around() {
        let mut sampler = BatchSampler::simple_circular(2);
        assert_eq!(sampler.next_batch_indices(3), vec![0, 1]);
        assert_eq!(sampler.next_batch_indices(3), vec![2, 0]);
        assert_eq!(sampler.next_batch_indices(3), vec![1, 2]);
    }

    #[test]
    fn epoch_shuffled_covers_full_universe_without_duplicates_per_epoch() {
        let mut sampler = BatchSampler::epoch_shuffled(42, 2);
        let mut first_epoch = Vec::new();
        for _ in 0..3 {
            first_epoch.extend(sampler.next_batch_indices(6));
        }
        first_epoch.sort();
        assert_eq!(first_epoch, vec![0, 1, 2, 3, 4, 5]);

        let mut second_epoch = Vec::new();
        for _ in 0..3 {
            second_epoch.extend(sampler.next_batch_indices(6));
        }
        second_epoch.sort();
        assert_eq!(second_epoch, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn epoch_shuffled_is_deterministic_for_equal_seed_and_minibatch_size() {
        let mut a = BatchSampler::epoch_shuffled(42, 2);
        let mut b = BatchSampler::epoch_shuffled(42, 2);

        for _ in 0..6 {
            assert_eq!(a.next_batch_indices(6), b.next_batch_indices(6));
        }
    }

    #[test]
    fn epoch_shuffled_produces_different_permutation_across_epochs() {
        let mut sampler = BatchSampler::epoch_shuffled(42, 6);
        let epoch1 = sampler.next_batch_indices(6);
        let epoch2 = sampler.next_batch_indices(6);
        assert_ne!(epoch1, epoch2);
    }
}
