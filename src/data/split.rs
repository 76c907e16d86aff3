//! Seeded train/validation/test partitioning

use crate::error::{KolosalError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Row-index partitions of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSplit {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

impl DataSplit {
    /// Total rows covered by the three partitions
    pub fn len(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shuffle `0..n_samples` with `seed` and cut off the first
/// `ceil(test_size * n_samples)` indices as the test side.
///
/// Returns `(train, test)`.
pub fn train_test_split_indices(
    n_samples: usize,
    test_size: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut indices: Vec<usize> = (0..n_samples).collect();
    let (train, test) = shuffle_split(&mut indices, test_size, seed)?;
    Ok((train.to_vec(), test.to_vec()))
}

fn shuffle_split(indices: &mut [usize], test_size: f64, seed: u64) -> Result<(&[usize], &[usize])> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(KolosalError::InvalidParameter {
            name: "test_size".to_string(),
            value: test_size.to_string(),
            reason: "must be in (0, 1)".to_string(),
        });
    }

    let n = indices.len();
    // Tolerance keeps 0.2 * 10_000 at 2000 rather than 2001.
    let n_test = ((test_size * n as f64) - 1e-9).ceil().max(0.0) as usize;
    let n_train = n.saturating_sub(n_test);

    if n_test == 0 || n_train == 0 {
        return Err(KolosalError::ValidationError(format!(
            "test_size={} on {} samples leaves an empty partition",
            test_size, n
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (test, train) = indices.split_at(n_test);
    Ok((train, test))
}

/// Two-stage split: first carve out the test partition, then split the
/// remainder into train and validation. `validation_size` is relative to the
/// remainder, so `0.20` then `0.25` yields 60/20/20.
pub fn three_way_split(
    n_samples: usize,
    test_size: f64,
    validation_size: f64,
    seed: u64,
) -> Result<DataSplit> {
    let mut indices: Vec<usize> = (0..n_samples).collect();
    let (remainder, test) = shuffle_split(&mut indices, test_size, seed)?;
    let test = test.to_vec();

    let mut remainder = remainder.to_vec();
    let (train, validation) = shuffle_split(&mut remainder, validation_size, seed)?;

    Ok(DataSplit {
        train: train.to_vec(),
        validation: validation.to_vec(),
        test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sizes_for_ten_thousand_rows() {
        let split = three_way_split(10_000, 0.20, 0.25, 12345).unwrap();
        assert_eq!(split.test.len(), 2000);
        assert_eq!(split.validation.len(), 2000);
        assert_eq!(split.train.len(), 6000);
    }

    #[test]
    fn test_partitions_disjoint_and_complete() {
        let split = three_way_split(997, 0.20, 0.25, 7).unwrap();
        let mut seen = HashSet::new();
        for &i in split.train.iter().chain(&split.validation).chain(&split.test) {
            assert!(seen.insert(i), "row {} assigned twice", i);
        }
        assert_eq!(seen.len(), 997);
        assert_eq!(split.len(), 997);
    }

    #[test]
    fn test_reproducible_for_fixed_seed() {
        let a = three_way_split(500, 0.2, 0.25, 12345).unwrap();
        let b = three_way_split(500, 0.2, 0.25, 12345).unwrap();
        assert_eq!(a, b);

        let c = three_way_split(500, 0.2, 0.25, 54321).unwrap();
        assert_ne!(a.test, c.test);
    }

    #[test]
    fn test_invalid_test_size() {
        assert!(train_test_split_indices(100, 0.0, 1).is_err());
        assert!(train_test_split_indices(100, 1.0, 1).is_err());
        assert!(train_test_split_indices(1, 0.5, 1).is_err());
    }
}
