//! Stratified train/validation split, seeded with ChaCha8

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{AuthenticityError, Result};

/// Configuration for dataset splitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of each class that goes to validation
    pub validation_fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(format!(
                "validation_fraction must be in (0, 1), got {}",
                self.validation_fraction
            ));
        }
        Ok(())
    }
}

/// Indices into the sample list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

impl SplitIndices {
    /// Pick the items at the stored indices
    pub fn select<T: Clone>(&self, items: &[T]) -> (Vec<T>, Vec<T>) {
        let pick = |idx: &[usize]| idx.iter().map(|&i| items[i].clone()).collect::<Vec<T>>();
        (pick(&self.train), pick(&self.validation))
    }
}

/// Stratified split of `labels` into train and validation indices.
///
/// Fails with `ImbalancedDataset` when fewer than two classes are present.
/// Classes with at least two samples contribute at least one sample to each
/// side.
pub fn stratified_split(labels: &[usize], config: &SplitConfig) -> Result<SplitIndices> {
    config.validate().map_err(AuthenticityError::Config)?;

    // BTreeMap keeps class iteration order stable across runs
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(idx);
    }

    if by_class.len() < 2 {
        return Err(AuthenticityError::ImbalancedDataset {
            classes_present: by_class.len(),
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut train = Vec::new();
    let mut validation = Vec::new();

    for (_, mut indices) in by_class {
        indices.shuffle(&mut rng);

        let n = indices.len();
        let n_val = if n >= 2 {
            ((n as f64 * config.validation_fraction).round() as usize).clamp(1, n - 1)
        } else {
            0
        };

        validation.extend_from_slice(&indices[..n_val]);
        train.extend_from_slice(&indices[n_val..]);
    }

    // Interleave classes
    train.shuffle(&mut rng);
    validation.shuffle(&mut rng);

    Ok(SplitIndices { train, validation })
}

/// Class counts and ratios for a split, for logging
#[derive(Debug, Clone)]
pub struct SplitStats {
    pub train_size: usize,
    pub validation_size: usize,
    pub train_authentic_fraction: f64,
    pub validation_authentic_fraction: f64,
}

impl SplitStats {
    pub fn compute(split: &SplitIndices, labels: &[usize]) -> Self {
        let fraction = |idx: &[usize]| {
            if idx.is_empty() {
                0.0
            } else {
                idx.iter().filter(|&&i| labels[i] == 1).count() as f64 / idx.len() as f64
            }
        };
        Self {
            train_size: split.train.len(),
            validation_size: split.validation.len(),
            train_authentic_fraction: fraction(&split.train),
            validation_authentic_fraction: fraction(&split.validation),
        }
    }
}

impl std::fmt::Display for SplitStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "train {} ({:.1}% authentic), validation {} ({:.1}% authentic)",
            self.train_size,
            self.train_authentic_fraction * 100.0,
            self.validation_size,
            self.validation_authentic_fraction * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(authentic: usize, counterfeit: usize) -> Vec<usize> {
        let mut l = vec![1; authentic];
        l.extend(vec![0; counterfeit]);
        l
    }

    #[test]
    fn test_split_sizes() {
        let l = labels(60, 40);
        let split = stratified_split(&l, &SplitConfig::default()).unwrap();

        assert_eq!(split.train.len(), 80);
        assert_eq!(split.validation.len(), 20);

        let mut all: Vec<usize> = split.train.iter().chain(&split.validation).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_preserves_ratio() {
        for (a, c) in [(60, 40), (13, 7), (5, 21), (2, 2), (33, 34)] {
            let l = labels(a, c);
            let split = stratified_split(&l, &SplitConfig::default()).unwrap();
            let stats = SplitStats::compute(&split, &l);
            let full = a as f64 / (a + c) as f64;

            assert!((stats.train_authentic_fraction - full).abs() <= 1.0 / stats.train_size as f64);
            assert!(
                (stats.validation_authentic_fraction - full).abs() <= 1.0 / stats.validation_size as f64
            );
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        let l = labels(30, 20);
        let a = stratified_split(&l, &SplitConfig::default()).unwrap();
        let b = stratified_split(&l, &SplitConfig::default()).unwrap();
        assert_eq!(a, b);

        let other = SplitConfig {
            seed: 7,
            ..SplitConfig::default()
        };
        assert_ne!(a, stratified_split(&l, &other).unwrap());
    }

    #[test]
    fn test_single_class_fails() {
        let err = stratified_split(&labels(10, 0), &SplitConfig::default()).unwrap_err();
        assert!(matches!(err, AuthenticityError::ImbalancedDataset { classes_present: 1 }));
    }

    #[test]
    fn test_invalid_fraction() {
        let config = SplitConfig {
            validation_fraction: 1.5,
            ..SplitConfig::default()
        };
        assert!(matches!(
            stratified_split(&labels(5, 5), &config),
            Err(AuthenticityError::Config(_))
        ));
    }

    #[test]
    fn test_select() {
        let split = SplitIndices {
            train: vec![2, 0],
            validation: vec![1],
        };
        let (train, val) = split.select(&["a", "b", "c"]);
        assert_eq!(train, vec!["c", "a"]);
        assert_eq!(val, vec!["b"]);
    }
}
