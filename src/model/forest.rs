//! Tree Ensemble Model
//!
//! Bagged CART trees over the 10 tabular features with inverse
//! class-frequency weighting. Class probabilities are the mean of the
//! per-tree leaf distributions; importances are mean decrease in impurity.

use image::RgbImage;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::FeatureVariant;
use crate::model::config::{ClassWeight, ForestConfig};
use crate::model::tree::{DecisionTree, TrainingData, TreeParams, N_CLASSES};
use crate::model::{ensure_trained, Example, FitObserver, FitSummary, ModelKind, Prediction, ScoringModel};
use crate::utils::error::{AuthenticityError, Result};

/// A fitted forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    /// Normalised mean decrease in impurity, indexed like the features
    importances: Vec<f64>,
}

/// Per-sample weights for the configured class weighting
fn sample_weights(labels: &[usize], class_weight: ClassWeight) -> Vec<f64> {
    match class_weight {
        ClassWeight::Uniform => vec![1.0; labels.len()],
        ClassWeight::Balanced => {
            let mut counts = [0usize; N_CLASSES];
            for &l in labels {
                counts[l.min(N_CLASSES - 1)] += 1;
            }
            let n = labels.len() as f64;
            let present = counts.iter().filter(|&&c| c > 0).count() as f64;
            labels
                .iter()
                .map(|&l| {
                    let c = counts[l.min(N_CLASSES - 1)] as f64;
                    n / (present * c)
                })
                .collect()
        }
    }
}

impl RandomForest {
    pub fn fit(rows: &[Vec<f32>], labels: &[usize], config: &ForestConfig) -> Result<Self> {
        let n_features = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || n_features == 0 {
            return Err(AuthenticityError::EmptyDataset(
                "no training rows for the tree ensemble".to_string(),
            ));
        }
        if let Some(bad) = rows.iter().find(|r| r.len() != n_features) {
            return Err(AuthenticityError::schema_mismatch(
                format!("{} features", n_features),
                format!("{} features", bad.len()),
            ));
        }

        let weights = sample_weights(labels, config.class_weight);
        let data = TrainingData {
            rows,
            labels,
            weights: &weights,
            n_features,
        };
        let params = TreeParams {
            max_depth: config.max_depth,
            min_samples_split: config.min_samples_split,
            min_samples_leaf: config.min_samples_leaf,
            max_features: config.max_features.resolve(n_features),
        };

        let n = rows.len();
        let mut trees = Vec::with_capacity(config.n_estimators);
        let mut importances = vec![0.0; n_features];

        for t in 0..config.n_estimators {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(t as u64));
            let sample: Vec<usize> = if config.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };

            let (tree, tree_importances) = DecisionTree::fit(&data, sample, params, &mut rng);
            let total: f64 = tree_importances.iter().sum();
            if total > 0.0 {
                for (acc, v) in importances.iter_mut().zip(&tree_importances) {
                    *acc += v / total;
                }
            }
            debug!(
                "Tree {}/{}: {} nodes, depth {}",
                t + 1,
                config.n_estimators,
                tree.node_count(),
                tree.depth()
            );
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(Self {
            trees,
            n_features,
            importances,
        })
    }

    /// Mean class distribution over all trees, `[counterfeit, authentic]`
    pub fn predict_proba(&self, row: &[f32]) -> [f64; N_CLASSES] {
        let mut acc = [0.0; N_CLASSES];
        for tree in &self.trees {
            let p = tree.predict_proba(row);
            acc[0] += p[0];
            acc[1] += p[1];
        }
        let n = self.trees.len().max(1) as f64;
        [acc[0] / n, acc[1] / n]
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn importances(&self) -> &[f64] {
        &self.importances
    }
}

/// Class-balanced random forest behind [`ScoringModel`]
pub struct TreeEnsembleModel {
    config: ForestConfig,
    forest: Option<RandomForest>,
}

impl TreeEnsembleModel {
    pub fn new(config: ForestConfig) -> Self {
        Self { config, forest: None }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Importances paired with feature names, largest first
    pub fn feature_importance(&self) -> Option<Vec<(String, f64)>> {
        let forest = self.forest.as_ref()?;
        let names = FeatureVariant::Tabular.feature_names();
        let mut ranked: Vec<(String, f64)> = forest
            .importances()
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let name = names.get(i).map(|s| s.to_string()).unwrap_or_else(|| format!("feature_{}", i));
                (name, v)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Some(ranked)
    }

    fn check_input(&self, features: &[f32]) -> Result<()> {
        let expected = FeatureVariant::Tabular.dim();
        if features.len() != expected {
            return Err(AuthenticityError::schema_mismatch(
                format!("{} tabular features", expected),
                format!("{} values", features.len()),
            ));
        }
        Ok(())
    }
}

impl ScoringModel for TreeEnsembleModel {
    fn kind(&self) -> ModelKind {
        ModelKind::TreeEnsemble
    }

    fn is_trained(&self) -> bool {
        self.forest.is_some()
    }

    fn fit(
        &mut self,
        train: &[Example],
        _validation: &[Example],
        _observer: &mut dyn FitObserver,
    ) -> Result<FitSummary> {
        // Refitting never reuses the previous forest
        self.forest = None;

        if train.is_empty() {
            return Err(AuthenticityError::EmptyDataset("training split is empty".to_string()));
        }
        let mut classes: Vec<usize> = train.iter().map(|e| e.label).collect();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(AuthenticityError::ImbalancedDataset {
                classes_present: classes.len(),
            });
        }
        for example in train {
            self.check_input(&example.features)?;
        }

        let rows: Vec<Vec<f32>> = train.iter().map(|e| e.features.clone()).collect();
        let labels: Vec<usize> = train.iter().map(|e| e.label).collect();

        info!(
            "Fitting {} trees (max_depth {}, {} samples)",
            self.config.n_estimators,
            self.config.max_depth,
            rows.len()
        );
        let forest = RandomForest::fit(&rows, &labels, &self.config)?;
        debug!("Forest ready with {} trees", forest.n_trees());
        self.forest = Some(forest);

        Ok(FitSummary {
            feature_importance: self.feature_importance(),
            ..FitSummary::default()
        })
    }

    fn predict(&self, features: &[f32], _image: Option<&RgbImage>) -> Result<Prediction> {
        ensure_trained(self.is_trained(), self.kind())?;
        self.check_input(features)?;
        let forest = self
            .forest
            .as_ref()
            .ok_or_else(|| AuthenticityError::ModelNotTrained("tree ensemble".to_string()))?;

        let proba = forest.predict_proba(features);
        Ok(Prediction::from_authentic_probability(proba[1] as f32, None))
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        ensure_trained(self.is_trained(), self.kind())?;
        Ok(serde_json::to_vec(&self.forest)?)
    }

    fn load_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let forest: Option<RandomForest> = serde_json::from_slice(bytes)?;
        let forest = forest.ok_or_else(|| {
            AuthenticityError::Serialization("tree ensemble parameters are empty".to_string())
        })?;
        if forest.n_features() != FeatureVariant::Tabular.dim() {
            return Err(AuthenticityError::schema_mismatch(
                format!("{} tabular features", FeatureVariant::Tabular.dim()),
                format!("{} features in stored forest", forest.n_features()),
            ));
        }
        self.forest = Some(forest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NoopObserver;

    /// Authentic rows have high scores, counterfeit rows low ones
    fn examples(n_per_class: usize, n_counterfeit: usize) -> Vec<Example> {
        let mut out = Vec::new();
        for i in 0..n_per_class {
            let s = 0.85 + (i % 10) as f32 * 0.01;
            out.push(Example {
                features: vec![s, s, s, s, 1.0, 1.0, 1.0, 1.0, 12.0, 11.0],
                label: 1,
                image: None,
            });
        }
        for i in 0..n_counterfeit {
            let s = 0.30 + (i % 10) as f32 * 0.01;
            out.push(Example {
                features: vec![s, s, s, s, 0.5, 0.5, 0.5, 1.0, 12.0, 11.0],
                label: 0,
                image: None,
            });
        }
        out
    }

    fn small_config() -> ForestConfig {
        ForestConfig {
            n_estimators: 15,
            ..ForestConfig::default()
        }
    }

    #[test]
    fn test_balanced_weights() {
        let w = sample_weights(&[1, 1, 1, 0], ClassWeight::Balanced);
        assert!((w[0] - 4.0 / 6.0).abs() < 1e-12);
        assert!((w[3] - 2.0).abs() < 1e-12);
        let class_totals: f64 = w[..3].iter().sum();
        assert!((class_totals - w[3]).abs() < 1e-12);
    }

    #[test]
    fn test_fit_and_predict() {
        let mut model = TreeEnsembleModel::new(small_config());
        let summary = model.fit(&examples(20, 20), &[], &mut NoopObserver).unwrap();

        let high = model
            .predict(&[0.9, 0.9, 0.9, 0.9, 1.0, 1.0, 1.0, 1.0, 12.0, 11.0], None)
            .unwrap();
        assert!(high.is_authentic());
        assert!(high.confidence >= 0.5);

        let low = model
            .predict(&[0.3, 0.3, 0.3, 0.3, 0.5, 0.5, 0.5, 1.0, 12.0, 11.0], None)
            .unwrap();
        assert!(!low.is_authentic());

        let importance = summary.feature_importance.unwrap();
        assert_eq!(importance.len(), 10);
        let total: f64 = importance.iter().map(|(_, v)| v).sum();
        assert!((total - 1.0).abs() < 1e-9);
        // Constant columns never split
        let angle = importance.iter().find(|(n, _)| n == "Front Angle").unwrap();
        assert_eq!(angle.1, 0.0);
    }

    #[test]
    fn test_imbalanced_training_still_predicts_minority() {
        let mut model = TreeEnsembleModel::new(small_config());
        model.fit(&examples(30, 4), &[], &mut NoopObserver).unwrap();
        let low = model
            .predict(&[0.31, 0.31, 0.31, 0.31, 0.5, 0.5, 0.5, 1.0, 12.0, 11.0], None)
            .unwrap();
        assert!(!low.is_authentic());
    }

    #[test]
    fn test_single_class_is_rejected() {
        let mut model = TreeEnsembleModel::new(small_config());
        let err = model.fit(&examples(10, 0), &[], &mut NoopObserver).unwrap_err();
        assert!(matches!(err, AuthenticityError::ImbalancedDataset { classes_present: 1 }));
        assert!(!model.is_trained());
    }

    #[test]
    fn test_wrong_dimension() {
        let mut model = TreeEnsembleModel::new(small_config());
        model.fit(&examples(10, 10), &[], &mut NoopObserver).unwrap();
        let err = model.predict(&[0.5; 7], None).unwrap_err();
        assert!(matches!(err, AuthenticityError::FeatureSchemaMismatch { .. }));
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut model = TreeEnsembleModel::new(small_config());
        model.fit(&examples(15, 15), &[], &mut NoopObserver).unwrap();
        let bytes = model.to_bytes().unwrap();

        let mut restored = TreeEnsembleModel::new(ForestConfig::default());
        restored.load_bytes(&bytes).unwrap();

        let x = [0.6, 0.55, 0.7, 0.5, 1.0, 0.5, 1.0, 1.0, 12.0, 11.0];
        assert_eq!(model.predict(&x, None).unwrap(), restored.predict(&x, None).unwrap());
    }

    #[test]
    fn test_deterministic_fit() {
        let data = examples(12, 12);
        let mut a = TreeEnsembleModel::new(small_config());
        let mut b = TreeEnsembleModel::new(small_config());
        a.fit(&data, &[], &mut NoopObserver).unwrap();
        b.fit(&data, &[], &mut NoopObserver).unwrap();
        assert_eq!(a.forest, b.forest);
    }

    #[test]
    fn test_corrupt_bytes() {
        let mut model = TreeEnsembleModel::new(small_config());
        assert!(model.load_bytes(b"not a forest").is_err());
        assert!(!model.is_trained());
    }
}
