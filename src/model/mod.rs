//! Scoring models
//!
//! Two interchangeable backends sit behind [`ScoringModel`]:
//!
//! - [`DeepFusionModel`]: image encoder + engineered-feature encoder, fused
//!   into an authenticity head and a confidence head (Burn)
//! - [`TreeEnsembleModel`]: class-balanced random forest over the 10 tabular
//!   features
//!
//! Models consume features that have already been standardised with the
//! run's [`ScalerState`](crate::dataset::ScalerState); the scaler travels
//! with the model inside the artifact written by [`artifact::ArtifactStore`].

pub mod artifact;
pub mod config;
pub mod deep_fusion;
pub mod forest;
pub mod fusion;
pub mod tree;

use std::fmt;
use std::str::FromStr;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::backend::TrainingBackend;
use crate::dataset::{Authenticity, FeatureVariant};
use crate::utils::error::{AuthenticityError, Result};

pub use config::PipelineConfig;
pub use deep_fusion::DeepFusionModel;
pub use forest::TreeEnsembleModel;

/// Which backend a model or artifact belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    DeepFusion,
    #[default]
    TreeEnsemble,
}

impl ModelKind {
    pub fn feature_variant(&self) -> FeatureVariant {
        match self {
            ModelKind::DeepFusion => FeatureVariant::Fusion,
            ModelKind::TreeEnsemble => FeatureVariant::Tabular,
        }
    }

    /// File stem used for artifacts in the model directory
    pub fn artifact_name(&self) -> &'static str {
        match self {
            ModelKind::DeepFusion => "deep_fusion",
            ModelKind::TreeEnsemble => "tree_ensemble",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::DeepFusion => write!(f, "Deep Fusion"),
            ModelKind::TreeEnsemble => write!(f, "Tree Ensemble"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deep" | "deep_fusion" | "fusion" => Ok(ModelKind::DeepFusion),
            "tree" | "tree_ensemble" | "forest" => Ok(ModelKind::TreeEnsemble),
            other => Err(format!("unknown backend '{}', expected 'tree' or 'deep'", other)),
        }
    }
}

/// Per-class probabilities; they sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub authentic: f32,
    pub counterfeit: f32,
}

/// Output of a single prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: Authenticity,
    /// `max(probabilities)`
    pub confidence: f32,
    pub probabilities: ClassProbabilities,
    /// The fusion model's secondary confidence head, when present. This is
    /// a separate signal and never feeds `confidence`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_confidence: Option<f32>,
}

impl Prediction {
    /// Build from the probability of the authentic class. Ties go to
    /// counterfeit.
    pub fn from_authentic_probability(p_authentic: f32, head_confidence: Option<f32>) -> Self {
        let authentic = p_authentic.clamp(0.0, 1.0);
        let counterfeit = 1.0 - authentic;
        let label = if authentic > counterfeit {
            Authenticity::Authentic
        } else {
            Authenticity::Counterfeit
        };

        Self {
            label,
            confidence: authentic.max(counterfeit),
            probabilities: ClassProbabilities {
                authentic,
                counterfeit,
            },
            head_confidence,
        }
    }

    pub fn is_authentic(&self) -> bool {
        self.label == Authenticity::Authentic
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (confidence {:.1}%, authentic {:.3}, counterfeit {:.3})",
            self.label,
            self.confidence * 100.0,
            self.probabilities.authentic,
            self.probabilities.counterfeit
        )?;
        if let Some(head) = self.head_confidence {
            write!(f, ", head confidence {:.3}", head)?;
        }
        Ok(())
    }
}

/// A scaled training example
#[derive(Debug, Clone)]
pub struct Example {
    /// Standardised feature vector
    pub features: Vec<f32>,
    /// `1` = authentic, `0` = counterfeit
    pub label: usize,
    /// Resized image (fusion variant only)
    pub image: Option<RgbImage>,
}

/// One epoch of the fusion training loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// Mean absolute error of the confidence head on validation
    pub val_confidence_mae: f64,
    pub learning_rate: f64,
}

/// What a `fit` call produced besides the trained parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FitSummary {
    /// Per-epoch history (fusion only)
    pub history: Vec<EpochRecord>,
    /// Epoch whose parameters were kept (1-based)
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
    /// Normalised importances, largest first (tree ensemble only)
    pub feature_importance: Option<Vec<(String, f64)>>,
}

/// Hook for persisting the best-so-far parameters during an epoch loop
pub trait FitObserver {
    /// `params` is what [`ScoringModel::to_bytes`] would return for the
    /// current best state.
    fn on_new_best(&mut self, epoch: usize, val_accuracy: f64, params: &[u8]) -> Result<()>;
}

/// Observer that ignores every event
pub struct NoopObserver;

impl FitObserver for NoopObserver {
    fn on_new_best(&mut self, _epoch: usize, _val_accuracy: f64, _params: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Common contract of both scoring backends.
///
/// `predict` before a successful `fit` or `load_bytes` fails with
/// `ModelNotTrained`. `fit` always starts from freshly initialised
/// parameters, so a model can be refitted without carrying state over.
pub trait ScoringModel: Send {
    fn kind(&self) -> ModelKind;

    fn feature_variant(&self) -> FeatureVariant {
        self.kind().feature_variant()
    }

    fn is_trained(&self) -> bool;

    /// Fit on scaled examples; `validation` drives early stopping where the
    /// backend has an epoch loop.
    fn fit(
        &mut self,
        train: &[Example],
        validation: &[Example],
        observer: &mut dyn FitObserver,
    ) -> Result<FitSummary>;

    /// Score one scaled feature vector. The fusion model also needs the image.
    fn predict(&self, features: &[f32], image: Option<&RgbImage>) -> Result<Prediction>;

    /// Serialize the trained parameters
    fn to_bytes(&self) -> Result<Vec<u8>>;

    /// Replace the parameters with previously serialized ones
    fn load_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Score scaled examples in order
    fn predict_batch(&self, examples: &[Example]) -> Result<Vec<Prediction>> {
        examples
            .iter()
            .map(|e| self.predict(&e.features, e.image.as_ref()))
            .collect()
    }
}

/// Construct an untrained model of the given kind
pub fn build_model(kind: ModelKind, config: &PipelineConfig) -> Box<dyn ScoringModel> {
    match kind {
        ModelKind::TreeEnsemble => Box::new(TreeEnsembleModel::new(config.forest.clone())),
        ModelKind::DeepFusion => Box::new(DeepFusionModel::<TrainingBackend>::new(
            config.fusion.clone(),
            config.training.clone(),
            config.data.image_size,
            crate::backend::default_device(),
        )),
    }
}

/// Fail with `ModelNotTrained` unless `trained`
pub(crate) fn ensure_trained(trained: bool, kind: ModelKind) -> Result<()> {
    if trained {
        Ok(())
    } else {
        Err(AuthenticityError::ModelNotTrained(format!(
            "{} model has not been fitted or loaded",
            kind
        )))
    }
}
