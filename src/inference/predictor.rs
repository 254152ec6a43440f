//! Predictor
//!
//! Scores raw (unscaled) feature vectors. The scaler stored with the model
//! is applied before every prediction, so callers always pass vectors
//! built by [`crate::dataset::extract`] or typed in by hand.
//!
//! A predictor can be built around a model that is already in memory
//! ([`Predictor::from_trained`], [`Predictor::from_artifact`]) or left
//! empty. An empty predictor looks for the artifact at its default path
//! on every [`Predictor::predict`] call until one loads, and fails with
//! `ModelNotTrained` while nothing is there.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::features::load_image;
use crate::dataset::{FeatureVariant, ScalerState};
use crate::model::artifact::{ArtifactManifest, ArtifactStore, LoadedArtifact};
use crate::model::config::PipelineConfig;
use crate::model::{ModelKind, Prediction, ScoringModel};
use crate::utils::error::{AuthenticityError, Result};
use crate::utils::format_probability_bar;

/// A prediction plus how long it took
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub image_path: Option<PathBuf>,
    pub inference_time_ms: f64,
}

impl fmt::Display for PredictionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.prediction;
        if let Some(path) = &self.image_path {
            writeln!(f, "Image:       {}", path.display())?;
        }
        writeln!(f, "Label:       {}", p.label)?;
        writeln!(f, "Confidence:  {:.2}%", p.confidence * 100.0)?;
        writeln!(
            f,
            "Authentic:   {} {:.4}",
            format_probability_bar(p.probabilities.authentic as f64, 20),
            p.probabilities.authentic
        )?;
        writeln!(
            f,
            "Counterfeit: {} {:.4}",
            format_probability_bar(p.probabilities.counterfeit as f64, 20),
            p.probabilities.counterfeit
        )?;
        if let Some(head) = p.head_confidence {
            writeln!(f, "Head conf.:  {:.4}", head)?;
        }
        write!(f, "Time:        {:.2} ms", self.inference_time_ms)
    }
}

struct Loaded {
    model: Box<dyn ScoringModel>,
    scaler: ScalerState,
    manifest: Option<ArtifactManifest>,
}

/// Scores feature vectors for one backend
pub struct Predictor {
    kind: ModelKind,
    config: PipelineConfig,
    default_artifact: PathBuf,
    loaded: Option<Loaded>,
}

impl Predictor {
    /// An empty predictor for `kind`. Its default artifact is
    /// `<model_dir>/<kind>` from `config`.
    pub fn new(kind: ModelKind, config: PipelineConfig) -> Self {
        let default_artifact = config.output.model_dir.join(kind.artifact_name());
        Self {
            kind,
            config,
            default_artifact,
            loaded: None,
        }
    }

    /// Override the path tried when nothing is loaded
    pub fn with_default_artifact(mut self, path: impl AsRef<Path>) -> Self {
        self.default_artifact = ArtifactStore::base_path(path.as_ref());
        self
    }

    /// Wrap a model and scaler straight out of training
    pub fn from_trained(model: Box<dyn ScoringModel>, scaler: ScalerState, config: PipelineConfig) -> Result<Self> {
        let kind = model.kind();
        if scaler.dim() != kind.feature_variant().dim() {
            return Err(AuthenticityError::schema_mismatch(
                kind.feature_variant(),
                format!("scaler over {} features", scaler.dim()),
            ));
        }
        let mut predictor = Self::new(kind, config);
        predictor.loaded = Some(Loaded {
            model,
            scaler,
            manifest: None,
        });
        Ok(predictor)
    }

    /// Wrap an artifact restored by [`ArtifactStore::load`]
    pub fn from_artifact(artifact: LoadedArtifact, config: PipelineConfig) -> Self {
        let mut predictor = Self::new(artifact.manifest.kind, config);
        predictor.loaded = Some(Loaded {
            model: artifact.model,
            scaler: artifact.scaler,
            manifest: Some(artifact.manifest),
        });
        predictor
    }

    /// Load the artifact at `path` (base path or either artifact file).
    /// The artifact must belong to this predictor's backend.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let artifact = ArtifactStore::load(path, Some(self.kind), &self.config)?;
        info!("Loaded {} artifact from {}", self.kind, ArtifactStore::base_path(path).display());
        self.loaded = Some(Loaded {
            model: artifact.model,
            scaler: artifact.scaler,
            manifest: Some(artifact.manifest),
        });
        Ok(())
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn variant(&self) -> FeatureVariant {
        self.kind.feature_variant()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn default_artifact(&self) -> &Path {
        &self.default_artifact
    }

    /// Manifest of the loaded artifact, if it came from disk
    pub fn manifest(&self) -> Option<&ArtifactManifest> {
        self.loaded.as_ref().and_then(|l| l.manifest.as_ref())
    }

    /// Fallback for an empty predictor: try the default artifact.
    /// Load errors (corrupt file, wrong backend) are returned as they are;
    /// a missing artifact becomes `ModelNotTrained` in [`Self::score`].
    fn ensure_loaded(&mut self) -> Result<()> {
        if self.loaded.is_some() {
            return Ok(());
        }

        if !ArtifactStore::exists(&self.default_artifact) {
            debug!("No artifact at {}", self.default_artifact.display());
            return Ok(());
        }
        let path = self.default_artifact.clone();
        self.load(&path)
    }

    /// Score a raw feature vector. Loads the default artifact first if no
    /// model is in memory.
    pub fn predict(&mut self, features: &[f32], image: Option<&RgbImage>) -> Result<Prediction> {
        self.ensure_loaded()?;
        self.score(features, image)
    }

    /// Score with whatever is loaded; never touches the filesystem
    pub fn score(&self, features: &[f32], image: Option<&RgbImage>) -> Result<Prediction> {
        let Some(loaded) = &self.loaded else {
            return Err(AuthenticityError::ModelNotTrained(format!(
                "no {} model in memory and no artifact at {}",
                self.kind,
                self.default_artifact.display()
            )));
        };

        let expected = self.variant().dim();
        if features.len() != expected {
            return Err(AuthenticityError::schema_mismatch(
                self.variant(),
                format!("{} features", features.len()),
            ));
        }

        let scaled = loaded.scaler.transform(features)?;
        loaded.model.predict(&scaled, image)
    }

    /// Score a raw vector, decoding the image at `image_path` when given
    pub fn predict_file(&mut self, features: &[f32], image_path: Option<&Path>) -> Result<PredictionResult> {
        let start = Instant::now();
        let image = image_path
            .map(|path| load_image(path, self.config.data.image_size))
            .transpose()?;
        let prediction = self.predict(features, image.as_ref())?;

        Ok(PredictionResult {
            prediction,
            image_path: image_path.map(Path::to_path_buf),
            inference_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

impl fmt::Debug for Predictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predictor")
            .field("kind", &self.kind)
            .field("default_artifact", &self.default_artifact)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::ForestConfig;
    use crate::model::{Example, NoopObserver, TreeEnsembleModel};

    fn raw_rows() -> Vec<(Vec<f32>, usize)> {
        (0..24)
            .map(|i| {
                let label = i % 2;
                let s = if label == 1 { 0.9 } else { 0.35 } + (i % 4) as f32 * 0.01;
                let c = if label == 1 { 1.0 } else { 0.5 };
                (vec![s, s, s, s, c, c, c, 1.0, 12.0, 11.0], label)
            })
            .collect()
    }

    fn trained() -> (TreeEnsembleModel, ScalerState) {
        let rows = raw_rows();
        let features: Vec<Vec<f32>> = rows.iter().map(|(f, _)| f.clone()).collect();
        let scaler = ScalerState::fit(&features).unwrap();
        let examples: Vec<Example> = rows
            .iter()
            .map(|(f, l)| Example {
                features: scaler.transform(f).unwrap(),
                label: *l,
                image: None,
            })
            .collect();
        let mut model = TreeEnsembleModel::new(ForestConfig {
            n_estimators: 15,
            ..ForestConfig::default()
        });
        model.fit(&examples, &[], &mut NoopObserver).unwrap();
        (model, scaler)
    }

    fn config_in(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.output.model_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_empty_predictor_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut predictor = Predictor::new(ModelKind::TreeEnsemble, config_in(dir.path()));

        let err = predictor.predict(&[0.5; 10], None).unwrap_err();
        assert!(matches!(err, AuthenticityError::ModelNotTrained(_)));
        assert!(!predictor.is_loaded());
    }

    #[test]
    fn test_default_artifact_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let (model, scaler) = trained();
        ArtifactStore::save(&model, &scaler, &dir.path().join("tree_ensemble")).unwrap();

        let mut predictor = Predictor::new(ModelKind::TreeEnsemble, config_in(dir.path()));
        assert!(!predictor.is_loaded());

        let prediction = predictor
            .predict(&[0.92, 0.92, 0.92, 0.92, 1.0, 1.0, 1.0, 1.0, 12.0, 11.0], None)
            .unwrap();
        assert!(predictor.is_loaded());
        assert!(prediction.is_authentic());
        assert!(predictor.manifest().is_some());
    }

    #[test]
    fn test_artifact_saved_after_failed_predict() {
        let dir = tempfile::tempdir().unwrap();
        let mut predictor = Predictor::new(ModelKind::TreeEnsemble, config_in(dir.path()));
        let raw = [0.92, 0.92, 0.92, 0.92, 1.0, 1.0, 1.0, 1.0, 12.0, 11.0];

        let err = predictor.predict(&raw, None).unwrap_err();
        assert!(matches!(err, AuthenticityError::ModelNotTrained(_)));

        let (model, scaler) = trained();
        ArtifactStore::save(&model, &scaler, &dir.path().join("tree_ensemble")).unwrap();

        let prediction = predictor.predict(&raw, None).unwrap();
        assert!(predictor.is_loaded());
        assert!(prediction.is_authentic());
    }

    #[test]
    fn test_explicit_default_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (model, scaler) = trained();
        ArtifactStore::save(&model, &scaler, &dir.path().join("release")).unwrap();

        let mut predictor = Predictor::new(ModelKind::TreeEnsemble, PipelineConfig::default())
            .with_default_artifact(dir.path().join("release.scaler.json"));
        assert_eq!(predictor.default_artifact(), dir.path().join("release"));
        assert!(predictor.predict(&[0.36; 10], None).is_ok());
    }

    #[test]
    fn test_scaler_is_applied() {
        let (model, scaler) = trained();
        let raw = vec![0.36, 0.36, 0.36, 0.36, 0.5, 0.5, 0.5, 1.0, 12.0, 11.0];
        let direct = model.predict(&scaler.transform(&raw).unwrap(), None).unwrap();

        let predictor = Predictor::from_trained(Box::new(model), scaler, PipelineConfig::default()).unwrap();
        let via_predictor = predictor.score(&raw, None).unwrap();
        assert_eq!(direct, via_predictor);
        assert!(!via_predictor.is_authentic());
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let (model, scaler) = trained();
        let predictor = Predictor::from_trained(Box::new(model), scaler, PipelineConfig::default()).unwrap();

        let err = predictor.score(&[0.5; 7], None).unwrap_err();
        assert!(matches!(err, AuthenticityError::FeatureSchemaMismatch { .. }));
    }

    #[test]
    fn test_wrong_backend_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (model, scaler) = trained();
        let base = dir.path().join("tree_ensemble");
        ArtifactStore::save(&model, &scaler, &base).unwrap();

        let mut predictor = Predictor::new(ModelKind::DeepFusion, config_in(dir.path()));
        let err = predictor.load(&base).unwrap_err();
        assert!(matches!(err, AuthenticityError::FeatureSchemaMismatch { .. }));
    }

    #[test]
    fn test_confidence_is_max_probability() {
        let (model, scaler) = trained();
        let predictor = Predictor::from_trained(Box::new(model), scaler, PipelineConfig::default()).unwrap();
        let p = predictor
            .score(&[0.6, 0.6, 0.6, 0.6, 1.0, 0.5, 1.0, 1.0, 12.0, 11.0], None)
            .unwrap();

        let max = p.probabilities.authentic.max(p.probabilities.counterfeit);
        assert_eq!(p.confidence, max);
        assert!((p.probabilities.authentic + p.probabilities.counterfeit - 1.0).abs() < 1e-6);
    }
}
