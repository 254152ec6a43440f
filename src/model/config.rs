//! Pipeline Configuration
//!
//! Serde structs with defaults for every stage of a training run. A run can
//! be configured from a TOML file; CLI flags override individual fields.
//!
//! ```toml
//! backend = "deep_fusion"
//!
//! [training]
//! epochs = 40
//! batch_size = 8
//!
//! [forest]
//! n_estimators = 200
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::dataset::split::SplitConfig;
use crate::model::ModelKind;
use crate::utils::error::{AuthenticityError, Result};

/// Where the dataset lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    /// Manifest file name inside `data_dir`
    pub manifest: String,
    /// Image root inside `data_dir`; images live at `<images_dir>/<label>/<filename>`
    pub images_dir: String,
    /// Edge length images are resized to
    pub image_size: u32,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./training-data"),
            manifest: "metadata.json".to_string(),
            images_dir: "images".to_string(),
            image_size: crate::IMAGE_SIZE,
        }
    }
}

/// Fusion network architecture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Filters in the first conv block; doubled per block
    pub base_filters: usize,
    /// Conv blocks in the image encoder, each halving the resolution
    pub conv_blocks: usize,
    /// Blocks (counted from the top) left trainable when a pretrained encoder is loaded
    pub trainable_blocks: usize,
    /// Optional pretrained image-encoder record (Burn binary record)
    pub pretrained_encoder: Option<PathBuf>,
    pub image_embedding: usize,
    pub feature_embedding: usize,
    pub fused_hidden: usize,
    pub image_dropout: f64,
    pub feature_dropout: f64,
    pub head_dropout: f64,
    /// Weight of the confidence-head squared error in the total loss
    pub confidence_loss_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            base_filters: 16,
            conv_blocks: 4,
            trainable_blocks: 2,
            pretrained_encoder: None,
            image_embedding: 128,
            feature_embedding: 32,
            fused_hidden: 64,
            image_dropout: 0.3,
            feature_dropout: 0.2,
            head_dropout: 0.3,
            confidence_loss_weight: 0.3,
        }
    }
}

/// Candidate features per split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// `floor(sqrt(n_features))`
    Sqrt,
    All,
    Count(usize),
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Count(k) => *k,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Class re-weighting for the tree ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeight {
    /// Every sample weighs 1
    Uniform,
    /// `n_samples / (n_classes * count(class))`
    Balanced,
}

/// Tree ensemble hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub class_weight: ClassWeight,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            class_weight: ClassWeight::Balanced,
            bootstrap: true,
            seed: 42,
        }
    }
}

/// Epoch-loop settings for the fusion model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Stop after this many epochs without validation-accuracy improvement
    pub early_stopping_patience: usize,
    /// Decay the learning rate after this many epochs without improvement
    pub lr_plateau_patience: usize,
    pub lr_decay_factor: f64,
    pub min_learning_rate: f64,
    /// Augment training images
    pub augment: bool,
    pub augmentation: AugmentationConfig,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 16,
            learning_rate: 1e-3,
            early_stopping_patience: 10,
            lr_plateau_patience: 5,
            lr_decay_factor: 0.5,
            min_learning_rate: 1e-6,
            augment: true,
            augmentation: AugmentationConfig::default(),
            seed: 42,
        }
    }
}

/// Where and what to write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub model_dir: PathBuf,
    /// Write SVG charts next to the model
    pub charts: bool,
    /// Persist the best-so-far fusion artifact whenever validation accuracy improves
    pub save_best: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            charts: true,
            save_best: true,
        }
    }
}

/// Complete configuration for one training run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub backend: ModelKind,
    pub data: DataConfig,
    pub split: SplitConfig,
    pub fusion: FusionConfig,
    pub forest: ForestConfig,
    pub training: TrainingConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Read a TOML file; missing sections and fields take their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AuthenticityError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            AuthenticityError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Save as pretty JSON (written next to trained models for reference)
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check the configuration for values that would break training
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.split.validate()?;

        let t = &self.training;
        if t.epochs == 0 {
            return Err("training.epochs must be greater than 0".to_string());
        }
        if t.batch_size == 0 {
            return Err("training.batch_size must be greater than 0".to_string());
        }
        if t.learning_rate <= 0.0 {
            return Err("training.learning_rate must be positive".to_string());
        }
        if t.lr_decay_factor <= 0.0 || t.lr_decay_factor > 1.0 {
            return Err("training.lr_decay_factor must be in (0, 1]".to_string());
        }

        let f = &self.fusion;
        for (name, p) in [
            ("image_dropout", f.image_dropout),
            ("feature_dropout", f.feature_dropout),
            ("head_dropout", f.head_dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(format!("fusion.{} must be in [0, 1), got {}", name, p));
            }
        }
        if f.conv_blocks == 0 || f.base_filters == 0 {
            return Err("fusion.conv_blocks and fusion.base_filters must be positive".to_string());
        }
        let downsample = 1u64 << f.conv_blocks.min(31);
        if (self.data.image_size as u64) < downsample {
            return Err(format!(
                "data.image_size {} is smaller than the encoder downsampling factor {}",
                self.data.image_size, downsample
            ));
        }

        let r = &self.forest;
        if r.n_estimators == 0 {
            return Err("forest.n_estimators must be greater than 0".to_string());
        }
        if r.max_depth == 0 {
            return Err("forest.max_depth must be greater than 0".to_string());
        }
        if r.min_samples_split < 2 {
            return Err("forest.min_samples_split must be at least 2".to_string());
        }
        if r.min_samples_leaf == 0 {
            return Err("forest.min_samples_leaf must be at least 1".to_string());
        }

        Ok(())
    }

    /// Default artifact base path for the configured backend
    pub fn artifact_base(&self) -> PathBuf {
        self.output.model_dir.join(self.backend.artifact_name())
    }
}
