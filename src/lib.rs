//! # Figure Authenticity
//!
//! Decides whether a collectible figure is genuine or counterfeit from a
//! photograph plus a handful of manually assessed quality scores.
//!
//! ## Features
//!
//! - **Two interchangeable backends** behind one [`ScoringModel`] trait: a
//!   Burn image + feature fusion network and a class-balanced random forest
//! - **Fixed-order feature vectors** shared bit-for-bit between training and
//!   inference, standardised by a scaler fitted on the training split only
//! - **Reproducible training**: seeded stratified split, early stopping and
//!   learning-rate decay for the fusion network
//! - **Versioned artifacts** with SHA-256 integrity checks and atomic writes
//!
//! ## Modules
//!
//! - `dataset`: manifest loading, feature engineering, scaling and splitting
//! - `model`: the scoring backends and the artifact store
//! - `training`: orchestrator, fusion training loop and reports
//! - `inference`: single-sample prediction
//! - `utils`: errors, logging, metrics and charts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use figure_authenticity::{PipelineConfig, Predictor, TrainingOrchestrator};
//!
//! let config = PipelineConfig::default();
//! let outcome = TrainingOrchestrator::new(config.clone()).run()?;
//! println!("{}", outcome.report);
//!
//! let predictor = Predictor::from_trained(outcome.model, outcome.scaler, config)?;
//! let prediction = predictor.score(&[0.95, 0.92, 0.98, 0.94, 1.0, 1.0, 1.0, 1.0, 8.0, 12.0], None)?;
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use dataset::{Authenticity, DatasetRecord, FeatureVariant, LoadedDataset, MetadataReader, ScalerState};
pub use inference::Predictor;
pub use model::artifact::{ArtifactManifest, ArtifactStore, LoadedArtifact};
pub use model::config::PipelineConfig;
pub use model::{DeepFusionModel, ModelKind, Prediction, ScoringModel, TreeEnsembleModel};
pub use training::{TrainingOrchestrator, TrainingOutcome, TrainingReport};
pub use utils::error::{AuthenticityError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Binary classification: counterfeit (0) and authentic (1)
pub const NUM_CLASSES: usize = 2;

/// Default edge length images are resized to
pub const IMAGE_SIZE: u32 = 224;

/// Version of the library, recorded in every artifact
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
