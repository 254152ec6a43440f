//! Training: the run orchestrator, the fusion epoch loop and its policies

pub mod orchestrator;
pub mod report;
pub mod scheduler;
pub mod trainer;

pub use orchestrator::{evaluate, TrainingOrchestrator, TrainingOutcome};
pub use report::{DatasetSummary, TrainingReport};
pub use scheduler::{EarlyStopping, PlateauMode, ReduceOnPlateau};
pub use trainer::{FusionTrainer, TrainingState};

pub use crate::model::config::TrainingConfig;
