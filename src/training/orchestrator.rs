//! Training Orchestrator
//!
//! One run, start to finish:
//!
//! 1. Load the manifest (image check for the fusion variant)
//! 2. Extract feature vectors, stratified 80/20 split
//! 3. Fit the scaler on the training split, transform both splits
//! 4. Fit the configured backend
//! 5. Evaluate on the validation split
//! 6. Persist the artifact, the JSON report and optional charts

use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, warn};

use crate::dataset::features::{build_samples, load_image};
use crate::dataset::split::SplitStats;
use crate::dataset::{stratified_split, MetadataReader, Sample, ScalerState};
use crate::model::artifact::ArtifactStore;
use crate::model::config::PipelineConfig;
use crate::model::{build_model, Example, FitObserver, ModelKind, ScoringModel};
use crate::training::report::{DatasetSummary, SamplePrediction, TrainingReport};
use crate::utils::error::{AuthenticityError, Result};
use crate::utils::logging::ProgressLogger;
use crate::utils::metrics::Metrics;

/// Raw tabular vectors scored after a tree-ensemble run: a figure with
/// near-perfect scores and ideal capture, and one with poor scores.
pub const SAMPLE_FEATURES: [(&str, [f32; 10]); 2] = [
    ("high-quality figure", [0.95, 0.92, 0.98, 0.94, 1.0, 1.0, 1.0, 1.0, 8.0, 12.0]),
    ("low-quality figure", [0.45, 0.38, 0.25, 0.42, 0.5, 0.5, 0.5, 1.0, 8.0, 12.0]),
];

/// Everything a finished run hands back
pub struct TrainingOutcome {
    pub report: TrainingReport,
    pub model: Box<dyn ScoringModel>,
    pub scaler: ScalerState,
    pub artifact_base: PathBuf,
}

impl std::fmt::Debug for TrainingOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingOutcome")
            .field("report", &self.report)
            .field("scaler", &self.scaler)
            .field("artifact_base", &self.artifact_base)
            .finish_non_exhaustive()
    }
}

/// Persists a `<name>_best` artifact whenever validation accuracy improves
struct CheckpointObserver<'a> {
    kind: ModelKind,
    scaler: &'a ScalerState,
    base: PathBuf,
    enabled: bool,
}

impl FitObserver for CheckpointObserver<'_> {
    fn on_new_best(&mut self, epoch: usize, val_accuracy: f64, params: &[u8]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        ArtifactStore::save_params(self.kind, params, self.scaler, &self.base)?;
        info!(
            "Checkpoint: epoch {} ({:.2}% validation accuracy) saved to {}",
            epoch,
            val_accuracy * 100.0,
            self.base.display()
        );
        Ok(())
    }
}

/// Drives one training run
pub struct TrainingOrchestrator {
    config: PipelineConfig,
}

impl TrainingOrchestrator {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn to_examples(&self, samples: &[Sample], scaler: &ScalerState, with_images: bool) -> Result<Vec<Example>> {
        let mut progress = ProgressLogger::new("Preparing examples", samples.len());
        let mut examples = Vec::with_capacity(samples.len());

        for sample in samples {
            let image = if with_images {
                Some(load_image(&sample.image_path, self.config.data.image_size)?)
            } else {
                None
            };
            examples.push(Example {
                features: scaler.transform(&sample.features)?,
                label: sample.label,
                image,
            });
            progress.increment();
        }

        progress.finish();
        Ok(examples)
    }

    /// Run the full protocol with a freshly built model of the configured kind
    pub fn run(&self) -> Result<TrainingOutcome> {
        let kind = self.config.backend;
        self.run_with_model(build_model(kind, &self.config))
    }

    /// Run the full protocol with a caller-supplied model. Any previous
    /// parameters of `model` are discarded by its `fit`.
    pub fn run_with_model(&self, mut model: Box<dyn ScoringModel>) -> Result<TrainingOutcome> {
        let start = Instant::now();
        self.config.validate().map_err(AuthenticityError::Config)?;

        let kind = model.kind();
        let variant = kind.feature_variant();
        info!("Training {} backend on {}", kind, variant);

        // 1. Load
        let dataset = MetadataReader::from_config(&self.config.data)
            .with_images(variant.uses_images())
            .load()?;
        info!("{}", dataset);

        // 2. Features and split
        let samples = build_samples(&dataset.records, variant);
        let labels: Vec<usize> = samples.iter().map(|s| s.label).collect();
        let split = stratified_split(&labels, &self.config.split)?;
        info!("Split: {}", SplitStats::compute(&split, &labels));
        let (train_samples, validation_samples) = split.select(&samples);

        // 3. Scaler on the training split only
        let train_rows: Vec<Vec<f32>> = train_samples.iter().map(|s| s.features.clone()).collect();
        let scaler = ScalerState::fit(&train_rows)?;
        let train = self.to_examples(&train_samples, &scaler, variant.uses_images())?;
        let validation = self.to_examples(&validation_samples, &scaler, variant.uses_images())?;

        // 4. Fit
        let artifact_base = self.config.output.model_dir.join(kind.artifact_name());
        let mut observer = CheckpointObserver {
            kind,
            scaler: &scaler,
            base: self
                .config
                .output
                .model_dir
                .join(format!("{}_best", kind.artifact_name())),
            enabled: self.config.output.save_best && kind == ModelKind::DeepFusion,
        };
        let summary = model.fit(&train, &validation, &mut observer)?;

        // 5. Evaluate
        let validation_metrics = evaluate(model.as_ref(), &validation)?;
        info!(
            "Validation accuracy {:.2}% on {} samples",
            validation_metrics.accuracy * 100.0,
            validation_metrics.total_samples
        );

        let (authentic, counterfeit) = dataset.class_counts();
        let mut report = TrainingReport::new(
            kind,
            DatasetSummary {
                manifest_entries: dataset.manifest_entries,
                accepted: dataset.len(),
                rejected: dataset.rejected.len(),
                excluded_by_status: dataset.excluded_by_status,
                skipped_images: dataset.skipped_images.len(),
                authentic,
                counterfeit,
                train_size: train.len(),
                validation_size: validation.len(),
            },
            validation_metrics,
        );
        report.history = summary.history;
        report.best_epoch = summary.best_epoch;
        report.stopped_early = summary.stopped_early;
        report.feature_importance = summary.feature_importance;

        if kind == ModelKind::TreeEnsemble {
            let train_accuracy = evaluate(model.as_ref(), &train)?.accuracy;
            info!("Training accuracy {:.2}%", train_accuracy * 100.0);
            report.train_accuracy = Some(train_accuracy);
            report.sample_predictions = sample_predictions(model.as_ref(), &scaler)?;
        }

        // 6. Persist
        let manifest = ArtifactStore::save(model.as_ref(), &scaler, &artifact_base)?;
        report.artifact = Some(ArtifactStore::params_path(&artifact_base, &manifest));
        report.duration_secs = start.elapsed().as_secs_f64();

        let mut report_path = artifact_base.clone().into_os_string();
        report_path.push(".report.json");
        report.save_json(&PathBuf::from(report_path))?;

        if self.config.output.charts {
            match report.write_charts(&self.config.output.model_dir) {
                Ok(paths) => info!("Wrote {} chart(s) to {}", paths.len(), self.config.output.model_dir.display()),
                Err(e) => warn!("Could not write charts: {}", e),
            }
        }

        Ok(TrainingOutcome {
            report,
            model,
            scaler,
            artifact_base,
        })
    }
}

/// Score every example and compare with its label
pub fn evaluate(model: &dyn ScoringModel, examples: &[Example]) -> Result<Metrics> {
    let predictions: Vec<usize> = model
        .predict_batch(examples)?
        .iter()
        .map(|p| p.label.label())
        .collect();
    let targets: Vec<usize> = examples.iter().map(|e| e.label).collect();

    Ok(Metrics::from_predictions(&predictions, &targets, crate::NUM_CLASSES))
}

/// Score [`SAMPLE_FEATURES`] through the scaler and a tabular model
pub fn sample_predictions(model: &dyn ScoringModel, scaler: &ScalerState) -> Result<Vec<SamplePrediction>> {
    SAMPLE_FEATURES
        .iter()
        .map(|(name, raw)| {
            let prediction = model.predict(&scaler.transform(raw)?, None)?;
            info!("Sample prediction for {}: {}", name, prediction);
            Ok(SamplePrediction {
                name: name.to_string(),
                features: raw.to_vec(),
                prediction,
            })
        })
        .collect()
}
