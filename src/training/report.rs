//! Per-run training report

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::dataset::FeatureVariant;
use crate::model::{EpochRecord, ModelKind, Prediction};
use crate::utils::charts::{
    generate_confusion_chart, generate_importance_chart, generate_line_chart, DataSeries, COLOR_PRIMARY,
    COLOR_SECONDARY, COLOR_TERTIARY,
};
use crate::utils::error::Result;
use crate::utils::format_duration;
use crate::utils::metrics::{Metrics, CLASS_NAMES};

/// Where the records went between the manifest and the model
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub manifest_entries: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub excluded_by_status: usize,
    pub skipped_images: usize,
    pub authentic: usize,
    pub counterfeit: usize,
    pub train_size: usize,
    pub validation_size: usize,
}

/// A fixed input scored after training
#[derive(Debug, Clone, Serialize)]
pub struct SamplePrediction {
    pub name: String,
    pub features: Vec<f32>,
    pub prediction: Prediction,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub kind: ModelKind,
    pub variant: FeatureVariant,
    pub dataset: DatasetSummary,
    /// Metrics on the validation split
    pub validation: Metrics,
    /// Accuracy on the training split (tree ensemble)
    pub train_accuracy: Option<f64>,
    /// Largest first
    pub feature_importance: Option<Vec<(String, f64)>>,
    pub history: Vec<EpochRecord>,
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
    pub sample_predictions: Vec<SamplePrediction>,
    pub artifact: Option<PathBuf>,
    pub duration_secs: f64,
}

impl TrainingReport {
    pub fn new(kind: ModelKind, dataset: DatasetSummary, validation: Metrics) -> Self {
        Self {
            kind,
            variant: kind.feature_variant(),
            dataset,
            validation,
            train_accuracy: None,
            feature_importance: None,
            history: Vec::new(),
            best_epoch: None,
            stopped_early: false,
            sample_predictions: Vec::new(),
            artifact: None,
            duration_secs: 0.0,
        }
    }

    /// Validation accuracy
    pub fn accuracy(&self) -> f64 {
        self.validation.accuracy
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Write the SVG charts that apply to this run into `dir`
    pub fn write_charts(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        let path = dir.join("confusion_matrix.svg");
        generate_confusion_chart(
            &format!("{} - Validation Confusion Matrix", self.kind),
            &CLASS_NAMES,
            &self.validation.confusion_matrix.rows(),
            &path,
        )?;
        written.push(path);

        if let Some(importance) = &self.feature_importance {
            let path = dir.join("feature_importance.svg");
            generate_importance_chart("Feature Importance", importance, &path)?;
            written.push(path);
        }

        if !self.history.is_empty() {
            let loss: Vec<f64> = self.history.iter().map(|e| e.train_loss).collect();
            let val_loss: Vec<f64> = self.history.iter().map(|e| e.val_loss).collect();
            let val_acc: Vec<f64> = self.history.iter().map(|e| e.val_accuracy).collect();

            let path = dir.join("training_history.svg");
            generate_line_chart(
                "Training History",
                "Epoch",
                "Value",
                &[
                    DataSeries::new("Train Loss", COLOR_PRIMARY, &loss),
                    DataSeries::new("Val Loss", COLOR_TERTIARY, &val_loss),
                    DataSeries::new("Val Accuracy", COLOR_SECONDARY, &val_acc),
                ],
                &path,
            )?;
            written.push(path);
        }

        Ok(written)
    }
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.dataset;
        writeln!(f, "Backend:           {} ({})", self.kind, self.variant)?;
        writeln!(
            f,
            "Dataset:           {} accepted of {} entries ({} rejected, {} excluded, {} missing images)",
            d.accepted, d.manifest_entries, d.rejected, d.excluded_by_status, d.skipped_images
        )?;
        writeln!(
            f,
            "Classes:           {} authentic / {} counterfeit",
            d.authentic, d.counterfeit
        )?;
        writeln!(f, "Split:             {} train / {} validation", d.train_size, d.validation_size)?;
        if let Some(acc) = self.train_accuracy {
            writeln!(f, "Train accuracy:    {:.2}%", acc * 100.0)?;
        }
        writeln!(f, "Val accuracy:      {:.2}%", self.validation.accuracy * 100.0)?;
        writeln!(f, "Macro F1:          {:.4}", self.validation.macro_f1)?;
        writeln!(f, "Weighted F1:       {:.4}", self.validation.weighted_f1)?;
        if let Some(epoch) = self.best_epoch {
            writeln!(
                f,
                "Best epoch:        {} of {}{}",
                epoch,
                self.history.len(),
                if self.stopped_early { " (stopped early)" } else { "" }
            )?;
        }
        writeln!(f, "Duration:          {}", format_duration(self.duration_secs))?;

        writeln!(f)?;
        writeln!(f, "{}", self.validation.confusion_matrix)?;
        write!(f, "{}", self.validation.classification_report())?;

        if let Some(importance) = &self.feature_importance {
            writeln!(f)?;
            writeln!(f, "Feature importance:")?;
            for (name, value) in importance {
                writeln!(f, "  {:<22} {:.4}", name, value)?;
            }
        }

        if !self.sample_predictions.is_empty() {
            writeln!(f)?;
            writeln!(f, "Sample predictions:")?;
            for sample in &self.sample_predictions {
                writeln!(f, "  {:<22} {}", sample.name, sample.prediction)?;
            }
        }

        if let Some(path) = &self.artifact {
            writeln!(f)?;
            writeln!(f, "Artifact:          {}", path.display())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> TrainingReport {
        let metrics = Metrics::from_predictions(&[1, 0, 1, 1], &[1, 0, 0, 1], 2);
        TrainingReport::new(
            ModelKind::TreeEnsemble,
            DatasetSummary {
                accepted: 20,
                manifest_entries: 22,
                ..DatasetSummary::default()
            },
            metrics,
        )
    }

    #[test]
    fn test_display_contains_headline_numbers() {
        let mut r = report();
        r.train_accuracy = Some(1.0);
        r.feature_importance = Some(vec![("Paint Quality".to_string(), 0.6), ("Sculpt Details".to_string(), 0.4)]);
        let text = r.to_string();

        assert!(text.contains("Tree Ensemble"));
        assert!(text.contains("Val accuracy:      75.00%"));
        assert!(text.contains("Train accuracy:    100.00%"));
        assert!(text.contains("Paint Quality"));
    }

    #[test]
    fn test_json_and_charts() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = report();
        r.feature_importance = Some(vec![("Paint Quality".to_string(), 1.0)]);

        let json_path = dir.path().join("tree_ensemble.report.json");
        r.save_json(&json_path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(value["kind"], "tree_ensemble");
        assert_eq!(value["variant"], "tabular");

        let charts = r.write_charts(dir.path()).unwrap();
        assert_eq!(charts.len(), 2);
        assert!(charts.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_history_chart_only_with_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = report();
        r.history.push(EpochRecord {
            epoch: 1,
            train_loss: 0.7,
            val_loss: 0.6,
            val_accuracy: 0.5,
            val_confidence_mae: 0.4,
            learning_rate: 1e-3,
        });
        let charts = r.write_charts(dir.path()).unwrap();
        assert!(charts.iter().any(|p| p.ends_with("training_history.svg")));
    }
}
