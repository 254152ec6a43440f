//! Metrics Module for Model Evaluation
//!
//! Binary authenticity metrics computed from hard predictions:
//! - Accuracy
//! - Per-class precision, recall, F1
//! - Confusion matrix (row = actual, column = predicted)
//!
//! Class indices follow the label convention: `0` = counterfeit, `1` = authentic.

use serde::{Deserialize, Serialize};

/// Display names for the two label classes, indexed by label
pub const CLASS_NAMES: [&str; 2] = ["Counterfeit", "Authentic"];

/// Evaluation metrics for one split
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Total number of samples evaluated
    pub total_samples: usize,

    /// Number of correct predictions
    pub correct_predictions: usize,

    /// Overall accuracy (correct / total)
    pub accuracy: f64,

    /// Macro-averaged precision over classes with support
    pub macro_precision: f64,

    /// Macro-averaged recall
    pub macro_recall: f64,

    /// Macro-averaged F1-score
    pub macro_f1: f64,

    /// F1 weighted by class support
    pub weighted_f1: f64,

    /// Per-class metrics, indexed by label
    pub per_class: Vec<ClassMetrics>,

    /// Confusion matrix
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Build metrics from hard predictions and ground truth labels.
    ///
    /// Both slices must have the same length; extra elements in the longer
    /// one are ignored.
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], num_classes: usize) -> Self {
        let total_samples = predictions.len().min(ground_truth.len());
        if total_samples == 0 {
            return Self {
                confusion_matrix: ConfusionMatrix::new(num_classes),
                ..Self::default()
            };
        }

        let confusion_matrix = ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);
        let correct_predictions = confusion_matrix.correct();
        let accuracy = correct_predictions as f64 / total_samples as f64;

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|class_idx| {
                let metrics = ClassMetrics::from_confusion_matrix(&confusion_matrix, class_idx);
                match CLASS_NAMES.get(class_idx) {
                    Some(name) if num_classes == CLASS_NAMES.len() => metrics.with_name(name),
                    _ => metrics,
                }
            })
            .collect();

        let supported: Vec<&ClassMetrics> = per_class.iter().filter(|m| m.support > 0).collect();
        let n = supported.len() as f64;
        let mean = |f: fn(&ClassMetrics) -> f64| {
            if n > 0.0 {
                supported.iter().map(|m| f(m)).sum::<f64>() / n
            } else {
                0.0
            }
        };

        let macro_precision = mean(|m| m.precision);
        let macro_recall = mean(|m| m.recall);
        let macro_f1 = mean(|m| m.f1);

        let total_support: usize = per_class.iter().map(|m| m.support).sum();
        let weighted_f1 = if total_support > 0 {
            per_class.iter().map(|m| m.f1 * m.support as f64).sum::<f64>() / total_support as f64
        } else {
            0.0
        };

        Self {
            total_samples,
            correct_predictions,
            accuracy,
            macro_precision,
            macro_recall,
            macro_f1,
            weighted_f1,
            per_class,
            confusion_matrix,
        }
    }

    /// Classification report in the familiar precision/recall/f1/support layout
    pub fn classification_report(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:>14} {:>10} {:>10} {:>10} {:>10}\n",
            "", "precision", "recall", "f1-score", "support"
        ));
        for class in &self.per_class {
            let name = class
                .class_name
                .clone()
                .unwrap_or_else(|| class.class_idx.to_string());
            out.push_str(&format!(
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}\n",
                name, class.precision, class.recall, class.f1, class.support
            ));
        }
        out.push('\n');
        out.push_str(&format!(
            "{:>14} {:>10} {:>10} {:>10.2} {:>10}\n",
            "accuracy", "", "", self.accuracy, self.total_samples
        ));
        out.push_str(&format!(
            "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}\n",
            "macro avg", self.macro_precision, self.macro_recall, self.macro_f1, self.total_samples
        ));
        out.push_str(&format!(
            "{:>14} {:>10} {:>10} {:>10.2} {:>10}\n",
            "weighted avg", "", "", self.weighted_f1, self.total_samples
        ));
        out
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Class index
    pub class_idx: usize,

    /// Class name (if available)
    pub class_name: Option<String>,

    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,

    /// Precision = TP / (TP + FP)
    pub precision: f64,

    /// Recall = TP / (TP + FN)
    pub recall: f64,

    /// F1 = 2 * (precision * recall) / (precision + recall)
    pub f1: f64,

    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        // Predicted as this class, actually another
        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        // Actually this class, predicted as another
        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let true_negatives = cm.total() - true_positives - false_positives - false_negatives;
        let support = true_positives + false_negatives;

        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: None,
            true_positives,
            false_positives,
            false_negatives,
            true_negatives,
            precision,
            recall,
            f1,
            support,
        }
    }

    /// Set the class name
    pub fn with_name(mut self, name: &str) -> Self {
        self.class_name = Some(name.to_string());
        self
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

/// Confusion matrix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Row-major counts (row = actual, column = predicted)
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Create confusion matrix from predictions and ground truth
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    /// Add a single prediction to the matrix; out-of-range indices are ignored
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// Rows as nested vectors, handy for serialization and charts
    pub fn rows(&self) -> Vec<Vec<usize>> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).collect())
            .collect()
    }

    /// Pretty print the matrix with optional class names
    pub fn display(&self, class_names: Option<&[&str]>) -> String {
        let label = |i: usize| -> String {
            class_names
                .and_then(|names| names.get(i))
                .map(|s| s.to_string())
                .unwrap_or_else(|| i.to_string())
        };

        let mut output = String::from("Confusion Matrix (rows=actual, cols=predicted):\n\n");
        output.push_str(&format!("{:>14}", ""));
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>14}", label(col)));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            output.push_str(&format!("{:>14}", label(row)));
            for col in 0..self.num_classes {
                output.push_str(&format!("{:>14}", self.get(row, col)));
            }
            output.push('\n');
        }
        output
    }
}

impl std::fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.num_classes == CLASS_NAMES.len() {
            write!(f, "{}", self.display(Some(&CLASS_NAMES)))
        } else {
            write!(f, "{}", self.display(None))
        }
    }
}

/// Running average for tracking losses during training
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value observed over `weight` samples
    pub fn add_weighted(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
    }

    pub fn add(&mut self, value: f64) {
        self.add_weighted(value, 1);
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_binary() {
        // (pred, actual): (1,1) (1,1) (0,1) (0,0) (1,0) (0,0)
        let predictions = vec![1, 1, 0, 0, 1, 0];
        let ground_truth = vec![1, 1, 1, 0, 0, 0];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 2);

        assert_eq!(cm.get(1, 1), 2);
        assert_eq!(cm.get(1, 0), 1);
        assert_eq!(cm.get(0, 0), 2);
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.total(), 6);
        assert_eq!(cm.rows(), vec![vec![2, 1], vec![1, 2]]);
        assert!((cm.accuracy() - 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_class_metrics() {
        let predictions = vec![0, 0, 0, 1, 1];
        let ground_truth = vec![0, 0, 1, 1, 0];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 2);
        let class0 = ClassMetrics::from_confusion_matrix(&cm, 0);

        // Class 0: TP=2, FP=1, FN=1, TN=1
        assert_eq!(class0.true_positives, 2);
        assert_eq!(class0.false_positives, 1);
        assert_eq!(class0.false_negatives, 1);
        assert_eq!(class0.true_negatives, 1);
        assert!((class0.precision - 2.0 / 3.0).abs() < 0.001);
        assert!((class0.recall - 2.0 / 3.0).abs() < 0.001);
    }

    #[test]
    fn test_metrics_names_and_averages() {
        let metrics = Metrics::from_predictions(&[1, 1, 0, 0], &[1, 1, 0, 0], 2);

        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.macro_f1, 1.0);
        assert_eq!(metrics.per_class[1].class_name.as_deref(), Some("Authentic"));
        assert!(metrics.classification_report().contains("Counterfeit"));
    }

    #[test]
    fn test_metrics_empty() {
        let metrics = Metrics::from_predictions(&[], &[], 2);
        assert_eq!(metrics.total_samples, 0);
        assert_eq!(metrics.confusion_matrix.num_classes, 2);
    }

    #[test]
    fn test_running_average_weighted() {
        let mut avg = RunningAverage::new();
        avg.add_weighted(1.0, 3);
        avg.add(5.0);
        assert_eq!(avg.count(), 4);
        assert!((avg.average() - 2.0).abs() < 1e-9);
    }
}
