//! Feature standardisation (population mean and standard deviation)

use serde::{Deserialize, Serialize};

use crate::utils::error::{AuthenticityError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub mean: Vec<f64>,
    /// Standard deviation per feature; constant features get `1.0`
    pub scale: Vec<f64>,
    /// Number of rows the scaler was fitted on
    pub n_samples: usize,
}

impl ScalerState {
    /// Fit on a set of equally sized feature vectors
    pub fn fit(rows: &[Vec<f32>]) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| AuthenticityError::EmptyDataset("cannot fit scaler on zero rows".to_string()))?;
        let dim = first.len();

        if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
            return Err(AuthenticityError::schema_mismatch(
                format!("{} features", dim),
                format!("{} features", bad.len()),
            ));
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0f64; dim];
        for row in rows {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0f64; dim];
        for row in rows {
            for ((s, &v), m) in var.iter_mut().zip(row).zip(&mean) {
                let d = v as f64 - m;
                *s += d * d;
            }
        }

        let scale = var
            .into_iter()
            .map(|s| {
                let std = (s / n).sqrt();
                if std > f64::EPSILON {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self {
            mean,
            scale,
            n_samples: rows.len(),
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Standardise one vector
    pub fn transform(&self, features: &[f32]) -> Result<Vec<f32>> {
        if features.len() != self.dim() {
            return Err(AuthenticityError::schema_mismatch(
                format!("{} features", self.dim()),
                format!("{} features", features.len()),
            ));
        }

        Ok(features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&x, (m, s))| ((x as f64 - m) / s) as f32)
            .collect())
    }

    pub fn transform_all(&self, rows: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        rows.iter().map(|r| self.transform(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_and_transform() {
        let rows = vec![vec![1.0, 10.0], vec![3.0, 10.0]];
        let scaler = ScalerState::fit(&rows).unwrap();

        assert_eq!(scaler.mean, vec![2.0, 10.0]);
        assert_eq!(scaler.scale, vec![1.0, 1.0]);

        let t = scaler.transform(&[3.0, 10.0]).unwrap();
        assert!((t[0] - 1.0).abs() < 1e-6);
        assert_eq!(t[1], 0.0);
    }

    #[test]
    fn test_transformed_training_rows_are_standardised() {
        let rows: Vec<Vec<f32>> = (0..20).map(|i| vec![i as f32, (i * i) as f32]).collect();
        let scaler = ScalerState::fit(&rows).unwrap();
        let t = scaler.transform_all(&rows).unwrap();

        for col in 0..2 {
            let mean: f64 = t.iter().map(|r| r[col] as f64).sum::<f64>() / 20.0;
            let var: f64 = t.iter().map(|r| (r[col] as f64 - mean).powi(2)).sum::<f64>() / 20.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let scaler = ScalerState::fit(&[vec![1.0, 2.0, 3.0]]).unwrap();
        assert!(matches!(
            scaler.transform(&[1.0]),
            Err(AuthenticityError::FeatureSchemaMismatch { .. })
        ));
        assert!(ScalerState::fit(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn test_fit_empty() {
        assert!(matches!(ScalerState::fit(&[]), Err(AuthenticityError::EmptyDataset(_))));
    }
}
