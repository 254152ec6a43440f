//! Error Handling Module
//!
//! Defines the error taxonomy for the authenticity scoring pipeline.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for authenticity scoring operations
///
/// Every variant is terminal for the operation that raised it; nothing in the
/// pipeline retries automatically.
#[derive(Error, Debug)]
pub enum AuthenticityError {
    /// The dataset manifest does not exist
    #[error("Dataset manifest not found at '{0}'")]
    DataNotFound(PathBuf),

    /// The manifest exists but yields no usable records
    #[error("Dataset is empty: {0}")]
    EmptyDataset(String),

    /// Fewer than two label classes are present, stratification is impossible
    #[error("Dataset needs both authentic and counterfeit samples, found {classes_present} class(es)")]
    ImbalancedDataset { classes_present: usize },

    /// Prediction requested before the model was fitted or loaded
    #[error("Model is not trained: {0}")]
    ModelNotTrained(String),

    /// Artifact missing, corrupt, or written with an incompatible schema
    #[error("Failed to load model artifact '{path}': {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    /// Feature vector does not match the variant the model expects
    #[error("Feature schema mismatch: expected {expected}, got {actual}")]
    FeatureSchemaMismatch { expected: String, actual: String },

    /// The manifest as a whole is malformed
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// A single manifest record failed validation
    #[error("Invalid record #{index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    Image(PathBuf, String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error raised while fitting a model
    #[error("Training error: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AuthenticityError {
    fn from(err: serde_json::Error) -> Self {
        AuthenticityError::Serialization(err.to_string())
    }
}

impl AuthenticityError {
    /// Shorthand for a `ModelLoad` error
    pub fn model_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        AuthenticityError::ModelLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a `FeatureSchemaMismatch` error
    pub fn schema_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        AuthenticityError::FeatureSchemaMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Convenience Result type for authenticity scoring operations
pub type Result<T> = std::result::Result<T, AuthenticityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthenticityError::EmptyDataset("manifest has no entries".to_string());
        assert_eq!(format!("{}", err), "Dataset is empty: manifest has no entries");
    }

    #[test]
    fn test_imbalanced_display() {
        let err = AuthenticityError::ImbalancedDataset { classes_present: 1 };
        assert!(err.to_string().contains("found 1 class"));
    }

    #[test]
    fn test_model_load_helper() {
        let err = AuthenticityError::model_load("/models/tree_ensemble", "checksum mismatch");
        assert!(matches!(err, AuthenticityError::ModelLoad { .. }));
        assert!(err.to_string().contains("tree_ensemble"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AuthenticityError = io_err.into();
        assert!(matches!(err, AuthenticityError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<Vec<u8>>("{not json").unwrap_err();
        let err: AuthenticityError = json_err.into();
        assert!(matches!(err, AuthenticityError::Serialization(_)));
    }
}
