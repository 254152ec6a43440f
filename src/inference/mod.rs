//! Inference module
//!
//! Single-sample scoring against a trained artifact. The predictor owns one
//! model and the scaler it was trained with; both are read-only once
//! loaded.

pub mod predictor;

pub use predictor::{PredictionResult, Predictor};
