//! Utilities module for logging, metrics, and helper functions
//!
//! This module provides:
//! - The crate error taxonomy
//! - Structured logging with tracing
//! - Binary classification metrics (confusion matrix, precision/recall, F1)
//! - SVG charts for training reports

pub mod charts;
pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{AuthenticityError, Result};
pub use logging::init_logging;
pub use metrics::{ConfusionMatrix, Metrics};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Render a probability as a fixed-width bar, e.g. `[█████░░░░░] 50.0%`
pub fn format_probability_bar(probability: f64, width: usize) -> String {
    let p = probability.clamp(0.0, 1.0);
    let filled = (p * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);

    format!("[{}{}] {:.1}%", "█".repeat(filled), "░".repeat(empty), p * 100.0)
}
