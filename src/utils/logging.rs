//! Logging Module
//!
//! Structured logging built on the `tracing` crate, plus small helpers for
//! reporting progress over long-running stages (image decoding, epoch loops).

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging for debugging (per-batch and per-tree detail)
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Initialize the global subscriber with the given configuration.
///
/// `RUST_LOG`, when set, takes precedence over `config.level`.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_tracing_level().to_string()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Progress logger for long-running operations
pub struct ProgressLogger {
    operation: String,
    total: usize,
    current: usize,
    log_interval: usize,
    start_time: Instant,
}

impl ProgressLogger {
    /// Create a new progress logger that reports roughly every 10%
    pub fn new(operation: &str, total: usize) -> Self {
        Self {
            operation: operation.to_string(),
            total,
            current: 0,
            log_interval: (total / 10).max(1),
            start_time: Instant::now(),
        }
    }

    /// Increment progress by 1
    pub fn increment(&mut self) {
        self.current += 1;

        if self.current % self.log_interval == 0 || self.current == self.total {
            let percentage = 100.0 * self.current as f64 / self.total.max(1) as f64;
            tracing::debug!(
                "{}: {}/{} ({:.1}%) after {:.1}s",
                self.operation,
                self.current,
                self.total,
                percentage,
                self.start_time.elapsed().as_secs_f64()
            );
        }
    }

    /// Log completion
    pub fn finish(&self) {
        tracing::info!(
            "{}: processed {} items in {:.2}s",
            self.operation,
            self.current,
            self.start_time.elapsed().as_secs_f64()
        );
    }
}

/// Epoch timing logger for the deep fusion training loop
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch (0-indexed)
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with its headline metrics
    pub fn end_epoch(&self, train_loss: f64, val_loss: f64, val_accuracy: f64, learning_rate: f64) {
        tracing::info!(
            "Epoch {}/{} in {:.1}s | Loss: {:.4} | Val Loss: {:.4} | Val Acc: {:.2}% | LR: {:.6}",
            self.epoch + 1,
            self.total_epochs,
            self.epoch_start.elapsed().as_secs_f64(),
            train_loss,
            val_loss,
            val_accuracy * 100.0,
            learning_rate
        );
    }

    /// Log a new best model
    pub fn log_new_best(&self, accuracy: f64) {
        tracing::info!("New best model, validation accuracy {:.2}%", accuracy * 100.0);
    }

    /// Log early stopping
    pub fn log_early_stop(&self, patience: usize) {
        tracing::warn!(
            "Early stopping after {} epochs without validation-accuracy improvement",
            patience
        );
    }

    /// Log training completion
    pub fn log_complete(&self, epochs_run: usize, best_accuracy: f64) {
        tracing::info!(
            "Training complete: {} epochs in {:.1}s, best validation accuracy {:.2}%",
            epochs_run,
            self.training_start.elapsed().as_secs_f64(),
            best_accuracy * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::parse("Warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_log_config_presets() {
        assert_eq!(LogConfig::default().level, LogLevel::Info);
        assert_eq!(LogConfig::verbose().level, LogLevel::Debug);
        assert_eq!(LogConfig::quiet().level, LogLevel::Error);
    }

    #[test]
    fn test_second_init_reports_error() {
        let _ = init_logging(&LogConfig::quiet());
        let err = init_logging(&LogConfig::quiet()).unwrap_err();
        assert!(err.starts_with("Failed to initialize logging"));
    }

    #[test]
    fn test_progress_logger_counts() {
        let mut logger = ProgressLogger::new("Decoding", 20);
        for _ in 0..5 {
            logger.increment();
        }
        assert_eq!(logger.current, 5);
        assert_eq!(logger.log_interval, 2);
    }
}
