//! Epoch-level training policies
//!
//! - [`ReduceOnPlateau`]: multiply the learning rate by a factor after a
//!   number of epochs without improvement of a monitored metric
//! - [`EarlyStopping`]: stop after a number of epochs without improvement
//!   and remember which epoch was best

use serde::{Deserialize, Serialize};

/// Direction in which a monitored metric improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateauMode {
    /// Metric should decrease (e.g., loss)
    Min,
    /// Metric should increase (e.g., accuracy)
    Max,
}

impl PlateauMode {
    fn initial(&self) -> f64 {
        match self {
            PlateauMode::Min => f64::INFINITY,
            PlateauMode::Max => f64::NEG_INFINITY,
        }
    }

    fn improves(&self, metric: f64, best: f64) -> bool {
        match self {
            PlateauMode::Min => metric < best,
            PlateauMode::Max => metric > best,
        }
    }
}

/// Reduce-on-plateau learning rate schedule
#[derive(Debug, Clone)]
pub struct ReduceOnPlateau {
    best_metric: f64,
    epochs_without_improvement: usize,
    current_lr: f64,
    reduction_factor: f64,
    patience: usize,
    min_lr: f64,
    mode: PlateauMode,
    reductions: usize,
}

impl ReduceOnPlateau {
    pub fn new(initial_lr: f64, reduction_factor: f64, patience: usize, min_lr: f64, mode: PlateauMode) -> Self {
        Self {
            best_metric: mode.initial(),
            epochs_without_improvement: 0,
            current_lr: initial_lr,
            reduction_factor,
            patience,
            min_lr,
            mode,
            reductions: 0,
        }
    }

    /// Feed one epoch's metric; returns the learning rate for the next epoch
    pub fn step(&mut self, metric: f64) -> f64 {
        if self.mode.improves(metric, self.best_metric) {
            self.best_metric = metric;
            self.epochs_without_improvement = 0;
            return self.current_lr;
        }

        self.epochs_without_improvement += 1;
        if self.patience > 0 && self.epochs_without_improvement >= self.patience {
            let new_lr = (self.current_lr * self.reduction_factor).max(self.min_lr);
            if new_lr < self.current_lr {
                self.current_lr = new_lr;
                self.reductions += 1;
            }
            self.epochs_without_improvement = 0;
        }

        self.current_lr
    }

    pub fn lr(&self) -> f64 {
        self.current_lr
    }

    /// How many times the rate has been cut so far
    pub fn reductions(&self) -> usize {
        self.reductions
    }
}

/// Outcome of feeding one epoch to [`EarlyStopping`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppingDecision {
    /// New best; the caller should snapshot its parameters
    Improved,
    Continue,
    Stop,
}

/// Patience-based early stopping on a metric
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    mode: PlateauMode,
    best_metric: f64,
    best_epoch: Option<usize>,
    epochs_without_improvement: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, mode: PlateauMode) -> Self {
        Self {
            patience,
            mode,
            best_metric: mode.initial(),
            best_epoch: None,
            epochs_without_improvement: 0,
        }
    }

    pub fn step(&mut self, epoch: usize, metric: f64) -> StoppingDecision {
        if self.mode.improves(metric, self.best_metric) {
            self.best_metric = metric;
            self.best_epoch = Some(epoch);
            self.epochs_without_improvement = 0;
            return StoppingDecision::Improved;
        }

        self.epochs_without_improvement += 1;
        if self.patience > 0 && self.epochs_without_improvement >= self.patience {
            StoppingDecision::Stop
        } else {
            StoppingDecision::Continue
        }
    }

    pub fn best_metric(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.best_metric)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn epochs_without_improvement(&self) -> usize {
        self.epochs_without_improvement
    }
}
