//! Epoch loop for the fusion network
//!
//! Per epoch: shuffle, augment, forward both heads, weighted loss
//! (`BCE(authenticity) + w * MSE(confidence)`), Adam step, then a validation
//! pass on the non-autodiff model. Validation accuracy drives early stopping
//! and best-parameter snapshots; validation loss drives the plateau
//! learning-rate schedule.

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    nn::loss::{BinaryCrossEntropyLossConfig, MseLoss, Reduction},
    optim::{adaptor::OptimizerAdaptor, Adam, AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion, Tensor},
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::dataset::augmentation::Augmenter;
use crate::dataset::burn_dataset::{FusionBatch, FusionBatcher, FusionDataset, FusionItem};
use crate::model::config::TrainingConfig;
use crate::model::fusion::{FusionNetwork, FusionOutput};
use crate::model::{EpochRecord, FitSummary};
use crate::training::scheduler::{EarlyStopping, PlateauMode, ReduceOnPlateau, StoppingDecision};
use crate::utils::error::{AuthenticityError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::RunningAverage;

/// Progress of a fusion training run
#[derive(Debug, Clone)]
pub struct TrainingState {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    pub iteration: usize,
    pub samples_seen: usize,
    pub best_val_accuracy: f64,
    pub current_lr: f64,
    pub history: Vec<EpochRecord>,
}

impl TrainingState {
    pub fn new(initial_lr: f64) -> Self {
        Self {
            epoch: 0,
            iteration: 0,
            samples_seen: 0,
            best_val_accuracy: 0.0,
            current_lr: initial_lr,
            history: Vec::new(),
        }
    }
}

/// Result of a validation pass
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    /// Mean absolute error of the confidence head against its target
    pub confidence_mae: f64,
    /// Predicted labels (`p > 0.5` is authentic)
    pub predictions: Vec<usize>,
    pub targets: Vec<usize>,
}

fn tensor_values<B: Backend>(tensor: Tensor<B, 1>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| AuthenticityError::Training(format!("{:?}", e)))
}

/// `BCE(logits, labels) + weight * MSE(confidence, target)`
fn fusion_loss<B: Backend>(output: &FusionOutput<B>, batch: &FusionBatch<B>, confidence_weight: f64) -> Tensor<B, 1> {
    let device = output.authenticity_logits.device();
    let bce = BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(&device)
        .forward(output.authenticity_logits.clone(), batch.labels.clone());
    let mse = MseLoss::new().forward(output.confidence.clone(), batch.confidence.clone(), Reduction::Mean);

    bce + mse.mul_scalar(confidence_weight)
}

/// Trainer for [`FusionNetwork`]
pub struct FusionTrainer<B: AutodiffBackend> {
    model: FusionNetwork<B>,
    optimizer: OptimizerAdaptor<Adam, FusionNetwork<B>, B>,
    config: TrainingConfig,
    confidence_weight: f64,
    pub state: TrainingState,
    device: B::Device,
}

impl<B: AutodiffBackend> FusionTrainer<B> {
    pub fn new(model: FusionNetwork<B>, config: TrainingConfig, confidence_weight: f64, device: B::Device) -> Self {
        let optimizer = AdamConfig::new().init();

        Self {
            model,
            optimizer,
            state: TrainingState::new(config.learning_rate),
            config,
            confidence_weight,
            device,
        }
    }

    /// One pass over `dataset`; returns the sample-weighted mean loss
    pub fn train_epoch(&mut self, dataset: &FusionDataset, batcher: &FusionBatcher, rng: &mut ChaCha8Rng) -> f64 {
        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        indices.shuffle(rng);

        let batch_size = self.config.batch_size.max(1);
        let num_batches = indices.len().div_ceil(batch_size);
        let mut loss_avg = RunningAverage::new();

        for (batch_idx, chunk) in indices.chunks(batch_size).enumerate() {
            let items: Vec<FusionItem> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
            if items.is_empty() {
                continue;
            }
            let n = items.len();
            let batch: FusionBatch<B> = batcher.batch(items, &self.device);

            let output = self.model.forward(batch.images.clone(), batch.features.clone());
            let loss = fusion_loss(&output, &batch, self.confidence_weight);

            let loss_value: f64 = loss.clone().into_scalar().elem();
            loss_avg.add_weighted(loss_value, n);

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optimizer.step(self.state.current_lr, self.model.clone(), grads);

            self.state.iteration += 1;
            self.state.samples_seen += n;

            debug!("  Batch {}/{}: loss = {:.4}", batch_idx + 1, num_batches, loss_value);
        }

        loss_avg.average()
    }

    /// Validation pass on the inner (non-autodiff) model; dropout is off
    pub fn evaluate(&self, dataset: &FusionDataset) -> Result<Evaluation> {
        evaluate_network(&self.model.valid(), dataset, self.config.batch_size, self.confidence_weight, &self.device)
    }

    /// Run the full epoch loop. `on_best` sees every new best network.
    /// Returns the best-validation-accuracy parameters, not the last ones.
    pub fn fit(
        mut self,
        train: &FusionDataset,
        validation: &FusionDataset,
        on_best: &mut dyn FnMut(usize, f64, &FusionNetwork<B::InnerBackend>) -> Result<()>,
    ) -> Result<(FusionNetwork<B::InnerBackend>, FitSummary)> {
        if train.is_empty() {
            return Err(AuthenticityError::EmptyDataset("training split is empty".to_string()));
        }
        let monitor = if validation.is_empty() {
            warn!("Validation split is empty, monitoring the training split instead");
            train
        } else {
            validation
        };

        let batcher = if self.config.augment {
            FusionBatcher::with_augmentation(Augmenter::new(self.config.augmentation.clone()), self.config.seed)
        } else {
            FusionBatcher::new()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        let mut plateau = ReduceOnPlateau::new(
            self.config.learning_rate,
            self.config.lr_decay_factor,
            self.config.lr_plateau_patience,
            self.config.min_learning_rate,
            PlateauMode::Min,
        );
        let mut stopping = EarlyStopping::new(self.config.early_stopping_patience, PlateauMode::Max);
        let mut logger = TrainingLogger::new(self.config.epochs);
        let mut best: Option<FusionNetwork<B::InnerBackend>> = None;
        let mut stopped_early = false;

        let authentic = train.labels().iter().filter(|&&l| l == 1).count();
        info!(
            "Training fusion network: {} train ({} authentic) / {} validation samples, batch size {}",
            train.len(),
            authentic,
            monitor.len(),
            self.config.batch_size
        );

        for epoch in 0..self.config.epochs {
            self.state.epoch = epoch;
            logger.start_epoch(epoch);

            let lr_used = self.state.current_lr;
            let train_loss = self.train_epoch(train, &batcher, &mut rng);
            let eval = self.evaluate(monitor)?;

            logger.end_epoch(train_loss, eval.loss, eval.accuracy, lr_used);
            self.state.history.push(EpochRecord {
                epoch: epoch + 1,
                train_loss,
                val_loss: eval.loss,
                val_accuracy: eval.accuracy,
                val_confidence_mae: eval.confidence_mae,
                learning_rate: lr_used,
            });

            match stopping.step(epoch + 1, eval.accuracy) {
                StoppingDecision::Improved => {
                    self.state.best_val_accuracy = eval.accuracy;
                    logger.log_new_best(eval.accuracy);
                    let snapshot = self.model.valid();
                    on_best(epoch + 1, eval.accuracy, &snapshot)?;
                    best = Some(snapshot);
                }
                StoppingDecision::Continue => {}
                StoppingDecision::Stop => {
                    logger.log_early_stop(self.config.early_stopping_patience);
                    stopped_early = true;
                    break;
                }
            }

            let next_lr = plateau.step(eval.loss);
            if next_lr < self.state.current_lr {
                info!("Reducing learning rate to {:.2e} (cut {})", next_lr, plateau.reductions());
            }
            self.state.current_lr = next_lr;
        }

        logger.log_complete(self.state.history.len(), self.state.best_val_accuracy);

        let network = best.unwrap_or_else(|| self.model.valid());
        let summary = FitSummary {
            history: self.state.history,
            best_epoch: stopping.best_epoch(),
            stopped_early,
            feature_importance: None,
        };
        Ok((network, summary))
    }
}

/// Loss, accuracy and confidence MAE of `network` on `dataset`
pub fn evaluate_network<B: Backend>(
    network: &FusionNetwork<B>,
    dataset: &FusionDataset,
    batch_size: usize,
    confidence_weight: f64,
    device: &B::Device,
) -> Result<Evaluation> {
    let batcher = FusionBatcher::new();
    let mut loss_avg = RunningAverage::new();
    let mut mae_avg = RunningAverage::new();
    let mut eval = Evaluation::default();

    let indices: Vec<usize> = (0..dataset.len()).collect();
    for chunk in indices.chunks(batch_size.max(1)) {
        let items: Vec<FusionItem> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }
        let n = items.len();
        let targets: Vec<usize> = items.iter().map(|i| i.label).collect();
        let batch: FusionBatch<B> = batcher.batch(items, device);

        let output = network.forward(batch.images.clone(), batch.features.clone());
        let loss: f64 = fusion_loss(&output, &batch, confidence_weight).into_scalar().elem();
        loss_avg.add_weighted(loss, n);

        let probabilities = tensor_values(burn::tensor::activation::sigmoid(output.authenticity_logits))?;
        let confidence = tensor_values(output.confidence)?;
        let confidence_target = tensor_values(batch.confidence)?;

        for (c, t) in confidence.iter().zip(&confidence_target) {
            mae_avg.add((c - t).abs() as f64);
        }
        eval.predictions
            .extend(probabilities.iter().map(|&p| usize::from(p > 0.5)));
        eval.targets.extend(targets);
    }

    let correct = eval
        .predictions
        .iter()
        .zip(&eval.targets)
        .filter(|(p, t)| p == t)
        .count();
    eval.accuracy = if eval.targets.is_empty() {
        0.0
    } else {
        correct as f64 / eval.targets.len() as f64
    };
    eval.loss = loss_avg.average();
    eval.confidence_mae = mae_avg.average();
    Ok(eval)
}
