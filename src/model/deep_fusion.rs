//! Deep Fusion Model
//!
//! Wraps [`FusionNetwork`] behind [`ScoringModel`]. Training runs on an
//! autodiff backend; the fitted network is kept on the inner backend so
//! inference has dropout disabled and BatchNorm in evaluation mode.
//!
//! Serialized parameters are an envelope:
//!
//! ```text
//! [u64 LE header length][JSON header: network config + image size][Burn record bytes]
//! ```

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::info;

use burn::tensor::{backend::AutodiffBackend, backend::Backend, Tensor, TensorData};

use crate::dataset::burn_dataset::{FusionDataset, FusionItem};
use crate::dataset::features::image_to_chw;
use crate::dataset::FeatureVariant;
use crate::model::config::{FusionConfig, TrainingConfig};
use crate::model::fusion::{network_from_bytes, network_to_bytes, FusionNetwork, FusionNetworkConfig};
use crate::model::{ensure_trained, Example, FitObserver, FitSummary, ModelKind, Prediction, ScoringModel};
use crate::training::trainer::FusionTrainer;
use crate::utils::error::{AuthenticityError, Result};

const HEADER_LEN_BYTES: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EnvelopeHeader {
    network: FusionNetworkConfig,
    image_size: u32,
}

fn encode_envelope<B: Backend>(header: &EnvelopeHeader, network: &FusionNetwork<B>) -> Result<Vec<u8>> {
    let header_bytes = serde_json::to_vec(header)?;
    let weights = network_to_bytes(network)?;

    let mut out = Vec::with_capacity(HEADER_LEN_BYTES + header_bytes.len() + weights.len());
    out.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&weights);
    Ok(out)
}

fn decode_envelope(bytes: &[u8]) -> Result<(EnvelopeHeader, &[u8])> {
    let truncated = || AuthenticityError::Serialization("fusion parameters are truncated".to_string());

    let len_bytes: [u8; HEADER_LEN_BYTES] = bytes
        .get(..HEADER_LEN_BYTES)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(truncated)?;
    let header_len = u64::from_le_bytes(len_bytes) as usize;
    let header_end = HEADER_LEN_BYTES.checked_add(header_len).ok_or_else(truncated)?;
    let header_bytes = bytes.get(HEADER_LEN_BYTES..header_end).ok_or_else(truncated)?;

    let header: EnvelopeHeader = serde_json::from_slice(header_bytes)?;
    Ok((header, &bytes[header_end..]))
}

/// Resize to `size` x `size` unless already there
fn fit_image(image: &RgbImage, size: u32) -> RgbImage {
    if image.dimensions() == (size, size) {
        image.clone()
    } else {
        imageops::resize(image, size, size, FilterType::Triangle)
    }
}

/// Image + engineered-feature model
pub struct DeepFusionModel<B: AutodiffBackend> {
    fusion: FusionConfig,
    training: TrainingConfig,
    image_size: u32,
    device: B::Device,
    network: Option<(FusionNetworkConfig, FusionNetwork<B::InnerBackend>)>,
}

impl<B: AutodiffBackend> DeepFusionModel<B> {
    pub fn new(fusion: FusionConfig, training: TrainingConfig, image_size: u32, device: B::Device) -> Self {
        Self {
            fusion,
            training,
            image_size,
            device,
            network: None,
        }
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    fn header(&self, config: &FusionNetworkConfig) -> EnvelopeHeader {
        EnvelopeHeader {
            network: config.clone(),
            image_size: self.image_size,
        }
    }

    fn to_items(&self, examples: &[Example]) -> Result<Vec<FusionItem>> {
        examples
            .iter()
            .map(|e| {
                let image = e.image.as_ref().ok_or_else(|| {
                    AuthenticityError::schema_mismatch("fusion example with an image", "example without image")
                })?;
                Ok(FusionItem {
                    image: fit_image(image, self.image_size),
                    features: e.features.clone(),
                    label: e.label,
                })
            })
            .collect()
    }

    fn build_network(&self, config: &FusionNetworkConfig) -> Result<FusionNetwork<B>> {
        let network = config.init::<B>(&self.device);
        match &self.fusion.pretrained_encoder {
            Some(path) => {
                info!(
                    "Loading pretrained image encoder from {}, {} of {} conv blocks trainable",
                    path.display(),
                    self.fusion.trainable_blocks.min(config.conv_blocks),
                    config.conv_blocks
                );
                Ok(network
                    .with_pretrained_encoder(path, &self.device)?
                    .freeze_early_blocks(self.fusion.trainable_blocks))
            }
            None => Ok(network),
        }
    }
}

impl<B: AutodiffBackend> ScoringModel for DeepFusionModel<B> {
    fn kind(&self) -> ModelKind {
        ModelKind::DeepFusion
    }

    fn is_trained(&self) -> bool {
        self.network.is_some()
    }

    fn fit(
        &mut self,
        train: &[Example],
        validation: &[Example],
        observer: &mut dyn FitObserver,
    ) -> Result<FitSummary> {
        self.network = None;

        let mut classes: Vec<usize> = train.iter().map(|e| e.label).collect();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(AuthenticityError::ImbalancedDataset {
                classes_present: classes.len(),
            });
        }

        let dim = FeatureVariant::Fusion.dim();
        if let Some(bad) = train.iter().chain(validation).find(|e| e.features.len() != dim) {
            return Err(AuthenticityError::schema_mismatch(
                FeatureVariant::Fusion,
                format!("{} features", bad.features.len()),
            ));
        }

        let train_set = FusionDataset::new(self.to_items(train)?);
        let validation_set = FusionDataset::new(self.to_items(validation)?);

        let config = FusionNetworkConfig::from_fusion_config(&self.fusion, dim);
        let network = self.build_network(&config)?;
        let trainer = FusionTrainer::new(
            network,
            self.training.clone(),
            self.fusion.confidence_loss_weight,
            self.device.clone(),
        );

        let header = self.header(&config);
        let mut on_best = |epoch: usize, accuracy: f64, best: &FusionNetwork<B::InnerBackend>| -> Result<()> {
            let bytes = encode_envelope(&header, best)?;
            observer.on_new_best(epoch, accuracy, &bytes)
        };
        let (best, summary) = trainer.fit(&train_set, &validation_set, &mut on_best)?;

        self.network = Some((config, best));
        Ok(summary)
    }

    fn predict(&self, features: &[f32], image: Option<&RgbImage>) -> Result<Prediction> {
        ensure_trained(self.is_trained(), self.kind())?;
        let Some((config, network)) = &self.network else {
            return Err(AuthenticityError::ModelNotTrained("deep fusion".to_string()));
        };

        if features.len() != config.num_features {
            return Err(AuthenticityError::schema_mismatch(
                FeatureVariant::Fusion,
                format!("{} features", features.len()),
            ));
        }
        let image = image.ok_or_else(|| {
            AuthenticityError::schema_mismatch("7 engineered features plus an image", "no image")
        })?;

        let size = self.image_size as usize;
        let pixels = image_to_chw(&fit_image(image, self.image_size));
        let images = Tensor::<B::InnerBackend, 4>::from_floats(TensorData::new(pixels, [1, 3, size, size]), &self.device);
        let features = Tensor::<B::InnerBackend, 2>::from_floats(
            TensorData::new(features.to_vec(), [1, features.len()]),
            &self.device,
        );

        let (probability, confidence) = network.forward_probabilities(images, features);
        let read = |t: Tensor<B::InnerBackend, 1>| -> Result<f32> {
            t.into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| AuthenticityError::Training(format!("{:?}", e)))?
                .first()
                .copied()
                .ok_or_else(|| AuthenticityError::Training("empty network output".to_string()))
        };

        Ok(Prediction::from_authentic_probability(read(probability)?, Some(read(confidence)?)))
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        ensure_trained(self.is_trained(), self.kind())?;
        match &self.network {
            Some((config, network)) => encode_envelope(&self.header(config), network),
            None => Err(AuthenticityError::ModelNotTrained("deep fusion".to_string())),
        }
    }

    fn load_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let (header, weights) = decode_envelope(bytes)?;
        if header.network.num_features != FeatureVariant::Fusion.dim() {
            return Err(AuthenticityError::schema_mismatch(
                FeatureVariant::Fusion,
                format!("{} features in stored network", header.network.num_features),
            ));
        }

        let network = network_from_bytes::<B::InnerBackend>(&header.network, weights, &self.device)?;
        self.image_size = header.image_size;
        self.network = Some((header.network, network));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NoopObserver;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::Rgb;

    type TestBackend = Autodiff<NdArray>;

    const SIZE: u32 = 16;

    fn model(epochs: usize) -> DeepFusionModel<TestBackend> {
        let fusion = FusionConfig {
            base_filters: 4,
            conv_blocks: 2,
            image_embedding: 8,
            feature_embedding: 8,
            fused_hidden: 8,
            ..FusionConfig::default()
        };
        let training = TrainingConfig {
            epochs,
            batch_size: 4,
            augment: false,
            ..TrainingConfig::default()
        };
        DeepFusionModel::new(fusion, training, SIZE, Default::default())
    }

    fn examples(n: usize) -> Vec<Example> {
        (0..n)
            .map(|i| {
                let label = i % 2;
                let shade = if label == 1 { 200 } else { 50 };
                Example {
                    features: vec![if label == 1 { 1.0 } else { -1.0 }; 7],
                    label,
                    image: Some(RgbImage::from_pixel(SIZE, SIZE, Rgb([shade, shade, shade]))),
                }
            })
            .collect()
    }

    struct Recording(Vec<usize>);

    impl FitObserver for Recording {
        fn on_new_best(&mut self, epoch: usize, _val_accuracy: f64, params: &[u8]) -> Result<()> {
            assert!(decode_envelope(params).is_ok());
            self.0.push(epoch);
            Ok(())
        }
    }

    #[test]
    fn test_untrained_predict_fails() {
        let m = model(1);
        let image = RgbImage::new(SIZE, SIZE);
        let err = m.predict(&[0.0; 7], Some(&image)).unwrap_err();
        assert!(matches!(err, AuthenticityError::ModelNotTrained(_)));
        assert!(m.to_bytes().is_err());
    }

    #[test]
    fn test_fit_predict_and_round_trip() {
        let mut m = model(2);
        let data = examples(8);
        let mut observer = Recording(Vec::new());
        let summary = m.fit(&data, &data[..4], &mut observer).unwrap();

        assert_eq!(summary.history.len(), 2);
        assert_eq!(observer.0.first(), Some(&1));

        let image = RgbImage::from_pixel(SIZE, SIZE, Rgb([200, 200, 200]));
        let p = m.predict(&[1.0; 7], Some(&image)).unwrap();
        let total = p.probabilities.authentic + p.probabilities.counterfeit;
        assert!((total - 1.0).abs() < 1e-5);
        assert!(p.head_confidence.is_some());

        let bytes = m.to_bytes().unwrap();
        let mut restored = model(1);
        restored.load_bytes(&bytes).unwrap();
        let q = restored.predict(&[1.0; 7], Some(&image)).unwrap();
        assert!((p.probabilities.authentic - q.probabilities.authentic).abs() < 1e-5);
        assert_eq!(p.label, q.label);
    }

    #[test]
    fn test_predict_requires_image_and_dimension() {
        let mut m = model(1);
        let data = examples(6);
        m.fit(&data, &data, &mut NoopObserver).unwrap();

        let err = m.predict(&[0.0; 7], None).unwrap_err();
        assert!(matches!(err, AuthenticityError::FeatureSchemaMismatch { .. }));

        let image = RgbImage::new(SIZE, SIZE);
        let err = m.predict(&[0.0; 10], Some(&image)).unwrap_err();
        assert!(matches!(err, AuthenticityError::FeatureSchemaMismatch { .. }));
    }

    #[test]
    fn test_single_class_rejected() {
        let mut m = model(1);
        let data: Vec<Example> = examples(6).into_iter().filter(|e| e.label == 1).collect();
        let err = m.fit(&data, &[], &mut NoopObserver).unwrap_err();
        assert!(matches!(err, AuthenticityError::ImbalancedDataset { classes_present: 1 }));
    }

    #[test]
    fn test_truncated_envelope() {
        let mut m = model(1);
        assert!(m.load_bytes(&[1, 2, 3]).is_err());
        let mut bogus = 1000u64.to_le_bytes().to_vec();
        bogus.extend_from_slice(b"{}");
        assert!(m.load_bytes(&bogus).is_err());
        assert!(!m.is_trained());
    }
}
