//! Burn Dataset Integration for the fusion model
//!
//! Batches carry images (CHW, 0-1), scaled features, labels and the
//! confidence-head target.

use std::sync::Mutex;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::RgbImage;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::augmentation::Augmenter;
use crate::dataset::features::{confidence_target, image_to_chw};

/// A single fusion sample ready for batching
#[derive(Clone, Debug)]
pub struct FusionItem {
    /// Resized RGB image
    pub image: RgbImage,
    /// Scaled engineered features (7 values)
    pub features: Vec<f32>,
    /// `1` = authentic, `0` = counterfeit
    pub label: usize,
}

/// In-memory fusion dataset
#[derive(Clone, Debug, Default)]
pub struct FusionDataset {
    items: Vec<FusionItem>,
}

impl FusionDataset {
    pub fn new(items: Vec<FusionItem>) -> Self {
        Self { items }
    }

    pub fn labels(&self) -> Vec<usize> {
        self.items.iter().map(|i| i.label).collect()
    }
}

impl Dataset<FusionItem> for FusionDataset {
    fn get(&self, index: usize) -> Option<FusionItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of fusion samples
#[derive(Clone, Debug)]
pub struct FusionBatch<B: Backend> {
    /// [batch, 3, H, W]
    pub images: Tensor<B, 4>,
    /// [batch, n_features]
    pub features: Tensor<B, 2>,
    /// [batch]
    pub labels: Tensor<B, 1, Int>,
    /// [batch], `|label - 0.5| * 2`
    pub confidence: Tensor<B, 1>,
}

/// Batcher for fusion items. With an augmenter attached (training split)
/// every image is randomly transformed before it is stacked.
pub struct FusionBatcher {
    augmenter: Option<Augmenter>,
    rng: Mutex<ChaCha8Rng>,
}

impl FusionBatcher {
    /// Plain batcher for validation and inference
    pub fn new() -> Self {
        Self {
            augmenter: None,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(0)),
        }
    }

    /// Augmenting batcher for training
    pub fn with_augmentation(augmenter: Augmenter, seed: u64) -> Self {
        Self {
            augmenter: Some(augmenter),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    fn image_data(&self, image: &RgbImage) -> Vec<f32> {
        match &self.augmenter {
            Some(augmenter) => {
                let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
                image_to_chw(&augmenter.augment(image, &mut rng))
            }
            None => image_to_chw(image),
        }
    }
}

impl Default for FusionBatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Batcher<B, FusionItem, FusionBatch<B>> for FusionBatcher {
    fn batch(&self, items: Vec<FusionItem>, device: &B::Device) -> FusionBatch<B> {
        let batch_size = items.len();
        let (width, height) = items
            .first()
            .map(|item| item.image.dimensions())
            .unwrap_or((0, 0));
        let n_features = items.first().map(|item| item.features.len()).unwrap_or(0);

        let mut images_data = Vec::with_capacity(batch_size * 3 * (width * height) as usize);
        let mut features_data = Vec::with_capacity(batch_size * n_features);
        let mut labels_data = Vec::with_capacity(batch_size);
        let mut confidence_data = Vec::with_capacity(batch_size);

        for item in &items {
            images_data.extend(self.image_data(&item.image));
            features_data.extend_from_slice(&item.features);
            labels_data.push(item.label as i64);
            confidence_data.push(confidence_target(item.label as f32));
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, height as usize, width as usize]),
            device,
        );
        let features = Tensor::<B, 2>::from_floats(
            TensorData::new(features_data, [batch_size, n_features]),
            device,
        );
        let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(labels_data, [batch_size]), device);
        let confidence =
            Tensor::<B, 1>::from_floats(TensorData::new(confidence_data, [batch_size]), device);

        FusionBatch {
            images,
            features,
            labels,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::AugmentationConfig;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn item(label: usize) -> FusionItem {
        FusionItem {
            image: RgbImage::from_pixel(8, 8, image::Rgb([255, 0, 51])),
            features: vec![0.1; 7],
            label,
        }
    }

    #[test]
    fn test_dataset_access() {
        let dataset = FusionDataset::new(vec![item(1), item(0)]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.get(1).map(|i| i.label), Some(0));
        assert!(dataset.get(2).is_none());
        assert_eq!(dataset.labels(), vec![1, 0]);
    }

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let batcher = FusionBatcher::new();
        let batch: FusionBatch<TestBackend> = batcher.batch(vec![item(1), item(0), item(1)], &device);

        assert_eq!(batch.images.dims(), [3, 3, 8, 8]);
        assert_eq!(batch.features.dims(), [3, 7]);
        assert_eq!(batch.labels.dims(), [3]);

        let confidence = batch.confidence.into_data().to_vec::<f32>().unwrap();
        assert_eq!(confidence, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_batch_pixel_range() {
        let device = Default::default();
        let batcher = FusionBatcher::with_augmentation(Augmenter::new(AugmentationConfig::default()), 42);
        let batch: FusionBatch<TestBackend> = batcher.batch(vec![item(1), item(0)], &device);

        let pixels = batch.images.into_data().to_vec::<f32>().unwrap();
        assert!(pixels.iter().all(|p| (0.0..=1.0).contains(p)));
    }
}
