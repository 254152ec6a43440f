//! Training-time image augmentation for the fusion model
//!
//! Mild, label-preserving transforms applied to already resized images:
//! - horizontal flip
//! - brightness scaling
//! - small translation with zero fill

use image::{imageops, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Probability of a horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Brightness multiplier is drawn uniformly from this range
    pub brightness_range: (f32, f32),
    /// Maximum shift as a fraction of the edge length, per axis
    pub max_translation: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            brightness_range: (0.9, 1.1),
            max_translation: 0.1,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            brightness_range: (1.0, 1.0),
            max_translation: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.horizontal_flip_prob <= 0.0
            && self.brightness_range == (1.0, 1.0)
            && self.max_translation <= 0.0
    }
}

/// Applies random transforms from an [`AugmentationConfig`]
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Produce an augmented copy of `img`. Output size equals input size.
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let mut result = if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            imageops::flip_horizontal(img)
        } else {
            img.clone()
        };

        let (lo, hi) = self.config.brightness_range;
        if hi > lo {
            let factor = rng.gen_range(lo..=hi);
            scale_brightness(&mut result, factor);
        }

        if self.config.max_translation > 0.0 {
            let (w, h) = result.dimensions();
            let max_dx = (w as f32 * self.config.max_translation) as i64;
            let max_dy = (h as f32 * self.config.max_translation) as i64;
            let dx = rng.gen_range(-max_dx..=max_dx);
            let dy = rng.gen_range(-max_dy..=max_dy);
            if dx != 0 || dy != 0 {
                result = translate(&result, dx, dy);
            }
        }

        result
    }
}

fn scale_brightness(img: &mut RgbImage, factor: f32) {
    for pixel in img.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = (*c as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Shift by (dx, dy) pixels; uncovered area is black
fn translate(img: &RgbImage, dx: i64, dy: i64) -> RgbImage {
    let (w, h) = img.dimensions();
    let mut out = RgbImage::from_pixel(w, h, Rgb([0, 0, 0]));
    imageops::overlay(&mut out, img, dx, dy);
    out
}
