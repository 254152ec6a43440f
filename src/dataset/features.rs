//! Feature Engineer
//!
//! Maps a [`DatasetRecord`] to a fixed-order numeric vector. The order below
//! is part of the artifact format: trained models and the fitted scaler are
//! both indexed by it.
//!
//! | idx | name                | value                                  |
//! |-----|---------------------|----------------------------------------|
//! | 0   | Paint Quality       | `paintQuality / 100`                   |
//! | 1   | Sculpt Details      | `sculptDetails / 100`                  |
//! | 2   | Packaging Auth      | `packagingAuth / 100`                  |
//! | 3   | Material Texture    | `materialTexture / 100`                |
//! | 4   | High Quality        | `1.0` if quality == high, else `0.5`   |
//! | 5   | Natural Lighting    | `1.0` if lighting == natural, else `0.5` |
//! | 6   | Clean Background    | `1.0` if background == clean, else `0.5` |
//! | 7   | Front Angle         | `1.0` if angle == front, else `0.5`    |
//! | 8   | Series Complexity   | character count of the series name     |
//! | 9   | Variant Name Length | character count of the variant name    |
//!
//! The fusion variant uses the first seven entries (no angle, no name
//! lengths); the tabular variant uses all ten.

use std::fmt;
use std::path::Path;

use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use serde::{Deserialize, Serialize};

use super::DatasetRecord;
use crate::utils::error::{AuthenticityError, Result};

/// Ordered feature values
pub type FeatureVector = Vec<f32>;

/// Names of the tabular features, in vector order
pub const FEATURE_NAMES: [&str; 10] = [
    "Paint Quality",
    "Sculpt Details",
    "Packaging Auth",
    "Material Texture",
    "High Quality",
    "Natural Lighting",
    "Clean Background",
    "Front Angle",
    "Series Complexity",
    "Variant Name Length",
];

const IDEAL: f32 = 1.0;
const NON_IDEAL: f32 = 0.5;

/// Which model consumes the vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureVariant {
    /// 7 engineered features, paired with a 224x224 RGB image
    Fusion,
    /// 10 tabular features, no image
    Tabular,
}

impl FeatureVariant {
    pub fn dim(&self) -> usize {
        match self {
            FeatureVariant::Fusion => 7,
            FeatureVariant::Tabular => 10,
        }
    }

    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES[..self.dim()]
    }

    pub fn uses_images(&self) -> bool {
        matches!(self, FeatureVariant::Fusion)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureVariant::Fusion => "fusion",
            FeatureVariant::Tabular => "tabular",
        }
    }
}

impl fmt::Display for FeatureVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} features)", self.as_str(), self.dim())
    }
}

fn soft_indicator(value: &str, ideal: &str) -> f32 {
    if value == ideal {
        IDEAL
    } else {
        NON_IDEAL
    }
}

/// Build the feature vector for `record`. Pure and deterministic.
pub fn extract(record: &DatasetRecord, variant: FeatureVariant) -> FeatureVector {
    let s = &record.scores;
    let c = &record.capture;

    let full = [
        s.paint_quality / 100.0,
        s.sculpt_details / 100.0,
        s.packaging_auth / 100.0,
        s.material_texture / 100.0,
        soft_indicator(&c.quality, "high"),
        soft_indicator(&c.lighting, "natural"),
        soft_indicator(&c.background, "clean"),
        soft_indicator(&c.angle, "front"),
        record.series.chars().count() as f32,
        record.variant.chars().count() as f32,
    ];

    full[..variant.dim()].to_vec()
}

/// `1.0` for authentic, `0.0` for counterfeit
pub fn label(record: &DatasetRecord) -> f32 {
    record.label() as f32
}

/// Target for the fusion model's confidence head: `|label - 0.5| * 2`.
///
/// For hard labels this is always `1.0`; the head learns label extremity,
/// not calibrated uncertainty.
pub fn confidence_target(label: f32) -> f32 {
    (label - 0.5).abs() * 2.0
}

/// Check a caller-supplied vector against the variant's dimension
pub fn check_dim(features: &[f32], variant: FeatureVariant) -> Result<()> {
    if features.len() != variant.dim() {
        return Err(AuthenticityError::schema_mismatch(
            variant,
            format!("{} features", features.len()),
        ));
    }
    Ok(())
}

/// Decode an image to RGB and resize it to `size` x `size`
pub fn load_image(path: &Path, size: u32) -> Result<RgbImage> {
    let to_err = |e: String| AuthenticityError::Image(path.to_path_buf(), e);

    let img = ImageReader::open(path)
        .map_err(|e| to_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| to_err(e.to_string()))?
        .decode()
        .map_err(|e| to_err(e.to_string()))?;

    Ok(img.resize_exact(size, size, FilterType::Triangle).to_rgb8())
}

/// Flatten an RGB image into CHW order, normalized to [0, 1]
pub fn image_to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
    }
    data
}

/// A record reduced to what the models consume
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: String,
    pub features: FeatureVector,
    /// `1` = authentic, `0` = counterfeit
    pub label: usize,
    pub image_path: std::path::PathBuf,
}

impl Sample {
    pub fn from_record(record: &DatasetRecord, variant: FeatureVariant) -> Self {
        Self {
            id: record.id.clone(),
            features: extract(record, variant),
            label: record.label(),
            image_path: record.image_path.clone(),
        }
    }
}

/// Extract samples for every record
pub fn build_samples(records: &[DatasetRecord], variant: FeatureVariant) -> Vec<Sample> {
    records.iter().map(|r| Sample::from_record(r, variant)).collect()
}
