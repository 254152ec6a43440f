//! Dataset module: manifest loading, feature engineering and splitting
//!
//! ## Manifest Layout
//!
//! ```text
//! training-data/
//! ├── metadata.json              # JSON array of records
//! └── images/
//!     ├── authentic/<filename>
//!     └── counterfeit/<filename>  # "fake/" when the manifest says "fake"
//! ```
//!
//! Each record carries a label, four 0-100 quality scores and capture
//! metadata. [`features::extract`] turns it into a fixed-order vector.

pub mod augmentation;
pub mod burn_dataset;
pub mod features;
pub mod loader;
pub mod scaler;
pub mod split;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use features::{extract, FeatureVariant, FeatureVector, Sample, FEATURE_NAMES};
pub use loader::{load, LoadedDataset, MetadataReader};
pub use scaler::ScalerState;
pub use split::{stratified_split, SplitConfig, SplitIndices};

/// Ground-truth authenticity of a figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authenticity {
    Authentic,
    Counterfeit,
}

impl Authenticity {
    /// Parse a manifest value. Matching is exact and case-sensitive;
    /// `"fake"` is the data generator's spelling of counterfeit.
    pub fn from_manifest(value: &str) -> Option<Self> {
        match value {
            "authentic" => Some(Authenticity::Authentic),
            "counterfeit" | "fake" => Some(Authenticity::Counterfeit),
            _ => None,
        }
    }

    /// Binary label: `1` = authentic, `0` = counterfeit
    pub fn label(&self) -> usize {
        match self {
            Authenticity::Authentic => 1,
            Authenticity::Counterfeit => 0,
        }
    }

    pub fn from_label(label: usize) -> Self {
        if label == 1 {
            Authenticity::Authentic
        } else {
            Authenticity::Counterfeit
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Authenticity::Authentic => "authentic",
            Authenticity::Counterfeit => "counterfeit",
        }
    }
}

impl fmt::Display for Authenticity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The four manually assessed 0-100 quality scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub paint_quality: f32,
    pub sculpt_details: f32,
    pub packaging_auth: f32,
    pub material_texture: f32,
}

/// How the photograph was taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub quality: String,
    pub lighting: String,
    pub background: String,
    pub angle: String,
}

/// One validated manifest entry. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// Manifest `id`, or the filename when absent
    pub id: String,
    pub filename: String,
    /// `<data_dir>/images/<authenticity>/<filename>`
    pub image_path: PathBuf,
    pub authenticity: Authenticity,
    pub series: String,
    pub variant: String,
    pub scores: QualityScores,
    pub capture: CaptureMetadata,
    pub source: Option<String>,
    pub status: Option<String>,
    pub uploaded_at: Option<String>,
}

impl DatasetRecord {
    pub fn label(&self) -> usize {
        self.authenticity.label()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A record with every score set to `score` and ideal or non-ideal capture metadata
    pub fn record(id: &str, authenticity: Authenticity, score: f32, ideal: bool) -> DatasetRecord {
        let pick = |good: &str, bad: &str| if ideal { good.to_string() } else { bad.to_string() };
        DatasetRecord {
            id: id.to_string(),
            filename: format!("{}.png", id),
            image_path: PathBuf::from(format!("images/{}/{}.png", authenticity, id)),
            authenticity,
            series: "The Monsters".to_string(),
            variant: "Have a Seat".to_string(),
            scores: QualityScores {
                paint_quality: score,
                sculpt_details: score,
                packaging_auth: score,
                material_texture: score,
            },
            capture: CaptureMetadata {
                quality: pick("high", "low"),
                lighting: pick("natural", "artificial"),
                background: pick("clean", "cluttered"),
                angle: "front".to_string(),
            },
            source: None,
            status: None,
            uploaded_at: None,
        }
    }
}
