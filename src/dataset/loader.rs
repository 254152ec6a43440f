//! Metadata Store Reader
//!
//! Reads the whole JSON manifest into memory and validates it record by
//! record. Structural problems (not an array, an entry without `filename` or
//! `authenticity`) fail the load; anything else only rejects the offending
//! record, which is reported back to the caller in [`LoadedDataset`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use image::ImageReader;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Authenticity, CaptureMetadata, DatasetRecord, QualityScores};
use crate::model::config::DataConfig;
use crate::utils::error::{AuthenticityError, Result};
use crate::utils::logging::ProgressLogger;

/// Manifest entry shape, minus the two keys checked by hand
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    #[serde(default)]
    id: Option<Value>,
    series: String,
    variant: String,
    features: RawScores,
    metadata: RawCapture,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    uploaded_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScores {
    paint_quality: f32,
    sculpt_details: f32,
    packaging_auth: f32,
    material_texture: f32,
}

#[derive(Debug, Deserialize)]
struct RawCapture {
    quality: String,
    lighting: String,
    background: String,
    angle: String,
}

/// A manifest entry that failed validation
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    /// Position in the manifest array
    pub index: usize,
    pub reason: String,
}

/// Result of loading a manifest
#[derive(Debug, Clone, Default)]
pub struct LoadedDataset {
    /// Accepted records, in manifest order
    pub records: Vec<DatasetRecord>,
    /// Entries that failed validation
    pub rejected: Vec<RejectedRecord>,
    /// Entries skipped because their review status is `rejected`
    pub excluded_by_status: usize,
    /// Images that were missing or undecodable (image check only)
    pub skipped_images: Vec<PathBuf>,
    /// Number of entries in the manifest array
    pub manifest_entries: usize,
}

impl LoadedDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// (authentic, counterfeit) record counts
    pub fn class_counts(&self) -> (usize, usize) {
        let authentic = self
            .records
            .iter()
            .filter(|r| r.authenticity == Authenticity::Authentic)
            .count();
        (authentic, self.records.len() - authentic)
    }
}

impl fmt::Display for LoadedDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (authentic, counterfeit) = self.class_counts();
        write!(
            f,
            "{} of {} entries accepted ({} authentic, {} counterfeit); {} invalid, {} rejected by review, {} missing images",
            self.records.len(),
            self.manifest_entries,
            authentic,
            counterfeit,
            self.rejected.len(),
            self.excluded_by_status,
            self.skipped_images.len()
        )
    }
}

/// Reads a dataset directory laid out as `metadata.json` + `images/<label>/`
#[derive(Debug, Clone)]
pub struct MetadataReader {
    data_dir: PathBuf,
    manifest: String,
    images_dir: String,
    require_images: bool,
}

impl MetadataReader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let defaults = DataConfig::default();
        Self {
            data_dir: data_dir.into(),
            manifest: defaults.manifest,
            images_dir: defaults.images_dir,
            require_images: false,
        }
    }

    pub fn from_config(config: &DataConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            manifest: config.manifest.clone(),
            images_dir: config.images_dir.clone(),
            require_images: false,
        }
    }

    /// Reader for an explicit manifest path; the data root is its parent directory
    pub fn for_manifest(path: &Path) -> Self {
        let data_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let manifest = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            manifest,
            ..Self::new(data_dir)
        }
    }

    /// Require every record's image to exist and decode (fusion variant)
    pub fn with_images(mut self, require: bool) -> Self {
        self.require_images = require;
        self
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join(&self.manifest)
    }

    pub fn load(&self) -> Result<LoadedDataset> {
        let manifest_path = self.manifest_path();
        if !manifest_path.is_file() {
            return Err(AuthenticityError::DataNotFound(manifest_path));
        }

        info!("Loading manifest from {:?}", manifest_path);
        let content = fs::read_to_string(&manifest_path)?;
        let entries = match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                return Err(AuthenticityError::InvalidManifest(
                    "top-level value must be a JSON array".to_string(),
                ))
            }
            Err(e) => {
                return Err(AuthenticityError::InvalidManifest(format!("not valid JSON: {}", e)))
            }
        };

        let mut dataset = LoadedDataset {
            manifest_entries: entries.len(),
            ..LoadedDataset::default()
        };

        for (index, entry) in entries.iter().enumerate() {
            let filename = required_key(index, entry, "filename")?;
            let authenticity = required_key(index, entry, "authenticity")?;

            match self.parse_record(index, entry, filename, authenticity) {
                Ok(Some(record)) => dataset.records.push(record),
                Ok(None) => {
                    debug!("Entry #{} excluded by review status", index);
                    dataset.excluded_by_status += 1;
                }
                Err(e) => {
                    warn!("{}", e);
                    dataset.rejected.push(RejectedRecord {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if self.require_images {
            self.drop_unreadable_images(&mut dataset);
        }

        if dataset.records.is_empty() {
            return Err(AuthenticityError::EmptyDataset(format!(
                "no usable records in {:?} ({} entries)",
                manifest_path, dataset.manifest_entries
            )));
        }

        info!("{}", dataset);
        Ok(dataset)
    }

    fn parse_record(
        &self,
        index: usize,
        entry: &Value,
        filename: &Value,
        authenticity: &Value,
    ) -> Result<Option<DatasetRecord>> {
        let invalid = |reason: String| AuthenticityError::InvalidRecord { index, reason };

        let filename = match filename.as_str() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => return Err(invalid("`filename` must be a non-empty string".to_string())),
        };

        let raw_label = authenticity
            .as_str()
            .ok_or_else(|| invalid(format!("`authenticity` must be a string, got {}", authenticity)))?;
        let label = Authenticity::from_manifest(raw_label)
            .ok_or_else(|| invalid(format!("unknown authenticity value {:?}", raw_label)))?;

        let raw: RawRecord =
            serde_json::from_value(entry.clone()).map_err(|e| invalid(e.to_string()))?;

        if raw.status.as_deref() == Some("rejected") {
            return Ok(None);
        }

        let scores = QualityScores {
            paint_quality: check_score(index, "paintQuality", raw.features.paint_quality)?,
            sculpt_details: check_score(index, "sculptDetails", raw.features.sculpt_details)?,
            packaging_auth: check_score(index, "packagingAuth", raw.features.packaging_auth)?,
            material_texture: check_score(index, "materialTexture", raw.features.material_texture)?,
        };

        let id = match raw.id {
            Some(Value::String(id)) => id,
            Some(Value::Null) | None => filename.clone(),
            Some(other) => other.to_string(),
        };

        let image_path = self
            .data_dir
            .join(&self.images_dir)
            .join(raw_label)
            .join(&filename);

        Ok(Some(DatasetRecord {
            id,
            filename,
            image_path,
            authenticity: label,
            series: raw.series,
            variant: raw.variant,
            scores,
            capture: CaptureMetadata {
                quality: raw.metadata.quality,
                lighting: raw.metadata.lighting,
                background: raw.metadata.background,
                angle: raw.metadata.angle,
            },
            source: raw.source,
            status: raw.status,
            uploaded_at: raw.uploaded_at,
        }))
    }

    fn drop_unreadable_images(&self, dataset: &mut LoadedDataset) {
        let mut progress = ProgressLogger::new("Checking images", dataset.records.len());
        let mut kept = Vec::with_capacity(dataset.records.len());

        for record in dataset.records.drain(..) {
            progress.increment();
            match decode_check(&record.image_path) {
                Ok(()) => kept.push(record),
                Err(reason) => {
                    warn!("Skipping {:?}: {}", record.image_path, reason);
                    dataset.skipped_images.push(record.image_path);
                }
            }
        }

        progress.finish();
        dataset.records = kept;
    }
}

/// Load a manifest given its path; images are resolved next to it
pub fn load(path: &Path) -> Result<LoadedDataset> {
    MetadataReader::for_manifest(path).load()
}

fn required_key<'a>(index: usize, entry: &'a Value, key: &str) -> Result<&'a Value> {
    match entry.get(key) {
        Some(Value::Null) | None => Err(AuthenticityError::InvalidManifest(format!(
            "entry #{} has no `{}`",
            index, key
        ))),
        Some(value) => Ok(value),
    }
}

fn check_score(index: usize, name: &str, value: f32) -> Result<f32> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(AuthenticityError::InvalidRecord {
            index,
            reason: format!("`features.{}` = {} is outside 0-100", name, value),
        })
    }
}

/// Full decode; a readable header over truncated pixel data still fails
fn decode_check(path: &Path) -> std::result::Result<(), String> {
    if !path.is_file() {
        return Err("file not found".to_string());
    }
    ImageReader::open(path)
        .map_err(|e| e.to_string())?
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .decode()
        .map(|_| ())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn entry(filename: &str, authenticity: &str) -> Value {
        json!({
            "id": format!("id-{}", filename),
            "filename": filename,
            "series": "The Monsters",
            "variant": "Big into Energy",
            "authenticity": authenticity,
            "status": "approved",
            "features": {
                "paintQuality": 90,
                "sculptDetails": 85,
                "packagingAuth": 95,
                "materialTexture": 88
            },
            "metadata": {
                "quality": "high",
                "lighting": "natural",
                "background": "clean",
                "angle": "front"
            }
        })
    }

    fn write_manifest(dir: &Path, entries: &Value) -> PathBuf {
        let path = dir.join("metadata.json");
        fs::write(&path, serde_json::to_string_pretty(entries).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempdir().unwrap();
        let err = load(&dir.path().join("metadata.json")).unwrap_err();
        assert!(matches!(err, AuthenticityError::DataNotFound(_)));
    }

    #[test]
    fn test_empty_manifest() {
        let dir = tempdir().unwrap();
        let path = write_manifest(dir.path(), &json!([]));
        let err = load(&path).unwrap_err();
        assert!(matches!(err, AuthenticityError::EmptyDataset(_)));
    }

    #[test]
    fn test_not_an_array() {
        let dir = tempdir().unwrap();
        let path = write_manifest(dir.path(), &json!({"records": []}));
        assert!(matches!(load(&path), Err(AuthenticityError::InvalidManifest(_))));
    }

    #[test]
    fn test_valid_records_and_paths() {
        let dir = tempdir().unwrap();
        let path = write_manifest(dir.path(), &json!([entry("a.jpg", "authentic"), entry("b.jpg", "fake")]));

        let dataset = load(&path).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.class_counts(), (1, 1));
        assert_eq!(dataset.records[0].id, "id-a.jpg");
        assert_eq!(dataset.records[0].scores.paint_quality, 90.0);
        assert_eq!(
            dataset.records[1].image_path,
            dir.path().join("images").join("fake").join("b.jpg")
        );
        assert_eq!(dataset.records[1].authenticity, Authenticity::Counterfeit);
    }

    #[test]
    fn test_bad_label_rejects_record_only() {
        let dir = tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            &json!([entry("a.jpg", "authentic"), entry("b.jpg", "Authentic"), entry("c.jpg", "unknown")]),
        );

        let dataset = load(&path).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.rejected.len(), 2);
        assert_eq!(dataset.rejected[0].index, 1);
    }

    #[test]
    fn test_missing_field_rejects_record() {
        let dir = tempdir().unwrap();
        let mut broken = entry("b.jpg", "counterfeit");
        broken["features"].as_object_mut().unwrap().remove("paintQuality");
        let mut out_of_range = entry("c.jpg", "counterfeit");
        out_of_range["features"]["sculptDetails"] = json!(140);

        let path = write_manifest(dir.path(), &json!([entry("a.jpg", "authentic"), broken, out_of_range]));
        let dataset = load(&path).unwrap();

        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.rejected.len(), 2);
    }

    #[test]
    fn test_missing_label_key_is_fatal() {
        let dir = tempdir().unwrap();
        let mut broken = entry("b.jpg", "authentic");
        broken.as_object_mut().unwrap().remove("authenticity");

        let path = write_manifest(dir.path(), &json!([entry("a.jpg", "authentic"), broken]));
        assert!(matches!(load(&path), Err(AuthenticityError::InvalidManifest(_))));
    }

    #[test]
    fn test_rejected_status_is_excluded() {
        let dir = tempdir().unwrap();
        let mut rejected = entry("b.jpg", "counterfeit");
        rejected["status"] = json!("rejected");

        let path = write_manifest(dir.path(), &json!([entry("a.jpg", "authentic"), rejected]));
        let dataset = load(&path).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.excluded_by_status, 1);
        assert!(dataset.rejected.is_empty());
    }

    #[test]
    fn test_image_check_skips_missing_files() {
        let dir = tempdir().unwrap();
        let image_dir = dir.path().join("images").join("authentic");
        fs::create_dir_all(&image_dir).unwrap();
        image::RgbImage::from_pixel(8, 8, image::Rgb([200, 10, 10]))
            .save(image_dir.join("a.png"))
            .unwrap();
        fs::write(image_dir.join("c.png"), b"not an image").unwrap();

        write_manifest(
            dir.path(),
            &json!([entry("a.png", "authentic"), entry("b.png", "authentic"), entry("c.png", "authentic")]),
        );

        let dataset = MetadataReader::new(dir.path()).with_images(true).load().unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.skipped_images.len(), 2);
    }

    #[test]
    fn test_image_check_decodes_pixel_data() {
        let dir = tempdir().unwrap();
        let image_dir = dir.path().join("images").join("authentic");
        fs::create_dir_all(&image_dir).unwrap();
        let noisy = image::RgbImage::from_fn(24, 24, |x, y| image::Rgb([(x * 7) as u8, (y * 11) as u8, (x ^ y) as u8]));
        noisy.save(image_dir.join("whole.png")).unwrap();
        noisy.save(image_dir.join("cut.png")).unwrap();
        let bytes = fs::read(image_dir.join("cut.png")).unwrap();
        fs::write(image_dir.join("cut.png"), &bytes[..bytes.len() / 2]).unwrap();

        write_manifest(
            dir.path(),
            &json!([entry("whole.png", "authentic"), entry("cut.png", "authentic")]),
        );

        let dataset = MetadataReader::new(dir.path()).with_images(true).load().unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.skipped_images, vec![image_dir.join("cut.png")]);
    }

    #[test]
    fn test_all_images_missing_is_empty() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path(), &json!([entry("a.png", "authentic")]));

        let err = MetadataReader::new(dir.path()).with_images(true).load().unwrap_err();
        assert!(matches!(err, AuthenticityError::EmptyDataset(_)));
    }
}
