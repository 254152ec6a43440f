//! Model Artifact Store
//!
//! An artifact is two files sharing a base path:
//!
//! - `<base>.<digest>.params`: the model's serialized parameters, named
//!   after the first 16 hex digits of their SHA-256
//! - `<base>.scaler.json`: manifest with schema version, model kind,
//!   feature variant, feature names, the fitted [`ScalerState`], the name
//!   and SHA-256 of the parameter file
//!
//! Saving never overwrites the parameters the current manifest names.
//! New parameters go to a new file first; renaming the new manifest into
//! place is the single commit point. Parameter files no manifest refers
//! to are removed after the commit.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::dataset::{FeatureVariant, ScalerState};
use crate::model::config::PipelineConfig;
use crate::model::{build_model, ModelKind, ScoringModel};
use crate::utils::error::{AuthenticityError, Result};

/// Bumped whenever the on-disk layout changes incompatibly
pub const SCHEMA_VERSION: u32 = 2;

const PARAMS_SUFFIX: &str = ".params";
const MANIFEST_SUFFIX: &str = ".scaler.json";
const DIGEST_LEN: usize = 16;

/// Companion file describing one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub schema_version: u32,
    pub kind: ModelKind,
    pub variant: FeatureVariant,
    pub feature_dim: usize,
    pub feature_names: Vec<String>,
    pub scaler: ScalerState,
    /// File name of the parameters, in the manifest's directory
    #[serde(default)]
    pub params_file: String,
    /// Hex SHA-256 of the parameter file
    pub params_sha256: String,
    /// RFC 3339
    pub created_at: String,
    pub crate_version: String,
}

/// A model restored from disk with its scaler
pub struct LoadedArtifact {
    pub model: Box<dyn ScoringModel>,
    pub scaler: ScalerState,
    pub manifest: ArtifactManifest,
}

impl std::fmt::Debug for LoadedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedArtifact")
            .field("kind", &self.model.kind())
            .field("manifest", &self.manifest)
            .finish()
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = base.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn file_stem(base: &Path) -> String {
    base.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<stem>.<digest>.params` for a given base and parameter hash
fn params_file_name(base: &Path, sha256: &str) -> String {
    format!("{}.{}{}", file_stem(base), &sha256[..DIGEST_LEN], PARAMS_SUFFIX)
}

/// The digest part of `<stem>.<digest>.params`, if `name` has that shape
fn digest_of<'a>(name: &'a str, stem: &str) -> Option<&'a str> {
    let digest = name
        .strip_prefix(stem)?
        .strip_prefix('.')?
        .strip_suffix(PARAMS_SUFFIX)?;
    (digest.len() == DIGEST_LEN && digest.bytes().all(|b| b.is_ascii_hexdigit())).then_some(digest)
}

/// Write `bytes` to a sibling temp file, then rename it over `path`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Reads and writes artifacts
pub struct ArtifactStore;

impl ArtifactStore {
    /// Accepts a base path or either artifact file and returns the base
    pub fn base_path(path: &Path) -> PathBuf {
        let s = path.to_string_lossy();
        if let Some(stripped) = s.strip_suffix(MANIFEST_SUFFIX) {
            return PathBuf::from(stripped);
        }
        if let Some(stripped) = s.strip_suffix(PARAMS_SUFFIX) {
            let base = match stripped.rsplit_once('.') {
                Some((head, digest))
                    if digest.len() == DIGEST_LEN && digest.bytes().all(|b| b.is_ascii_hexdigit()) =>
                {
                    head
                }
                _ => stripped,
            };
            return PathBuf::from(base);
        }
        path.to_path_buf()
    }

    /// Parameter file named by `manifest`
    pub fn params_path(base: &Path, manifest: &ArtifactManifest) -> PathBuf {
        base.with_file_name(&manifest.params_file)
    }

    pub fn manifest_path(base: &Path) -> PathBuf {
        with_suffix(base, MANIFEST_SUFFIX)
    }

    /// An artifact exists once its manifest has been committed
    pub fn exists(base: &Path) -> bool {
        Self::manifest_path(base).is_file()
    }

    /// Persist a trained model and its scaler under `base`
    pub fn save(model: &dyn ScoringModel, scaler: &ScalerState, base: &Path) -> Result<ArtifactManifest> {
        let params = model.to_bytes()?;
        Self::save_params(model.kind(), &params, scaler, base)
    }

    /// Persist already serialized parameters (used for best-so-far checkpoints)
    pub fn save_params(kind: ModelKind, params: &[u8], scaler: &ScalerState, base: &Path) -> Result<ArtifactManifest> {
        let variant = kind.feature_variant();
        if scaler.dim() != variant.dim() {
            return Err(AuthenticityError::schema_mismatch(
                variant,
                format!("scaler fitted on {} features", scaler.dim()),
            ));
        }

        let params_sha256 = sha256_hex(params);
        let manifest = ArtifactManifest {
            schema_version: SCHEMA_VERSION,
            kind,
            variant,
            feature_dim: variant.dim(),
            feature_names: variant.feature_names().iter().map(|s| s.to_string()).collect(),
            scaler: scaler.clone(),
            params_file: params_file_name(base, &params_sha256),
            params_sha256,
            created_at: Utc::now().to_rfc3339(),
            crate_version: crate::VERSION.to_string(),
        };

        let params_path = Self::params_path(base, &manifest);
        write_atomic(&params_path, params)?;
        write_atomic(&Self::manifest_path(base), &serde_json::to_vec_pretty(&manifest)?)?;
        Self::remove_stale_params(base, &manifest.params_file);

        info!(
            "Saved {} artifact to {} ({} bytes)",
            kind,
            params_path.display(),
            params.len()
        );
        Ok(manifest)
    }

    /// Best effort: a leftover file only costs disk space
    fn remove_stale_params(base: &Path, current: &str) {
        let stem = file_stem(base);
        let dir = match base.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };
        let Ok(entries) = fs::read_dir(&dir) else {
            return;
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == current || digest_of(&name, &stem).is_none() {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => debug!("Removed stale parameters {}", entry.path().display()),
                Err(e) => warn!("Could not remove stale parameters {}: {}", entry.path().display(), e),
            }
        }
    }

    /// Read and validate the manifest alone
    pub fn read_manifest(base: &Path) -> Result<ArtifactManifest> {
        let path = Self::manifest_path(base);
        let content = fs::read(&path).map_err(|e| AuthenticityError::model_load(&path, e.to_string()))?;
        let manifest: ArtifactManifest = serde_json::from_slice(&content)
            .map_err(|e| AuthenticityError::model_load(&path, format!("corrupt manifest: {}", e)))?;

        if manifest.schema_version != SCHEMA_VERSION {
            return Err(AuthenticityError::model_load(
                &path,
                format!(
                    "incompatible schema version {} (expected {})",
                    manifest.schema_version, SCHEMA_VERSION
                ),
            ));
        }
        if manifest.variant != manifest.kind.feature_variant()
            || manifest.feature_dim != manifest.variant.dim()
            || manifest.scaler.dim() != manifest.feature_dim
        {
            return Err(AuthenticityError::model_load(
                &path,
                "manifest is inconsistent with its feature variant",
            ));
        }
        let named = digest_of(&manifest.params_file, &file_stem(base));
        if named.is_none() || named != manifest.params_sha256.get(..DIGEST_LEN) {
            return Err(AuthenticityError::model_load(
                &path,
                format!("unexpected parameter file name {:?}", manifest.params_file),
            ));
        }
        Ok(manifest)
    }

    /// Restore a model and its scaler. With `expected` set, an artifact of
    /// another kind fails with `FeatureSchemaMismatch`.
    pub fn load(base: &Path, expected: Option<ModelKind>, config: &PipelineConfig) -> Result<LoadedArtifact> {
        let base = Self::base_path(base);
        let manifest = Self::read_manifest(&base)?;

        if let Some(kind) = expected {
            if kind != manifest.kind {
                return Err(AuthenticityError::schema_mismatch(
                    format!("{} artifact for {}", kind, kind.feature_variant()),
                    format!("{} artifact for {}", manifest.kind, manifest.variant),
                ));
            }
        }

        let params_path = Self::params_path(&base, &manifest);
        let params = fs::read(&params_path).map_err(|e| AuthenticityError::model_load(&params_path, e.to_string()))?;
        if sha256_hex(&params) != manifest.params_sha256 {
            return Err(AuthenticityError::model_load(&params_path, "checksum mismatch"));
        }

        let mut model = build_model(manifest.kind, config);
        model
            .load_bytes(&params)
            .map_err(|e| AuthenticityError::model_load(&params_path, e.to_string()))?;

        debug!(
            "Loaded {} artifact created {} by version {}",
            manifest.kind, manifest.created_at, manifest.crate_version
        );

        Ok(LoadedArtifact {
            model,
            scaler: manifest.scaler.clone(),
            manifest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::ForestConfig;
    use crate::model::{Example, NoopObserver, TreeEnsembleModel};

    fn trained_tree() -> (TreeEnsembleModel, ScalerState) {
        trained_tree_with(10)
    }

    fn trained_tree_with(n_estimators: usize) -> (TreeEnsembleModel, ScalerState) {
        let rows: Vec<Vec<f32>> = (0..20)
            .map(|i| {
                let s = if i % 2 == 0 { 0.9 } else { 0.3 } + (i as f32) * 0.001;
                vec![s, s, s, s, 1.0, 1.0, 1.0, 1.0, 12.0, 11.0]
            })
            .collect();
        let scaler = ScalerState::fit(&rows).unwrap();
        let examples: Vec<Example> = rows
            .iter()
            .enumerate()
            .map(|(i, r)| Example {
                features: scaler.transform(r).unwrap(),
                label: usize::from(i % 2 == 0),
                image: None,
            })
            .collect();

        let mut model = TreeEnsembleModel::new(ForestConfig {
            n_estimators,
            ..ForestConfig::default()
        });
        model.fit(&examples, &[], &mut NoopObserver).unwrap();
        (model, scaler)
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("models").join("tree_ensemble");
        let (model, scaler) = trained_tree();

        let manifest = ArtifactStore::save(&model, &scaler, &base).unwrap();
        assert_eq!(manifest.feature_dim, 10);
        assert_eq!(manifest.feature_names[9], "Variant Name Length");
        assert!(ArtifactStore::exists(&base));

        let loaded = ArtifactStore::load(&base, Some(ModelKind::TreeEnsemble), &PipelineConfig::default()).unwrap();
        assert_eq!(loaded.scaler, scaler);

        let x = scaler.transform(&[0.95, 0.92, 0.98, 0.94, 1.0, 1.0, 1.0, 1.0, 12.0, 11.0]).unwrap();
        assert_eq!(model.predict(&x, None).unwrap(), loaded.model.predict(&x, None).unwrap());
    }

    #[test]
    fn test_base_path_normalisation() {
        let base = Path::new("models/tree_ensemble");
        let params = Path::new("models/tree_ensemble.0123456789abcdef.params");
        assert_eq!(ArtifactStore::base_path(params), base);
        assert_eq!(ArtifactStore::base_path(&ArtifactStore::manifest_path(base)), base);
        assert_eq!(ArtifactStore::base_path(base), base);
        assert_eq!(
            ArtifactStore::base_path(Path::new("models/v1.2.params")),
            Path::new("models/v1.2")
        );
    }

    #[test]
    fn test_params_named_by_digest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tree_ensemble");
        let (model, scaler) = trained_tree();

        let manifest = ArtifactStore::save(&model, &scaler, &base).unwrap();
        assert_eq!(
            manifest.params_file,
            format!("tree_ensemble.{}.params", &manifest.params_sha256[..16])
        );
        assert!(ArtifactStore::params_path(&base, &manifest).is_file());
    }

    #[test]
    fn test_interrupted_save_keeps_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tree_ensemble");
        let (model, scaler) = trained_tree();
        let committed = ArtifactStore::save(&model, &scaler, &base).unwrap();

        let (retrained, _) = trained_tree_with(3);
        let new_params = retrained.to_bytes().unwrap();
        assert_ne!(new_params, model.to_bytes().unwrap());

        // The manifest temp file cannot be created, so the save fails
        // after the new parameters are already on disk
        fs::create_dir(dir.path().join(".tree_ensemble.scaler.json.tmp")).unwrap();
        assert!(ArtifactStore::save(&retrained, &scaler, &base).is_err());
        let written = dir
            .path()
            .join(params_file_name(&base, &sha256_hex(&new_params)));
        assert!(written.is_file());

        let loaded = ArtifactStore::load(&base, None, &PipelineConfig::default()).unwrap();
        assert_eq!(loaded.manifest, committed);
        let x = scaler.transform(&[0.95, 0.92, 0.98, 0.94, 1.0, 1.0, 1.0, 1.0, 12.0, 11.0]).unwrap();
        assert_eq!(model.predict(&x, None).unwrap(), loaded.model.predict(&x, None).unwrap());
    }

    #[test]
    fn test_resave_removes_stale_params() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tree_ensemble");
        let (model, scaler) = trained_tree();
        let first = ArtifactStore::save(&model, &scaler, &base).unwrap();

        let (other, _) = trained_tree_with(4);
        let second = ArtifactStore::save(&other, &scaler, &base).unwrap();
        assert_ne!(first.params_file, second.params_file);

        let best = dir.path().join("tree_ensemble_best.0123456789abcdef.params");
        fs::write(&best, b"unrelated").unwrap();
        ArtifactStore::save(&other, &scaler, &base).unwrap();

        assert!(!ArtifactStore::params_path(&base, &first).exists());
        assert!(ArtifactStore::params_path(&base, &second).is_file());
        assert!(best.is_file());
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArtifactStore::load(&dir.path().join("nothing"), None, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, AuthenticityError::ModelLoad { .. }));
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tree_ensemble");
        let (model, scaler) = trained_tree();
        ArtifactStore::save(&model, &scaler, &base).unwrap();

        let manifest = ArtifactStore::read_manifest(&base).unwrap();
        let params_path = ArtifactStore::params_path(&base, &manifest);
        let mut bytes = fs::read(&params_path).unwrap();
        bytes.push(b' ');
        fs::write(&params_path, bytes).unwrap();

        let err = ArtifactStore::load(&base, None, &PipelineConfig::default()).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_incompatible_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tree_ensemble");
        let (model, scaler) = trained_tree();
        let mut manifest = ArtifactStore::save(&model, &scaler, &base).unwrap();

        manifest.schema_version = SCHEMA_VERSION + 1;
        fs::write(ArtifactStore::manifest_path(&base), serde_json::to_vec(&manifest).unwrap()).unwrap();

        let err = ArtifactStore::load(&base, None, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, AuthenticityError::ModelLoad { .. }));
        assert!(err.to_string().contains("schema version"));
    }

    #[test]
    fn test_kind_mismatch_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tree_ensemble");
        let (model, scaler) = trained_tree();
        ArtifactStore::save(&model, &scaler, &base).unwrap();

        let err = ArtifactStore::load(&base, Some(ModelKind::DeepFusion), &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, AuthenticityError::FeatureSchemaMismatch { .. }));
    }

    #[test]
    fn test_corrupt_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tree_ensemble");
        fs::write(ArtifactStore::manifest_path(&base), b"{ not json").unwrap();
        let err = ArtifactStore::read_manifest(&base).unwrap_err();
        assert!(matches!(err, AuthenticityError::ModelLoad { .. }));
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.bin");
        write_atomic(&path, b"abc").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"abc");
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
