//! Remote hash manifest.
//!
//! The manifest records, for every deployed relative path, the content hash
//! that was uploaded. It is serialized as `.deploy_hash_manifest.json` in the
//! remote root, a flat JSON object of path to hash.

use crate::transport::retry::RetryExecutor;
use crate::transport::{join_remote, Transport};
use crate::utils::{DeployError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// File name of the manifest inside the remote root.
pub const MANIFEST_FILE_NAME: &str = ".deploy_hash_manifest.json";

/// Manifest value for a path whose hash is unknown but which must be kept.
pub const PRESERVED_SENTINEL: &str = "preserved";

/// Relative path to content hash, kept sorted so the serialized form is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        self.entries.insert(path.into(), hash.into());
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.entries.remove(path)
    }

    /// Record the sentinel for `path` unless it already has an entry.
    /// Returns true when an entry was added.
    pub fn mark_preserved(&mut self, path: &str) -> bool {
        if self.entries.contains_key(path) {
            return false;
        }
        self.entries.insert(path.to_string(), PRESERVED_SENTINEL.to_string());
        true
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &str) -> bool,
    {
        self.entries.retain(|path, hash| keep(path, hash));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Loads and saves the manifest through a retrying transport.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    remote_path: String,
}

impl ManifestStore {
    pub fn new(remote_root: &str) -> Self {
        Self {
            remote_path: join_remote(remote_root, MANIFEST_FILE_NAME),
        }
    }

    /// Load the manifest. A missing, unreadable, or corrupt manifest yields an
    /// empty one, which forces a full upload instead of failing the run.
    pub async fn load<T>(&self, remote: &mut RetryExecutor<'_, T>) -> Manifest
    where
        T: Transport + ?Sized,
    {
        match remote.file_size(&self.remote_path).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!("No remote manifest at {}, every file will be uploaded", self.remote_path);
                return Manifest::new();
            }
            Err(e) => {
                warn!("Could not check for remote manifest {}: {}", self.remote_path, e);
                return Manifest::new();
            }
        }

        match self.download(remote).await {
            Ok(manifest) => {
                info!("Loaded remote manifest: {} entries", manifest.len());
                manifest
            }
            Err(e) => {
                warn!("Failed to load remote manifest, assuming empty: {}", e);
                Manifest::new()
            }
        }
    }

    async fn download<T>(&self, remote: &mut RetryExecutor<'_, T>) -> Result<Manifest>
    where
        T: Transport + ?Sized,
    {
        let scratch = NamedTempFile::new()?;
        remote.download_file(&self.remote_path, scratch.path()).await?;
        let content = tokio::fs::read_to_string(scratch.path()).await?;
        Manifest::from_json(&content)
            .map_err(|e| DeployError::Manifest(format!("{} is not a flat string map: {}", self.remote_path, e)))
    }

    /// Upload `manifest`, replacing the remote copy. The scratch file is
    /// removed when it goes out of scope, whatever the outcome.
    pub async fn save<T>(&self, remote: &mut RetryExecutor<'_, T>, manifest: &Manifest) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        let json = manifest.to_json_pretty()?;
        let mut scratch = NamedTempFile::new()?;
        scratch.write_all(json.as_bytes())?;
        scratch.flush()?;

        remote.upload_file(scratch.path(), &self.remote_path).await?;
        info!("Saved remote manifest: {} entries", manifest.len());
        Ok(())
    }
}
