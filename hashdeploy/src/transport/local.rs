//! Transport for a destination that is reachable as a local directory
//! (NFS/SMB mounts, a staging checkout, or a scratch tree in tests).

use super::{RemoteEntry, Transport, TransportError, TransportErrorKind};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filesystem-backed transport. Remote paths are used as filesystem paths.
#[derive(Debug, Default)]
pub struct LocalTransport {
    connected: bool,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self { connected: false }
    }

    fn check_connected(&self) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::not_connected())
        }
    }
}

fn io_error(err: io::Error, path: &str) -> TransportError {
    TransportError::from(err).with_path(path)
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        debug!("Local transport session opened");
        self.connected = true;
        Ok(())
    }

    async fn list_directory(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        self.check_connected()?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await.map_err(|e| io_error(e, path))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(e, path))? {
            let file_type = entry.file_type().await.map_err(|e| io_error(e, path))?;
            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_directory: file_type.is_dir(),
                is_file: file_type.is_file(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn file_size(&mut self, path: &str) -> Result<Option<u64>, TransportError> {
        self.check_connected()?;
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e, path)),
        }
    }

    async fn upload_file(&mut self, local_path: &Path, remote_path: &str) -> Result<(), TransportError> {
        self.check_connected()?;
        tokio::fs::copy(local_path, remote_path)
            .await
            .map_err(|e| io_error(e, remote_path))?;
        Ok(())
    }

    async fn download_file(&mut self, remote_path: &str, local_path: &Path) -> Result<(), TransportError> {
        self.check_connected()?;
        tokio::fs::copy(remote_path, local_path)
            .await
            .map_err(|e| io_error(e, remote_path))?;
        Ok(())
    }

    async fn delete_file(&mut self, path: &str) -> Result<(), TransportError> {
        self.check_connected()?;
        tokio::fs::remove_file(path).await.map_err(|e| io_error(e, path))
    }

    async fn remove_empty_directory(&mut self, path: &str) -> Result<(), TransportError> {
        self.check_connected()?;
        tokio::fs::remove_dir(path).await.map_err(|e| io_error(e, path))
    }

    async fn ensure_directory_exists(&mut self, path: &str) -> Result<(), TransportError> {
        self.check_connected()?;
        let target = PathBuf::from(path);
        match tokio::fs::metadata(&target).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(TransportError::new(TransportErrorKind::Other, "exists and is not a directory").with_path(path)),
            Err(_) => tokio::fs::create_dir_all(&target)
                .await
                .map_err(|e| io_error(e, path)),
        }
    }

    async fn close(&mut self) {
        if self.connected {
            debug!("Local transport session closed");
        }
        self.connected = false;
    }
}
