//! Test helpers shared by the unit tests and the integration tests.
//!
//! [`FakeTransport`] keeps a remote tree in memory, records every call, and
//! can be scripted to fail specific calls a given number of times.

use crate::transport::{remote_parent, RemoteEntry, Transport, TransportError, TransportErrorKind};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug)]
struct ScriptedFailure {
    call: String,
    remaining: u32,
    error: TransportError,
}

/// In-memory [`Transport`] with call recording and failure injection.
#[derive(Debug)]
pub struct FakeTransport {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    connected: bool,
    connects: u32,
    closes: u32,
    connect_failures: u32,
    failures: Vec<ScriptedFailure>,
    calls: Vec<String>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &str) -> String {
    if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        path.to_string()
    }
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

impl FakeTransport {
    pub fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        Self {
            files: BTreeMap::new(),
            dirs,
            connected: false,
            connects: 0,
            closes: 0,
            connect_failures: 0,
            failures: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Seed a directory and its ancestors.
    pub fn with_dir(mut self, path: &str) -> Self {
        self.add_dir(path);
        self
    }

    /// Seed a file, creating its ancestors.
    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        if let Some(parent) = remote_parent(path) {
            self.add_dir(parent);
        }
        self.files.insert(normalize(path), content.to_vec());
        self
    }

    fn add_dir(&mut self, path: &str) {
        let mut current = Some(normalize(path));
        while let Some(dir) = current {
            current = remote_parent(&dir).map(str::to_string);
            self.dirs.insert(dir);
        }
    }

    /// Make the next `times` calls to `connect` fail with a refused connection.
    pub fn fail_connects(&mut self, times: u32) {
        self.connect_failures = times;
    }

    /// Make the next `times` calls labelled `call` (e.g. `"upload /www/a.txt"`)
    /// fail with `error`.
    pub fn fail_call(&mut self, call: &str, times: u32, error: TransportError) {
        self.failures.push(ScriptedFailure {
            call: call.to_string(),
            remaining: times,
            error,
        });
    }

    pub fn connect_count(&self) -> u32 {
        self.connects
    }

    pub fn close_count(&self) -> u32 {
        self.closes
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Number of calls that change remote state.
    pub fn mutation_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| {
                ["upload ", "delete ", "rmdir ", "mkdir "]
                    .iter()
                    .any(|prefix| call.starts_with(prefix))
            })
            .count()
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    fn check(&mut self, call: String) -> Result<(), TransportError> {
        let scripted = self
            .failures
            .iter_mut()
            .find(|failure| failure.call == call && failure.remaining > 0)
            .map(|failure| {
                failure.remaining -= 1;
                failure.error.clone()
            });
        self.calls.push(call);

        if !self.connected {
            return Err(TransportError::not_connected());
        }
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn not_found(path: &str) -> TransportError {
        TransportError::new(TransportErrorKind::NotFound, "no such file").with_path(path)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connects += 1;
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(TransportError::new(
                TransportErrorKind::ConnectionRefused,
                "connection refused",
            ));
        }
        self.connected = true;
        Ok(())
    }

    async fn list_directory(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        self.check(format!("list {}", path))?;
        let dir = normalize(path);
        if !self.dirs.contains(&dir) {
            return Err(Self::not_found(path));
        }

        let mut entries: Vec<RemoteEntry> = self
            .dirs
            .iter()
            .filter(|candidate| *candidate != &dir && remote_parent(candidate) == Some(dir.as_str()))
            .map(|candidate| RemoteEntry::directory(file_name(candidate)))
            .chain(
                self.files
                    .keys()
                    .filter(|candidate| remote_parent(candidate) == Some(dir.as_str()))
                    .map(|candidate| RemoteEntry::file(file_name(candidate))),
            )
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn file_size(&mut self, path: &str) -> Result<Option<u64>, TransportError> {
        self.check(format!("size {}", path))?;
        Ok(self.files.get(&normalize(path)).map(|content| content.len() as u64))
    }

    async fn upload_file(&mut self, local_path: &Path, remote_path: &str) -> Result<(), TransportError> {
        self.check(format!("upload {}", remote_path))?;
        let parent = remote_parent(remote_path).unwrap_or("/");
        if !self.dirs.contains(parent) {
            return Err(Self::not_found(parent));
        }
        let content = tokio::fs::read(local_path).await?;
        self.files.insert(normalize(remote_path), content);
        Ok(())
    }

    async fn download_file(&mut self, remote_path: &str, local_path: &Path) -> Result<(), TransportError> {
        self.check(format!("download {}", remote_path))?;
        let content = self
            .files
            .get(&normalize(remote_path))
            .cloned()
            .ok_or_else(|| Self::not_found(remote_path))?;
        tokio::fs::write(local_path, content).await?;
        Ok(())
    }

    async fn delete_file(&mut self, path: &str) -> Result<(), TransportError> {
        self.check(format!("delete {}", path))?;
        self.files
            .remove(&normalize(path))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path))
    }

    async fn remove_empty_directory(&mut self, path: &str) -> Result<(), TransportError> {
        self.check(format!("rmdir {}", path))?;
        let dir = normalize(path);
        let occupied = self.files.keys().any(|f| remote_parent(f) == Some(dir.as_str()))
            || self
                .dirs
                .iter()
                .any(|d| d != &dir && remote_parent(d) == Some(dir.as_str()));
        if occupied {
            return Err(TransportError::new(TransportErrorKind::Other, "directory not empty").with_path(path));
        }
        if !self.dirs.remove(&dir) {
            return Err(Self::not_found(path));
        }
        Ok(())
    }

    async fn ensure_directory_exists(&mut self, path: &str) -> Result<(), TransportError> {
        self.check(format!("mkdir {}", path))?;
        self.add_dir(path);
        Ok(())
    }

    async fn close(&mut self) {
        self.closes += 1;
        self.connected = false;
    }
}
