//! Remote transport abstraction.
//!
//! The deployment engine only ever talks to the remote side through the
//! [`Transport`] trait. Two implementations ship with the crate:
//! - [`sftp::SftpTransport`] over SSH (ssh2)
//! - [`local::LocalTransport`] for a destination on a mounted filesystem
//!
//! Remote paths are always POSIX strings, independent of the local platform.

pub mod local;
pub mod retry;
pub mod sftp;
pub mod walk;

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::Path;

pub use local::LocalTransport;
pub use sftp::{SftpCredentials, SftpTransport};

/// A single entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_directory: bool,
    pub is_file: bool,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: false,
            is_file: true,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
            is_file: false,
        }
    }

    /// `.` and `..` entries some servers include in listings.
    pub fn is_self_or_parent(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// What went wrong in a transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    ConnectionReset,
    ConnectionRefused,
    Timeout,
    Dns,
    Disconnected,
    NotFound,
    PermissionDenied,
    Authentication,
    RetriesExhausted,
    Other,
}

/// Error returned by every [`Transport`] operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {}{message}", path_prefix(.path))]
pub struct TransportError {
    pub kind: TransportErrorKind,
    /// Cause reported by the session, without the path it concerned
    pub message: String,
    /// Remote or local path the failed call was about
    pub path: Option<String>,
}

fn path_prefix(path: &Option<String>) -> String {
    path.as_ref().map(|p| format!("{}: ", p)).unwrap_or_default()
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
        }
    }

    /// Attach the path the failed call was about.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn not_connected() -> Self {
        Self::new(TransportErrorKind::Disconnected, "not connected")
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::ConnectionReset => "connection reset",
            TransportErrorKind::ConnectionRefused => "connection refused",
            TransportErrorKind::Timeout => "timed out",
            TransportErrorKind::Dns => "name resolution failed",
            TransportErrorKind::Disconnected => "disconnected",
            TransportErrorKind::NotFound => "not found",
            TransportErrorKind::PermissionDenied => "permission denied",
            TransportErrorKind::Authentication => "authentication failed",
            TransportErrorKind::RetriesExhausted => "retries exhausted",
            TransportErrorKind::Other => "error",
        };
        f.write_str(label)
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => TransportErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused => TransportErrorKind::ConnectionRefused,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::Timeout,
            io::ErrorKind::NotConnected => TransportErrorKind::Disconnected,
            io::ErrorKind::NotFound => TransportErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => TransportErrorKind::PermissionDenied,
            _ => TransportErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

/// Operations the deployment engine needs from a remote file-transfer session.
///
/// Implementations own their session. `close` followed by `connect` must
/// build a brand new session rather than reuse the old one.
#[async_trait]
pub trait Transport: Send {
    /// Establish the session.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// List the entries of a remote directory.
    async fn list_directory(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TransportError>;

    /// Size of a remote file, `None` if it does not exist.
    async fn file_size(&mut self, path: &str) -> Result<Option<u64>, TransportError>;

    async fn upload_file(&mut self, local_path: &Path, remote_path: &str) -> Result<(), TransportError>;

    async fn download_file(&mut self, remote_path: &str, local_path: &Path) -> Result<(), TransportError>;

    async fn delete_file(&mut self, path: &str) -> Result<(), TransportError>;

    async fn remove_empty_directory(&mut self, path: &str) -> Result<(), TransportError>;

    /// Create `path` and any missing parents.
    async fn ensure_directory_exists(&mut self, path: &str) -> Result<(), TransportError>;

    /// Release the session. Never fails; errors are logged by the implementation.
    async fn close(&mut self);
}

/// Join a relative POSIX path onto a remote directory.
pub fn join_remote(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        return base.to_string();
    }
    if base.is_empty() {
        return relative.to_string();
    }
    if base.ends_with('/') {
        format!("{}{}", base, relative)
    } else {
        format!("{}/{}", base, relative)
    }
}

/// Parent directory of a remote path, `None` for a top-level name.
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}
