//! SFTP transport built on ssh2.
//!
//! ssh2 is a blocking library, so every call is moved onto the blocking
//! thread pool with `spawn_blocking`. The session lives behind an
//! `Arc<Mutex<_>>` only so it can cross into those tasks; calls are still
//! issued one at a time by the owning deployer.

use super::{RemoteEntry, Transport, TransportError, TransportErrorKind};
use async_trait::async_trait;
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, Session, Sftp};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

// libssh2 session error codes
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_SOCKET_TIMEOUT: i32 = -30;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

// SFTP status codes
const LIBSSH2_FX_NO_SUCH_FILE: i32 = 2;
const LIBSSH2_FX_PERMISSION_DENIED: i32 = 3;
const LIBSSH2_FX_NO_CONNECTION: i32 = 6;
const LIBSSH2_FX_CONNECTION_LOST: i32 = 7;
const LIBSSH2_FX_NO_SUCH_PATH: i32 = 10;

const DIRECTORY_MODE: i32 = 0o755;

/// Everything needed to (re)open an SFTP session.
#[derive(Debug, Clone)]
pub struct SftpCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Password authentication; falls back to the ssh-agent when `None`.
    pub password: Option<String>,
    /// Check the server host key against `~/.ssh/known_hosts`.
    pub verify_host_key: bool,
    pub timeout: Duration,
}

struct SftpSession {
    session: Session,
    sftp: Sftp,
}

pub struct SftpTransport {
    credentials: SftpCredentials,
    session: Option<Arc<Mutex<SftpSession>>>,
}

impl SftpTransport {
    pub fn new(credentials: SftpCredentials) -> Self {
        Self {
            credentials,
            session: None,
        }
    }

    /// Run a blocking SFTP operation against the current session.
    async fn with_session<F, T>(&self, op: F) -> Result<T, TransportError>
    where
        F: FnOnce(&SftpSession) -> Result<T, TransportError> + Send + 'static,
        T: Send + 'static,
    {
        let session = self.session.clone().ok_or_else(TransportError::not_connected)?;
        tokio::task::spawn_blocking(move || {
            let guard = session
                .lock()
                .map_err(|_| TransportError::new(TransportErrorKind::Other, "SFTP session lock poisoned"))?;
            op(&*guard)
        })
        .await
        .map_err(|e| TransportError::new(TransportErrorKind::Other, format!("SFTP task failed: {}", e)))?
    }
}

/// Map an ssh2 error onto the transport error kinds.
fn map_ssh_error(err: ssh2::Error) -> TransportError {
    let kind = match err.code() {
        ErrorCode::Session(code) => match code {
            LIBSSH2_ERROR_SOCKET_SEND | LIBSSH2_ERROR_SOCKET_RECV => TransportErrorKind::ConnectionReset,
            LIBSSH2_ERROR_SOCKET_DISCONNECT => TransportErrorKind::Disconnected,
            LIBSSH2_ERROR_TIMEOUT | LIBSSH2_ERROR_SOCKET_TIMEOUT => TransportErrorKind::Timeout,
            LIBSSH2_ERROR_AUTHENTICATION_FAILED => TransportErrorKind::Authentication,
            _ => TransportErrorKind::Other,
        },
        ErrorCode::SFTP(code) => match code {
            LIBSSH2_FX_NO_SUCH_FILE | LIBSSH2_FX_NO_SUCH_PATH => TransportErrorKind::NotFound,
            LIBSSH2_FX_PERMISSION_DENIED => TransportErrorKind::PermissionDenied,
            LIBSSH2_FX_NO_CONNECTION | LIBSSH2_FX_CONNECTION_LOST => TransportErrorKind::Disconnected,
            _ => TransportErrorKind::Other,
        },
    };
    TransportError::new(kind, err.message().to_string())
}

fn open_session(credentials: &SftpCredentials) -> Result<SftpSession, TransportError> {
    let address = (credentials.host.as_str(), credentials.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::new(TransportErrorKind::Dns, format!("{}: {}", credentials.host, e)))?
        .next()
        .ok_or_else(|| {
            TransportError::new(
                TransportErrorKind::Dns,
                format!("{}: no addresses resolved", credentials.host),
            )
        })?;

    let tcp = TcpStream::connect_timeout(&address, credentials.timeout)?;
    let mut session = Session::new().map_err(map_ssh_error)?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(credentials.timeout.as_millis()).unwrap_or(u32::MAX));
    session.handshake().map_err(map_ssh_error)?;

    if credentials.verify_host_key {
        verify_host_key(&session, credentials)?;
    }

    let auth = match &credentials.password {
        Some(password) => session.userauth_password(&credentials.user, password),
        None => session.userauth_agent(&credentials.user),
    };
    auth.map_err(|e| {
        TransportError::new(
            TransportErrorKind::Authentication,
            format!("{}@{}: {}", credentials.user, credentials.host, e.message()),
        )
    })?;

    if !session.authenticated() {
        return Err(TransportError::new(
            TransportErrorKind::Authentication,
            format!("{}@{}: authentication rejected", credentials.user, credentials.host),
        ));
    }

    let sftp = session.sftp().map_err(map_ssh_error)?;
    Ok(SftpSession { session, sftp })
}

fn verify_host_key(session: &Session, credentials: &SftpCredentials) -> Result<(), TransportError> {
    let auth_error = |msg: String| TransportError::new(TransportErrorKind::Authentication, msg);

    let (key, _) = session
        .host_key()
        .ok_or_else(|| auth_error(format!("{}: server sent no host key", credentials.host)))?;
    let known_hosts_file = dirs::home_dir()
        .map(|home| home.join(".ssh").join("known_hosts"))
        .ok_or_else(|| auth_error("cannot locate home directory for known_hosts".to_string()))?;

    let mut known_hosts = session.known_hosts().map_err(map_ssh_error)?;
    known_hosts
        .read_file(&known_hosts_file, KnownHostFileKind::OpenSSH)
        .map_err(|e| auth_error(format!("{}: {}", known_hosts_file.display(), e.message())))?;

    match known_hosts.check_port(&credentials.host, credentials.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(auth_error(format!(
            "{}: host key does not match known_hosts",
            credentials.host
        ))),
        CheckResult::NotFound => Err(auth_error(format!(
            "{}: host not present in known_hosts",
            credentials.host
        ))),
        CheckResult::Failure => Err(auth_error(format!(
            "{}: host key check failed",
            credentials.host
        ))),
    }
}

#[async_trait]
impl Transport for SftpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.close().await;

        let credentials = self.credentials.clone();
        info!(
            host = %credentials.host,
            port = credentials.port,
            user = %credentials.user,
            "Opening SFTP session"
        );

        let session = tokio::task::spawn_blocking(move || open_session(&credentials))
            .await
            .map_err(|e| TransportError::new(TransportErrorKind::Other, format!("SFTP task failed: {}", e)))??;

        self.session = Some(Arc::new(Mutex::new(session)));
        Ok(())
    }

    async fn list_directory(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let path = path.to_string();
        self.with_session(move |s| {
            let listing = s
                .sftp
                .readdir(Path::new(&path))
                .map_err(|e| map_ssh_error(e).with_path(&path))?;

            let mut entries: Vec<RemoteEntry> = listing
                .into_iter()
                .filter_map(|(entry_path, stat)| {
                    let name = entry_path.file_name()?.to_string_lossy().to_string();
                    Some(RemoteEntry {
                        name,
                        is_directory: stat.is_dir(),
                        is_file: stat.is_file(),
                    })
                })
                .collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        })
        .await
    }

    async fn file_size(&mut self, path: &str) -> Result<Option<u64>, TransportError> {
        let path = path.to_string();
        self.with_session(move |s| match s.sftp.stat(Path::new(&path)) {
            Ok(stat) if stat.is_file() => Ok(Some(stat.size.unwrap_or(0))),
            Ok(_) => Ok(None),
            Err(e) => {
                let mapped = map_ssh_error(e);
                if mapped.kind == TransportErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(mapped.with_path(&path))
                }
            }
        })
        .await
    }

    async fn upload_file(&mut self, local_path: &Path, remote_path: &str) -> Result<(), TransportError> {
        let local_path = local_path.to_path_buf();
        let remote_path = remote_path.to_string();
        self.with_session(move |s| {
            let mut source = std::fs::File::open(&local_path)
                .map_err(|e| TransportError::from(e).with_path(local_path.display().to_string()))?;
            let mut target = s
                .sftp
                .create(Path::new(&remote_path))
                .map_err(|e| map_ssh_error(e).with_path(&remote_path))?;
            let bytes = std::io::copy(&mut source, &mut target)
                .map_err(|e| TransportError::from(e).with_path(&remote_path))?;
            debug!(remote = %remote_path, bytes, "SFTP upload complete");
            Ok(())
        })
        .await
    }

    async fn download_file(&mut self, remote_path: &str, local_path: &Path) -> Result<(), TransportError> {
        let local_path: PathBuf = local_path.to_path_buf();
        let remote_path = remote_path.to_string();
        self.with_session(move |s| {
            let mut source = s
                .sftp
                .open(Path::new(&remote_path))
                .map_err(|e| map_ssh_error(e).with_path(&remote_path))?;
            let mut target = std::fs::File::create(&local_path)
                .map_err(|e| TransportError::from(e).with_path(local_path.display().to_string()))?;
            std::io::copy(&mut source, &mut target).map_err(|e| TransportError::from(e).with_path(&remote_path))?;
            Ok(())
        })
        .await
    }

    async fn delete_file(&mut self, path: &str) -> Result<(), TransportError> {
        let path = path.to_string();
        self.with_session(move |s| {
            s.sftp
                .unlink(Path::new(&path))
                .map_err(|e| map_ssh_error(e).with_path(&path))
        })
        .await
    }

    async fn remove_empty_directory(&mut self, path: &str) -> Result<(), TransportError> {
        let path = path.to_string();
        self.with_session(move |s| {
            s.sftp
                .rmdir(Path::new(&path))
                .map_err(|e| map_ssh_error(e).with_path(&path))
        })
        .await
    }

    async fn ensure_directory_exists(&mut self, path: &str) -> Result<(), TransportError> {
        let path = path.to_string();
        self.with_session(move |s| {
            let mut current = if path.starts_with('/') { String::from("/") } else { String::new() };

            for segment in path.split('/').filter(|segment| !segment.is_empty()) {
                if !current.is_empty() && !current.ends_with('/') {
                    current.push('/');
                }
                current.push_str(segment);

                match s.sftp.stat(Path::new(&current)) {
                    Ok(stat) if stat.is_dir() => continue,
                    Ok(_) => {
                        return Err(TransportError::new(
                            TransportErrorKind::Other,
                            format!("{} exists and is not a directory", current),
                        ))
                    }
                    Err(e) => {
                        let mapped = map_ssh_error(e);
                        if mapped.kind != TransportErrorKind::NotFound {
                            return Err(mapped.with_path(&current));
                        }
                    }
                }

                s.sftp
                    .mkdir(Path::new(&current), DIRECTORY_MODE)
                    .map_err(|e| map_ssh_error(e).with_path(&current))?;
            }
            Ok(())
        })
        .await
    }

    async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        let result = tokio::task::spawn_blocking(move || {
            let guard = session
                .lock()
                .map_err(|_| TransportError::new(TransportErrorKind::Other, "SFTP session lock poisoned"))?;
            guard
                .session
                .disconnect(None, "hashdeploy closing session", None)
                .map_err(map_ssh_error)
        })
        .await;

        match result {
            Ok(Ok(())) => debug!("SFTP session closed"),
            Ok(Err(e)) => warn!("Error while closing SFTP session: {}", e),
            Err(e) => warn!("SFTP close task failed: {}", e),
        }
    }
}
