//! Configuration management for hashdeploy.
//!
//! Loads configuration from a TOML file; command-line flags override
//! individual values afterwards.

use crate::executor::DeployOptions;
use crate::fs::walker::WalkOptions;
use crate::transport::retry::RetryPolicy;
use crate::transport::SftpCredentials;
use crate::utils::{DeployError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Remote transport selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// SSH file transfer
    #[default]
    Sftp,

    /// A directory on a mounted filesystem
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub protocol: Protocol,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub user: String,

    /// Password authentication; the SSH agent is used when unset
    #[serde(default)]
    pub password: Option<String>,

    /// Encrypted transport required
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Check the server host key against known_hosts
    #[serde(default = "default_true")]
    pub verify_certificate: bool,

    /// Connect and I/O timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub local_root: PathBuf,

    #[serde(default)]
    pub remote_root: String,

    #[serde(default)]
    pub clean: bool,

    #[serde(default)]
    pub clear_destination: bool,

    #[serde(default)]
    pub dry_run: bool,

    /// Remote paths that are never deleted
    #[serde(default)]
    pub preserve: Vec<String>,

    /// Local names skipped during the scan (e.g. `.git`)
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub follow_links: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Reconnect and retry on connection-level failures
    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Total attempts per operation
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            host: String::new(),
            port: default_port(),
            user: String::new(),
            password: None,
            secure: true,
            verify_certificate: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| DeployError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Check the merged configuration before anything connects.
    pub fn validate(&self) -> Result<()> {
        let deploy = &self.deploy;
        if deploy.local_root.as_os_str().is_empty() {
            return Err(DeployError::Config("local root is not set".to_string()));
        }
        if !deploy.local_root.is_dir() {
            return Err(DeployError::Config(format!(
                "local root {} is not a directory",
                deploy.local_root.display()
            )));
        }
        if deploy.remote_root.trim().is_empty() {
            return Err(DeployError::Config("remote root is not set".to_string()));
        }
        if self.retry.max_retries == 0 {
            return Err(DeployError::Config("max_retries must be at least 1".to_string()));
        }

        if self.connection.protocol == Protocol::Sftp {
            if self.connection.host.trim().is_empty() {
                return Err(DeployError::Config("host is required for sftp".to_string()));
            }
            if self.connection.user.trim().is_empty() {
                return Err(DeployError::Config("user is required for sftp".to_string()));
            }
            if !self.connection.secure {
                return Err(DeployError::Config(
                    "sftp is always encrypted; secure = false is not supported".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn deploy_options(&self) -> DeployOptions {
        DeployOptions {
            local_root: self.deploy.local_root.clone(),
            remote_root: self.deploy.remote_root.clone(),
            clean: self.deploy.clean,
            clear_destination: self.deploy.clear_destination,
            dry_run: self.deploy.dry_run,
            preserve: self.deploy.preserve.clone(),
            walk: WalkOptions {
                follow_links: self.deploy.follow_links,
                exclude: self.deploy.exclude.clone(),
            },
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_retries,
            delay: Duration::from_millis(self.retry.retry_delay_ms),
            reconnect: self.retry.reconnect,
        }
    }

    pub fn sftp_credentials(&self) -> SftpCredentials {
        let connection = &self.connection;
        SftpCredentials {
            host: connection.host.clone(),
            port: connection.port,
            user: connection.user.clone(),
            password: connection.password.clone(),
            verify_host_key: connection.verify_certificate,
            timeout: Duration::from_secs(connection.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_config(local_root: &Path) -> Config {
        let mut config = Config::default();
        config.connection.host = "example.com".to_string();
        config.connection.user = "deploy".to_string();
        config.deploy.local_root = local_root.to_path_buf();
        config.deploy.remote_root = "/var/www".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.protocol, Protocol::Sftp);
        assert_eq!(config.connection.port, 22);
        assert!(config.connection.secure);
        assert!(config.connection.verify_certificate);
        assert!(config.retry.reconnect);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.retry_delay_ms, 1000);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_from_file_fills_missing_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.toml");
        std::fs::write(
            &path,
            r#"
[connection]
host = "example.com"
user = "deploy"

[deploy]
local_root = "public"
remote_root = "/var/www"
clean = true
preserve = ["uploads", ".htaccess"]

[retry]
max_retries = 5
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.connection.host, "example.com");
        assert_eq!(config.connection.port, 22);
        assert!(config.deploy.clean);
        assert!(!config.deploy.clear_destination);
        assert_eq!(config.deploy.preserve, vec!["uploads", ".htaccess"]);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.retry_delay_ms, 1000);

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_from_file_rejects_unknown_protocol() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.toml");
        std::fs::write(&path, "[connection]\nprotocol = \"gopher\"\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }

    #[test]
    fn test_validate() {
        let dir = TempDir::new().unwrap();
        assert!(valid_config(dir.path()).validate().is_ok());

        let mut config = valid_config(dir.path());
        config.connection.host.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config(dir.path());
        config.connection.secure = false;
        assert!(config.validate().is_err());

        let mut config = valid_config(dir.path());
        config.retry.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config(dir.path());
        config.deploy.local_root = dir.path().join("missing");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_protocol_needs_no_host() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path());
        config.connection.protocol = Protocol::Local;
        config.connection.host.clear();
        config.connection.secure = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deploy_options_carry_walk_settings() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path());
        config.deploy.exclude = vec![".git".to_string()];
        config.deploy.dry_run = true;

        let options = config.deploy_options();
        assert!(options.dry_run);
        assert_eq!(options.walk.exclude, vec![".git"]);
        assert_eq!(options.remote_root, "/var/www");
    }
}
