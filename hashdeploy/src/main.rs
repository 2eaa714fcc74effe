//! hashdeploy - main entry point
//!
//! Publishes a local directory to a remote server, uploading only what
//! changed since the last run.

use anyhow::{Context, Result};
use clap::Parser;
use hashdeploy::config::{Config, Protocol};
use hashdeploy::executor::{DeployStats, Deployer};
use hashdeploy::transport::{LocalTransport, SftpTransport};
use hashdeploy::utils;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transport to use (overrides config)
    #[arg(long, value_parser = parse_protocol)]
    protocol: Option<Protocol>,

    /// Local directory to publish
    #[arg(long, value_name = "DIR")]
    local_dir: Option<PathBuf>,

    /// Remote directory to publish into
    #[arg(long, value_name = "DIR")]
    remote_dir: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(short, long)]
    user: Option<String>,

    #[arg(long, env = "HASHDEPLOY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Delete remote files that no longer exist locally
    #[arg(long)]
    clean: bool,

    /// Remove everything on the remote side (except preserved paths) first
    #[arg(long)]
    clear_destination: bool,

    /// Show what would change without touching the remote side
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Remote path never deleted (repeatable)
    #[arg(long, value_name = "PATH")]
    preserve: Vec<String>,

    /// Local file or directory name to skip (repeatable)
    #[arg(long, value_name = "NAME")]
    exclude: Vec<String>,

    /// Do not reconnect after connection failures
    #[arg(long)]
    no_reconnect: bool,

    /// Attempts per remote operation
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    /// Delay before reconnecting, in milliseconds
    #[arg(long, value_name = "MS")]
    retry_delay: Option<u64>,

    /// Print the run statistics as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log debug details
    #[arg(short, long)]
    verbose: bool,
}

fn parse_protocol(value: &str) -> std::result::Result<Protocol, String> {
    match value.to_ascii_lowercase().as_str() {
        "sftp" => Ok(Protocol::Sftp),
        "local" => Ok(Protocol::Local),
        other => Err(format!("unknown protocol '{}' (expected sftp or local)", other)),
    }
}

impl Args {
    /// Layer the command-line flags over the file configuration.
    fn apply(self, config: &mut Config) {
        let connection = &mut config.connection;
        if let Some(protocol) = self.protocol {
            connection.protocol = protocol;
        }
        if let Some(host) = self.host {
            connection.host = host;
        }
        if let Some(port) = self.port {
            connection.port = port;
        }
        if let Some(user) = self.user {
            connection.user = user;
        }
        if self.password.is_some() {
            connection.password = self.password;
        }

        let deploy = &mut config.deploy;
        if let Some(local_dir) = self.local_dir {
            deploy.local_root = local_dir;
        }
        if let Some(remote_dir) = self.remote_dir {
            deploy.remote_root = remote_dir;
        }
        deploy.clean |= self.clean;
        deploy.clear_destination |= self.clear_destination;
        deploy.dry_run |= self.dry_run;
        deploy.preserve.extend(self.preserve);
        deploy.exclude.extend(self.exclude);

        let retry = &mut config.retry;
        if self.no_reconnect {
            retry.reconnect = false;
        }
        if let Some(max_retries) = self.max_retries {
            retry.max_retries = max_retries;
        }
        if let Some(delay) = self.retry_delay {
            retry.retry_delay_ms = delay;
        }

        if let Some(level) = self.log_level {
            config.log.level = level;
        }
    }
}

async fn run(config: &Config) -> DeployStats {
    let options = config.deploy_options();
    let policy = config.retry_policy();

    match config.connection.protocol {
        Protocol::Sftp => {
            let transport = SftpTransport::new(config.sftp_credentials());
            Deployer::new(transport, options, policy).deploy().await
        }
        Protocol::Local => Deployer::new(LocalTransport::new(), options, policy).deploy().await,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    let (json, quiet, verbose) = (args.json, args.quiet, args.verbose);
    args.apply(&mut config);

    // Initialize logging
    utils::logger::init(utils::logger::effective_level(&config.log.level, quiet, verbose))?;

    config.validate()?;

    tracing::info!("Starting hashdeploy v{}", env!("CARGO_PKG_VERSION"));

    let stats = run(&config).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "{} uploaded, {} removed, {} unchanged, {} errors",
            stats.uploaded.len(),
            stats.removed.len(),
            stats.unchanged.len(),
            stats.errors.len()
        );
        for error in &stats.errors {
            eprintln!("  {}", error);
        }
    }

    Ok(if stats.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
