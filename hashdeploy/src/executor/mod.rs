//! Deployment executor - runs one deployment against a remote transport.
//!
//! A run walks through fixed stages:
//! connect, clear destination (optional), load manifest, scan local,
//! scan remote (clean modes), plan, upload, delete orphans (clean mode),
//! prune empty directories, persist manifest, summarize, disconnect.
//!
//! Nothing here returns an error to the caller. Every failure is logged and
//! recorded in [`DeployStats::errors`], and the run carries on with the next
//! file where that is safe.

pub mod manifest;

use crate::fs::walker::{walk_directory, WalkOptions};
use crate::sync::fingerprint::fingerprint_file;
use crate::sync::planner::{self, plan_clear_destination, FingerprintedFile, Planned};
use crate::sync::preserve::should_preserve;
use crate::sync::{DeployPlan, LocalSnapshot, PlanOptions};
use crate::transfer::progress::{format_bytes, format_duration, format_speed, ProgressTracker};
use crate::transport::retry::{RetryExecutor, RetryPolicy};
use crate::transport::walk::{list_remote_directories, list_remote_files};
use crate::transport::{join_remote, remote_parent, Transport, TransportError};
use manifest::{Manifest, ManifestStore};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What to deploy and how.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Local directory whose contents are published
    pub local_root: PathBuf,

    /// Remote directory that mirrors `local_root`
    pub remote_root: String,

    /// Delete remote files that no longer exist locally
    pub clean: bool,

    /// Wipe the remote tree (except preserved paths) before uploading
    pub clear_destination: bool,

    /// Log what would happen without touching the remote side
    pub dry_run: bool,

    /// Relative remote paths that are never deleted
    pub preserve: Vec<String>,

    /// Local walk options (exclusions, symlinks)
    pub walk: WalkOptions,
}

impl DeployOptions {
    pub fn new(local_root: impl Into<PathBuf>, remote_root: impl Into<String>) -> Self {
        Self {
            local_root: local_root.into(),
            remote_root: remote_root.into(),
            clean: false,
            clear_destination: false,
            dry_run: false,
            preserve: Vec::new(),
            walk: WalkOptions::default(),
        }
    }
}

/// Outcome of a run. The shape is the same for real and dry runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployStats {
    /// Files uploaded (or that would be, in a dry run)
    pub uploaded: Vec<String>,

    /// Remote files deleted (or that would be)
    pub removed: Vec<String>,

    /// Files skipped because their hash matched the manifest
    pub unchanged: Vec<String>,

    /// Human-readable description of every failure
    pub errors: Vec<String>,

    pub uploaded_bytes: u64,
    pub duration_ms: u64,
}

impl DeployStats {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    fn record_error(&mut self, message: String) {
        error!("{}", message);
        self.errors.push(message);
    }
}

/// Runs deployments over an owned transport.
pub struct Deployer<T: Transport> {
    transport: T,
    options: DeployOptions,
    policy: RetryPolicy,
}

impl<T: Transport> Deployer<T> {
    pub fn new(transport: T, options: DeployOptions, policy: RetryPolicy) -> Self {
        Self {
            transport,
            options,
            policy,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run one deployment. Always disconnects before returning.
    pub async fn deploy(&mut self) -> DeployStats {
        let started = Instant::now();
        let mut stats = DeployStats::default();

        info!(
            "Deploying {} -> {}{}",
            self.options.local_root.display(),
            self.options.remote_root,
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        match self.transport.connect().await {
            Ok(()) => {
                let mut run = DeployRun {
                    options: &self.options,
                    store: ManifestStore::new(&self.options.remote_root),
                    remote: RetryExecutor::new(&mut self.transport, self.policy.clone()),
                    stats: &mut stats,
                };
                run.execute().await;
            }
            Err(e) => stats.record_error(format!("Failed to connect: {}", e)),
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        log_summary(&stats, self.options.dry_run);

        self.transport.close().await;
        stats
    }
}

/// Outcome of scanning and hashing the local tree.
struct LocalScan {
    snapshot: LocalSnapshot,
    failures: Vec<String>,
}

/// Walk `root` and fingerprint every file. An entry that cannot be walked or
/// hashed is reported but still counts as present locally, along with
/// everything beneath it.
fn scan_local(root: &Path, walk: &WalkOptions) -> io::Result<LocalScan> {
    let mut snapshot = LocalSnapshot::default();
    let mut failures = Vec::new();
    let outcome = walk_directory(root, walk)?;

    for skipped in outcome.skipped {
        failures.push(format!("Failed to walk {}: {}", skipped.relative_path, skipped.error));
        snapshot.unreadable.push(skipped.relative_path);
    }

    for file in outcome.files {
        match fingerprint_file(&file.path) {
            Ok(hash) => snapshot.files.push(FingerprintedFile {
                path: file.path,
                relative_path: file.relative_path,
                size: file.size,
                hash,
            }),
            Err(e) => {
                failures.push(format!("Failed to read {}: {}", file.relative_path, e));
                snapshot.unreadable.push(file.relative_path);
            }
        }
    }

    Ok(LocalScan { snapshot, failures })
}

/// State of a single connected run.
struct DeployRun<'a, T: Transport> {
    options: &'a DeployOptions,
    store: ManifestStore,
    remote: RetryExecutor<'a, T>,
    stats: &'a mut DeployStats,
}

impl<'a, T: Transport> DeployRun<'a, T> {
    async fn execute(&mut self) {
        let options = self.options;

        // Clearing resets the baseline: whatever was recorded before no
        // longer describes the remote tree.
        let (baseline, survivors) = if options.clear_destination {
            let survivors = self.clear_destination().await;
            (Manifest::new(), Some(survivors))
        } else {
            (self.store.load(&mut self.remote).await, None)
        };

        let local_root = options.local_root.clone();
        let walk = options.walk.clone();
        let scan = tokio::task::spawn_blocking(move || scan_local(&local_root, &walk))
            .await
            .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e.to_string())));
        let LocalScan { snapshot, failures } = match scan {
            Ok(scan) => scan,
            Err(e) => {
                self.stats.record_error(format!(
                    "Failed to scan local directory {}: {}",
                    options.local_root.display(),
                    e
                ));
                return;
            }
        };
        for failure in failures {
            self.stats.record_error(failure);
        }
        info!("Local scan: {} files", snapshot.files.len() + snapshot.unreadable.len());

        let remote_files = match survivors {
            Some(survivors) => Some(survivors),
            None if options.clean => self.scan_remote().await,
            None => None,
        };

        let plan_options = PlanOptions {
            clean: options.clean,
            clear_destination: options.clear_destination,
            preserve: &options.preserve,
        };
        let Planned { plan, mut manifest } =
            planner::plan(&snapshot, baseline, remote_files.as_deref(), &plan_options);
        self.report(&plan);

        self.upload_phase(&snapshot, &plan, &mut manifest).await;
        self.stats.unchanged = plan.unchanged.clone();

        if options.clean && !options.clear_destination {
            self.clean_phase(&plan, &mut manifest).await;
        }

        if (options.clean || options.clear_destination) && !options.dry_run {
            self.prune_empty_directories().await;
        }

        if options.dry_run {
            info!("Dry run: manifest not saved ({} entries)", manifest.len());
        } else if let Err(e) = self.store.save(&mut self.remote, &manifest).await {
            self.stats.record_error(format!("Failed to save manifest: {}", e));
        }
    }

    /// Delete everything below the remote root that no preserve rule keeps.
    /// Returns the files that remain remotely.
    async fn clear_destination(&mut self) -> Vec<String> {
        let root = &self.options.remote_root;
        info!("Clearing remote destination {}", root);

        let remote_files = match list_remote_files(&mut self.remote, root).await {
            Ok(files) => files,
            Err(e) => {
                self.stats
                    .record_error(format!("Failed to list remote files for clearing: {}", e));
                return Vec::new();
            }
        };

        let clear = plan_clear_destination(&remote_files, &self.options.preserve);
        for path in &clear.preserved {
            info!("Preserving {}", path);
        }
        for path in clear.removals {
            if self.delete_remote(&path).await {
                self.stats.removed.push(path);
            }
        }

        clear.preserved
    }

    /// Full remote listing for clean mode. Without one there is nothing to
    /// compare against, so the clean pass is skipped.
    async fn scan_remote(&mut self) -> Option<Vec<String>> {
        match list_remote_files(&mut self.remote, &self.options.remote_root).await {
            Ok(files) => {
                info!("Remote scan: {} files", files.len());
                Some(files)
            }
            Err(e) => {
                self.stats
                    .record_error(format!("Failed to list remote files, skipping clean: {}", e));
                None
            }
        }
    }

    fn report(&self, plan: &DeployPlan) {
        info!(
            "Analysis: {} to upload, {} unchanged, {} to remove, {} preserved",
            plan.uploads.len(),
            plan.unchanged.len(),
            plan.deletions.len(),
            plan.preserved.len()
        );

        for path in &plan.uploads {
            debug!(path = %path, "upload");
        }
        for path in &plan.deletions {
            debug!(path = %path, "remove");
        }
        for path in &plan.preserved {
            debug!(path = %path, "preserve");
        }
    }

    async fn upload_phase(&mut self, local: &LocalSnapshot, plan: &DeployPlan, manifest: &mut Manifest) {
        if plan.uploads.is_empty() {
            info!("Nothing to upload");
            return;
        }

        let index: HashMap<&str, &FingerprintedFile> = local
            .files
            .iter()
            .map(|f| (f.relative_path.as_str(), f))
            .collect();
        let total_bytes = plan
            .uploads
            .iter()
            .filter_map(|p| index.get(p.as_str()))
            .map(|f| f.size)
            .sum();

        let mut tracker = ProgressTracker::new(total_bytes, plan.uploads.len());
        let mut known_dirs = HashSet::new();

        for relative in &plan.uploads {
            let Some(file) = index.get(relative.as_str()) else {
                continue;
            };
            let label = tracker.begin_file();
            let remote_path = join_remote(&self.options.remote_root, relative);

            if self.options.dry_run {
                info!("{} Would upload {} ({})", label, relative, format_bytes(file.size));
            } else {
                if let Err(e) = self.upload(file, &remote_path, &mut known_dirs).await {
                    self.stats.record_error(format!("Failed to upload {}: {}", relative, e));
                    continue;
                }
                info!("{} Uploaded {} ({})", label, relative, format_bytes(file.size));
            }

            tracker.complete_bytes(file.size);
            debug!("{:.0}% of upload volume done", tracker.progress().percent_complete());
            manifest.insert(relative.as_str(), file.hash.as_str());
            self.stats.uploaded.push(relative.clone());
            self.stats.uploaded_bytes += file.size;
        }

        if !self.options.dry_run {
            info!(
                "Upload phase: {} in {} ({})",
                format_bytes(tracker.progress().transferred_bytes),
                format_duration(tracker.elapsed().as_secs()),
                format_speed(tracker.average_speed())
            );
        }
    }

    async fn upload(
        &mut self,
        file: &FingerprintedFile,
        remote_path: &str,
        known_dirs: &mut HashSet<String>,
    ) -> Result<(), TransportError> {
        if let Some(parent) = remote_parent(remote_path) {
            if !known_dirs.contains(parent) {
                self.remote.ensure_directory_exists(parent).await?;
                known_dirs.insert(parent.to_string());
            }
        }
        self.remote.upload_file(&file.path, remote_path).await
    }

    async fn clean_phase(&mut self, plan: &DeployPlan, manifest: &mut Manifest) {
        if !plan.preserved.is_empty() {
            info!("Keeping {} preserved remote files", plan.preserved.len());
        }

        for path in &plan.deletions {
            if self.delete_remote(path).await {
                manifest.remove(path);
                self.stats.removed.push(path.clone());
            }
        }
    }

    /// Delete one remote file. Returns whether it is gone (or would be).
    async fn delete_remote(&mut self, relative: &str) -> bool {
        if self.options.dry_run {
            info!("Would delete {}", relative);
            return true;
        }

        let remote_path = join_remote(&self.options.remote_root, relative);
        match self.remote.delete_file(&remote_path).await {
            Ok(()) => {
                info!("Deleted {}", relative);
                true
            }
            Err(e) => {
                self.stats.record_error(format!("Failed to delete {}: {}", relative, e));
                false
            }
        }
    }

    /// Remove directories left empty below the remote root, deepest first.
    /// The root itself and preserved directories stay.
    async fn prune_empty_directories(&mut self) {
        let root = &self.options.remote_root;
        let dirs = match list_remote_directories(&mut self.remote, root).await {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!("Skipping empty directory cleanup: {}", e);
                return;
            }
        };

        for dir in dirs {
            if should_preserve(&dir, &self.options.preserve) {
                continue;
            }

            let remote_dir = join_remote(root, &dir);
            let entries = match self.remote.list_directory(&remote_dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Could not inspect {}: {}", dir, e);
                    continue;
                }
            };
            if entries.iter().any(|e| !e.is_self_or_parent()) {
                continue;
            }

            match self.remote.remove_empty_directory(&remote_dir).await {
                Ok(()) => info!("Removed empty directory {}", dir),
                Err(e) => self
                    .stats
                    .record_error(format!("Failed to remove empty directory {}: {}", dir, e)),
            }
        }
    }
}

fn log_summary(stats: &DeployStats, dry_run: bool) {
    let heading = if dry_run { "Dry run complete" } else { "Deployment complete" };
    info!(
        "{}: {} uploaded ({}), {} removed, {} unchanged in {}",
        heading,
        stats.uploaded.len(),
        format_bytes(stats.uploaded_bytes),
        stats.removed.len(),
        stats.unchanged.len(),
        format_duration(stats.duration_ms / 1000)
    );

    if !stats.errors.is_empty() {
        warn!("{} errors during deployment", stats.errors.len());
    }
}
