//! Deployment planning.
//!
//! Reconciles the local fingerprints against the remote manifest (and the
//! remote listing, when one was taken) into uploads, unchanged files,
//! deletions and preserved orphans. Planning is pure: the manifest goes in
//! by value and the working copy comes back out alongside the plan.

use super::preserve::should_preserve;
use crate::executor::manifest::Manifest;
use std::collections::HashSet;
use std::path::PathBuf;

/// A local file with its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintedFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub size: u64,
    pub hash: String,
}

/// Result of scanning and fingerprinting the local tree.
#[derive(Debug, Clone, Default)]
pub struct LocalSnapshot {
    /// Files in scan order
    pub files: Vec<FingerprintedFile>,

    /// Files or directories that exist locally but could not be read
    pub unreadable: Vec<String>,
}

impl LocalSnapshot {
    fn relative_paths(&self) -> HashSet<&str> {
        self.files.iter().map(|f| f.relative_path.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions<'a> {
    pub clean: bool,
    pub clear_destination: bool,
    pub preserve: &'a [String],
}

/// What a run is going to do. Derived once per run, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployPlan {
    /// New or changed files, in local scan order
    pub uploads: Vec<String>,

    /// Files whose hash matches the manifest
    pub unchanged: Vec<String>,

    /// Orphaned remote files to delete, in remote listing order
    pub deletions: Vec<String>,

    /// Orphaned remote files kept by a preserve rule
    pub preserved: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Planned {
    pub plan: DeployPlan,
    pub manifest: Manifest,
}

/// Removals for clear-destination mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearPlan {
    pub removals: Vec<String>,
    pub preserved: Vec<String>,
}

/// Split the full remote listing into files to wipe and files a preserve
/// rule keeps.
pub fn plan_clear_destination(remote_files: &[String], preserve: &[String]) -> ClearPlan {
    let (preserved, removals): (Vec<String>, Vec<String>) = remote_files
        .iter()
        .cloned()
        .partition(|path| should_preserve(path, preserve));
    ClearPlan { removals, preserved }
}

/// Compute the plan for one run.
///
/// `remote_files` is the remote listing when one was taken: the full listing
/// in clean mode, or the files that survived clearing in clear-destination
/// mode. In clear-destination mode `manifest` must be the empty baseline.
pub fn plan(
    local: &LocalSnapshot,
    mut manifest: Manifest,
    remote_files: Option<&[String]>,
    options: &PlanOptions<'_>,
) -> Planned {
    let mut plan = DeployPlan::default();

    for file in &local.files {
        if manifest.get(&file.relative_path) == Some(file.hash.as_str()) {
            plan.unchanged.push(file.relative_path.clone());
        } else {
            plan.uploads.push(file.relative_path.clone());
        }
    }

    if let Some(remote_files) = remote_files {
        let local_paths = local.relative_paths();
        // Anything at or under an unreadable entry may still exist locally
        let present = |path: &str| local_paths.contains(path) || should_preserve(path, &local.unreadable);
        let delete_orphans = options.clean && !options.clear_destination;

        for orphan in remote_files.iter().filter(|p| !present(p.as_str())) {
            if should_preserve(orphan, options.preserve) {
                manifest.mark_preserved(orphan);
                plan.preserved.push(orphan.clone());
            } else if delete_orphans {
                plan.deletions.push(orphan.clone());
            }
        }

        // Entries for paths that exist neither locally nor remotely are not
        // tracked any more.
        let remote_paths: HashSet<&str> = remote_files.iter().map(String::as_str).collect();
        manifest.retain(|path, _| present(path) || remote_paths.contains(path));
    }

    Planned { plan, manifest }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::manifest::PRESERVED_SENTINEL;
    use crate::sync::fingerprint::fingerprint_bytes;

    fn snapshot(files: &[(&str, &str)]) -> LocalSnapshot {
        LocalSnapshot {
            files: files
                .iter()
                .map(|(path, content)| FingerprintedFile {
                    path: PathBuf::from("/local").join(path),
                    relative_path: path.to_string(),
                    size: content.len() as u64,
                    hash: fingerprint_bytes(content.as_bytes()),
                })
                .collect(),
            unreadable: Vec::new(),
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_everything_new_with_empty_manifest() {
        let local = snapshot(&[("a.txt", "hello"), ("b.txt", "world")]);
        let planned = plan(&local, Manifest::new(), None, &PlanOptions::default());

        assert_eq!(planned.plan.uploads, vec!["a.txt", "b.txt"]);
        assert!(planned.plan.unchanged.is_empty());
        assert!(planned.plan.deletions.is_empty());
    }

    #[test]
    fn test_clean_removes_orphans() {
        let local = snapshot(&[("a.txt", "hello")]);
        let manifest: Manifest = [("a.txt", fingerprint_bytes(b"hello")), ("old.txt", fingerprint_bytes(b"x"))]
            .into_iter()
            .collect();
        let remote = strings(&["a.txt", "old.txt"]);
        let options = PlanOptions {
            clean: true,
            ..PlanOptions::default()
        };

        let planned = plan(&local, manifest, Some(&remote), &options);
        assert_eq!(planned.plan.unchanged, vec!["a.txt"]);
        assert!(planned.plan.uploads.is_empty());
        assert_eq!(planned.plan.deletions, vec!["old.txt"]);
        // Removed from the manifest only once the delete succeeds.
        assert!(planned.manifest.contains("old.txt"));
    }

    #[test]
    fn test_preserved_orphan_kept_with_sentinel() {
        let local = snapshot(&[("a.txt", "hello")]);
        let manifest: Manifest = [("a.txt", fingerprint_bytes(b"hello"))].into_iter().collect();
        let remote = strings(&["a.txt", "old.txt", "uploads/photo.jpg"]);
        let preserve = strings(&["old.txt", "uploads"]);
        let options = PlanOptions {
            clean: true,
            clear_destination: false,
            preserve: &preserve,
        };

        let planned = plan(&local, manifest, Some(&remote), &options);
        assert!(planned.plan.deletions.is_empty());
        assert_eq!(planned.plan.preserved, vec!["old.txt", "uploads/photo.jpg"]);
        assert_eq!(planned.manifest.get("old.txt"), Some(PRESERVED_SENTINEL));
        assert_eq!(planned.manifest.get("uploads/photo.jpg"), Some(PRESERVED_SENTINEL));
    }

    #[test]
    fn test_preserved_orphan_keeps_known_hash() {
        let local = snapshot(&[]);
        let manifest: Manifest = [("old.txt", "abc")].into_iter().collect();
        let remote = strings(&["old.txt"]);
        let preserve = strings(&["old.txt"]);
        let options = PlanOptions {
            clean: true,
            clear_destination: false,
            preserve: &preserve,
        };

        let planned = plan(&local, manifest, Some(&remote), &options);
        assert_eq!(planned.manifest.get("old.txt"), Some("abc"));
    }

    #[test]
    fn test_changed_content_is_uploaded() {
        let local = snapshot(&[("a.txt", "hello v2")]);
        let manifest: Manifest = [("a.txt", fingerprint_bytes(b"hello"))].into_iter().collect();

        let planned = plan(&local, manifest, None, &PlanOptions::default());
        assert_eq!(planned.plan.uploads, vec!["a.txt"]);
    }

    #[test]
    fn test_sentinel_never_counts_as_unchanged() {
        let local = snapshot(&[("a.txt", "hello")]);
        let manifest: Manifest = [("a.txt", PRESERVED_SENTINEL)].into_iter().collect();

        let planned = plan(&local, manifest, None, &PlanOptions::default());
        assert_eq!(planned.plan.uploads, vec!["a.txt"]);
    }

    #[test]
    fn test_without_clean_orphans_are_left_alone() {
        let local = snapshot(&[("a.txt", "hello")]);
        let remote = strings(&["old.txt"]);

        let planned = plan(&local, Manifest::new(), Some(&remote), &PlanOptions::default());
        assert!(planned.plan.deletions.is_empty());
        assert!(planned.plan.preserved.is_empty());
    }

    #[test]
    fn test_stale_entries_dropped_when_listing_known() {
        let local = snapshot(&[("a.txt", "hello")]);
        let manifest: Manifest = [("a.txt", "1"), ("gone.txt", "2")].into_iter().collect();
        let remote = strings(&["a.txt"]);
        let options = PlanOptions {
            clean: true,
            ..PlanOptions::default()
        };

        let planned = plan(&local, manifest.clone(), Some(&remote), &options);
        assert!(!planned.manifest.contains("gone.txt"));

        // Without a listing there is no evidence the file is gone remotely.
        let planned = plan(&local, manifest, None, &PlanOptions::default());
        assert!(planned.manifest.contains("gone.txt"));
    }

    #[test]
    fn test_unreadable_local_file_is_not_orphaned() {
        let mut local = snapshot(&[("a.txt", "hello")]);
        local.unreadable.push("locked.db".to_string());
        let remote = strings(&["a.txt", "locked.db"]);
        let options = PlanOptions {
            clean: true,
            ..PlanOptions::default()
        };

        let planned = plan(&local, Manifest::new(), Some(&remote), &options);
        assert!(planned.plan.deletions.is_empty());
        assert_eq!(planned.plan.uploads, vec!["a.txt"]);
    }

    #[test]
    fn test_unreadable_directory_protects_its_subtree() {
        let mut local = snapshot(&[("index.html", "hi")]);
        local.unreadable.push("sub/loop".to_string());
        let remote = strings(&["index.html", "sub/loop/page.html", "sub/loop2.html", "gone.txt"]);
        let mut manifest = Manifest::new();
        manifest.insert("sub/loop/old.html", "abc");
        let options = PlanOptions {
            clean: true,
            ..PlanOptions::default()
        };

        let planned = plan(&local, manifest, Some(&remote), &options);
        assert_eq!(planned.plan.deletions, vec!["sub/loop2.html", "gone.txt"]);
        assert!(planned.manifest.contains("sub/loop/old.html"));
    }

    #[test]
    fn test_clear_destination_respects_preserve() {
        let remote = strings(&["index.html", "uploads/a.png", "uploads2/b.png"]);
        let preserve = strings(&["uploads"]);

        let clear = plan_clear_destination(&remote, &preserve);
        assert_eq!(clear.removals, vec!["index.html", "uploads2/b.png"]);
        assert_eq!(clear.preserved, vec!["uploads/a.png"]);
    }

    #[test]
    fn test_clear_destination_reuploads_everything() {
        let local = snapshot(&[("a.txt", "hello")]);
        let survivors = strings(&["uploads/a.png"]);
        let preserve = strings(&["uploads"]);
        let options = PlanOptions {
            clean: true,
            clear_destination: true,
            preserve: &preserve,
        };

        let planned = plan(&local, Manifest::new(), Some(&survivors), &options);
        assert_eq!(planned.plan.uploads, vec!["a.txt"]);
        assert!(planned.plan.deletions.is_empty());
        assert_eq!(planned.manifest.get("uploads/a.png"), Some(PRESERVED_SENTINEL));
    }
}
