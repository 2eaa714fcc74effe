//! Local directory traversal.
//!
//! Produces every regular file under the deployment root with its absolute
//! path and its POSIX-style path relative to the root.

use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links to directories
    pub follow_links: bool,

    /// Path component names to skip entirely (exact match, e.g. `.git`)
    pub exclude: Vec<String>,
}

/// A file discovered during walking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Absolute path to the file
    pub path: PathBuf,

    /// Path relative to the root, `/` separated
    pub relative_path: String,

    /// File size in bytes
    pub size: u64,
}

impl LocalFile {
    /// Build a `LocalFile` from a walk entry.
    /// Symlinks are resolved; links to directories and broken links yield `None`.
    fn from_entry(entry: &DirEntry, root: &Path) -> io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let metadata = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => resolved,
                _ => return Ok(None),
            }
        } else {
            entry.metadata()?
        };

        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            relative_path: relative_to(&path, root),
            path,
            size: metadata.len(),
        }))
    }
}

/// Render a relative path with `/` separators regardless of platform.
pub fn to_posix(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// An entry below the root that could not be read. Whatever lies beneath it
/// is missing from the walk.
#[derive(Debug)]
pub struct SkippedEntry {
    pub relative_path: String,
    pub error: io::Error,
}

/// Files found by a walk, plus the entries it had to skip.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub files: Vec<LocalFile>,
    pub skipped: Vec<SkippedEntry>,
}

/// Walk a directory tree and collect all files, sorted by name at every level.
///
/// # Errors
/// Fails only if the root itself cannot be read. Unreadable entries below it
/// (permission errors, symlink loops) are reported in
/// [`WalkOutcome::skipped`] and the walk carries on.
///
/// # Example
/// ```no_run
/// use hashdeploy::fs::walker::{walk_directory, WalkOptions};
/// use std::path::Path;
///
/// let outcome = walk_directory(Path::new("./public"), &WalkOptions::default()).unwrap();
/// println!("Found {} files", outcome.files.len());
/// ```
pub fn walk_directory(root: &Path, options: &WalkOptions) -> io::Result<WalkOutcome> {
    let root = std::fs::canonicalize(root)?;
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        ));
    }

    let mut outcome = WalkOutcome::default();
    let walker = WalkDir::new(&root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !should_exclude(entry, &options.exclude));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let below_root = match err.path() {
                    Some(path) if err.depth() > 0 => Some(relative_to(path, &root)),
                    _ => None,
                };
                let Some(relative) = below_root else {
                    return Err(err.into());
                };
                outcome.skipped.push(SkippedEntry {
                    relative_path: relative,
                    error: err.into(),
                });
                continue;
            }
        };

        // Directories are traversed, never yielded
        if entry.file_type().is_dir() {
            continue;
        }

        match LocalFile::from_entry(&entry, &root) {
            Ok(Some(file)) => outcome.files.push(file),
            Ok(None) => {}
            Err(error) => outcome.skipped.push(SkippedEntry {
                relative_path: relative_to(entry.path(), &root),
                error,
            }),
        }
    }

    Ok(outcome)
}

fn relative_to(path: &Path, root: &Path) -> String {
    to_posix(path.strip_prefix(root).unwrap_or(path))
}

/// Check if a directory entry should be excluded
fn should_exclude(entry: &DirEntry, exclude: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    exclude.iter().any(|name| *name == file_name)
}
