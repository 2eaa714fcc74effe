//! Recursive listing of the remote tree.
//!
//! Both walks use an explicit work stack instead of recursion and return a
//! finished `Vec`, so nothing is accumulated across nested calls. A remote
//! root that does not exist yet lists as empty.

use super::retry::RetryExecutor;
use super::{join_remote, RemoteEntry, Transport, TransportError, TransportErrorKind};
use crate::executor::manifest::MANIFEST_FILE_NAME;
use tracing::debug;

async fn list_level<T>(
    remote: &mut RetryExecutor<'_, T>,
    root: &str,
    relative_dir: &str,
) -> Result<Vec<RemoteEntry>, TransportError>
where
    T: Transport + ?Sized,
{
    match remote.list_directory(&join_remote(root, relative_dir)).await {
        Err(e) if relative_dir.is_empty() && e.kind == TransportErrorKind::NotFound => {
            debug!("Remote root {} does not exist yet", root);
            Ok(Vec::new())
        }
        other => other,
    }
}

/// List every file below `root`, relative to `root`, depth first.
///
/// `.`/`..` entries and the manifest file at the root are skipped.
/// Directories are descended into but never returned.
pub async fn list_remote_files<T>(
    remote: &mut RetryExecutor<'_, T>,
    root: &str,
) -> Result<Vec<String>, TransportError>
where
    T: Transport + ?Sized,
{
    let mut files = Vec::new();
    let mut pending = vec![String::new()];

    while let Some(relative_dir) = pending.pop() {
        let entries = list_level(remote, root, &relative_dir).await?;
        let mut subdirs = Vec::new();

        for entry in entries.into_iter().filter(|e| !e.is_self_or_parent()) {
            let relative = join_remote(&relative_dir, &entry.name);
            if entry.is_directory {
                subdirs.push(relative);
            } else if entry.is_file && relative != MANIFEST_FILE_NAME {
                files.push(relative);
            }
        }

        // Reverse so the first subdirectory is walked next.
        pending.extend(subdirs.into_iter().rev());
    }

    debug!("Remote scan of {} found {} files", root, files.len());
    Ok(files)
}

/// List every directory below `root` (excluding `root` itself), relative to
/// `root`, children before their parents.
pub async fn list_remote_directories<T>(
    remote: &mut RetryExecutor<'_, T>,
    root: &str,
) -> Result<Vec<String>, TransportError>
where
    T: Transport + ?Sized,
{
    let mut preorder = Vec::new();
    let mut pending = vec![String::new()];

    while let Some(relative_dir) = pending.pop() {
        let entries = list_level(remote, root, &relative_dir).await?;
        for entry in entries.into_iter().filter(|e| !e.is_self_or_parent() && e.is_directory) {
            let relative = join_remote(&relative_dir, &entry.name);
            preorder.push(relative.clone());
            pending.push(relative);
        }
    }

    // Reversed pre-order always places a directory after all of its descendants.
    preorder.reverse();
    Ok(preorder)
}
