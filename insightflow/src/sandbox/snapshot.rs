//! Artifact snapshots of a working directory.

use crate::config::SandboxConfig;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

/// Lists every file under `root` (recursively, without following symlinks)
/// whose extension is an artifact extension.
pub(super) async fn artifact_files(root: &Path, config: &SandboxConfig) -> io::Result<BTreeSet<PathBuf>> {
    let mut found = BTreeSet::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && config.is_artifact(&path) {
                found.insert(path);
            }
        }
    }

    Ok(found)
}
