//! Document backups taken before each rewrite.
//!
//! A backup sits next to the document as `<file name>.backup_<unix seconds>`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::counter::Clock;
use crate::error::{Error, Result};

/// Copy `path` to a fresh backup file and return the backup's path.
pub fn create_backup(path: &Path, clock: &Clock) -> Result<PathBuf> {
    let stamp = clock.now().and_utc().timestamp();
    let base = backup_prefix(path)?;

    let mut backup = PathBuf::from(format!("{}{}", base.display(), stamp));
    let mut n = 1;
    while backup.exists() {
        backup = PathBuf::from(format!("{}{}_{}", base.display(), stamp, n));
        n += 1;
    }

    std::fs::copy(path, &backup)?;
    log::debug!("Backup created: {}", backup.display());
    Ok(backup)
}

/// Copy a backup over the document.
pub fn recover_from_backup(path: &Path, backup: &Path) -> Result<()> {
    std::fs::copy(backup, path)?;
    log::info!("Restored {} from {}", path.display(), backup.display());
    Ok(())
}

/// Backups of `path`, newest first.
pub fn list_backups(path: &Path) -> Result<Vec<PathBuf>> {
    let prefix = backup_prefix(path)?;
    let prefix = prefix
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        backups.push((modified, entry.path()));
    }

    backups.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(backups.into_iter().map(|(_, p)| p).collect())
}

/// Delete all but the newest `keep` backups of `path`. Returns how many
/// were removed.
pub fn cleanup_backups(path: &Path, keep: usize) -> Result<usize> {
    let backups = list_backups(path)?;
    let mut removed = 0;
    for old in backups.iter().skip(keep) {
        std::fs::remove_file(old)?;
        log::debug!("Old backup removed: {}", old.display());
        removed += 1;
    }
    Ok(removed)
}

fn backup_prefix(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::Other(format!("Not a file path: {}", path.display())))?;
    Ok(path.with_file_name(format!("{}.backup_", name.to_string_lossy())))
}
