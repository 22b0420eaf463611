//! Byte-level backup and restore of the document file. The store never
//! mutates the original on backup; restore replaces the target atomically
//! from the caller's perspective (temp copy + rename-over).

use std::path::{Path, PathBuf};

use chrono::Local;
use md5::{Digest, Md5};

use crate::error::{RedlineError, Result};

const BACKUP_MARKER: &str = "_backup_";
const BACKUP_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

fn document_error(path: &Path, message: String) -> RedlineError {
    RedlineError::Document {
        path: path.to_path_buf(),
        message,
        location: snafu::Location::default(),
    }
}

/// Sibling path `<stem>_backup_<YYYYMMDD_HHMMSS><ext>` for a document.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = Local::now().format(BACKUP_STAMP_FORMAT);
    let name = format!("{stem}{BACKUP_MARKER}{stamp}{ext}");
    path.with_file_name(name)
}

/// Copy the document to its timestamped backup sibling, preserving metadata
/// where the platform allows. Returns the backup path.
pub fn backup(path: &Path) -> Result<PathBuf> {
    let backup_path = backup_path_for(path);
    std::fs::copy(path, &backup_path)
        .map_err(|e| document_error(path, format!("backup failed: {e}")))?;
    if let Ok(meta) = std::fs::metadata(path) {
        // best effort; a read-only original should not make the backup read-only
        let _ = std::fs::set_permissions(&backup_path, meta.permissions());
    }
    tracing::info!(backup = %backup_path.display(), "created document backup");
    Ok(backup_path)
}

/// Overwrite `target` with the bytes of `backup_path`. Writes to a temp
/// sibling first and renames over the target so a crash mid-restore never
/// leaves a half-written document.
pub fn restore(backup_path: &Path, target: &Path) -> Result<()> {
    let bytes = std::fs::read(backup_path)
        .map_err(|e| document_error(backup_path, format!("cannot read backup: {e}")))?;

    let tmp = target.with_file_name(format!(
        ".{}.restore-tmp",
        target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string())
    ));
    std::fs::write(&tmp, &bytes)
        .map_err(|e| document_error(target, format!("restore staging failed: {e}")))?;
    match std::fs::rename(&tmp, target) {
        Ok(()) => {}
        Err(_) => {
            // rename-over unavailable (e.g. cross-device): fall back to a
            // plain overwrite and clean up the staging file
            std::fs::write(target, &bytes)
                .map_err(|e| document_error(target, format!("restore failed: {e}")))?;
            let _ = std::fs::remove_file(&tmp);
        }
    }
    tracing::info!(target = %target.display(), "restored document from backup");
    Ok(())
}

/// Lowercase hex MD5 of the file contents.
pub fn checksum(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .map_err(|e| document_error(path, format!("cannot read for checksum: {e}")))?;
    let mut hasher = Md5::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Delete `_backup_`-stamped siblings in `dir` older than `retention_days`.
/// Failures are logged and skipped; cleanup never fails a run.
pub fn cleanup_old_backups(dir: &Path, retention_days: u32) {
    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), "backup cleanup skipped: {e}");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.contains(BACKUP_MARKER) {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified());
        match modified {
            Ok(mtime) if mtime < cutoff => {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    tracing::warn!(file = %name, "could not delete old backup: {e}");
                } else {
                    tracing::debug!(file = %name, "deleted expired backup");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(file = %name, "could not stat backup: {e}"),
        }
    }
}
