//! Snapshot store for Confit: timestamped, path-addressed captures of host
//! state taken before any mutation, restorable on demand.
//!
//! `BackupLayout` manages the on-disk directory structure (one directory
//! per transaction, never reused), `BackupStore` captures file bytes and
//! command output with blake3 checksums and atomic writes, and restores
//! them best-effort in reverse capture order.

pub mod layout;
pub mod snapshot;

pub use layout::{BackupLayout, BACKUP_FORMAT_VERSION};
pub use snapshot::{BackupStore, Snapshot, SnapshotEntry, SnapshotTarget};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// On Linux with ext4 `data=ordered` (the default), renames are usually
/// durable without an explicit dir fsync, but POSIX does not guarantee
/// this, and a snapshot that vanishes in a crash defeats its purpose.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source '{path}' is unreadable: {detail}")]
    SourceUnreadable { path: String, detail: String },
    #[error("backup root '{path}' is not writable: {detail}")]
    RootUnwritable { path: String, detail: String },
    #[error("query command for '{label}' failed: {detail}")]
    QueryFailed { label: String, detail: String },
    #[error("snapshot manifest not found in {0}")]
    ManifestNotFound(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backup format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("restore I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("restore partially failed ({} entries): {}", .failures.len(), .failures.join("; "))]
    Partial { failures: Vec<String> },
    #[error("entry '{0}' carries an empty restore command")]
    EmptyCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_error_display() {
        let e = BackupError::SourceUnreadable {
            path: "/etc/sysctl.conf".to_owned(),
            detail: "permission denied".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/etc/sysctl.conf"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn restore_error_partial_display() {
        let e = RestoreError::Partial {
            failures: vec!["a: no".to_owned(), "b: no".to_owned()],
        };
        let msg = e.to_string();
        assert!(msg.contains("2 entries"));
        assert!(msg.contains("a: no"));
    }

    #[test]
    fn version_mismatch_display() {
        let e = BackupError::VersionMismatch {
            expected: 1,
            found: 9,
        };
        assert!(e.to_string().contains('9'));
    }
}
