use crate::BackupError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current backup format version. Incremented on incompatible layout changes.
pub const BACKUP_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout for the Confit backup store.
///
/// Snapshots live at `<root>/<operation>/<snapshot-id>/`, one directory
/// per transaction. Directories are created lazily on
/// [`initialize`](Self::initialize) and never reused.
#[derive(Debug, Clone)]
pub struct BackupLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct BackupVersion {
    format_version: u32,
}

impl BackupLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn operation_dir(&self, operation: &str) -> PathBuf {
        self.root.join(operation)
    }

    #[inline]
    pub fn snapshot_dir(&self, operation: &str, id: &str) -> PathBuf {
        self.operation_dir(operation).join(id)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn initialize(&self) -> Result<(), BackupError> {
        fs::create_dir_all(&self.root).map_err(|e| BackupError::RootUnwritable {
            path: self.root.display().to_string(),
            detail: e.to_string(),
        })?;

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = BackupVersion {
                format_version: BACKUP_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&self.root)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| BackupError::Io(e.error))?;
            crate::fsync_dir(&self.root)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), BackupError> {
        let version_path = self.root.join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: BackupVersion = serde_json::from_str(&content)?;

        if ver.format_version != BACKUP_FORMAT_VERSION {
            return Err(BackupError::VersionMismatch {
                expected: BACKUP_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
