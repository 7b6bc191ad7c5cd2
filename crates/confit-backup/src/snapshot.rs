use crate::layout::BackupLayout;
use crate::{BackupError, RestoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "snapshot.json";

/// What a backend wants captured before its `apply` runs.
#[derive(Debug, Clone)]
pub enum SnapshotTarget {
    /// Capture the current bytes of a file. A missing file is a valid
    /// capture (restore then deletes whatever apply created).
    File(PathBuf),
    /// Capture the output of a query command. If `apply` is set, restore
    /// re-runs it with `{value}` replaced by the captured trimmed output;
    /// otherwise the capture is record-only, kept for manual recovery.
    Command {
        label: String,
        query: Vec<String>,
        apply: Option<Vec<String>>,
    },
}

/// One captured piece of state inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SnapshotEntry {
    File {
        source: PathBuf,
        /// File name of the stored copy inside the snapshot directory.
        stored: String,
        checksum: String,
        /// False when the source did not exist at capture time.
        existed: bool,
    },
    Command {
        label: String,
        query: Vec<String>,
        apply: Option<Vec<String>>,
        output: String,
    },
}

/// An immutable capture of pre-mutation state. Never modified after
/// creation; only read back (for restore) or listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub operation: String,
    pub created_at: String,
    pub entries: Vec<SnapshotEntry>,
    pub dir: PathBuf,
}

/// Creates and restores snapshots under a [`BackupLayout`].
///
/// Capture failures are fatal to the caller (the engine must abort before
/// mutating anything it cannot restore). Restore is best-effort: failures
/// are collected and surfaced, never retried in a loop.
pub struct BackupStore {
    layout: BackupLayout,
}

impl BackupStore {
    pub fn new(layout: BackupLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &BackupLayout {
        &self.layout
    }

    /// Capture all targets into a fresh snapshot directory.
    pub fn take(
        &self,
        operation: &str,
        targets: &[SnapshotTarget],
    ) -> Result<Snapshot, BackupError> {
        self.layout.initialize()?;

        let id = snapshot_id(operation);
        let dir = self.layout.snapshot_dir(operation, &id);
        fs::create_dir_all(&dir).map_err(|e| BackupError::RootUnwritable {
            path: dir.display().to_string(),
            detail: e.to_string(),
        })?;

        let mut entries = Vec::with_capacity(targets.len());
        for (index, target) in targets.iter().enumerate() {
            match target {
                SnapshotTarget::File(source) => {
                    entries.push(self.capture_file(&dir, index, source)?);
                }
                SnapshotTarget::Command {
                    label,
                    query,
                    apply,
                } => {
                    entries.push(capture_command(label, query, apply.clone())?);
                }
            }
        }

        let snapshot = Snapshot {
            id,
            operation: operation.to_owned(),
            created_at: chrono::Utc::now().to_rfc3339(),
            entries,
            dir: dir.clone(),
        };
        write_manifest(&dir, &snapshot)?;
        debug!("snapshot taken: {} ({} entries)", dir.display(), targets.len());
        Ok(snapshot)
    }

    fn capture_file(
        &self,
        dir: &Path,
        index: usize,
        source: &Path,
    ) -> Result<SnapshotEntry, BackupError> {
        let basename = source
            .file_name()
            .map_or_else(|| "file".to_owned(), |n| n.to_string_lossy().into_owned());
        let stored = format!("{index:03}-{basename}");

        if !source.exists() {
            return Ok(SnapshotEntry::File {
                source: source.to_path_buf(),
                stored,
                checksum: String::new(),
                existed: false,
            });
        }

        let bytes = fs::read(source).map_err(|e| BackupError::SourceUnreadable {
            path: source.display().to_string(),
            detail: e.to_string(),
        })?;
        let checksum = blake3::hash(&bytes).to_hex().to_string();

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(&stored))
            .map_err(|e| BackupError::Io(e.error))?;
        crate::fsync_dir(dir)?;

        Ok(SnapshotEntry::File {
            source: source.to_path_buf(),
            stored,
            checksum,
            existed: true,
        })
    }

    /// Restore every entry, in reverse capture order. Per-entry failures
    /// are collected into [`RestoreError::Partial`]; the remaining entries
    /// are still attempted so a single bad path cannot strand the rest.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<(), RestoreError> {
        let mut failures = Vec::new();

        for entry in snapshot.entries.iter().rev() {
            if let Err(e) = self.restore_entry(snapshot, entry) {
                let what = match entry {
                    SnapshotEntry::File { source, .. } => source.display().to_string(),
                    SnapshotEntry::Command { label, .. } => label.clone(),
                };
                warn!("restore of '{what}' failed: {e}");
                failures.push(format!("{what}: {e}"));
            }
        }

        if failures.is_empty() {
            debug!("snapshot {} restored", snapshot.id);
            Ok(())
        } else {
            Err(RestoreError::Partial { failures })
        }
    }

    fn restore_entry(&self, snapshot: &Snapshot, entry: &SnapshotEntry) -> Result<(), RestoreError> {
        match entry {
            SnapshotEntry::File {
                source,
                stored,
                checksum,
                existed,
            } => {
                if !existed {
                    // The file did not exist before apply; remove whatever
                    // apply left behind.
                    if source.exists() {
                        fs::remove_file(source)?;
                    }
                    return Ok(());
                }
                let bytes = fs::read(snapshot.dir.join(stored))?;
                let actual = blake3::hash(&bytes).to_hex().to_string();
                if actual != *checksum {
                    return Err(RestoreError::ChecksumMismatch {
                        path: source.display().to_string(),
                        expected: checksum.clone(),
                        actual,
                    });
                }
                write_back(source, &bytes)
            }
            SnapshotEntry::Command {
                label,
                apply,
                output,
                ..
            } => {
                let Some(argv) = apply else {
                    debug!("entry '{label}' is record-only, skipping restore");
                    return Ok(());
                };
                // Manifests come back off disk via `load`; an edited or
                // corrupt one must not panic here.
                if argv.is_empty() {
                    return Err(RestoreError::EmptyCommand(label.clone()));
                }
                let value = output.trim();
                let argv: Vec<String> = argv
                    .iter()
                    .map(|a| a.replace("{value}", value))
                    .collect();
                let status = Command::new(&argv[0]).args(&argv[1..]).status()?;
                if status.success() {
                    Ok(())
                } else {
                    Err(RestoreError::Io(std::io::Error::other(format!(
                        "restore command for '{label}' exited with {status}"
                    ))))
                }
            }
        }
    }

    /// Load a snapshot manifest from its directory.
    pub fn load(dir: &Path) -> Result<Snapshot, BackupError> {
        let manifest = dir.join(MANIFEST_FILE);
        if !manifest.exists() {
            return Err(BackupError::ManifestNotFound(dir.display().to_string()));
        }
        let content = fs::read_to_string(&manifest)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// List snapshots, newest last, optionally filtered by operation.
    pub fn list(&self, operation: Option<&str>) -> Result<Vec<Snapshot>, BackupError> {
        let mut snapshots = Vec::new();
        if !self.layout.root().exists() {
            return Ok(snapshots);
        }
        for op_entry in fs::read_dir(self.layout.root())? {
            let op_dir = op_entry?.path();
            if !op_dir.is_dir() {
                continue;
            }
            let op_name = op_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(filter) = operation {
                if op_name != filter {
                    continue;
                }
            }
            for snap_entry in fs::read_dir(&op_dir)? {
                let snap_dir = snap_entry?.path();
                if !snap_dir.is_dir() {
                    continue;
                }
                match Self::load(&snap_dir) {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(e) => warn!("skipping unreadable snapshot {}: {e}", snap_dir.display()),
                }
            }
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }
}

/// Timestamp-derived snapshot id, unique per transaction. Nanosecond
/// precision so back-to-back transactions never share a directory.
fn snapshot_id(operation: &str) -> String {
    format!(
        "{}-{}",
        chrono::Utc::now().format("%Y%m%d%H%M%S%9f"),
        &blake3::hash(operation.as_bytes()).to_hex()[..8]
    )
}

fn capture_command(
    label: &str,
    query: &[String],
    apply: Option<Vec<String>>,
) -> Result<SnapshotEntry, BackupError> {
    if query.is_empty() {
        return Err(BackupError::QueryFailed {
            label: label.to_owned(),
            detail: "empty query command".to_owned(),
        });
    }
    let output = Command::new(&query[0])
        .args(&query[1..])
        .output()
        .map_err(|e| BackupError::QueryFailed {
            label: label.to_owned(),
            detail: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(BackupError::QueryFailed {
            label: label.to_owned(),
            detail: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(SnapshotEntry::Command {
        label: label.to_owned(),
        query: query.to_vec(),
        apply,
        output: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}

fn write_manifest(dir: &Path, snapshot: &Snapshot) -> Result<(), BackupError> {
    let content = serde_json::to_string_pretty(snapshot)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(MANIFEST_FILE))
        .map_err(|e| BackupError::Io(e.error))?;
    crate::fsync_dir(dir)?;
    Ok(())
}

/// Write restored bytes back to the original path.
///
/// Atomic rename into place where the filesystem allows it; falls back to
/// an in-place write for targets that reject rename (pseudo-files under
/// /proc, cross-device backup roots).
fn write_back(dest: &Path, bytes: &[u8]) -> Result<(), RestoreError> {
    let atomic = || -> Result<(), std::io::Error> {
        let parent = dest.parent().ok_or_else(|| {
            std::io::Error::other(format!("no parent directory for {}", dest.display()))
        })?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|e| e.error)?;
        crate::fsync_dir(parent)?;
        Ok(())
    };
    if atomic().is_ok() {
        return Ok(());
    }
    fs::write(dest, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, BackupStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(BackupLayout::new(dir.path().join("backups")));
        (dir, store)
    }

    #[test]
    fn take_and_restore_file() {
        let (dir, store) = setup();
        let target = dir.path().join("sysctl.conf");
        fs::write(&target, "net.core.somaxconn = 128\n").unwrap();

        let snapshot = store
            .take("tune", &[SnapshotTarget::File(target.clone())])
            .unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert!(snapshot.dir.join("snapshot.json").exists());

        fs::write(&target, "net.core.somaxconn = 9999\n").unwrap();
        store.restore(&snapshot).unwrap();
        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            "net.core.somaxconn = 128\n"
        );
    }

    #[test]
    fn restore_is_byte_identical() {
        let (dir, store) = setup();
        let target = dir.path().join("resolv.conf");
        let original = b"nameserver 127.0.0.53\noptions edns0 trust-ad\n".to_vec();
        fs::write(&target, &original).unwrap();

        let snapshot = store
            .take("dns", &[SnapshotTarget::File(target.clone())])
            .unwrap();
        fs::write(&target, "nameserver 203.0.113.1\n").unwrap();
        store.restore(&snapshot).unwrap();
        assert_eq!(fs::read(&target).unwrap(), original);
    }

    #[test]
    fn missing_source_is_captured_and_removed_on_restore() {
        let (dir, store) = setup();
        let target = dir.path().join("drop-in.conf");
        assert!(!target.exists());

        let snapshot = store
            .take("dns", &[SnapshotTarget::File(target.clone())])
            .unwrap();
        // Apply created the file; restore must delete it again.
        fs::write(&target, "DNS=8.8.8.8\n").unwrap();
        store.restore(&snapshot).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn unreadable_source_fails_take() {
        let (dir, store) = setup();
        // A directory where a file is expected reads as an error.
        let target = dir.path().join("actually-a-dir");
        fs::create_dir(&target).unwrap();
        let result = store.take("tune", &[SnapshotTarget::File(target)]);
        assert!(matches!(
            result,
            Err(BackupError::SourceUnreadable { .. })
        ));
    }

    #[test]
    fn corrupted_store_fails_checksum() {
        let (dir, store) = setup();
        let target = dir.path().join("sshd_config");
        fs::write(&target, "Port 22\n").unwrap();

        let snapshot = store
            .take("ssh", &[SnapshotTarget::File(target.clone())])
            .unwrap();
        // Corrupt the stored copy behind the store's back.
        if let SnapshotEntry::File { stored, .. } = &snapshot.entries[0] {
            fs::write(snapshot.dir.join(stored), "tampered").unwrap();
        }
        let err = store.restore(&snapshot).unwrap_err();
        assert!(matches!(err, RestoreError::Partial { .. }));
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn command_capture_and_record_only_restore() {
        let (_dir, store) = setup();
        let snapshot = store
            .take(
                "kernel",
                &[SnapshotTarget::Command {
                    label: "running-kernel".to_owned(),
                    query: vec!["echo".to_owned(), "5.15.0".to_owned()],
                    apply: None,
                }],
            )
            .unwrap();
        match &snapshot.entries[0] {
            SnapshotEntry::Command { output, .. } => assert_eq!(output.trim(), "5.15.0"),
            SnapshotEntry::File { .. } => panic!("expected command entry"),
        }
        // Record-only entries restore as a no-op.
        store.restore(&snapshot).unwrap();
    }

    #[test]
    fn failing_query_aborts_take() {
        let (_dir, store) = setup();
        let result = store.take(
            "kernel",
            &[SnapshotTarget::Command {
                label: "bad".to_owned(),
                query: vec!["false".to_owned()],
                apply: None,
            }],
        );
        assert!(matches!(result, Err(BackupError::QueryFailed { .. })));
    }

    #[test]
    fn load_and_list_round_trip() {
        let (dir, store) = setup();
        let target = dir.path().join("f");
        fs::write(&target, "x").unwrap();

        let s1 = store
            .take("tune", &[SnapshotTarget::File(target.clone())])
            .unwrap();
        let loaded = BackupStore::load(&s1.dir).unwrap();
        assert_eq!(loaded.id, s1.id);
        assert_eq!(loaded.operation, "tune");

        store
            .take("dns", &[SnapshotTarget::File(target)])
            .unwrap();
        assert_eq!(store.list(None).unwrap().len(), 2);
        assert_eq!(store.list(Some("dns")).unwrap().len(), 1);
        assert!(store.list(Some("ssh")).unwrap().is_empty());
    }

    #[test]
    fn snapshot_ids_never_reused() {
        let (dir, store) = setup();
        let target = dir.path().join("f");
        fs::write(&target, "x").unwrap();
        let a = store
            .take("tune", &[SnapshotTarget::File(target.clone())])
            .unwrap();
        let b = store.take("tune", &[SnapshotTarget::File(target)]).unwrap();
        assert_ne!(a.dir, b.dir);
    }

    #[test]
    fn empty_restore_command_is_an_error_not_a_panic() {
        let (dir, store) = setup();
        // A hand-edited or corrupt manifest can carry an empty argv;
        // restore must surface it rather than index into it.
        let snapshot = Snapshot {
            id: "test".to_owned(),
            operation: "tune".to_owned(),
            created_at: "now".to_owned(),
            entries: vec![SnapshotEntry::Command {
                label: "broken".to_owned(),
                query: Vec::new(),
                apply: Some(Vec::new()),
                output: String::new(),
            }],
            dir: dir.path().to_path_buf(),
        };
        let err = store.restore(&snapshot).unwrap_err();
        let RestoreError::Partial { failures } = err else {
            panic!("expected partial failure");
        };
        assert!(failures[0].contains("empty restore command"));
    }

    #[test]
    fn restore_continues_past_failures() {
        let (dir, store) = setup();
        let good = dir.path().join("good.conf");
        let bad = dir.path().join("bad.conf");
        fs::write(&good, "keep me\n").unwrap();
        fs::write(&bad, "doomed\n").unwrap();

        let snapshot = store
            .take(
                "tune",
                &[
                    SnapshotTarget::File(good.clone()),
                    SnapshotTarget::File(bad.clone()),
                ],
            )
            .unwrap();

        fs::write(&good, "mutated\n").unwrap();
        // Make the second entry unrestorable.
        fs::remove_file(&bad).unwrap();
        fs::create_dir(&bad).unwrap();

        let err = store.restore(&snapshot).unwrap_err();
        assert!(matches!(err, RestoreError::Partial { .. }));
        // The good entry was still restored.
        assert_eq!(fs::read_to_string(&good).unwrap(), "keep me\n");
    }
}
