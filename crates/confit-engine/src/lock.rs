use crate::EngineError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Cross-process exclusive lock over the backup root. Exactly one
/// transaction mutates the host at a time; a second invocation fails
/// fast instead of queueing behind an unknown amount of work.
pub struct EngineLock {
    lock_file: File,
}

impl EngineLock {
    pub fn acquire(lock_path: &Path) -> Result<Self, EngineError> {
        match Self::try_acquire(lock_path)? {
            Some(lock) => Ok(lock),
            None => Err(EngineError::Locked(lock_path.display().to_string())),
        }
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, EngineError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for EngineLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}
