use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::{RelicError, Result};

/// Exclusive lock on the output repository, held for the duration of a
/// migration run so no second process mutates the target while the worker
/// is writing commits. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

const LOCK_FILE: &str = ".relic.lock";

impl RunLock {
    /// Lock the output directory, creating it (and the lock file) if needed.
    pub fn acquire(output: &Path) -> Result<Self> {
        std::fs::create_dir_all(output)?;
        let path = output.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| RelicError::Locked(path.display().to_string()))?;
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
