//! Advisory file locking for single-writer-per-file discipline.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::{Mv2Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Exclusive,
    Shared,
}

/// Holds an OS advisory lock on the memory file for the lifetime of a handle.
///
/// A second writer attempting the same path fails fast with [`Mv2Error::Locked`]
/// rather than blocking. The lock is released on [`FileLock::release`] or drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    mode: LockMode,
    released: bool,
}

impl FileLock {
    /// Open `path` read-write and take the exclusive lock in one step.
    pub fn open_and_lock(path: &Path) -> Result<(File, Self)> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let lock = Self::acquire_with_mode(&file, LockMode::Exclusive).map_err(|err| match err {
            Mv2Error::Lock(_) => Mv2Error::Locked {
                path: path.to_path_buf(),
            },
            other => other,
        })?;
        Ok((file, lock))
    }

    /// Acquire a lock on an already-open file without blocking.
    pub fn acquire_with_mode(file: &File, mode: LockMode) -> Result<Self> {
        let clone = file.try_clone()?;
        // Fully qualified so the fs2 trait methods win over the std inherent
        // `File::try_lock_*` family, which returns a different error type.
        let locked = match mode {
            LockMode::Exclusive => FileExt::try_lock_exclusive(&clone),
            LockMode::Shared => FileExt::try_lock_shared(&clone),
        };
        match locked {
            Ok(()) => Ok(Self {
                file: clone,
                mode,
                released: false,
            }),
            Err(_) => Err(Mv2Error::Lock("advisory lock unavailable".into())),
        }
    }

    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn upgrade_to_exclusive(&mut self) -> Result<()> {
        if self.mode == LockMode::Exclusive {
            return Ok(());
        }
        FileExt::unlock(&self.file)?;
        FileExt::try_lock_exclusive(&self.file)
            .map_err(|_| Mv2Error::Lock("exclusive upgrade unavailable".into()))?;
        self.mode = LockMode::Exclusive;
        Ok(())
    }

    pub fn downgrade_to_shared(&mut self) -> Result<()> {
        if self.mode == LockMode::Shared {
            return Ok(());
        }
        FileExt::unlock(&self.file)?;
        FileExt::try_lock_shared(&self.file)
            .map_err(|_| Mv2Error::Lock("shared downgrade unavailable".into()))?;
        self.mode = LockMode::Shared;
        Ok(())
    }

    /// Idempotent release; drop performs the same cleanup.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        FileExt::unlock(&self.file)?;
        self.released = true;
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = FileExt::unlock(&self.file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_exclusive_lock_fails() {
        let dir = tempdir().expect("tmp");
        let path = dir.path().join("locked.mv2");
        std::fs::write(&path, b"stub").expect("write");

        let (_file, _lock) = FileLock::open_and_lock(&path).expect("first lock");
        let second = FileLock::open_and_lock(&path);
        assert!(matches!(second, Err(Mv2Error::Locked { .. })));
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempdir().expect("tmp");
        let path = dir.path().join("release.mv2");
        std::fs::write(&path, b"stub").expect("write");

        let (_file, mut lock) = FileLock::open_and_lock(&path).expect("lock");
        lock.release().expect("first release");
        lock.release().expect("second release");

        let (_file2, _lock2) = FileLock::open_and_lock(&path).expect("relock");
    }
}
