//! Single-writer lock for the engine home directory.

use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Advisory flock on `bakelite.lock`, held for the runtime's lifetime.
///
/// Prevents two engine processes from mutating the same home directory.
/// The kernel releases the lock when the file descriptor is closed, so
/// dropping the guard (or crashing) always unlocks.
pub struct RuntimeLock {
    _file: File,
}

impl RuntimeLock {
    pub fn acquire(home_dir: &Path) -> BakeliteResult<Self> {
        let path = home_dir.join("bakelite.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return Err(BakeliteError::InvalidState(format!(
                "another bakelite process is using {}",
                home_dir.display()
            )));
        }

        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_until_released() {
        let temp = TempDir::new().unwrap();

        let first = RuntimeLock::acquire(temp.path()).unwrap();
        assert!(RuntimeLock::acquire(temp.path()).is_err());

        drop(first);
        let _second = RuntimeLock::acquire(temp.path()).unwrap();
    }
}
