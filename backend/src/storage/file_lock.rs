//! Advisory locking around identity-store access
//!
//! Account operations read and rewrite the system user/group/password
//! databases through external tools. Readers take a shared lock and writers
//! an exclusive one on a dedicated lock file, so a listing never observes a
//! half-finished add or delete made by another smbadmin process.
//!
//! The lock file itself is left in place after release.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::StorageError;

#[derive(Error, Debug)]
pub enum FileLockError {
    #[error("Failed to acquire file lock: {reason}")]
    LockFailed { reason: String },

    #[error("Lock timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of advisory lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of holders; excludes exclusive holders
    Shared,
    /// Single holder
    Exclusive,
}

/// A held advisory lock, released when dropped
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
    locked: bool,
}

impl FileLock {
    /// Acquire `mode` on `path`, creating the lock file if needed
    ///
    /// Retries every 100ms until `timeout` elapses.
    pub fn acquire<P: AsRef<Path>>(
        path: P,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<Self, FileLockError> {
        let path = path.as_ref();
        debug!("Acquiring {:?} lock: {:?}", mode, path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        loop {
            match Self::try_lock(&file, mode) {
                Ok(()) => {
                    debug!("Acquired {:?} lock: {:?}", mode, path);
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                        mode,
                        locked: true,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(FileLockError::Timeout {
                            seconds: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    return Err(FileLockError::LockFailed {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    #[cfg(unix)]
    fn try_lock(file: &File, mode: LockMode) -> Result<(), std::io::Error> {
        use std::os::unix::io::AsRawFd;

        let operation = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, operation | libc::LOCK_NB) };

        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File, _mode: LockMode) -> Result<(), std::io::Error> {
        Ok(())
    }

    /// Release the lock explicitly (usually not needed due to Drop)
    pub fn unlock(&mut self) -> Result<(), std::io::Error> {
        if !self.locked {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let result = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
            if result != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }

        self.locked = false;
        debug!("Released {:?} lock: {:?}", self.mode, self.path);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            warn!("Failed to unlock file {:?} on drop: {}", self.path, e);
        }
    }
}

impl FileLockError {
    /// Attach the lock path for reporting
    pub fn into_storage_error(self, path: &Path) -> StorageError {
        let path = path.to_string_lossy().to_string();
        match self {
            FileLockError::Timeout { .. } => StorageError::FileLockTimeout { path },
            _ => StorageError::FileLock { path },
        }
    }
}
