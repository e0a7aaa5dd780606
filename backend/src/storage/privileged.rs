//! Privileged file access
//!
//! The Samba configuration and account databases are owned by root. Every
//! read and write the backend performs on them goes through a
//! [`PrivilegedFs`], so the same storage code runs against the real system
//! (via sudo) or a scratch directory (plain file operations).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult, StorageError};
use crate::exec::{CommandOptions, Tools};

/// Privileged file primitive used by the storage layer
pub trait PrivilegedFs: Send + Sync {
    /// Whether mutating operations can be performed at all
    fn has_write_access(&self) -> bool;

    /// Read a file; `None` when it does not exist
    fn read(&self, path: &Path) -> BackendResult<Option<Vec<u8>>>;

    /// Copy `src` over `dest` and set `dest` to `mode`
    fn install(&self, src: &Path, dest: &Path, mode: u32) -> BackendResult<()>;

    /// Copy `src` to `dest` preserving mode
    fn copy(&self, src: &Path, dest: &Path) -> BackendResult<()>;

    /// Remove a file; a missing file is not an error
    fn remove(&self, path: &Path) -> BackendResult<()>;

    /// Create a directory (and parents) with `mode`, group-owned by `group`
    ///
    /// Ownership and mode failures are logged, not returned.
    fn create_dir(&self, path: &Path, group: Option<&str>, mode: u32) -> BackendResult<()>;

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Read a file as UTF-8 text, lossily
    fn read_to_string(&self, path: &Path) -> BackendResult<Option<String>> {
        Ok(self
            .read(path)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Fail with `PermissionDenied` unless `fs` can perform mutations
///
/// Called before any file I/O or command of a mutating operation.
pub fn require_write_access(fs: &dyn PrivilegedFs, operation: &str) -> BackendResult<()> {
    if fs.has_write_access() {
        Ok(())
    } else {
        warn!("No privileged access for {}", operation);
        Err(BackendError::PermissionDenied {
            operation: operation.to_string(),
        })
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn write_failed(path: &Path, reason: impl ToString) -> StorageError {
    StorageError::WriteFailed {
        path: path_str(path),
        reason: reason.to_string(),
    }
}

/// Runs `cp`, `chmod`, `rm`, `mkdir`, `chown` and `cat` through sudo
#[derive(Clone)]
pub struct SudoFs {
    tools: Tools,
}

impl SudoFs {
    pub fn new(tools: Tools) -> Self {
        Self { tools }
    }

    fn run(&self, program: &str, args: &[&str], dest: &Path) -> BackendResult<()> {
        let output = self
            .tools
            .run_privileged(program, args, CommandOptions::new())?;
        if output.success() {
            Ok(())
        } else {
            warn!("{} {} failed: {}", program, args.join(" "), output.diagnostic());
            Err(write_failed(dest, output.diagnostic()).into())
        }
    }
}

impl PrivilegedFs for SudoFs {
    fn has_write_access(&self) -> bool {
        match self
            .tools
            .run_privileged("true", &[], CommandOptions::new())
        {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("Privilege check failed: {}", e);
                false
            }
        }
    }

    fn read(&self, path: &Path) -> BackendResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => return Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => debug!("Direct read of {:?} failed ({}), retrying with sudo", path, e),
        }

        let p = path_str(path);
        let output = self
            .tools
            .run_privileged("cat", &[p.as_str()], CommandOptions::new())?;
        if output.success() {
            return Ok(Some(output.stdout));
        }

        let diagnostic = output.diagnostic();
        if diagnostic.contains("No such file") {
            Ok(None)
        } else {
            Err(StorageError::ReadFailed {
                path: p,
                reason: diagnostic,
            }
            .into())
        }
    }

    fn install(&self, src: &Path, dest: &Path, mode: u32) -> BackendResult<()> {
        let (s, d) = (path_str(src), path_str(dest));
        let mode = format!("{:o}", mode);
        self.run("cp", &[s.as_str(), d.as_str()], dest)?;
        self.run("chmod", &[mode.as_str(), d.as_str()], dest)
    }

    fn copy(&self, src: &Path, dest: &Path) -> BackendResult<()> {
        let (s, d) = (path_str(src), path_str(dest));
        self.run("cp", &["-p", s.as_str(), d.as_str()], dest)
    }

    fn remove(&self, path: &Path) -> BackendResult<()> {
        let p = path_str(path);
        self.run("rm", &["-f", p.as_str()], path)
    }

    fn create_dir(&self, path: &Path, group: Option<&str>, mode: u32) -> BackendResult<()> {
        let p = path_str(path);
        self.run("mkdir", &["-p", p.as_str()], path)?;

        if let Some(group) = group {
            let owner = format!("root:{}", group);
            if let Err(e) = self.run("chown", &[owner.as_str(), p.as_str()], path) {
                warn!("Could not set ownership of {}: {}", p, e);
            }
        }

        let mode = format!("{:o}", mode);
        if let Err(e) = self.run("chmod", &[mode.as_str(), p.as_str()], path) {
            warn!("Could not set mode of {}: {}", p, e);
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        if path.exists() {
            return true;
        }
        let p = path_str(path);
        matches!(
            self.tools.run_privileged("test", &["-e", p.as_str()], CommandOptions::new()),
            Ok(output) if output.success()
        )
    }
}

/// Plain file operations, for local mode and tests
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
    writable: bool,
}

impl LocalFs {
    /// Files are expected under `root`; write access is probed there
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writable: true,
        }
    }

    /// Report no write access, whatever the filesystem says
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        let _ = (path, mode);
        Ok(())
    }
}

impl PrivilegedFs for LocalFs {
    fn has_write_access(&self) -> bool {
        if !self.writable {
            return false;
        }
        fs::create_dir_all(&self.root).is_ok() && tempfile::tempfile_in(&self.root).is_ok()
    }

    fn read(&self, path: &Path) -> BackendResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFailed {
                path: path_str(path),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    fn install(&self, src: &Path, dest: &Path, mode: u32) -> BackendResult<()> {
        fs::copy(src, dest).map_err(|e| write_failed(dest, e))?;
        Self::set_mode(dest, mode).map_err(|e| write_failed(dest, e))?;
        Ok(())
    }

    fn copy(&self, src: &Path, dest: &Path) -> BackendResult<()> {
        fs::copy(src, dest).map_err(|e| write_failed(dest, e))?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> BackendResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(write_failed(path, e).into()),
        }
    }

    fn create_dir(&self, path: &Path, group: Option<&str>, mode: u32) -> BackendResult<()> {
        fs::create_dir_all(path).map_err(|e| write_failed(path, e))?;
        if let Some(group) = group {
            debug!("Skipping group ownership {} for {:?} in local mode", group, path);
        }
        if let Err(e) = Self::set_mode(path, mode) {
            warn!("Could not set mode of {:?}: {}", path, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Elevation, ScriptedRunner};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn sudo_fs(runner: &Arc<ScriptedRunner>) -> SudoFs {
        SudoFs::new(Tools::new(runner.clone(), Elevation::Sudo("sudo".to_string())))
    }

    #[test]
    fn test_sudo_install_copies_then_chmods() {
        let runner = Arc::new(ScriptedRunner::new());
        let fs = sudo_fs(&runner);

        fs.install(
            Path::new("/tmp/staged"),
            Path::new("/etc/samba/smb.conf"),
            0o644,
        )
        .unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "sudo -n cp /tmp/staged /etc/samba/smb.conf",
                "sudo -n chmod 644 /etc/samba/smb.conf",
            ]
        );
    }

    #[test]
    fn test_sudo_install_failure_is_write_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("cp", 1, "cp: cannot create regular file");
        let fs = sudo_fs(&runner);

        let result = fs.install(Path::new("/tmp/a"), Path::new("/etc/samba/smb.conf"), 0o644);
        assert!(result.is_err());
        assert!(!runner.was_called("chmod"));
    }

    #[test]
    fn test_sudo_create_dir_tolerates_chown_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("chown", 1, "chown: invalid group: 'root:smbusers'");
        let fs = sudo_fs(&runner);

        fs.create_dir(Path::new("/srv/docs"), Some("smbusers"), 0o2775)
            .unwrap();
        assert!(runner.was_called("sudo -n chmod 2775 /srv/docs"));
    }

    #[test]
    fn test_sudo_write_access_check() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("sudo -n true", 1, "sudo: a password is required");
        assert!(!sudo_fs(&runner).has_write_access());
    }

    #[test]
    fn test_sudo_read_missing_file() {
        let runner = Arc::new(ScriptedRunner::new());
        let fs = sudo_fs(&runner);
        let dir = tempdir().unwrap();
        assert_eq!(fs.read(&dir.path().join("absent.conf")).unwrap(), None);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_local_fs_round_trip() {
        let dir = tempdir().unwrap();
        let fs = LocalFs::new(dir.path());
        assert!(fs.has_write_access());

        let src = dir.path().join("staged");
        let dest = dir.path().join("smb.conf");
        std::fs::write(&src, "[global]\n").unwrap();

        fs.install(&src, &dest, 0o644).unwrap();
        assert_eq!(
            fs.read_to_string(&dest).unwrap().as_deref(),
            Some("[global]\n")
        );

        fs.remove(&dest).unwrap();
        fs.remove(&dest).unwrap();
        assert_eq!(fs.read(&dest).unwrap(), None);
    }

    #[test]
    fn test_local_fs_read_only() {
        let dir = tempdir().unwrap();
        assert!(!LocalFs::new(dir.path()).read_only().has_write_access());
    }
}
