//! Backup, write, validate and rollback for configuration files
//!
//! A [`WriteTransaction`] stages the full new content of one or more files
//! and commits them together:
//!
//! 1. every target is copied to `<file>.bak` (or noted as absent),
//! 2. each new content is written to a temporary file and installed over
//!    the target with mode `0644`,
//! 3. the validator is run against the main configuration file,
//! 4. on rejection every target is restored from its snapshot in reverse
//!    order and the transaction fails; on acceptance each file is copied
//!    into the mirror directory, if one is configured.
//!
//! Only one backup generation is kept per file.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use super::privileged::PrivilegedFs;
use super::validator::{ConfigValidator, ValidationOutcome};
use crate::config::ConfigLocation;
use crate::error::{BackendResult, StorageError};

/// Mode of every installed configuration file
pub const CONFIG_FILE_MODE: u32 = 0o644;

/// `<path>.bak`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".bak");
    PathBuf::from(name)
}

enum Snapshot {
    /// Previous content saved at this path
    Saved(PathBuf),
    /// File did not exist before the write
    Absent,
}

struct StagedFile {
    path: PathBuf,
    content: String,
    snapshot: Option<Snapshot>,
}

pub struct WriteTransaction<'a> {
    fs: &'a dyn PrivilegedFs,
    location: &'a ConfigLocation,
    staged: Vec<StagedFile>,
}

impl<'a> WriteTransaction<'a> {
    pub fn new(fs: &'a dyn PrivilegedFs, location: &'a ConfigLocation) -> Self {
        Self {
            fs,
            location,
            staged: Vec::new(),
        }
    }

    /// Stage the complete new content of `path`
    pub fn stage(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> &mut Self {
        let path = path.into();
        let content = content.into();
        match self.staged.iter_mut().find(|f| f.path == path) {
            Some(existing) => existing.content = content,
            None => self.staged.push(StagedFile {
                path,
                content,
                snapshot: None,
            }),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Write every staged file and validate the main configuration
    ///
    /// Returns the validation outcome on acceptance. A rejected
    /// configuration is rolled back and reported as
    /// [`StorageError::ConfigRejected`].
    pub fn commit(mut self, validator: &ConfigValidator) -> BackendResult<ValidationOutcome> {
        self.snapshot_all()?;

        for index in 0..self.staged.len() {
            if let Err(e) = self.write_one(index) {
                error!("Write failed, rolling back: {}", e);
                self.rollback(index + 1)?;
                return Err(e);
            }
        }

        let outcome = match validator.validate(&self.location.main_conf) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Validator could not run, rolling back: {}", e);
                self.rollback(self.staged.len())?;
                return Err(e);
            }
        };

        if let ValidationOutcome::Invalid { diagnostic } = outcome {
            warn!("Configuration rejected, rolling back");
            self.rollback(self.staged.len())?;
            return Err(StorageError::ConfigRejected { diagnostic }.into());
        }

        self.mirror_all();
        info!("Committed {} configuration file(s)", self.staged.len());
        Ok(outcome)
    }

    fn snapshot_all(&mut self) -> BackendResult<()> {
        for file in self.staged.iter_mut() {
            let snapshot = if self.fs.exists(&file.path) {
                let bak = backup_path(&file.path);
                debug!("Backing up {:?} to {:?}", file.path, bak);
                self.fs.copy(&file.path, &bak).map_err(|e| {
                    StorageError::BackupFailed {
                        path: file.path.to_string_lossy().to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Snapshot::Saved(bak)
            } else {
                debug!("{:?} does not exist yet, nothing to back up", file.path);
                Snapshot::Absent
            };
            file.snapshot = Some(snapshot);
        }
        Ok(())
    }

    fn write_one(&self, index: usize) -> BackendResult<()> {
        let file = &self.staged[index];
        debug!("Writing {:?}", file.path);

        let staging_error = |e: std::io::Error| StorageError::WriteFailed {
            path: file.path.to_string_lossy().to_string(),
            reason: e.to_string(),
        };
        let mut temp = NamedTempFile::new().map_err(staging_error)?;
        temp.write_all(file.content.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(staging_error)?;

        self.fs.install(temp.path(), &file.path, CONFIG_FILE_MODE)
    }

    /// Restore the first `count` staged files, last written first
    fn rollback(&self, count: usize) -> BackendResult<()> {
        for file in self.staged[..count].iter().rev() {
            let result = match &file.snapshot {
                Some(Snapshot::Saved(bak)) => {
                    info!("Restoring {:?} from {:?}", file.path, bak);
                    self.fs.copy(bak, &file.path)
                }
                Some(Snapshot::Absent) => {
                    info!("Removing {:?}, which did not exist before", file.path);
                    self.fs.remove(&file.path)
                }
                None => Ok(()),
            };
            if let Err(e) = result {
                error!("Rollback of {:?} failed: {}", file.path, e);
                return Err(StorageError::RollbackFailed {
                    path: file.path.to_string_lossy().to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Best-effort copy of every written file into the mirror directory
    fn mirror_all(&self) {
        for file in &self.staged {
            let Some(mirror) = self.location.mirror_path(&file.path) else {
                continue;
            };
            let result = mirror
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| fs::write(&mirror, &file.content));
            match result {
                Ok(()) => debug!("Mirrored {:?} to {:?}", file.path, mirror),
                Err(e) => warn!("Could not mirror {:?} to {:?}: {}", file.path, mirror, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::exec::{Elevation, ScriptedRunner, Tools};
    use crate::storage::privileged::LocalFs;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn validator(runner: &Arc<ScriptedRunner>) -> ConfigValidator {
        ConfigValidator::new(Tools::new(runner.clone(), Elevation::Direct), "testparm")
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/etc/samba/smb.conf")),
            PathBuf::from("/etc/samba/smb.conf.bak")
        );
    }

    #[test]
    fn test_commit_writes_and_backs_up() {
        let dir = tempdir().unwrap();
        let location = ConfigLocation::new(dir.path().join("smb.conf"), dir.path().join("shares.conf"));
        fs::write(&location.main_conf, "[global]\n    workgroup = OLD\n").unwrap();
        let fs_ = LocalFs::new(dir.path());
        let runner = Arc::new(ScriptedRunner::new());

        let mut tx = WriteTransaction::new(&fs_, &location);
        tx.stage(&location.main_conf, "[global]\n    workgroup = NEW\n");
        tx.stage(&location.shares_conf, "[docs]\n    path = /srv/docs\n");
        let outcome = tx.commit(&validator(&runner)).unwrap();

        assert_eq!(outcome, ValidationOutcome::Valid);
        assert!(fs::read_to_string(&location.main_conf).unwrap().contains("NEW"));
        assert!(fs::read_to_string(backup_path(&location.main_conf))
            .unwrap()
            .contains("OLD"));
        assert!(location.shares_conf.exists());
        assert!(!backup_path(&location.shares_conf).exists());
    }

    #[test]
    fn test_rejection_restores_every_file() {
        let dir = tempdir().unwrap();
        let location = ConfigLocation::new(dir.path().join("smb.conf"), dir.path().join("shares.conf"));
        let before = "[global]\n    workgroup = OLD\n";
        fs::write(&location.main_conf, before).unwrap();
        let fs_ = LocalFs::new(dir.path());
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("testparm -s", 1, "Error loading services.");

        let mut tx = WriteTransaction::new(&fs_, &location);
        tx.stage(&location.main_conf, "[global]\n    bogus = 1\n");
        tx.stage(&location.shares_conf, "[docs]\n    path = /srv/docs\n");
        let result = tx.commit(&validator(&runner));

        assert_matches!(
            result,
            Err(BackendError::Storage(StorageError::ConfigRejected { ref diagnostic }))
                if diagnostic == "Error loading services."
        );
        assert_eq!(fs::read_to_string(&location.main_conf).unwrap(), before);
        assert!(!location.shares_conf.exists());
    }

    #[test]
    fn test_skipped_validation_accepts_write() {
        let dir = tempdir().unwrap();
        let location = ConfigLocation::new(dir.path().join("smb.conf"), dir.path().join("shares.conf"));
        let fs_ = LocalFs::new(dir.path());
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("which", 1, "");

        let mut tx = WriteTransaction::new(&fs_, &location);
        tx.stage(&location.main_conf, "[global]\n");
        assert_eq!(
            tx.commit(&validator(&runner)).unwrap(),
            ValidationOutcome::Skipped
        );
    }

    #[test]
    fn test_mirror_only_after_acceptance() {
        let dir = tempdir().unwrap();
        let mirror = dir.path().join("mirror");
        let location = ConfigLocation::new(dir.path().join("smb.conf"), dir.path().join("shares.conf"))
            .with_mirror(&mirror);
        let fs_ = LocalFs::new(dir.path());

        let rejecting = Arc::new(ScriptedRunner::new());
        rejecting.on_failure("testparm -s", 1, "bad");
        let mut tx = WriteTransaction::new(&fs_, &location);
        tx.stage(&location.main_conf, "[global]\n    bogus = 1\n");
        assert!(tx.commit(&validator(&rejecting)).is_err());
        assert!(!mirror.join("smb.conf").exists());

        let accepting = Arc::new(ScriptedRunner::new());
        let mut tx = WriteTransaction::new(&fs_, &location);
        tx.stage(&location.main_conf, "[global]\n    workgroup = HOME\n");
        tx.commit(&validator(&accepting)).unwrap();
        assert_eq!(
            fs::read_to_string(mirror.join("smb.conf")).unwrap(),
            "[global]\n    workgroup = HOME\n"
        );
    }
}
