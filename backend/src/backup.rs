//! Backup archives of the Samba configuration and account databases
//!
//! Archives are gzip-compressed tarballs named
//! `samba_backup_<YYYYMMDD_HHMMSS>.tar.gz` holding flat copies of each
//! source file (basename only). Sources that do not exist are skipped, so
//! a backup may be partial.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{BackendResult, BackupError, StorageError, UserFriendlyError};
use crate::service::ServiceController;
use crate::storage::privileged::{require_write_access, PrivilegedFs};
use crate::storage::transaction::backup_path;

pub const ARCHIVE_PREFIX: &str = "samba_backup_";
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Members restored with mode 0600
const SECRET_MEMBERS: [&str; 4] = ["shadow", "gshadow", "passdb.tdb", "smbpasswd"];

/// Name probes before giving up; spans at least one clock second
const NAME_ATTEMPTS: u32 = 8;
const NAME_RETRY_DELAY: Duration = Duration::from_millis(250);

const ARCHIVE_MODE: u32 = 0o644;
const BACKUP_DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    /// Parsed from the filename; `None` when the timestamp is malformed
    pub created: Option<NaiveDateTime>,
}

/// What a restore did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Live paths that were overwritten
    pub restored: Vec<PathBuf>,
    /// Archive members with no known destination
    pub ignored: Vec<String>,
    /// Restart failure after the files were restored
    pub restart_error: Option<String>,
}

/// Whether `name` follows the archive naming pattern
pub fn is_archive_name(name: &str) -> bool {
    name.len() > ARCHIVE_PREFIX.len() + ARCHIVE_SUFFIX.len()
        && name.starts_with(ARCHIVE_PREFIX)
        && name.ends_with(ARCHIVE_SUFFIX)
        && !name.contains('/')
}

/// Timestamp embedded in an archive name
pub fn archive_timestamp(name: &str) -> Option<NaiveDateTime> {
    let stamp = name
        .strip_prefix(ARCHIVE_PREFIX)?
        .strip_suffix(ARCHIVE_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

fn archive_name(at: DateTime<Local>) -> String {
    format!(
        "{}{}{}",
        ARCHIVE_PREFIX,
        at.format(TIMESTAMP_FORMAT),
        ARCHIVE_SUFFIX
    )
}

fn member_mode(name: &str) -> u32 {
    if SECRET_MEMBERS.contains(&name) {
        0o600
    } else {
        0o644
    }
}

fn creation_error(e: impl ToString) -> BackupError {
    BackupError::Creation {
        reason: e.to_string(),
    }
}

fn extraction_error(e: impl ToString) -> BackupError {
    BackupError::Extraction {
        reason: e.to_string(),
    }
}

pub struct BackupManager {
    fs: Arc<dyn PrivilegedFs>,
    dir: PathBuf,
    sources: Vec<PathBuf>,
    service: ServiceController,
    restart_after_restore: bool,
}

impl BackupManager {
    /// `sources` are archived in order; their basenames must be unique
    pub fn new(
        fs: Arc<dyn PrivilegedFs>,
        dir: impl Into<PathBuf>,
        sources: Vec<PathBuf>,
        service: ServiceController,
    ) -> Self {
        Self {
            fs,
            dir: dir.into(),
            sources,
            service,
            restart_after_restore: true,
        }
    }

    pub fn without_restart(mut self) -> Self {
        self.restart_after_restore = false;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot every source file into a new archive
    ///
    /// Existing archives are never overwritten: when the current second's
    /// name is taken, creation waits for the next one.
    pub fn create(&self) -> BackendResult<BackupInfo> {
        require_write_access(self.fs.as_ref(), "create backup")?;

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mtime = Utc::now().timestamp().max(0) as u64;
        let mut members = 0;

        for source in &self.sources {
            let Some(name) = source.file_name().and_then(|n| n.to_str()) else {
                warn!("Skipping backup source without a file name: {:?}", source);
                continue;
            };
            let bytes = match self.fs.read(source) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    info!("{:?} does not exist, leaving it out of the backup", source);
                    continue;
                }
                Err(e) => {
                    warn!("Could not read {:?}, leaving it out of the backup: {}", source, e);
                    continue;
                }
            };

            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(bytes.len() as u64);
            header.set_mode(member_mode(name));
            header.set_mtime(mtime);
            builder
                .append_data(&mut header, name, bytes.as_slice())
                .map_err(creation_error)?;
            debug!("Added {} to backup", name);
            members += 1;
        }

        let archive = builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map_err(creation_error)?;

        self.fs.create_dir(&self.dir, None, BACKUP_DIR_MODE)?;
        let (filename, path) = self.unused_archive_path()?;

        let mut staged = NamedTempFile::new().map_err(creation_error)?;
        staged
            .write_all(&archive)
            .and_then(|_| staged.flush())
            .map_err(creation_error)?;
        self.fs.install(staged.path(), &path, ARCHIVE_MODE)?;

        info!("Created backup {} with {} file(s)", filename, members);
        Ok(BackupInfo {
            created: archive_timestamp(&filename),
            filename,
            path,
            size: archive.len() as u64,
        })
    }

    fn unused_archive_path(&self) -> BackendResult<(String, PathBuf)> {
        let mut filename = archive_name(Local::now());
        for _ in 0..NAME_ATTEMPTS {
            let path = self.dir.join(&filename);
            if !self.fs.exists(&path) {
                return Ok((filename, path));
            }
            debug!("{} already exists, waiting for a fresh timestamp", filename);
            thread::sleep(NAME_RETRY_DELAY);
            filename = archive_name(Local::now());
        }
        Err(BackupError::AlreadyExists { name: filename }.into())
    }

    /// Archives in the backup directory, newest first
    pub fn list(&self) -> BackendResult<Vec<BackupInfo>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().to_string();
            if !is_archive_name(&filename) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            backups.push(BackupInfo {
                created: archive_timestamp(&filename),
                path: entry.path(),
                filename,
                size,
            });
        }

        backups.sort_by(|a, b| b.filename.cmp(&a.filename));
        Ok(backups)
    }

    /// Resolve an archive name or path to a file inside the backup directory
    fn resolve(&self, name_or_path: &str) -> BackendResult<PathBuf> {
        let requested = Path::new(name_or_path);
        let invalid = || BackupError::InvalidName {
            name: name_or_path.to_string(),
        };

        let filename = requested
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| is_archive_name(n))
            .ok_or_else(invalid)?;

        if let Some(parent) = requested.parent().filter(|p| !p.as_os_str().is_empty()) {
            if parent != self.dir {
                warn!("Refusing archive outside the backup directory: {}", name_or_path);
                return Err(invalid().into());
            }
        }

        let path = self.dir.join(filename);
        if !self.fs.exists(&path) {
            return Err(BackupError::NotFound {
                name: filename.to_string(),
            }
            .into());
        }
        Ok(path)
    }

    /// Destination for each archive member, keyed by basename
    fn destinations(&self) -> HashMap<String, PathBuf> {
        self.sources
            .iter()
            .filter_map(|source| {
                let name = source.file_name()?.to_str()?;
                Some((name.to_string(), source.clone()))
            })
            .collect()
    }

    /// Overwrite live files from an archive, then restart the service
    ///
    /// Each overwritten file is first copied to `<file>.bak`. A failed
    /// restart is reported, not undone.
    pub fn restore(&self, name_or_path: &str) -> BackendResult<RestoreReport> {
        require_write_access(self.fs.as_ref(), "restore backup")?;
        let path = self.resolve(name_or_path)?;
        let bytes = self.fs.read(&path)?.ok_or_else(|| BackupError::NotFound {
            name: name_or_path.to_string(),
        })?;

        let destinations = self.destinations();
        let mut report = RestoreReport::default();
        let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));

        for entry in archive.entries().map_err(extraction_error)? {
            let mut entry = entry.map_err(extraction_error)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let member_path = entry.path().map_err(extraction_error)?.into_owned();
            let Some(name) = member_path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
            else {
                continue;
            };

            let Some(dest) = destinations.get(&name) else {
                debug!("Ignoring unknown backup member {}", name);
                report.ignored.push(name);
                continue;
            };

            let mut content = Vec::new();
            entry.read_to_end(&mut content).map_err(extraction_error)?;
            self.restore_member(&name, dest, &content)?;
            report.restored.push(dest.clone());
        }

        info!(
            "Restored {} file(s) from {:?}",
            report.restored.len(),
            path
        );

        if self.restart_after_restore {
            if let Err(e) = self.service.restart() {
                warn!("Restart after restore failed: {}", e);
                report.restart_error = Some(e.user_message());
            }
        }
        Ok(report)
    }

    fn restore_member(&self, name: &str, dest: &Path, content: &[u8]) -> BackendResult<()> {
        if self.fs.exists(dest) {
            let bak = backup_path(dest);
            self.fs
                .copy(dest, &bak)
                .map_err(|e| StorageError::BackupFailed {
                    path: dest.to_string_lossy().to_string(),
                    reason: e.to_string(),
                })?;
        }

        let mut staged = NamedTempFile::new().map_err(extraction_error)?;
        staged
            .write_all(content)
            .and_then(|_| staged.flush())
            .map_err(extraction_error)?;
        self.fs.install(staged.path(), dest, member_mode(name))?;
        debug!("Restored {:?}", dest);
        Ok(())
    }

    pub fn delete(&self, name: &str) -> BackendResult<()> {
        require_write_access(self.fs.as_ref(), "delete backup")?;
        let path = self.resolve(name)?;
        self.fs.remove(&path)?;
        info!("Deleted backup {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Elevation, ScriptedRunner, Tools};
    use crate::error::BackendError;
    use crate::service::ControlMechanism;
    use crate::storage::privileged::LocalFs;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    fn manager(root: &Path, runner: &Arc<ScriptedRunner>) -> BackupManager {
        let tools = Tools::new(runner.clone(), Elevation::Direct);
        let service = ServiceController::new(
            tools,
            vec!["smbd".to_string()],
            vec![ControlMechanism::Systemctl],
        );
        BackupManager::new(
            Arc::new(LocalFs::new(root)),
            root.join("backups"),
            vec![
                root.join("smb.conf"),
                root.join("shares.conf"),
                root.join("shadow"),
            ],
            service,
        )
    }

    #[test]
    fn test_archive_names() {
        assert!(is_archive_name("samba_backup_20240101_120000.tar.gz"));
        assert!(!is_archive_name("samba_backup_.tar.gz"));
        assert!(!is_archive_name("other.tar.gz"));
        assert_eq!(
            archive_timestamp("samba_backup_20240101_120000.tar.gz")
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            Some("2024-01-01 12:00:00".to_string())
        );
        assert_eq!(archive_timestamp("samba_backup_garbage.tar.gz"), None);
    }

    #[test]
    fn test_create_skips_missing_and_restores() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let manager = manager(dir.path(), &runner);
        fs::write(dir.path().join("smb.conf"), "[global]\n    workgroup = HOME\n").unwrap();
        fs::write(dir.path().join("shares.conf"), "[docs]\n    path = /srv/docs\n").unwrap();

        let backup = manager.create().unwrap();
        assert!(backup.path.exists());
        assert_eq!(manager.list().unwrap(), vec![backup.clone()]);

        fs::write(dir.path().join("smb.conf"), "[global]\n    workgroup = BROKEN\n").unwrap();
        let report = manager.restore(&backup.filename).unwrap();

        assert_eq!(report.restored.len(), 2);
        assert_eq!(report.restart_error, None);
        assert!(fs::read_to_string(dir.path().join("smb.conf"))
            .unwrap()
            .contains("HOME"));
        assert!(fs::read_to_string(dir.path().join("smb.conf.bak"))
            .unwrap()
            .contains("BROKEN"));
        assert!(!dir.path().join("shadow").exists());
        assert!(runner.was_called("systemctl restart smbd.service"));
    }

    #[test]
    fn test_restart_failure_does_not_undo_restore() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("systemctl restart", 1, "Failed to restart smbd.service");
        let manager = manager(dir.path(), &runner);
        fs::write(dir.path().join("shadow"), "root:*:19000:0:99999:7:::\n").unwrap();

        let backup = manager.create().unwrap();
        fs::write(dir.path().join("shadow"), "changed\n").unwrap();
        let report = manager.restore(&backup.filename).unwrap();

        assert!(report.restart_error.is_some());
        assert_eq!(
            fs::read_to_string(dir.path().join("shadow")).unwrap(),
            "root:*:19000:0:99999:7:::\n"
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("shadow")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_back_to_back_backups_keep_both_archives() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let manager = manager(dir.path(), &runner);
        fs::write(dir.path().join("smb.conf"), "[global]\n    workgroup = FIRST\n").unwrap();

        let first = manager.create().unwrap();
        fs::write(dir.path().join("smb.conf"), "[global]\n    workgroup = SECOND\n").unwrap();
        let second = manager.create().unwrap();

        assert_ne!(first.filename, second.filename);
        assert_eq!(manager.list().unwrap().len(), 2);

        manager.restore(&first.filename).unwrap();
        assert!(fs::read_to_string(dir.path().join("smb.conf"))
            .unwrap()
            .contains("FIRST"));
    }

    #[test]
    fn test_read_only_access_denies_mutations() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        fs::write(dir.path().join("smb.conf"), "[global]\n").unwrap();
        let backups = dir.path().join("backups");
        fs::create_dir_all(&backups).unwrap();
        let existing = "samba_backup_20240101_120000.tar.gz";
        fs::write(backups.join(existing), "a").unwrap();

        let tools = Tools::new(runner.clone(), Elevation::Direct);
        let service = ServiceController::new(
            tools,
            vec!["smbd".to_string()],
            vec![ControlMechanism::Systemctl],
        );
        let manager = BackupManager::new(
            Arc::new(LocalFs::new(dir.path()).read_only()),
            &backups,
            vec![dir.path().join("smb.conf")],
            service,
        );

        assert_matches!(manager.create(), Err(BackendError::PermissionDenied { .. }));
        assert_matches!(
            manager.restore(existing),
            Err(BackendError::PermissionDenied { .. })
        );
        assert_matches!(
            manager.delete(existing),
            Err(BackendError::PermissionDenied { .. })
        );

        assert_eq!(manager.list().unwrap().len(), 1);
        assert!(backups.join(existing).exists());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_resolve_rejects_foreign_paths() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let manager = manager(dir.path(), &runner);

        assert_matches!(
            manager.restore("../etc/passwd"),
            Err(BackendError::Backup(BackupError::InvalidName { .. }))
        );
        assert_matches!(
            manager.restore("/tmp/samba_backup_20240101_120000.tar.gz"),
            Err(BackendError::Backup(BackupError::InvalidName { .. }))
        );
        assert_matches!(
            manager.delete("samba_backup_20240101_120000.tar.gz"),
            Err(BackendError::Backup(BackupError::NotFound { .. }))
        );
    }

    #[test]
    fn test_delete_and_list_order() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let manager = manager(dir.path(), &runner);
        let backups = dir.path().join("backups");
        fs::create_dir_all(&backups).unwrap();
        fs::write(backups.join("samba_backup_20240101_120000.tar.gz"), "a").unwrap();
        fs::write(backups.join("samba_backup_20250101_120000.tar.gz"), "b").unwrap();
        fs::write(backups.join("notes.txt"), "c").unwrap();

        let names: Vec<_> = manager
            .list()
            .unwrap()
            .into_iter()
            .map(|b| b.filename)
            .collect();
        assert_eq!(
            names,
            vec![
                "samba_backup_20250101_120000.tar.gz",
                "samba_backup_20240101_120000.tar.gz"
            ]
        );

        manager.delete("samba_backup_20240101_120000.tar.gz").unwrap();
        assert_eq!(manager.list().unwrap().len(), 1);
    }
}
