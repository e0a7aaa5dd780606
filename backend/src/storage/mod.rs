//! Storage module for the smbadmin backend
//!
//! This module owns the two Samba configuration files: the main file with
//! `[global]` and the shares file it includes. Every mutating operation
//! follows the same path:
//!
//! READ → MERGE → SERIALIZE → BACKUP → WRITE → VALIDATE → ROLLBACK | RESTART
//!
//! Key features:
//! - Shares merged from both files, with the shares file winning per field
//! - Legacy inline shares migrated out of the main file on the next save
//! - The `include` directive re-asserted on every write
//! - Rollback to the previous generation when the validator rejects a write
//! - Advisory locking for identity-store access (`file_lock`)

pub mod file_lock;
pub mod privileged;
pub mod transaction;
pub mod validator;

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ConfigLocation, ReadPolicy, SharesConfig};
use crate::error::{BackendResult, StorageError};
use crate::service::ServiceController;
use privileged::PrivilegedFs;
use smbadmin_shared::conf::{self, ConfigDocument, GLOBAL_SECTION, NON_SHARE_SECTIONS};
use smbadmin_shared::constants::{INCLUDE_KEY, SHARES_FILE_HEADER};
use smbadmin_shared::models::settings::conf_key_for;
use smbadmin_shared::models::{repair_all, GlobalSettings, ShareRecord};
use smbadmin_shared::validation::{
    validate_param_value, validate_section_name, validate_share_name, validate_share_path,
    ValidationError,
};
use transaction::WriteTransaction;
use validator::{ConfigValidator, ValidationOutcome};

/// Result of an accepted configuration write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub validation: ValidationOutcome,
    /// Whether the service was restarted afterwards
    pub restarted: bool,
}

/// Reads and rewrites the Samba configuration files
pub struct ConfigStore {
    location: ConfigLocation,
    fs: Arc<dyn PrivilegedFs>,
    validator: ConfigValidator,
    service: ServiceController,
    shares: SharesConfig,
    restart_on_change: bool,
}

impl ConfigStore {
    pub fn new(
        location: ConfigLocation,
        fs: Arc<dyn PrivilegedFs>,
        validator: ConfigValidator,
        service: ServiceController,
        shares: SharesConfig,
    ) -> Self {
        Self {
            location,
            fs,
            validator,
            service,
            shares,
            restart_on_change: true,
        }
    }

    /// Skip the service restart after accepted writes
    pub fn without_restart(mut self) -> Self {
        self.restart_on_change = false;
        self
    }

    pub fn location(&self) -> &ConfigLocation {
        &self.location
    }

    /// Group owning new share directories
    pub fn default_group(&self) -> &str {
        &self.shares.default_group
    }

    /// Whether mutating operations can be attempted
    pub fn check_access(&self) -> bool {
        self.fs.has_write_access()
    }

    fn require_access(&self, operation: &str) -> BackendResult<()> {
        privileged::require_write_access(self.fs.as_ref(), operation)
    }

    /// Read a configuration file according to the read policy
    fn read_text(&self, path: &Path) -> BackendResult<Option<String>> {
        let mirror = self.location.mirror_path(path);

        if self.location.read_policy == ReadPolicy::PreferSystem {
            match self.fs.read_to_string(path) {
                Ok(Some(text)) => return Ok(Some(text)),
                Ok(None) if mirror.is_none() => return Ok(None),
                Err(e) if mirror.is_none() => return Err(e),
                Ok(None) => debug!("{:?} missing, reading mirror", path),
                Err(e) => warn!("Could not read {:?} ({}), reading mirror", path, e),
            }
        }

        match mirror {
            Some(mirror) => match std::fs::read_to_string(&mirror) {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(StorageError::ReadFailed {
                    path: mirror.to_string_lossy().to_string(),
                    reason: e.to_string(),
                }
                .into()),
            },
            None => Ok(None),
        }
    }

    /// Current content of the live main file, for write paths
    fn read_live_main(&self) -> BackendResult<String> {
        Ok(self
            .fs
            .read_to_string(&self.location.main_conf)?
            .unwrap_or_default())
    }

    /// All shares from both files, shares file winning per field
    pub fn load_shares(&self) -> BackendResult<Vec<ShareRecord>> {
        let main = self.read_text(&self.location.main_conf)?.unwrap_or_default();
        let secondary = self
            .read_text(&self.location.shares_conf)?
            .unwrap_or_default();

        let mut records: Vec<ShareRecord> = conf::parse_share_sections(&main)
            .iter()
            .map(ShareRecord::from_section)
            .collect();
        debug!("Read {} share(s) from main configuration", records.len());

        for section in conf::parse_share_sections(&secondary) {
            match records.iter_mut().find(|r| r.name == section.name()) {
                Some(existing) => {
                    debug!("Shares file overrides share {}", existing.name);
                    existing.overlay(section.params());
                }
                None => records.push(ShareRecord::from_section(&section)),
            }
        }

        repair_all(&mut records);
        Ok(records)
    }

    /// Rewrite the shares file with exactly `records`
    pub fn save_shares(&self, records: &[ShareRecord]) -> BackendResult<WriteReport> {
        self.require_access("save shares")?;
        self.commit_shares(records)
    }

    fn commit_shares(&self, records: &[ShareRecord]) -> BackendResult<WriteReport> {
        let mut records = records.to_vec();
        repair_all(&mut records);

        let mut shares_doc = ConfigDocument::new();
        for record in &records {
            validate_section_name(&record.name)?;
            for (key, value) in record.to_fields() {
                validate_param_value(&key, &value)?;
            }
            shares_doc.push_section(record.to_section());
        }
        let shares_text = format!("{}\n\n{}", SHARES_FILE_HEADER, conf::serialize(&shares_doc));
        debug!("Serialized {} share(s)", records.len());

        let live_main = self.read_live_main()?;
        let mut main_doc = conf::parse(&live_main);
        let inline_shares = main_doc.share_sections().count();

        let mut tx = WriteTransaction::new(self.fs.as_ref(), &self.location);
        tx.stage(&self.location.shares_conf, shares_text);

        if inline_shares > 0 {
            info!(
                "Moving {} inline share(s) out of {:?}",
                inline_shares, self.location.main_conf
            );
            main_doc = strip_shares(&main_doc);
        }
        let include_added = ensure_include(&mut main_doc, &self.location.include_path);
        if inline_shares > 0 || include_added {
            tx.stage(&self.location.main_conf, conf::serialize(&main_doc));
        }

        let validation = tx.commit(&self.validator)?;
        self.finish(validation)
    }

    fn finish(&self, validation: ValidationOutcome) -> BackendResult<WriteReport> {
        if !self.restart_on_change {
            debug!("Service restart disabled, not restarting");
            return Ok(WriteReport {
                validation,
                restarted: false,
            });
        }
        self.service.restart()?;
        Ok(WriteReport {
            validation,
            restarted: true,
        })
    }

    /// Create the share's directory when it does not exist yet
    fn ensure_share_directory(&self, path: &Path) -> BackendResult<()> {
        if self.fs.exists(path) {
            if let Ok(metadata) = std::fs::metadata(path) {
                if !metadata.is_dir() {
                    return Err(ValidationError::NotADirectory {
                        path: path.to_string_lossy().to_string(),
                    }
                    .into());
                }
            }
            return Ok(());
        }

        info!("Creating share directory {:?}", path);
        self.fs.create_dir(
            path,
            Some(self.shares.default_group.as_str()),
            self.shares.directory_mode,
        )
    }

    /// Validate, create the directory if needed, then replace or append
    pub fn add_or_update_share(&self, record: ShareRecord) -> BackendResult<WriteReport> {
        validate_share_name(&record.name)?;
        let path = validate_share_path(&record.path)?;
        self.require_access("add share")?;

        self.ensure_share_directory(&path)?;

        let mut records = self.load_shares()?;
        match records.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => {
                info!("Updating share {}", record.name);
                *existing = record;
            }
            None => {
                info!("Adding share {}", record.name);
                records.push(record);
            }
        }
        self.commit_shares(&records)
    }

    pub fn delete_share(&self, name: &str) -> BackendResult<WriteReport> {
        self.require_access("delete share")?;

        let mut records = self.load_shares()?;
        let before = records.len();
        records.retain(|r| r.name != name);
        if records.len() == before {
            return Err(StorageError::ShareNotFound {
                name: name.to_string(),
            }
            .into());
        }

        info!("Deleting share {}", name);
        self.commit_shares(&records)
    }

    /// Server-wide settings, defaults filling anything not configured
    pub fn read_global_settings(&self) -> BackendResult<GlobalSettings> {
        Ok(match self.read_text(&self.location.main_conf)? {
            Some(text) => GlobalSettings::from_config_text(&text),
            None => {
                debug!("No main configuration found, using default settings");
                GlobalSettings::default()
            }
        })
    }

    /// Merge `changes` into `[global]`
    ///
    /// Keys may be normalized (`server_string`) or as written in the file
    /// (`server string`). An empty value removes the key.
    pub fn write_global_settings<I>(&self, changes: I) -> BackendResult<WriteReport>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let changes: Vec<(String, String)> = changes.into_iter().collect();
        for (key, value) in &changes {
            validate_param_value(key, value)?;
        }
        self.require_access("write global settings")?;

        let live_main = self.read_live_main()?;
        let mut doc = conf::parse(&live_main);
        let global = doc.insert_section_front(GLOBAL_SECTION);
        for (key, value) in &changes {
            let conf_key = conf_key_for(key.trim());
            if value.trim().is_empty() {
                if global.remove(conf_key).is_some() {
                    debug!("Removed global setting {}", conf_key);
                }
            } else {
                global.set(conf_key, value.trim());
            }
        }
        ensure_include(&mut doc, &self.location.include_path);

        let mut tx = WriteTransaction::new(self.fs.as_ref(), &self.location);
        tx.stage(&self.location.main_conf, conf::serialize(&doc));
        let validation = tx.commit(&self.validator)?;
        info!("Updated {} global setting(s)", changes.len());
        self.finish(validation)
    }

    /// Main file without `include` lines, followed by the shares file
    pub fn export_config(&self) -> BackendResult<String> {
        let main = self.read_text(&self.location.main_conf)?.unwrap_or_default();
        let shares = self
            .read_text(&self.location.shares_conf)?
            .unwrap_or_default();

        let mut combined = main
            .lines()
            .filter(|line| !line.trim_start().starts_with(INCLUDE_KEY))
            .collect::<Vec<_>>()
            .join("\n");
        if !shares.trim().is_empty() {
            combined.push('\n');
            combined.push_str(&shares);
        }
        Ok(combined)
    }

    /// Split a combined configuration into the main and shares files
    pub fn import_config(&self, text: &str) -> BackendResult<WriteReport> {
        let imported = conf::parse(text);
        if imported.is_empty() {
            return Err(StorageError::InvalidImport {
                reason: "no sections found".to_string(),
            }
            .into());
        }
        self.require_access("import configuration")?;

        let mut main_doc = strip_shares(&imported);
        ensure_include(&mut main_doc, &self.location.include_path);

        let mut shares_doc = ConfigDocument::new();
        for section in imported.share_sections() {
            shares_doc.push_section(section.clone());
        }
        info!(
            "Importing configuration with {} share(s)",
            shares_doc.len()
        );

        let mut tx = WriteTransaction::new(self.fs.as_ref(), &self.location);
        tx.stage(&self.location.main_conf, conf::serialize(&main_doc));
        tx.stage(
            &self.location.shares_conf,
            format!("{}\n\n{}", SHARES_FILE_HEADER, conf::serialize(&shares_doc)),
        );
        let validation = tx.commit(&self.validator)?;
        self.finish(validation)
    }
}

/// Copy of `doc` holding only `global`, `printers` and `print$`, in that order
fn strip_shares(doc: &ConfigDocument) -> ConfigDocument {
    let mut stripped = ConfigDocument::new();
    for name in NON_SHARE_SECTIONS {
        if let Some(section) = doc.section(name) {
            stripped.push_section(section.clone());
        }
    }
    stripped
}

/// Point `[global]` at the shares file; returns true if anything changed
fn ensure_include(doc: &mut ConfigDocument, include_path: &str) -> bool {
    let global = doc.insert_section_front(GLOBAL_SECTION);
    if global.get(INCLUDE_KEY) == Some(include_path) {
        return false;
    }
    global.set(INCLUDE_KEY, include_path);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_shares_orders_special_sections() {
        let doc = conf::parse("[docs]\npath = /srv\n[print$]\npath = /var/spool\n[global]\nworkgroup = X\n");
        let stripped = strip_shares(&doc);
        let names: Vec<_> = stripped.sections().map(|s| s.name()).collect();
        assert_eq!(names, vec!["global", "print$"]);
    }

    #[test]
    fn test_ensure_include_inserts_global() {
        let mut doc = conf::parse("[printers]\nprintable = yes\n");
        assert!(ensure_include(&mut doc, "/etc/samba/shares.conf"));
        assert_eq!(doc.sections().next().unwrap().name(), "global");
        assert!(!ensure_include(&mut doc, "/etc/samba/shares.conf"));
    }
}
