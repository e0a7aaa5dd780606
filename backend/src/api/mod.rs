//! API handlers for smbadmin
//!
//! This is the boundary a web or command-line front end calls. Mutating
//! operations never return an error: every failure is turned into an
//! [`OperationOutcome`] carrying one human-readable message. Reads return
//! [`BackendResult`] so callers can render the data.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backup::{BackupInfo, BackupManager};
use crate::config::{Config, PrivilegeMode};
use crate::error::{BackendError, BackendResult, IdentityError, UserFriendlyError};
use crate::exec::{CommandRunner, Elevation, Tools};
use crate::identity::IdentityManager;
use crate::service::{ServiceAction, ServiceController, ServiceReport};
use crate::storage::privileged::{LocalFs, PrivilegedFs, SudoFs};
use crate::storage::validator::{ConfigValidator, ValidationOutcome};
use crate::storage::{ConfigStore, WriteReport};
use smbadmin_shared::models::{GlobalSettings, SambaUser, ShareRecord, SystemAccount};
use smbadmin_shared::validation::{validate_share_name, validate_share_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    /// Done, with something the operator should know
    Warning,
    Failure,
}

/// Result of one mutating operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub status: OutcomeStatus,
    pub message: String,
}

impl OperationOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Warning,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            message: message.into(),
        }
    }

    /// Outcome for a failed operation
    ///
    /// Disabling an already disabled account is reported as a warning.
    pub fn from_error(operation: &str, err: &BackendError) -> Self {
        match err {
            BackendError::Identity(IdentityError::AlreadyDisabled { .. }) => {
                warn!("{}: {}", operation, err);
                Self::warning(err.user_message())
            }
            _ => {
                error!("{} failed [{}]: {}", operation, err.category(), err);
                Self::failure(err.user_message())
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == OutcomeStatus::Failure
    }
}

/// Outcome of a configuration write
fn written(operation: &str, result: BackendResult<WriteReport>, message: String) -> OperationOutcome {
    match result {
        Ok(report) if report.validation == ValidationOutcome::Skipped => OperationOutcome::warning(
            format!("{} The configuration could not be validated.", message),
        ),
        Ok(_) => OperationOutcome::success(message),
        Err(e) => OperationOutcome::from_error(operation, &e),
    }
}

fn done(operation: &str, result: BackendResult<()>, message: String) -> OperationOutcome {
    match result {
        Ok(()) => OperationOutcome::success(message),
        Err(e) => OperationOutcome::from_error(operation, &e),
    }
}

/// Input for the first-run setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickSetup {
    pub share_name: String,
    pub share_path: String,
    pub workgroup: String,
    /// Allow guests instead of restricting the share to the default group
    pub guest_access: bool,
}

impl Default for QuickSetup {
    fn default() -> Self {
        Self {
            share_name: "share".to_string(),
            share_path: "/srv/samba/share".to_string(),
            workgroup: "WORKGROUP".to_string(),
            guest_access: false,
        }
    }
}

/// API handlers for processing requests
pub struct ApiHandlers {
    store: ConfigStore,
    service: ServiceController,
    backups: BackupManager,
    identity: IdentityManager,
}

impl ApiHandlers {
    pub fn new(
        store: ConfigStore,
        service: ServiceController,
        backups: BackupManager,
        identity: IdentityManager,
    ) -> Self {
        Self {
            store,
            service,
            backups,
            identity,
        }
    }

    /// Wire every component from the daemon configuration
    pub fn from_config(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        let tools = Tools::new(runner, Elevation::from_config(&config.privilege));
        let location = config.location();

        let fs: Arc<dyn PrivilegedFs> = match config.privilege.mode {
            PrivilegeMode::Sudo => Arc::new(SudoFs::new(tools.clone())),
            PrivilegeMode::Direct => {
                let root = location
                    .main_conf
                    .parent()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/"));
                Arc::new(LocalFs::new(root))
            }
        };
        debug!("Using {:?} privilege mode", config.privilege.mode);

        let service = ServiceController::from_config(tools.clone(), &config.service);
        let validator = ConfigValidator::new(tools.clone(), config.validator.binary.clone());

        let mut store = ConfigStore::new(
            location.clone(),
            fs.clone(),
            validator,
            service.clone(),
            config.shares.clone(),
        );

        let mut sources = vec![location.main_conf.clone(), location.shares_conf.clone()];
        sources.extend(config.backup.identity_files.iter().cloned());
        let mut backups =
            BackupManager::new(fs.clone(), config.backup.dir.clone(), sources, service.clone());

        if !config.service.restart_on_change {
            store = store.without_restart();
            backups = backups.without_restart();
        }

        let identity = IdentityManager::new(
            tools,
            fs,
            &config.identity,
            config.shares.default_group.clone(),
        );

        Self::new(store, service, backups, identity)
    }

    pub fn check_access(&self) -> bool {
        self.store.check_access()
    }

    // Shares

    pub fn list_shares(&self) -> BackendResult<Vec<ShareRecord>> {
        self.store.load_shares()
    }

    pub fn add_or_update_share(&self, record: ShareRecord) -> OperationOutcome {
        let name = record.name.clone();
        info!("API: Saving share {}", name);
        written(
            "save share",
            self.store.add_or_update_share(record),
            format!("Share '{}' saved.", name),
        )
    }

    pub fn delete_share(&self, name: &str) -> OperationOutcome {
        info!("API: Deleting share {}", name);
        written(
            "delete share",
            self.store.delete_share(name),
            format!("Share '{}' deleted.", name),
        )
    }

    // Settings

    pub fn global_settings(&self) -> BackendResult<GlobalSettings> {
        self.store.read_global_settings()
    }

    pub fn write_global_settings<I>(&self, changes: I) -> OperationOutcome
    where
        I: IntoIterator<Item = (String, String)>,
    {
        info!("API: Writing global settings");
        written(
            "write global settings",
            self.store.write_global_settings(changes),
            "Global settings saved.".to_string(),
        )
    }

    pub fn export_config(&self) -> BackendResult<String> {
        self.store.export_config()
    }

    pub fn import_config(&self, text: &str) -> OperationOutcome {
        info!("API: Importing configuration ({} bytes)", text.len());
        written(
            "import configuration",
            self.store.import_config(text),
            "Configuration imported.".to_string(),
        )
    }

    /// Global settings plus one share, for a fresh server
    pub fn quick_setup(&self, setup: &QuickSetup) -> OperationOutcome {
        info!("API: Quick setup of share {}", setup.share_name);
        if let Err(e) = validate_share_name(&setup.share_name)
            .and_then(|_| validate_share_path(&setup.share_path))
        {
            return OperationOutcome::from_error("quick setup", &BackendError::from(e));
        }

        let map_to_guest = if setup.guest_access { "Bad User" } else { "Never" };
        let settings = vec![
            ("server string".to_string(), "Samba Server".to_string()),
            ("workgroup".to_string(), setup.workgroup.clone()),
            ("log level".to_string(), "1".to_string()),
            ("map to guest".to_string(), map_to_guest.to_string()),
        ];
        let settings_outcome = self.write_global_settings(settings);
        if settings_outcome.is_failure() {
            return settings_outcome;
        }

        let group = self.store.default_group().to_string();
        let mut share = ShareRecord::new(setup.share_name.clone(), setup.share_path.clone());
        share.guest_ok = setup.guest_access;
        if !setup.guest_access {
            share.valid_users = format!("@{}", group);
        }
        share.create_mask = "0770".to_string();
        share.directory_mask = "0770".to_string();
        share.force_group = group;

        let share_outcome = self.add_or_update_share(share);
        if share_outcome.is_failure() {
            return share_outcome;
        }
        if settings_outcome.status == OutcomeStatus::Warning
            || share_outcome.status == OutcomeStatus::Warning
        {
            return OperationOutcome::warning(
                "Quick setup completed, but the configuration could not be validated.",
            );
        }
        OperationOutcome::success("Quick setup completed.")
    }

    // Service

    pub fn service_status(&self) -> ServiceReport {
        self.service.status()
    }

    pub fn service_action(&self, action: ServiceAction) -> OperationOutcome {
        info!("API: Service {}", action);
        match self.service.perform(action) {
            Ok(mechanism) => OperationOutcome::success(format!(
                "Samba services: {} succeeded via {}.",
                action,
                mechanism.name()
            )),
            Err(e) => OperationOutcome::from_error("service control", &e),
        }
    }

    // Backups

    pub fn list_backups(&self) -> BackendResult<Vec<BackupInfo>> {
        self.backups.list()
    }

    pub fn create_backup(&self) -> OperationOutcome {
        info!("API: Creating backup");
        match self.backups.create() {
            Ok(backup) => OperationOutcome::success(format!("Backup {} created.", backup.filename)),
            Err(e) => OperationOutcome::from_error("create backup", &e),
        }
    }

    pub fn restore_backup(&self, name: &str) -> OperationOutcome {
        info!("API: Restoring backup {}", name);
        match self.backups.restore(name) {
            Ok(report) => match report.restart_error {
                Some(restart_error) => OperationOutcome::warning(format!(
                    "Backup restored ({} files), but restarting Samba failed: {}",
                    report.restored.len(),
                    restart_error
                )),
                None => OperationOutcome::success(format!(
                    "Backup restored ({} files).",
                    report.restored.len()
                )),
            },
            Err(e) => OperationOutcome::from_error("restore backup", &e),
        }
    }

    pub fn delete_backup(&self, name: &str) -> OperationOutcome {
        info!("API: Deleting backup {}", name);
        done(
            "delete backup",
            self.backups.delete(name),
            format!("Backup {} deleted.", name),
        )
    }

    // Users and groups

    pub fn list_users(&self) -> BackendResult<Vec<SambaUser>> {
        self.identity.list_users()
    }

    pub fn list_system_users(&self) -> BackendResult<Vec<SystemAccount>> {
        self.identity.list_system_users()
    }

    pub fn list_system_groups(&self) -> BackendResult<Vec<SystemAccount>> {
        self.identity.list_system_groups()
    }

    pub fn add_user(&self, username: &str, password: &str, create_system_user: bool) -> OperationOutcome {
        info!("API: Adding user {}", username);
        done(
            "add user",
            self.identity.add_user(username, password, create_system_user),
            format!("User '{}' added.", username),
        )
    }

    pub fn remove_user(&self, username: &str, delete_system_user: bool) -> OperationOutcome {
        info!("API: Removing user {}", username);
        done(
            "remove user",
            self.identity.remove_user(username, delete_system_user),
            format!("User '{}' removed.", username),
        )
    }

    pub fn enable_user(&self, username: &str) -> OperationOutcome {
        done(
            "enable user",
            self.identity.enable_user(username),
            format!("User '{}' enabled.", username),
        )
    }

    pub fn disable_user(&self, username: &str) -> OperationOutcome {
        done(
            "disable user",
            self.identity.disable_user(username),
            format!("User '{}' disabled.", username),
        )
    }

    pub fn reset_password(&self, username: &str, password: &str) -> OperationOutcome {
        done(
            "reset password",
            self.identity.reset_password(username, password),
            format!("Password for '{}' changed.", username),
        )
    }

    pub fn create_group(&self, name: &str) -> OperationOutcome {
        match self.identity.create_group(name) {
            Ok(true) => OperationOutcome::success(format!("Group '{}' created.", name)),
            Ok(false) => OperationOutcome::success(format!("Group '{}' already exists.", name)),
            Err(e) => OperationOutcome::from_error("create group", &e),
        }
    }

    pub fn delete_group(&self, name: &str) -> OperationOutcome {
        done(
            "delete group",
            self.identity.delete_group(name),
            format!("Group '{}' deleted.", name),
        )
    }
}
