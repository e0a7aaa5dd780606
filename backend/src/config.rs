//! Configuration management for the smbadmin backend
//!
//! This module handles loading, validation, and management of configuration
//! settings for the backend: where the Samba configuration files live, how
//! privileged access is obtained, which tools are used, and where backups
//! and locks are kept.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BackendResult, ConfigError};
use crate::service::ControlMechanism;
use smbadmin_shared::constants::{DEFAULT_MAIN_CONF, DEFAULT_SHARES_CONF, DEFAULT_SHARE_GROUP};

/// Main configuration structure for the backend
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Samba configuration file locations
    pub paths: PathsConfig,

    /// How privileged file access and commands are performed
    pub privilege: PrivilegeConfig,

    /// External configuration validator
    pub validator: ValidatorConfig,

    /// Service control settings
    pub service: ServiceConfig,

    /// Defaults for new shares
    pub shares: SharesConfig,

    /// Backup archive settings
    pub backup: BackupConfig,

    /// Account management settings
    pub identity: IdentityConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Which copy of the configuration is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Read the system file when readable, else the mirror
    #[default]
    PreferSystem,
    /// Always read the mirror copy
    MirrorOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Main configuration file holding `[global]`
    pub main_conf: PathBuf,

    /// Secondary file holding one section per share
    pub shares_conf: PathBuf,

    /// Local directory receiving a copy of every accepted write
    pub mirror_dir: Option<PathBuf>,

    pub read_policy: ReadPolicy,
}

/// How privileged operations are carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeMode {
    /// Prefix commands with a non-interactive sudo
    #[default]
    Sudo,
    /// Run commands and touch files directly (already root, or local mode)
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeConfig {
    pub mode: PrivilegeMode,
    pub sudo_binary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Validator binary; validation is skipped when it is not installed
    pub binary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Services controlled together
    pub names: Vec<String>,

    /// Control mechanisms in the order they are tried
    pub mechanisms: Vec<ControlMechanism>,

    /// Restart after an accepted configuration write
    pub restart_on_change: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharesConfig {
    /// Group owning newly created share directories
    pub default_group: String,

    /// Mode for newly created share directories (setgid by default)
    pub directory_mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory holding backup archives
    pub dir: PathBuf,

    /// Account database files included in every archive
    pub identity_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Advisory lock guarding account operations
    pub lock_file: PathBuf,

    /// Lock wait in seconds
    pub lock_timeout: u64,

    /// Fallback account list when pdbedit is unavailable
    pub smbpasswd_file: PathBuf,

    /// Lowest uid/gid listed as a regular account
    pub min_uid: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

/// Resolved file locations for one ConfigStore
///
/// Built once from [`Config`] at startup and passed explicitly into the
/// storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocation {
    pub main_conf: PathBuf,
    pub shares_conf: PathBuf,
    /// Value written to the `include` directive
    pub include_path: String,
    pub mirror_dir: Option<PathBuf>,
    pub read_policy: ReadPolicy,
}

impl ConfigLocation {
    pub fn new(main_conf: impl Into<PathBuf>, shares_conf: impl Into<PathBuf>) -> Self {
        let shares_conf = shares_conf.into();
        Self {
            main_conf: main_conf.into(),
            include_path: shares_conf.to_string_lossy().to_string(),
            shares_conf,
            mirror_dir: None,
            read_policy: ReadPolicy::PreferSystem,
        }
    }

    pub fn with_mirror(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mirror_dir = Some(dir.into());
        self
    }

    pub fn with_read_policy(mut self, policy: ReadPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// Mirror counterpart of a system file, if a mirror is configured
    pub fn mirror_path(&self, file: &Path) -> Option<PathBuf> {
        let dir = self.mirror_dir.as_ref()?;
        file.file_name().map(|name| dir.join(name))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            main_conf: PathBuf::from(DEFAULT_MAIN_CONF),
            shares_conf: PathBuf::from(DEFAULT_SHARES_CONF),
            mirror_dir: None,
            read_policy: ReadPolicy::PreferSystem,
        }
    }
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            mode: PrivilegeMode::Sudo,
            sudo_binary: "sudo".to_string(),
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            binary: "testparm".to_string(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            names: vec!["smbd".to_string(), "nmbd".to_string()],
            mechanisms: ControlMechanism::default_order().to_vec(),
            restart_on_change: true,
        }
    }
}

impl Default for SharesConfig {
    fn default() -> Self {
        Self {
            default_group: DEFAULT_SHARE_GROUP.to_string(),
            directory_mode: 0o2775,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/samba_manager/backups"),
            identity_files: [
                "/etc/samba/passdb.tdb",
                "/etc/passwd",
                "/etc/group",
                "/etc/shadow",
                "/etc/gshadow",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            lock_file: PathBuf::from("/run/smbadmin/identity.lock"),
            lock_timeout: 30,
            smbpasswd_file: PathBuf::from("/etc/samba/smbpasswd"),
            min_uid: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("smbadmin").join("backend.yml"))
            .unwrap_or_else(|| PathBuf::from("/etc/smbadmin/backend.yml"))
    }

    /// Configuration targeting plain files under `dir` without privilege
    ///
    /// Used for trying smbadmin against a scratch copy of the configuration.
    pub fn local(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut config = Self::default();
        config.paths.main_conf = dir.join("smb.conf");
        config.paths.shares_conf = dir.join("shares.conf");
        config.privilege.mode = PrivilegeMode::Direct;
        config.service.restart_on_change = false;
        config.backup.dir = dir.join("backups");
        config.backup.identity_files = Vec::new();
        config.identity.lock_file = dir.join("identity.lock");
        config
    }

    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> BackendResult<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from: {:?}", path);

        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_string_lossy().to_string(),
            }
            .into());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_yaml::from_str(&content).map_err(ConfigError::Parse)?;

        info!("Configuration loaded successfully from: {:?}", path);
        config.validate()?;

        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is missing
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> BackendResult<Self> {
        match Self::load(path.as_ref()) {
            Ok(config) => Ok(config),
            Err(crate::error::BackendError::Config(ConfigError::NotFound { path })) => {
                warn!("Configuration file {} not found, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> BackendResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        info!("Configuration saved to: {:?}", path);
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> BackendResult<()> {
        if !self.paths.main_conf.is_absolute() || !self.paths.shares_conf.is_absolute() {
            return Err(ConfigError::Invalid {
                field: "paths".to_string(),
                reason: "main_conf and shares_conf must be absolute paths".to_string(),
            }
            .into());
        }

        if self.paths.main_conf == self.paths.shares_conf {
            return Err(ConfigError::Invalid {
                field: "paths.shares_conf".to_string(),
                reason: "must differ from main_conf".to_string(),
            }
            .into());
        }

        if self.paths.read_policy == ReadPolicy::MirrorOnly && self.paths.mirror_dir.is_none() {
            return Err(ConfigError::Invalid {
                field: "paths.read_policy".to_string(),
                reason: "mirror_only requires paths.mirror_dir".to_string(),
            }
            .into());
        }

        if self.service.names.is_empty() {
            return Err(ConfigError::Invalid {
                field: "service.names".to_string(),
                reason: "at least one service must be listed".to_string(),
            }
            .into());
        }

        if self.service.mechanisms.is_empty() || self.service.mechanisms.len() > 3 {
            return Err(ConfigError::Invalid {
                field: "service.mechanisms".to_string(),
                reason: "list one to three control mechanisms".to_string(),
            }
            .into());
        }

        if self.shares.directory_mode > 0o7777 {
            return Err(ConfigError::Invalid {
                field: "shares.directory_mode".to_string(),
                reason: "must be a permission mode no larger than 0o7777".to_string(),
            }
            .into());
        }

        if self.identity.lock_timeout == 0 {
            return Err(ConfigError::Invalid {
                field: "identity.lock_timeout".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid {
                field: "logging.level".to_string(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Resolve the file locations handed to the storage layer
    pub fn location(&self) -> ConfigLocation {
        let mut location = ConfigLocation::new(&self.paths.main_conf, &self.paths.shares_conf)
            .with_read_policy(self.paths.read_policy);
        if let Some(dir) = &self.paths.mirror_dir {
            location = location.with_mirror(dir);
        }
        location
    }

    /// Get the identity lock timeout as Duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.identity.lock_timeout)
    }
}
