//! Error types for the smbadmin backend
//!
//! This module defines the error taxonomy used throughout the backend,
//! providing clear error messages and proper error chaining for debugging.

use smbadmin_shared::ValidationError;
use std::fmt;
use thiserror::Error;

/// Main error type for the smbadmin backend
#[derive(Error, Debug)]
pub enum BackendError {
    /// Daemon configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Configuration file reads, writes, backups and rollbacks
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// External command failures
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Account and group lifecycle errors
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Backup archive errors
    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    /// Rejected input; nothing was changed
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Privileged access is not available for a mutating operation
    #[error("Permission denied: {operation} requires privileged access")]
    PermissionDenied { operation: String },

    /// File system operation errors
    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Anyhow errors (for context and chaining)
    #[error("Operation failed: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Daemon configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },

    #[error("Invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("Configuration parsing failed: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Configuration file storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to write {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Failed to back up {path}: {reason}")]
    BackupFailed { path: String, reason: String },

    #[error("Failed to restore {path} from backup: {reason}")]
    RollbackFailed { path: String, reason: String },

    #[error("Configuration rejected by validator: {diagnostic}")]
    ConfigRejected { diagnostic: String },

    #[error("Share not found: {name}")]
    ShareNotFound { name: String },

    #[error("Imported configuration is invalid: {reason}")]
    InvalidImport { reason: String },

    #[error("File lock acquisition failed: {path}")]
    FileLock { path: String },

    #[error("File lock timeout: {path}")]
    FileLockTimeout { path: String },
}

/// External command failures
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to run {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("{program} exited with status {status}: {diagnostic}")]
    Failed {
        program: String,
        status: i32,
        diagnostic: String,
    },

    #[error("Failed to {action} service: {diagnostic}")]
    ServiceControl { action: String, diagnostic: String },
}

/// Account and group lifecycle errors
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("User not found: {username}")]
    UserNotFound { username: String },

    #[error("User {username} is already disabled")]
    AlreadyDisabled { username: String },

    #[error("Group not found: {group}")]
    GroupNotFound { group: String },
}

/// Backup archive errors
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Failed to create backup archive: {reason}")]
    Creation { reason: String },

    #[error("Failed to extract backup archive: {reason}")]
    Extraction { reason: String },

    #[error("Backup archive not found: {name}")]
    NotFound { name: String },

    #[error("Not a backup archive: {name}")]
    InvalidName { name: String },

    #[error("Backup archive already exists: {name}")]
    AlreadyExists { name: String },
}

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Trait for converting errors to user-friendly messages
pub trait UserFriendlyError {
    /// Convert the error to a message safe to show to operators
    fn user_message(&self) -> String;

    /// Get the error category for logging
    fn category(&self) -> ErrorCategory;
}

/// Error categories for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Permission,
    Storage,
    ExternalTool,
    NotFound,
    Validation,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Permission => write!(f, "permission"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::ExternalTool => write!(f, "external_tool"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

impl UserFriendlyError for BackendError {
    fn user_message(&self) -> String {
        match self {
            BackendError::Config(_) => {
                "Configuration error. Please check the smbadmin settings file.".to_string()
            }
            BackendError::Storage(StorageError::ConfigRejected { diagnostic }) => format!(
                "Configuration was rejected by the validator and has been rolled back: {}",
                diagnostic
            ),
            BackendError::Storage(StorageError::ShareNotFound { name }) => {
                format!("Share '{}' was not found.", name)
            }
            BackendError::Storage(StorageError::RollbackFailed { path, .. }) => format!(
                "Configuration was rejected and {} could not be restored. Check the .bak file.",
                path
            ),
            BackendError::Storage(StorageError::InvalidImport { reason }) => {
                format!("Imported configuration is invalid: {}", reason)
            }
            BackendError::Storage(_) => {
                "Failed to update the configuration files. Please try again.".to_string()
            }
            BackendError::Tool(ToolError::ServiceControl { action, diagnostic }) => {
                format!("Failed to {} the Samba service: {}", action, diagnostic)
            }
            BackendError::Tool(ToolError::Failed {
                program,
                diagnostic,
                ..
            }) => format!("{} failed: {}", program, diagnostic),
            BackendError::Tool(ToolError::SpawnFailed { program, .. }) => {
                format!("Could not run {}. Is it installed?", program)
            }
            BackendError::Identity(IdentityError::UserNotFound { username }) => {
                format!("User '{}' was not found.", username)
            }
            BackendError::Identity(IdentityError::AlreadyDisabled { username }) => {
                format!("User '{}' is already disabled.", username)
            }
            BackendError::Identity(IdentityError::GroupNotFound { group }) => {
                format!("Group '{}' was not found.", group)
            }
            BackendError::Backup(BackupError::NotFound { name }) => {
                format!("Backup '{}' was not found.", name)
            }
            BackendError::Backup(BackupError::InvalidName { name }) => {
                format!("'{}' is not a backup archive.", name)
            }
            BackendError::Backup(BackupError::AlreadyExists { name }) => {
                format!("Backup '{}' already exists. Try again in a moment.", name)
            }
            BackendError::Backup(_) => "Backup operation failed. Please try again.".to_string(),
            BackendError::Validation(err) => err.to_string(),
            BackendError::PermissionDenied { .. } => {
                "Permission denied. smbadmin needs root or passwordless sudo for this action."
                    .to_string()
            }
            _ => "An unexpected error occurred. Please try again.".to_string(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            BackendError::Config(_) => ErrorCategory::Configuration,
            BackendError::Storage(StorageError::ShareNotFound { .. })
            | BackendError::Identity(IdentityError::UserNotFound { .. })
            | BackendError::Identity(IdentityError::GroupNotFound { .. })
            | BackendError::Backup(BackupError::NotFound { .. }) => ErrorCategory::NotFound,
            BackendError::Storage(StorageError::ConfigRejected { .. }) | BackendError::Tool(_) => {
                ErrorCategory::ExternalTool
            }
            BackendError::Storage(_) | BackendError::Backup(_) | BackendError::FileSystem(_) => {
                ErrorCategory::Storage
            }
            BackendError::Identity(_) => ErrorCategory::ExternalTool,
            BackendError::Validation(_) => ErrorCategory::Validation,
            BackendError::PermissionDenied { .. } => ErrorCategory::Permission,
            _ => ErrorCategory::Internal,
        }
    }
}
