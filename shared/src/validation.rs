//! Input validation for share names, share paths, account and group names
//!
//! Everything here is checked before any command is built or any file is
//! touched, so a rejected input never causes a mutation.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Maximum share name length
pub const MAX_SHARE_NAME_LEN: usize = 80;

/// Maximum share path length
pub const MAX_PATH_LEN: usize = 4096;

/// Maximum account name length
pub const MAX_USERNAME_LEN: usize = 32;

/// Share names that collide with special sections (compared case-insensitively)
pub const RESERVED_SHARE_NAMES: [&str; 4] = ["global", "homes", "printers", "print$"];

/// System directories that may not be shared, nor anything beneath them
pub const DENIED_PATH_PREFIXES: [&str; 9] = [
    "/etc", "/var", "/usr", "/bin", "/sbin", "/boot", "/sys", "/proc", "/dev",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Share name cannot be empty")]
    EmptyShareName,

    #[error("Share name is too long (maximum {max} characters)")]
    ShareNameTooLong { max: usize },

    #[error("Share name '{name}' may only contain letters, numbers, underscores and hyphens")]
    InvalidShareName { name: String },

    #[error("Share name '{name}' is reserved")]
    ReservedShareName { name: String },

    #[error("Share path cannot be empty")]
    EmptyPath,

    #[error("Share path '{path}' must be absolute")]
    RelativePath { path: String },

    #[error("Share path '{path}' must not contain '..'")]
    PathTraversal { path: String },

    #[error("Share path is too long (maximum {max} characters)")]
    PathTooLong { max: usize },

    #[error("Share path '{path}' is inside the system directory {dir}")]
    SystemDirectory { path: String, dir: String },

    #[error("Share path '{path}' exists but is not a directory")]
    NotADirectory { path: String },

    #[error("Username cannot be empty")]
    EmptyUsername,

    #[error("Username is too long (maximum {max} characters)")]
    UsernameTooLong { max: usize },

    #[error("Username '{username}' may only contain letters, numbers, underscores and hyphens")]
    InvalidUsername { username: String },

    #[error("Group name '{group}' must start with a lowercase letter and contain only letters, digits, underscores and hyphens")]
    InvalidGroupName { group: String },

    #[error("Section name '{name}' cannot be written as a section header")]
    InvalidSectionName { name: String },

    #[error("'{key}' is not a valid parameter name")]
    InvalidParamKey { key: String },

    #[error("Value for '{key}' must be a single line")]
    MultiLineValue { key: String },

    #[error("Password cannot be empty")]
    EmptyPassword,
}

pub type ValidationResult<T> = Result<T, ValidationError>;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

pub fn validate_share_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::EmptyShareName);
    }
    if name.chars().count() > MAX_SHARE_NAME_LEN {
        return Err(ValidationError::ShareNameTooLong {
            max: MAX_SHARE_NAME_LEN,
        });
    }
    if !name.chars().all(is_name_char) {
        return Err(ValidationError::InvalidShareName {
            name: name.to_string(),
        });
    }
    let lower = name.to_ascii_lowercase();
    if RESERVED_SHARE_NAMES.contains(&lower.as_str()) {
        return Err(ValidationError::ReservedShareName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Lexical checks on a share path
///
/// Existence is not checked here; the caller creates missing directories.
pub fn validate_share_path(path: &str) -> ValidationResult<PathBuf> {
    if path.trim().is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if path.len() > MAX_PATH_LEN {
        return Err(ValidationError::PathTooLong { max: MAX_PATH_LEN });
    }

    let candidate = Path::new(path);
    if !candidate.is_absolute() {
        return Err(ValidationError::RelativePath {
            path: path.to_string(),
        });
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ValidationError::PathTraversal {
            path: path.to_string(),
        });
    }

    // Component-wise, so /etc2 is allowed but /etc/samba is not
    if let Some(dir) = DENIED_PATH_PREFIXES
        .iter()
        .find(|dir| candidate.starts_with(dir))
    {
        return Err(ValidationError::SystemDirectory {
            path: path.to_string(),
            dir: dir.to_string(),
        });
    }
    if candidate.parent().is_none() {
        return Err(ValidationError::SystemDirectory {
            path: path.to_string(),
            dir: "/".to_string(),
        });
    }

    Ok(candidate.to_path_buf())
}

pub fn validate_username(username: &str) -> ValidationResult<()> {
    if username.is_empty() {
        return Err(ValidationError::EmptyUsername);
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(ValidationError::UsernameTooLong {
            max: MAX_USERNAME_LEN,
        });
    }
    if !username.chars().all(is_name_char) {
        return Err(ValidationError::InvalidUsername {
            username: username.to_string(),
        });
    }
    Ok(())
}

/// Group names follow `useradd` conventions: a lowercase first letter
pub fn validate_group_name(group: &str) -> ValidationResult<()> {
    let mut chars = group.chars();
    let valid = match chars.next() {
        Some(first) => first.is_ascii_lowercase() && chars.all(is_name_char),
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidGroupName {
            group: group.to_string(),
        })
    }
}

/// Any section about to be serialized, including hand-written legacy ones
///
/// Looser than [`validate_share_name`]: only names that would break the
/// `[name]` header line are refused.
pub fn validate_section_name(name: &str) -> ValidationResult<()> {
    if name.trim().is_empty() || name.contains(['[', ']', '\n', '\r']) {
        return Err(ValidationError::InvalidSectionName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Parameters are written as one `key = value` line each
///
/// The key must survive a re-parse: not empty, not read back as a comment
/// and free of the `=` separator and header brackets.
pub fn validate_param_value(key: &str, value: &str) -> ValidationResult<()> {
    let trimmed = key.trim();
    if trimmed.is_empty()
        || trimmed.starts_with(['#', ';'])
        || key.contains(['\n', '\r', '=', '[', ']'])
    {
        return Err(ValidationError::InvalidParamKey {
            key: key.to_string(),
        });
    }
    if value.contains(['\n', '\r']) {
        return Err(ValidationError::MultiLineValue {
            key: key.to_string(),
        });
    }
    Ok(())
}

pub fn validate_password(password: &str) -> ValidationResult<()> {
    if password.is_empty() {
        return Err(ValidationError::EmptyPassword);
    }
    Ok(())
}
