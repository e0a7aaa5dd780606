//! smbadmin Shared Library
//!
//! This crate contains the I/O-free core of smbadmin: the section/key-value
//! configuration codec, the share and settings models with their
//! normalization rules, and input validation. The backend crate builds every
//! file-touching and process-spawning operation on top of it.
//!
//! # Usage
//!
//! ```rust
//! use smbadmin_shared::conf;
//! use smbadmin_shared::models::ShareRecord;
//!
//! let doc = conf::parse("[docs]\n    path = /srv/docs\n    write list = alice\n");
//! let mut shares: Vec<ShareRecord> = doc.share_sections().map(ShareRecord::from_section).collect();
//! smbadmin_shared::models::repair_all(&mut shares);
//!
//! assert_eq!(shares[0].valid_users, "alice");
//! ```

pub mod conf;
pub mod models;
pub mod validation;

pub use conf::{ConfigDocument, Section};
pub use models::{GlobalSettings, SambaUser, ShareRecord, SystemAccount, UserGroupList};
pub use validation::{ValidationError, ValidationResult};

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library configuration and constants
pub mod constants {
    /// Parameter that splices the shares file into the main file
    pub const INCLUDE_KEY: &str = "include";

    /// Leading comment of a rewritten shares file
    pub const SHARES_FILE_HEADER: &str = "# Samba shares configuration";

    /// Default main configuration file
    pub const DEFAULT_MAIN_CONF: &str = "/etc/samba/smb.conf";

    /// Default shares file
    pub const DEFAULT_SHARES_CONF: &str = "/etc/samba/shares.conf";

    /// Group that owns share directories and new accounts
    pub const DEFAULT_SHARE_GROUP: &str = "smbusers";
}
