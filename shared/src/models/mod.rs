//! Shared data models for smbadmin
//!
//! Share records and their normalizer, global settings, and the account
//! shapes reported by the identity tools.

pub mod settings;
pub mod share;
pub mod user;

pub use settings::{GlobalSettings, SettingSpec, SettingsSource, GLOBAL_SETTINGS};
pub use share::{parse_bool, repair_all, ShareField, ShareRecord, UserGroupList};
pub use user::{SambaUser, SystemAccount};
