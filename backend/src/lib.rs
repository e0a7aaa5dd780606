//! smbadmin backend library
//!
//! Reconciles the Samba configuration files, controls the Samba services,
//! manages backups and accounts. The binary and integration tests use it
//! through [`ApiHandlers`].

pub mod api;
pub mod backup;
pub mod config;
pub mod error;
pub mod exec;
pub mod identity;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use api::{ApiHandlers, OperationOutcome, OutcomeStatus};
pub use config::Config;
pub use error::{BackendError, BackendResult};
pub use storage::ConfigStore;
