//! External configuration validator (`testparm -s`)

use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::BackendResult;
use crate::exec::{CommandOptions, Tools};

/// Result of validating a written configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    /// Validator exited non-zero
    Invalid { diagnostic: String },
    /// Validator binary is not installed; the write is accepted unchecked
    Skipped,
}

/// Runs the configured validator against a configuration file
#[derive(Clone)]
pub struct ConfigValidator {
    tools: Tools,
    binary: String,
}

impl ConfigValidator {
    pub fn new(tools: Tools, binary: impl Into<String>) -> Self {
        Self {
            tools,
            binary: binary.into(),
        }
    }

    pub fn validate(&self, path: &Path) -> BackendResult<ValidationOutcome> {
        if !self.tools.is_available(&self.binary) {
            warn!(
                "{} not available, skipping configuration validation",
                self.binary
            );
            return Ok(ValidationOutcome::Skipped);
        }

        let p = path.to_string_lossy();
        debug!("Validating {} with {}", p, self.binary);
        let output = self
            .tools
            .run_privileged(&self.binary, &["-s", &p], CommandOptions::new())?;

        if output.success() {
            info!("Configuration {} passed validation", p);
            Ok(ValidationOutcome::Valid)
        } else {
            let diagnostic = output.diagnostic();
            warn!("Configuration {} failed validation: {}", p, diagnostic);
            Ok(ValidationOutcome::Invalid { diagnostic })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Elevation, ScriptedRunner};
    use std::sync::Arc;

    fn validator(runner: &Arc<ScriptedRunner>) -> ConfigValidator {
        ConfigValidator::new(
            Tools::new(runner.clone(), Elevation::Sudo("sudo".to_string())),
            "testparm",
        )
    }

    #[test]
    fn test_valid() {
        let runner = Arc::new(ScriptedRunner::new());
        let outcome = validator(&runner)
            .validate(Path::new("/etc/samba/smb.conf"))
            .unwrap();
        assert_eq!(outcome, ValidationOutcome::Valid);
        assert!(runner.was_called("sudo -n testparm -s /etc/samba/smb.conf"));
    }

    #[test]
    fn test_invalid_carries_diagnostic() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("testparm -s", 1, "Unknown parameter encountered: \"bogus\"");
        let outcome = validator(&runner)
            .validate(Path::new("/etc/samba/smb.conf"))
            .unwrap();
        assert_eq!(
            outcome,
            ValidationOutcome::Invalid {
                diagnostic: "Unknown parameter encountered: \"bogus\"".to_string()
            }
        );
    }

    #[test]
    fn test_missing_binary_skips() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("which testparm", 1, "");
        let outcome = validator(&runner)
            .validate(Path::new("/etc/samba/smb.conf"))
            .unwrap();
        assert_eq!(outcome, ValidationOutcome::Skipped);
        assert!(!runner.was_called("testparm -s"));
    }
}
