//! Integration tests for the operation facade in local mode

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use smbadmin_backend::api::QuickSetup;
use smbadmin_backend::exec::ScriptedRunner;
use smbadmin_backend::{ApiHandlers, Config, OutcomeStatus};

fn local_api(temp_dir: &TempDir, runner: &Arc<ScriptedRunner>) -> ApiHandlers {
    ApiHandlers::from_config(&Config::local(temp_dir.path()), runner.clone())
}

#[test]
fn test_quick_setup_restricts_share_to_default_group() {
    let temp_dir = TempDir::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let api = local_api(&temp_dir, &runner);

    let setup = QuickSetup {
        share_name: "public".to_string(),
        share_path: temp_dir.path().join("public").to_string_lossy().to_string(),
        workgroup: "HOME".to_string(),
        guest_access: false,
    };
    let outcome = api.quick_setup(&setup);
    assert_eq!(outcome.status, OutcomeStatus::Success, "{}", outcome.message);

    let settings = api.global_settings().unwrap();
    assert_eq!(settings.get("workgroup"), Some("HOME"));
    assert_eq!(settings.get("map_to_guest"), Some("Never"));

    let shares = api.list_shares().unwrap();
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].valid_users, "@smbusers");
    assert_eq!(shares[0].create_mask, "0770");
    assert!(temp_dir.path().join("public").is_dir());

    // local mode never restarts services
    assert!(!runner.was_called("restart"));
}

#[test]
fn test_missing_validator_is_warning() {
    let temp_dir = TempDir::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.on_failure("which testparm", 1, "");
    let api = local_api(&temp_dir, &runner);

    let outcome = api.write_global_settings(vec![("workgroup".to_string(), "HOME".to_string())]);
    assert_eq!(outcome.status, OutcomeStatus::Warning);
}

#[test]
fn test_failures_become_outcomes() {
    let temp_dir = TempDir::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.on_failure("smbpasswd -d", 1, "User bob is already disabled");
    let api = local_api(&temp_dir, &runner);

    assert_eq!(api.disable_user("bob").status, OutcomeStatus::Warning);
    assert_eq!(api.delete_share("ghost").status, OutcomeStatus::Failure);
    assert_eq!(api.restore_backup("nothing.tar.gz").status, OutcomeStatus::Failure);
    assert_eq!(api.add_user("bad name", "pw", false).status, OutcomeStatus::Failure);
}

#[test]
fn test_backup_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let api = local_api(&temp_dir, &runner);
    fs::write(temp_dir.path().join("smb.conf"), "[global]\n    workgroup = KEEP\n").unwrap();

    assert_eq!(api.create_backup().status, OutcomeStatus::Success);
    let backups = api.list_backups().unwrap();
    assert_eq!(backups.len(), 1);

    fs::write(temp_dir.path().join("smb.conf"), "[global]\n    workgroup = LOST\n").unwrap();
    let outcome = api.restore_backup(&backups[0].filename);
    assert_eq!(outcome.status, OutcomeStatus::Success, "{}", outcome.message);
    assert_eq!(api.global_settings().unwrap().get("workgroup"), Some("KEEP"));

    assert_eq!(
        api.delete_backup(&backups[0].filename).status,
        OutcomeStatus::Success
    );
    assert!(api.list_backups().unwrap().is_empty());
}
