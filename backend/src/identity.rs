//! Samba accounts and local system users and groups
//!
//! Every operation shells out to the account tools (`pdbedit`,
//! `smbpasswd`, `useradd`, `groupadd`, ...) while holding the identity
//! advisory lock: shared for listings, exclusive for changes. Passwords
//! only ever travel on stdin.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::IdentityConfig;
use crate::error::{BackendError, BackendResult, IdentityError, ToolError};
use crate::exec::{CommandOptions, CommandOutput, Tools};
use crate::storage::file_lock::{FileLock, LockMode};
use crate::storage::privileged::{require_write_access, PrivilegedFs};
use smbadmin_shared::models::user::{
    parse_account_flags, parse_group, parse_passwd, parse_pdbedit_list, parse_smbpasswd,
};
use smbadmin_shared::models::{SambaUser, SystemAccount};
use smbadmin_shared::validation::{validate_group_name, validate_password, validate_username};

/// Group that takes over users whose primary group is deleted
const FALLBACK_PRIMARY_GROUP: &str = "users";
const DEFAULT_FLAGS: &str = "U";

pub struct IdentityManager {
    tools: Tools,
    fs: Arc<dyn PrivilegedFs>,
    lock_file: PathBuf,
    lock_timeout: Duration,
    smbpasswd_file: PathBuf,
    min_uid: u32,
    default_group: String,
}

impl IdentityManager {
    pub fn new(
        tools: Tools,
        fs: Arc<dyn PrivilegedFs>,
        config: &IdentityConfig,
        default_group: impl Into<String>,
    ) -> Self {
        Self {
            tools,
            fs,
            lock_file: config.lock_file.clone(),
            lock_timeout: Duration::from_secs(config.lock_timeout),
            smbpasswd_file: config.smbpasswd_file.clone(),
            min_uid: config.min_uid,
            default_group: default_group.into(),
        }
    }

    fn require_access(&self, operation: &str) -> BackendResult<()> {
        require_write_access(self.fs.as_ref(), operation)
    }

    fn lock(&self, mode: LockMode) -> BackendResult<FileLock> {
        FileLock::acquire(&self.lock_file, mode, self.lock_timeout)
            .map_err(|e| e.into_storage_error(&self.lock_file).into())
    }

    /// Samba accounts with their enabled state
    pub fn list_users(&self) -> BackendResult<Vec<SambaUser>> {
        let _lock = self.lock(LockMode::Shared)?;

        match self
            .tools
            .run_privileged("pdbedit", &["-L"], CommandOptions::new())
        {
            Ok(output) if output.success() && !output.stdout_lossy().trim().is_empty() => {
                let users = parse_pdbedit_list(&output.stdout_lossy())
                    .into_iter()
                    .map(|username| self.account_details(username))
                    .collect();
                return Ok(users);
            }
            Ok(output) => debug!("pdbedit -L returned nothing usable: {}", output.diagnostic()),
            Err(e) => debug!("pdbedit unavailable: {}", e),
        }

        debug!("Falling back to {:?}", self.smbpasswd_file);
        Ok(self
            .fs
            .read_to_string(&self.smbpasswd_file)?
            .map(|content| parse_smbpasswd(&content))
            .unwrap_or_default())
    }

    fn account_details(&self, username: String) -> SambaUser {
        let flags = self
            .tools
            .run_privileged("pdbedit", &["-v", "-u", &username], CommandOptions::new())
            .ok()
            .filter(CommandOutput::success)
            .and_then(|output| parse_account_flags(&output.stdout_lossy()))
            .unwrap_or_else(|| DEFAULT_FLAGS.to_string());
        SambaUser::from_flags(username, &flags)
    }

    /// Run `smbpasswd`, mapping well-known failures to identity errors
    fn smbpasswd(&self, args: &[&str], username: &str, password: Option<&str>) -> BackendResult<()> {
        let mut full_args = args.to_vec();
        full_args.push(username);
        let options = match password {
            Some(password) => CommandOptions::new().with_stdin(format!("{0}\n{0}\n", password)),
            None => CommandOptions::new(),
        };

        let output = self.tools.run_privileged("smbpasswd", &full_args, options)?;
        if output.success() {
            Ok(())
        } else {
            Err(classify_failure(&output, username))
        }
    }

    pub fn add_user(
        &self,
        username: &str,
        password: &str,
        create_system_user: bool,
    ) -> BackendResult<()> {
        validate_username(username)?;
        validate_password(password)?;
        self.require_access("add user")?;
        let _lock = self.lock(LockMode::Exclusive)?;

        let system_user_exists = matches!(
            self.tools.run("id", &[username]),
            Ok(output) if output.success()
        );

        if !system_user_exists && create_system_user {
            info!("Creating system user {}", username);
            self.tools.run_privileged_checked(
                "useradd",
                &["-m", "-s", "/bin/bash", username],
                CommandOptions::new(),
            )?;
            self.tools.run_privileged_checked(
                "chpasswd",
                &[],
                CommandOptions::new().with_stdin(format!("{}:{}", username, password)),
            )?;
        }

        if let Err(e) = self.ensure_group_locked(&self.default_group) {
            warn!("Could not ensure group {}: {}", self.default_group, e);
        }
        if system_user_exists || create_system_user {
            let group = self.default_group.as_str();
            if let Err(e) = self.tools.run_privileged_checked(
                "usermod",
                &["-aG", group, username],
                CommandOptions::new(),
            ) {
                warn!("Could not add {} to {}: {}", username, group, e);
            }
        }

        info!("Creating Samba account {}", username);
        self.smbpasswd(&["-s", "-a"], username, Some(password))?;
        self.smbpasswd(&["-e"], username, None)
    }

    /// Remove the Samba account; `userdel -r` is best effort
    pub fn remove_user(&self, username: &str, delete_system_user: bool) -> BackendResult<()> {
        validate_username(username)?;
        self.require_access("remove user")?;
        let _lock = self.lock(LockMode::Exclusive)?;

        let removed = self.smbpasswd(&["-x"], username, None);
        if delete_system_user {
            if let Err(e) = self.tools.run_privileged_checked(
                "userdel",
                &["-r", username],
                CommandOptions::new(),
            ) {
                warn!("Could not delete system user {}: {}", username, e);
            }
        }
        if removed.is_ok() {
            info!("Removed Samba account {}", username);
        }
        removed
    }

    pub fn enable_user(&self, username: &str) -> BackendResult<()> {
        validate_username(username)?;
        self.require_access("enable user")?;
        let _lock = self.lock(LockMode::Exclusive)?;
        self.smbpasswd(&["-e"], username, None)
    }

    pub fn disable_user(&self, username: &str) -> BackendResult<()> {
        validate_username(username)?;
        self.require_access("disable user")?;
        let _lock = self.lock(LockMode::Exclusive)?;
        self.smbpasswd(&["-d"], username, None)
    }

    pub fn reset_password(&self, username: &str, password: &str) -> BackendResult<()> {
        validate_username(username)?;
        validate_password(password)?;
        self.require_access("reset password")?;
        let _lock = self.lock(LockMode::Exclusive)?;
        self.smbpasswd(&["-s"], username, Some(password))
    }

    fn getent(&self, database: &str, key: Option<&str>) -> BackendResult<Option<String>> {
        let mut args = vec![database];
        args.extend(key);
        let output = self.tools.run("getent", &args)?;
        Ok(output.success().then(|| output.stdout_lossy()))
    }

    /// Regular users (uid at or above the configured minimum)
    pub fn list_system_users(&self) -> BackendResult<Vec<SystemAccount>> {
        let _lock = self.lock(LockMode::Shared)?;
        Ok(self
            .getent("passwd", None)?
            .map(|out| parse_passwd(&out, self.min_uid))
            .unwrap_or_default())
    }

    /// Regular groups (gid at or above the configured minimum)
    pub fn list_system_groups(&self) -> BackendResult<Vec<SystemAccount>> {
        let _lock = self.lock(LockMode::Shared)?;
        Ok(self
            .getent("group", None)?
            .map(|out| parse_group(&out, self.min_uid))
            .unwrap_or_default())
    }

    fn find_group(&self, name: &str) -> BackendResult<Option<SystemAccount>> {
        Ok(self
            .getent("group", Some(name))?
            .and_then(|out| parse_group(&out, 0).into_iter().next()))
    }

    /// Create `name` if missing; returns whether it was created
    fn ensure_group_locked(&self, name: &str) -> BackendResult<bool> {
        if self.getent("group", Some(name))?.is_some() {
            debug!("Group {} already exists", name);
            return Ok(false);
        }
        info!("Creating group {}", name);
        self.tools
            .run_privileged_checked("groupadd", &[name], CommandOptions::new())?;
        Ok(true)
    }

    pub fn ensure_group(&self, name: &str) -> BackendResult<bool> {
        validate_group_name(name)?;
        self.require_access("create group")?;
        let _lock = self.lock(LockMode::Exclusive)?;
        self.ensure_group_locked(name)
    }

    /// Create a group; an existing group counts as success
    pub fn create_group(&self, name: &str) -> BackendResult<bool> {
        self.ensure_group(name)
    }

    /// Delete a group, first moving users whose primary group it is to `users`
    pub fn delete_group(&self, name: &str) -> BackendResult<()> {
        validate_group_name(name)?;
        self.require_access("delete group")?;
        let _lock = self.lock(LockMode::Exclusive)?;

        let group = self
            .find_group(name)?
            .ok_or_else(|| IdentityError::GroupNotFound {
                group: name.to_string(),
            })?;

        let primary_members: Vec<String> = self
            .getent("passwd", None)?
            .map(|out| parse_passwd(&out, 0))
            .unwrap_or_default()
            .into_iter()
            .filter(|user| user.primary_gid == Some(group.id))
            .map(|user| user.name)
            .collect();

        if !primary_members.is_empty() {
            info!(
                "Group {} is the primary group of {}; moving them to {}",
                name,
                primary_members.join(", "),
                FALLBACK_PRIMARY_GROUP
            );
            self.ensure_group_locked(FALLBACK_PRIMARY_GROUP)?;
            for user in &primary_members {
                self.tools.run_privileged_checked(
                    "usermod",
                    &["-g", FALLBACK_PRIMARY_GROUP, user],
                    CommandOptions::new(),
                )?;
            }
        }

        self.tools
            .run_privileged_checked("groupdel", &[name], CommandOptions::new())?;
        info!("Deleted group {}", name);
        Ok(())
    }
}

/// Map `smbpasswd` diagnostics onto identity errors
fn classify_failure(output: &CommandOutput, username: &str) -> BackendError {
    let diagnostic = output.diagnostic();
    if diagnostic.contains("Failed to find entry") {
        IdentityError::UserNotFound {
            username: username.to_string(),
        }
        .into()
    } else if diagnostic.to_lowercase().contains("already disabled") {
        IdentityError::AlreadyDisabled {
            username: username.to_string(),
        }
        .into()
    } else {
        warn!("smbpasswd failed for {}: {}", username, diagnostic);
        ToolError::Failed {
            program: "smbpasswd".to_string(),
            status: output.status,
            diagnostic,
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Elevation, ScriptedRunner};
    use crate::storage::privileged::LocalFs;
    use assert_matches::assert_matches;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    fn manager(dir: &TempDir, runner: &Arc<ScriptedRunner>) -> IdentityManager {
        let config = IdentityConfig {
            lock_file: dir.path().join("identity.lock"),
            lock_timeout: 1,
            smbpasswd_file: dir.path().join("smbpasswd"),
            min_uid: 1000,
        };
        IdentityManager::new(
            Tools::new(runner.clone(), Elevation::Direct),
            Arc::new(LocalFs::new(dir.path())),
            &config,
            "smbusers",
        )
    }

    #[test]
    fn test_disable_already_disabled() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("smbpasswd -d", 1, "User alice is Already Disabled.");

        assert_matches!(
            manager(&dir, &runner).disable_user("alice"),
            Err(BackendError::Identity(IdentityError::AlreadyDisabled { ref username }))
                if username == "alice"
        );
    }

    #[test]
    fn test_enable_unknown_user() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("smbpasswd -e", 1, "Failed to find entry for user bob.");

        assert_matches!(
            manager(&dir, &runner).enable_user("bob"),
            Err(BackendError::Identity(IdentityError::UserNotFound { .. }))
        );
    }

    #[test]
    fn test_other_failures_keep_diagnostic() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("smbpasswd -x", 3, "tdb corrupt");

        assert_matches!(
            manager(&dir, &runner).remove_user("bob", false),
            Err(BackendError::Tool(ToolError::Failed { status: 3, ref diagnostic, .. }))
                if diagnostic == "tdb corrupt"
        );
    }

    #[test]
    fn test_add_user_passes_password_on_stdin() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        manager(&dir, &runner).add_user("alice", "s3cret", false).unwrap();

        assert_eq!(
            runner.stdin_for("smbpasswd -s -a alice"),
            Some(b"s3cret\ns3cret\n".to_vec())
        );
        assert!(runner.was_called("usermod -aG smbusers alice"));
        assert!(runner.was_called("smbpasswd -e alice"));
        assert!(!runner.was_called("useradd"));
        assert!(!runner.was_called("groupadd"));
    }

    #[test]
    fn test_add_user_creates_system_account_and_group() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("id alice", 1, "id: 'alice': no such user");
        runner.on_failure("getent group smbusers", 2, "");
        manager(&dir, &runner).add_user("alice", "pw", true).unwrap();

        assert!(runner.was_called("useradd -m -s /bin/bash alice"));
        assert_eq!(runner.stdin_for("chpasswd"), Some(b"alice:pw".to_vec()));
        assert!(runner.was_called("groupadd smbusers"));
    }

    #[test]
    fn test_invalid_username_runs_nothing() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        assert_matches!(
            manager(&dir, &runner).add_user("bad user", "pw", false),
            Err(BackendError::Validation(_))
        );
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_read_only_access_denies_account_changes() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let config = IdentityConfig {
            lock_file: dir.path().join("identity.lock"),
            lock_timeout: 1,
            smbpasswd_file: dir.path().join("smbpasswd"),
            min_uid: 1000,
        };
        let manager = IdentityManager::new(
            Tools::new(runner.clone(), Elevation::Direct),
            Arc::new(LocalFs::new(dir.path()).read_only()),
            &config,
            "smbusers",
        );

        let denied = [
            manager.add_user("alice", "pw", true),
            manager.remove_user("alice", true),
            manager.enable_user("alice"),
            manager.disable_user("alice"),
            manager.reset_password("alice", "pw"),
            manager.create_group("media").map(|_| ()),
            manager.delete_group("media"),
        ];
        for result in denied {
            assert_matches!(result, Err(BackendError::PermissionDenied { .. }));
        }
        assert!(runner.calls().is_empty());
        assert!(!dir.path().join("identity.lock").exists());

        // listings stay available
        assert!(manager.list_system_groups().is_ok());
    }

    #[test]
    fn test_list_users_from_pdbedit() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_success("pdbedit -L", "alice:1000:Alice\nbob:1001:\n");
        runner.on_success("pdbedit -v -u bob", "Unix username:        bob\nAccount Flags:        [DU         ]\n");

        let users = manager(&dir, &runner).list_users().unwrap();
        assert_eq!(users.len(), 2);
        assert!(users[0].enabled);
        assert_eq!(users[0].flags, "U");
        assert!(!users[1].enabled);
    }

    #[test]
    fn test_list_users_falls_back_to_smbpasswd() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("pdbedit", 127, "pdbedit: command not found");
        std::fs::write(
            dir.path().join("smbpasswd"),
            "carol:1002:XXXX:0123456789ABCDEF:[UD         ]:LCT-00000000:\n",
        )
        .unwrap();

        let users = manager(&dir, &runner).list_users().unwrap();
        assert_eq!(users, vec![SambaUser::from_flags("carol", "[UD         ]")]);
        assert!(!users[0].enabled);
    }

    #[test]
    fn test_delete_group_moves_primary_members() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_success("getent group devs", "devs:x:1005:\n");
        runner.on_success(
            "getent passwd",
            "alice:x:1000:1005::/home/alice:/bin/bash\nbob:x:1001:1001::/home/bob:/bin/bash\n",
        );

        manager(&dir, &runner).delete_group("devs").unwrap();
        assert!(runner.was_called("usermod -g users alice"));
        assert!(!runner.was_called("usermod -g users bob"));
        assert!(runner.was_called("groupdel devs"));
    }

    #[test]
    fn test_delete_missing_group() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("getent group ghosts", 2, "");

        assert_matches!(
            manager(&dir, &runner).delete_group("ghosts"),
            Err(BackendError::Identity(IdentityError::GroupNotFound { .. }))
        );
        assert!(!runner.was_called("groupdel"));
    }

    #[test]
    fn test_create_existing_group_succeeds() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        assert!(!manager(&dir, &runner).create_group("media").unwrap());
        assert!(!runner.was_called("groupadd"));
        assert!(Path::new(&dir.path().join("identity.lock")).exists());
    }
}
