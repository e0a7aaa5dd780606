//! External command execution
//!
//! Every consequential action in smbadmin ends in an external tool run
//! (`testparm`, `systemctl`, `smbpasswd`, `cp`, ...). They all go through the
//! [`CommandRunner`] trait so the storage, service and identity layers can be
//! exercised against [`ScriptedRunner`] without root or a Samba install.
//!
//! Commands block until the child exits. No timeout is applied here.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::{PrivilegeConfig, PrivilegeMode};
use crate::error::{BackendResult, ToolError};

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Input to send to stdin. Never logged.
    pub stdin_input: Option<Vec<u8>>,
}

impl CommandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set stdin input
    pub fn with_stdin<I: Into<Vec<u8>>>(mut self, input: I) -> Self {
        self.stdin_input = Some(input.into());
        self
    }
}

/// Output from command execution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit status code (-1 when killed by a signal)
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn new(status: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Diagnostic text: stderr, or stdout when stderr is empty
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr_lossy();
        if stderr.trim().is_empty() {
            self.stdout_lossy().trim().to_string()
        } else {
            stderr.trim().to_string()
        }
    }
}

/// Command execution interface
pub trait CommandRunner: Send + Sync {
    /// Execute a command and wait for completion
    ///
    /// A non-zero exit is not an error; only a failure to run the program is.
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        options: CommandOptions,
    ) -> BackendResult<CommandOutput>;

    fn execute_simple(&self, program: &str, args: &[&str]) -> BackendResult<CommandOutput> {
        self.execute(program, args, CommandOptions::new())
    }
}

/// Runs commands with `std::process`
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemCommandRunner {
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        options: CommandOptions,
    ) -> BackendResult<CommandOutput> {
        debug!("Executing command: {} {}", program, args.join(" "));

        let spawn_failed = |e: std::io::Error| ToolError::SpawnFailed {
            program: program.to_string(),
            reason: e.to_string(),
        };

        let mut cmd = Command::new(program);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if options.stdin_input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| {
            warn!("Failed to spawn {}: {}", program, e);
            spawn_failed(e)
        })?;

        if let Some(input) = &options.stdin_input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input).map_err(spawn_failed)?;
            }
        }

        let output = child.wait_with_output().map_err(spawn_failed)?;
        let result = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        };

        if !result.success() {
            debug!("{} exited with status {}", program, result.status);
        }
        Ok(result)
    }
}

/// How privileged commands are prefixed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elevation {
    /// `<sudo> -n <program> <args>`
    Sudo(String),
    /// Run as the current user
    Direct,
}

impl Elevation {
    pub fn from_config(config: &PrivilegeConfig) -> Self {
        match config.mode {
            PrivilegeMode::Sudo => Elevation::Sudo(config.sudo_binary.clone()),
            PrivilegeMode::Direct => Elevation::Direct,
        }
    }

    /// Rewrite a command line for privileged execution
    pub fn wrap<'a>(&'a self, program: &'a str, args: &[&'a str]) -> (&'a str, Vec<&'a str>) {
        match self {
            Elevation::Sudo(sudo) => {
                let mut wrapped = Vec::with_capacity(args.len() + 2);
                wrapped.push("-n");
                wrapped.push(program);
                wrapped.extend_from_slice(args);
                (sudo.as_str(), wrapped)
            }
            Elevation::Direct => (program, args.to_vec()),
        }
    }
}

/// A [`CommandRunner`] paired with the configured elevation
#[derive(Clone)]
pub struct Tools {
    runner: Arc<dyn CommandRunner>,
    elevation: Elevation,
}

impl Tools {
    pub fn new(runner: Arc<dyn CommandRunner>, elevation: Elevation) -> Self {
        Self { runner, elevation }
    }

    pub fn elevation(&self) -> &Elevation {
        &self.elevation
    }

    /// Run as the current user
    pub fn run(&self, program: &str, args: &[&str]) -> BackendResult<CommandOutput> {
        self.runner.execute_simple(program, args)
    }

    /// Run through the configured elevation
    pub fn run_privileged(
        &self,
        program: &str,
        args: &[&str],
        options: CommandOptions,
    ) -> BackendResult<CommandOutput> {
        let (program, args) = self.elevation.wrap(program, args);
        self.runner.execute(program, &args, options)
    }

    /// Run privileged and turn a non-zero exit into [`ToolError::Failed`]
    pub fn run_privileged_checked(
        &self,
        program: &str,
        args: &[&str],
        options: CommandOptions,
    ) -> BackendResult<CommandOutput> {
        let output = self.run_privileged(program, args, options)?;
        if output.success() {
            Ok(output)
        } else {
            let diagnostic = output.diagnostic();
            warn!(
                "{} {} failed with status {}: {}",
                program,
                args.join(" "),
                output.status,
                diagnostic
            );
            Err(ToolError::Failed {
                program: program.to_string(),
                status: output.status,
                diagnostic,
            }
            .into())
        }
    }

    /// Whether `program` resolves on PATH
    pub fn is_available(&self, program: &str) -> bool {
        matches!(self.run("which", &[program]), Ok(output) if output.success())
    }
}

enum ScriptedResponse {
    Output(CommandOutput),
    SpawnError,
}

struct ScriptedRule {
    pattern: String,
    response: ScriptedResponse,
}

/// One invocation seen by [`ScriptedRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Program and arguments joined by spaces
    pub command_line: String,
    pub stdin: Option<Vec<u8>>,
}

/// Test double answering commands from substring rules
///
/// Each invocation's command line (program and arguments joined by spaces)
/// is matched against the registered patterns; the most recently added
/// matching rule answers. Unmatched commands succeed with empty output.
/// Every invocation is recorded.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<ScriptedRule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with the given output
    pub fn on(&self, pattern: &str, status: i32, stdout: &str, stderr: &str) -> &Self {
        lock(&self.rules).push(ScriptedRule {
            pattern: pattern.to_string(),
            response: ScriptedResponse::Output(CommandOutput::new(
                status,
                stdout.as_bytes(),
                stderr.as_bytes(),
            )),
        });
        self
    }

    pub fn on_success(&self, pattern: &str, stdout: &str) -> &Self {
        self.on(pattern, 0, stdout, "")
    }

    pub fn on_failure(&self, pattern: &str, status: i32, stderr: &str) -> &Self {
        self.on(pattern, status, "", stderr)
    }

    /// Make commands containing `pattern` fail to spawn
    pub fn on_spawn_error(&self, pattern: &str) -> &Self {
        lock(&self.rules).push(ScriptedRule {
            pattern: pattern.to_string(),
            response: ScriptedResponse::SpawnError,
        });
        self
    }

    /// Command lines seen so far, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .map(|c| c.command_line.clone())
            .collect()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn was_called(&self, pattern: &str) -> bool {
        lock(&self.calls)
            .iter()
            .any(|c| c.command_line.contains(pattern))
    }

    /// Stdin sent to the first command containing `pattern`
    pub fn stdin_for(&self, pattern: &str) -> Option<Vec<u8>> {
        lock(&self.calls)
            .iter()
            .find(|c| c.command_line.contains(pattern))
            .and_then(|c| c.stdin.clone())
    }
}

impl CommandRunner for ScriptedRunner {
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        options: CommandOptions,
    ) -> BackendResult<CommandOutput> {
        let command_line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");

        lock(&self.calls).push(RecordedCall {
            command_line: command_line.clone(),
            stdin: options.stdin_input,
        });

        let rules = lock(&self.rules);
        match rules
            .iter()
            .rev()
            .find(|rule| command_line.contains(&rule.pattern))
            .map(|rule| &rule.response)
        {
            Some(ScriptedResponse::Output(output)) => Ok(output.clone()),
            Some(ScriptedResponse::SpawnError) => Err(ToolError::SpawnFailed {
                program: program.to_string(),
                reason: "No such file or directory".to_string(),
            }
            .into()),
            None => Ok(CommandOutput::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use assert_matches::assert_matches;

    #[test]
    fn test_elevation_wrap() {
        let sudo = Elevation::Sudo("sudo".to_string());
        let (program, args) = sudo.wrap("cp", &["/tmp/a", "/etc/samba/smb.conf"]);
        assert_eq!(program, "sudo");
        assert_eq!(args, vec!["-n", "cp", "/tmp/a", "/etc/samba/smb.conf"]);

        let (program, args) = Elevation::Direct.wrap("cp", &["a", "b"]);
        assert_eq!(program, "cp");
        assert_eq!(args, vec!["a", "b"]);
    }

    #[test]
    fn test_scripted_runner_latest_rule_wins() {
        let runner = ScriptedRunner::new();
        runner.on_failure("systemctl", 1, "generic failure");
        runner.on_success("systemctl is-active smbd", "active\n");

        let output = runner
            .execute_simple("systemctl", &["is-active", "smbd"])
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "active\n");

        let output = runner
            .execute_simple("systemctl", &["restart", "smbd.service"])
            .unwrap();
        assert_eq!(output.status, 1);
        assert_eq!(output.diagnostic(), "generic failure");

        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_scripted_runner_records_stdin_and_spawn_errors() {
        let runner = ScriptedRunner::new();
        runner.on_spawn_error("testparm");

        assert_matches!(
            runner.execute_simple("testparm", &["-s"]),
            Err(BackendError::Tool(ToolError::SpawnFailed { .. }))
        );

        runner
            .execute(
                "smbpasswd",
                &["-s", "-a", "alice"],
                CommandOptions::new().with_stdin("pw\npw\n"),
            )
            .unwrap();
        assert_eq!(runner.stdin_for("smbpasswd").unwrap(), b"pw\npw\n".to_vec());
        assert!(runner.was_called("smbpasswd -s -a alice"));
    }

    #[test]
    fn test_checked_run_reports_diagnostic() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("groupadd", 9, "groupadd: group 'staff' already exists");
        let tools = Tools::new(runner.clone(), Elevation::Sudo("sudo".to_string()));

        let err = tools
            .run_privileged_checked("groupadd", &["staff"], CommandOptions::new())
            .unwrap_err();
        assert_matches!(
            err,
            BackendError::Tool(ToolError::Failed { status: 9, ref diagnostic, .. })
                if diagnostic.contains("already exists")
        );
        assert_eq!(runner.calls(), vec!["sudo -n groupadd staff"]);
    }

    #[test]
    fn test_diagnostic_falls_back_to_stdout() {
        let output = CommandOutput::new(1, "Load smb config files\nError\n", "");
        assert_eq!(output.diagnostic(), "Load smb config files\nError");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_passes_stdin() {
        let runner = SystemCommandRunner::new();
        let output = runner
            .execute("cat", &[], CommandOptions::new().with_stdin("hello"))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "hello");
    }
}
