//! Samba service lifecycle control
//!
//! Hosts differ in how services are managed, so every action is attempted
//! through an ordered list of [`ControlMechanism`]s. The first mechanism
//! whose commands all succeed wins; if none does, the primary mechanism's
//! diagnostic is reported.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{BackendResult, ToolError};
use crate::exec::{CommandOptions, Tools};

/// Lifecycle action applied to every controlled service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Enable,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Enable => "enable",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            "enable" => Ok(ServiceAction::Enable),
            other => Err(format!("unknown service action: {}", other)),
        }
    }
}

/// One way of controlling services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMechanism {
    /// `systemctl <action> <svc>.service...`
    Systemctl,
    /// `service <svc> <action>` for each service
    Service,
    /// `/etc/init.d/<svc> <action>` for each service
    InitScript,
}

impl ControlMechanism {
    pub fn default_order() -> [ControlMechanism; 3] {
        [
            ControlMechanism::Systemctl,
            ControlMechanism::Service,
            ControlMechanism::InitScript,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlMechanism::Systemctl => "systemctl",
            ControlMechanism::Service => "service",
            ControlMechanism::InitScript => "init script",
        }
    }

    /// Command lines that perform `action`, or `None` if unsupported
    pub fn commands(&self, action: ServiceAction, services: &[String]) -> Option<Vec<Vec<String>>> {
        match self {
            ControlMechanism::Systemctl => {
                let mut cmd = vec!["systemctl".to_string(), action.to_string()];
                cmd.extend(services.iter().map(|s| format!("{}.service", s)));
                Some(vec![cmd])
            }
            ControlMechanism::Service => {
                if action == ServiceAction::Enable {
                    return None;
                }
                Some(
                    services
                        .iter()
                        .map(|s| vec!["service".to_string(), s.clone(), action.to_string()])
                        .collect(),
                )
            }
            ControlMechanism::InitScript => Some(
                services
                    .iter()
                    .map(|s| match action {
                        ServiceAction::Enable => vec![
                            "update-rc.d".to_string(),
                            s.clone(),
                            "enable".to_string(),
                        ],
                        _ => vec![format!("/etc/init.d/{}", s), action.to_string()],
                    })
                    .collect(),
            ),
        }
    }
}

/// Observed state of one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Active,
    Inactive,
    Unknown,
}

impl ServiceState {
    /// Interpret `systemctl is-active` output
    fn from_systemctl(output: &str) -> Option<Self> {
        match output.trim() {
            "active" | "reloading" | "activating" => Some(ServiceState::Active),
            "inactive" | "failed" | "deactivating" => Some(ServiceState::Inactive),
            "unknown" => Some(ServiceState::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Active => f.write_str("active"),
            ServiceState::Inactive => f.write_str("inactive"),
            ServiceState::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
}

/// State of every controlled service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub services: Vec<ServiceStatus>,
}

impl ServiceReport {
    pub fn state(&self, name: &str) -> ServiceState {
        self.services
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.state)
            .unwrap_or(ServiceState::Unknown)
    }

    pub fn all_active(&self) -> bool {
        self.services.iter().all(|s| s.state == ServiceState::Active)
    }
}

fn systemd_unavailable(text: &str) -> bool {
    text.contains("\"systemd\" is not running") || text.contains("not been booted with systemd")
}

/// Starts, stops, restarts and enables the Samba services
#[derive(Clone)]
pub struct ServiceController {
    tools: Tools,
    services: Vec<String>,
    mechanisms: Vec<ControlMechanism>,
}

impl ServiceController {
    pub fn new(tools: Tools, services: Vec<String>, mechanisms: Vec<ControlMechanism>) -> Self {
        Self {
            tools,
            services,
            mechanisms,
        }
    }

    pub fn from_config(tools: Tools, config: &ServiceConfig) -> Self {
        Self::new(tools, config.names.clone(), config.mechanisms.clone())
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// Run `action` through the first mechanism that succeeds
    pub fn perform(&self, action: ServiceAction) -> BackendResult<ControlMechanism> {
        let mut primary_diagnostic: Option<String> = None;

        for mechanism in &self.mechanisms {
            let Some(commands) = mechanism.commands(action, &self.services) else {
                debug!("{} does not support {}, skipping", mechanism.name(), action);
                continue;
            };

            match self.run_all(&commands) {
                Ok(()) => {
                    info!("Services {} via {}", past_tense(action), mechanism.name());
                    return Ok(*mechanism);
                }
                Err(diagnostic) => {
                    warn!("{} {} failed: {}", mechanism.name(), action, diagnostic);
                    primary_diagnostic.get_or_insert(diagnostic);
                }
            }
        }

        Err(ToolError::ServiceControl {
            action: action.to_string(),
            diagnostic: primary_diagnostic
                .unwrap_or_else(|| format!("no control mechanism supports {}", action)),
        }
        .into())
    }

    fn run_all(&self, commands: &[Vec<String>]) -> Result<(), String> {
        for command in commands {
            let Some((program, args)) = command.split_first() else {
                continue;
            };
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            match self
                .tools
                .run_privileged(program, &args, CommandOptions::new())
            {
                Ok(output) if output.success() => {}
                Ok(output) => return Err(output.diagnostic()),
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    }

    pub fn restart(&self) -> BackendResult<()> {
        self.perform(ServiceAction::Restart).map(|_| ())
    }

    pub fn start(&self) -> BackendResult<()> {
        self.perform(ServiceAction::Start).map(|_| ())
    }

    pub fn stop(&self) -> BackendResult<()> {
        self.perform(ServiceAction::Stop).map(|_| ())
    }

    pub fn enable(&self) -> BackendResult<()> {
        self.perform(ServiceAction::Enable).map(|_| ())
    }

    /// Probe every service; never fails
    pub fn status(&self) -> ServiceReport {
        let mut systemd_usable = true;
        let mut services = Vec::with_capacity(self.services.len());

        for name in &self.services {
            let mut state = None;
            if systemd_usable {
                state = self.probe_systemctl(name);
                systemd_usable = state.is_some();
            }
            services.push(ServiceStatus {
                name: name.clone(),
                state: state.unwrap_or_else(|| self.probe_service(name)),
            });
        }

        ServiceReport { services }
    }

    fn probe_systemctl(&self, name: &str) -> Option<ServiceState> {
        let output = match self.tools.run("systemctl", &["is-active", name]) {
            Ok(output) => output,
            Err(e) => {
                debug!("systemctl unavailable: {}", e);
                return None;
            }
        };
        let stdout = output.stdout_lossy();
        if systemd_unavailable(&stdout) || systemd_unavailable(&output.stderr_lossy()) {
            debug!("systemd is not running, falling back to service");
            return None;
        }
        ServiceState::from_systemctl(&stdout)
    }

    fn probe_service(&self, name: &str) -> ServiceState {
        match self.tools.run("service", &[name, "status"]) {
            Ok(output) if output.success() => ServiceState::Active,
            Ok(_) => ServiceState::Inactive,
            Err(e) => {
                debug!("service unavailable: {}", e);
                ServiceState::Unknown
            }
        }
    }
}

fn past_tense(action: ServiceAction) -> &'static str {
    match action {
        ServiceAction::Start => "started",
        ServiceAction::Stop => "stopped",
        ServiceAction::Restart => "restarted",
        ServiceAction::Enable => "enabled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::exec::{Elevation, ScriptedRunner};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn controller(runner: &Arc<ScriptedRunner>) -> ServiceController {
        ServiceController::new(
            Tools::new(runner.clone(), Elevation::Sudo("sudo".to_string())),
            vec!["smbd".to_string(), "nmbd".to_string()],
            ControlMechanism::default_order().to_vec(),
        )
    }

    #[test]
    fn test_systemctl_first() {
        let runner = Arc::new(ScriptedRunner::new());
        let used = controller(&runner).perform(ServiceAction::Restart).unwrap();
        assert_eq!(used, ControlMechanism::Systemctl);
        assert_eq!(
            runner.calls(),
            vec!["sudo -n systemctl restart smbd.service nmbd.service"]
        );
    }

    #[test]
    fn test_falls_back_to_service_command() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("systemctl", 1, "System has not been booted with systemd");
        let used = controller(&runner).perform(ServiceAction::Restart).unwrap();
        assert_eq!(used, ControlMechanism::Service);
        assert!(runner.was_called("sudo -n service smbd restart"));
        assert!(runner.was_called("sudo -n service nmbd restart"));
        assert!(!runner.was_called("init.d"));
    }

    #[test]
    fn test_partial_service_failure_tries_init_scripts() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("systemctl", 1, "systemctl failed");
        runner.on_failure("service nmbd", 1, "nmbd: unrecognized service");
        let used = controller(&runner).perform(ServiceAction::Start).unwrap();
        assert_eq!(used, ControlMechanism::InitScript);
        assert!(runner.was_called("sudo -n /etc/init.d/nmbd start"));
    }

    #[test]
    fn test_total_failure_reports_primary_diagnostic() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("systemctl", 1, "Failed to restart smbd.service: Unit not found.");
        runner.on_failure("service", 1, "service failed");
        runner.on_failure("init.d", 1, "no such script");

        let err = controller(&runner).restart().unwrap_err();
        assert_matches!(
            err,
            BackendError::Tool(ToolError::ServiceControl { ref diagnostic, .. })
                if diagnostic.contains("Unit not found")
        );
    }

    #[test]
    fn test_enable_skips_service_command() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_failure("systemctl", 1, "no systemd");
        controller(&runner).enable().unwrap();
        assert!(!runner.was_called("service smbd enable"));
        assert!(runner.was_called("sudo -n update-rc.d smbd enable"));
    }

    #[test]
    fn test_status_from_systemctl() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_success("systemctl is-active smbd", "active\n");
        runner.on("systemctl is-active nmbd", 3, "inactive\n", "");
        let report = controller(&runner).status();
        assert_eq!(report.state("smbd"), ServiceState::Active);
        assert_eq!(report.state("nmbd"), ServiceState::Inactive);
        assert!(!runner.was_called("service smbd status"));
    }

    #[test]
    fn test_status_falls_back_when_systemd_missing() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_success("systemctl is-active", "\"systemd\" is not running in this container");
        runner.on_success("service smbd status", " * smbd is running");
        runner.on_failure("service nmbd status", 3, "");
        let report = controller(&runner).status();
        assert_eq!(report.state("smbd"), ServiceState::Active);
        assert_eq!(report.state("nmbd"), ServiceState::Inactive);
        // systemctl is not consulted again once it proved unusable
        assert!(!runner.was_called("systemctl is-active nmbd"));
    }

    #[test]
    fn test_status_unknown_when_nothing_runs() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_spawn_error("systemctl");
        runner.on_spawn_error("service");
        let report = controller(&runner).status();
        assert_eq!(report.state("smbd"), ServiceState::Unknown);
        assert!(!report.all_active());
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("restart".parse::<ServiceAction>(), Ok(ServiceAction::Restart));
        assert!("reload".parse::<ServiceAction>().is_err());
    }
}
