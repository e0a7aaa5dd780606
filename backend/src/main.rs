//! smbadmin command-line entry point
//!
//! Thin wrapper over [`ApiHandlers`]: every subcommand maps to one facade
//! call. Outcomes are printed as one line (or JSON with `--json`); the exit
//! status is 1 only for failures.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::{BufRead, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use smbadmin_backend::api::QuickSetup;
use smbadmin_backend::exec::SystemCommandRunner;
use smbadmin_backend::service::ServiceAction;
use smbadmin_backend::{ApiHandlers, Config, OperationOutcome};
use smbadmin_shared::models::ShareRecord;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Work on smb.conf and shares.conf in DIR without sudo
    #[arg(long, value_name = "DIR", global = true)]
    local: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage shares
    #[command(subcommand)]
    Shares(SharesCommand),
    /// Show or change [global] settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Control the Samba services
    Service {
        #[arg(value_parser = ["status", "start", "stop", "restart", "enable"])]
        action: String,
    },
    /// Manage configuration backups
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Manage Samba accounts
    #[command(subcommand)]
    Users(UsersCommand),
    /// Manage system groups
    #[command(subcommand)]
    Groups(GroupsCommand),
    /// Export or import the combined configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Write basic global settings and one share
    Setup(SetupArgs),
    /// Check whether privileged access is available
    Check,
}

#[derive(Subcommand)]
enum SharesCommand {
    List,
    Add(ShareArgs),
    Delete { name: String },
}

#[derive(Args)]
struct ShareArgs {
    name: String,
    path: String,
    #[arg(long, default_value = "")]
    comment: String,
    /// Comma-separated users and @groups allowed to connect
    #[arg(long, default_value = "")]
    valid_users: String,
    /// Comma-separated users and @groups allowed to write
    #[arg(long, default_value = "")]
    write_list: String,
    #[arg(long)]
    read_only: bool,
    #[arg(long)]
    guest_ok: bool,
    /// Hide the share from browse lists
    #[arg(long)]
    hidden: bool,
    #[arg(long)]
    force_group: Option<String>,
}

impl ShareArgs {
    fn into_record(self) -> ShareRecord {
        let mut record = ShareRecord::new(self.name, self.path);
        record.comment = self.comment;
        record.valid_users = self.valid_users;
        record.write_list = self.write_list;
        record.read_only = self.read_only;
        record.guest_ok = self.guest_ok;
        record.browseable = !self.hidden;
        if let Some(group) = self.force_group {
            record.force_group = group;
        }
        record
    }
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    /// Set KEY=VALUE pairs; an empty value removes the key
    Set {
        #[arg(value_parser = parse_key_value, required = true)]
        pairs: Vec<(String, String)>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

#[derive(Subcommand)]
enum BackupCommand {
    Create,
    List,
    Restore { name: String },
    Delete { name: String },
}

#[derive(Subcommand)]
enum UsersCommand {
    List,
    /// Add an account; the password is read from stdin
    Add {
        username: String,
        /// Also create the system user
        #[arg(long)]
        system: bool,
    },
    Remove {
        username: String,
        /// Also delete the system user and its home
        #[arg(long)]
        system: bool,
    },
    Enable { username: String },
    Disable { username: String },
    /// Change a password; the new password is read from stdin
    Passwd { username: String },
    /// List local system users
    System,
}

#[derive(Subcommand)]
enum GroupsCommand {
    List,
    Create { name: String },
    Delete { name: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Export,
    /// Import a combined configuration from FILE, or stdin with `-`
    Import { file: PathBuf },
}

#[derive(Args)]
struct SetupArgs {
    #[arg(long, default_value = "share")]
    share_name: String,
    #[arg(long, default_value = "/srv/samba/share")]
    path: String,
    #[arg(long, default_value = "WORKGROUP")]
    workgroup: String,
    #[arg(long)]
    guest: bool,
}

fn read_password() -> Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_data<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_outcome(json: bool, outcome: OperationOutcome) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.message);
    }
    Ok(if outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn load_config(cli: &Cli) -> Result<(Config, Option<String>)> {
    if let Some(dir) = &cli.local {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create local directory {:?}", dir))?;
        return Ok((Config::local(dir), None));
    }

    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    Ok(match Config::load(&path) {
        Ok(config) => (config, None),
        Err(e) => (
            Config::default(),
            Some(format!(
                "Failed to load config from {:?}: {}. Using defaults.",
                path, e
            )),
        ),
    })
}

fn run(cli: Cli, api: ApiHandlers) -> Result<ExitCode> {
    let json = cli.json;
    match cli.command {
        Command::Shares(SharesCommand::List) => print_data(json, &api.list_shares()?, |shares| {
            for share in shares {
                println!("{:<20} {}", share.name, share.path);
            }
        }),
        Command::Shares(SharesCommand::Add(args)) => {
            print_outcome(json, api.add_or_update_share(args.into_record()))
        }
        Command::Shares(SharesCommand::Delete { name }) => {
            print_outcome(json, api.delete_share(&name))
        }

        Command::Settings(SettingsCommand::Show) => {
            print_data(json, &api.global_settings()?, |settings| {
                for (key, value) in settings.iter() {
                    println!("{:<24} {}", key, value);
                }
            })
        }
        Command::Settings(SettingsCommand::Set { pairs }) => {
            print_outcome(json, api.write_global_settings(pairs))
        }

        Command::Service { action } if action == "status" => {
            print_data(json, &api.service_status(), |report| {
                for service in &report.services {
                    println!("{:<10} {:?}", service.name, service.state);
                }
            })
        }
        Command::Service { action } => {
            let action: ServiceAction = action.parse().map_err(anyhow::Error::msg)?;
            print_outcome(json, api.service_action(action))
        }

        Command::Backup(BackupCommand::Create) => print_outcome(json, api.create_backup()),
        Command::Backup(BackupCommand::List) => print_data(json, &api.list_backups()?, |backups| {
            for backup in backups {
                let created = backup
                    .created
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "Unknown Date".to_string());
                println!("{}  {}  {} bytes", backup.filename, created, backup.size);
            }
        }),
        Command::Backup(BackupCommand::Restore { name }) => {
            print_outcome(json, api.restore_backup(&name))
        }
        Command::Backup(BackupCommand::Delete { name }) => {
            print_outcome(json, api.delete_backup(&name))
        }

        Command::Users(UsersCommand::List) => print_data(json, &api.list_users()?, |users| {
            for user in users {
                let state = if user.enabled { "enabled" } else { "disabled" };
                println!("{:<20} {:<9} [{}]", user.username, state, user.flags);
            }
        }),
        Command::Users(UsersCommand::Add { username, system }) => {
            let password = read_password()?;
            print_outcome(json, api.add_user(&username, &password, system))
        }
        Command::Users(UsersCommand::Remove { username, system }) => {
            print_outcome(json, api.remove_user(&username, system))
        }
        Command::Users(UsersCommand::Enable { username }) => {
            print_outcome(json, api.enable_user(&username))
        }
        Command::Users(UsersCommand::Disable { username }) => {
            print_outcome(json, api.disable_user(&username))
        }
        Command::Users(UsersCommand::Passwd { username }) => {
            let password = read_password()?;
            print_outcome(json, api.reset_password(&username, &password))
        }
        Command::Users(UsersCommand::System) => {
            print_data(json, &api.list_system_users()?, |users| {
                for user in users {
                    println!("{:<20} {}", user.name, user.id);
                }
            })
        }

        Command::Groups(GroupsCommand::List) => {
            print_data(json, &api.list_system_groups()?, |groups| {
                for group in groups {
                    println!("{:<20} {:<6} {}", group.name, group.id, group.members.join(","));
                }
            })
        }
        Command::Groups(GroupsCommand::Create { name }) => {
            print_outcome(json, api.create_group(&name))
        }
        Command::Groups(GroupsCommand::Delete { name }) => {
            print_outcome(json, api.delete_group(&name))
        }

        Command::Config(ConfigCommand::Export) => {
            print!("{}", api.export_config()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Config(ConfigCommand::Import { file }) => {
            let text = if file.as_os_str() == "-" {
                let mut text = String::new();
                std::io::stdin()
                    .read_to_string(&mut text)
                    .context("Failed to read configuration from stdin")?;
                text
            } else {
                std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {:?}", file))?
            };
            print_outcome(json, api.import_config(&text))
        }

        Command::Setup(args) => {
            let setup = QuickSetup {
                share_name: args.share_name,
                share_path: args.path,
                workgroup: args.workgroup,
                guest_access: args.guest,
            };
            print_outcome(json, api.quick_setup(&setup))
        }

        Command::Check => {
            let access = api.check_access();
            if json {
                println!("{}", serde_json::json!({ "privileged_access": access }));
            } else if access {
                println!("Privileged access available.");
            } else {
                println!("No privileged access. Run as root or configure passwordless sudo.");
            }
            Ok(if access {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let (config, load_warning) = load_config(&cli)?;

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .with(filter)
        .init();

    info!("smbadmin v{}", env!("CARGO_PKG_VERSION"));
    if let Some(message) = load_warning {
        warn!("{}", message);
    }

    config
        .validate()
        .context("Configuration validation failed")?;

    let api = ApiHandlers::from_config(&config, Arc::new(SystemCommandRunner::new()));
    run(cli, api)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let cli = Cli::try_parse_from([
            "smbadmin",
            "--debug",
            "--local",
            "/tmp/samba",
            "shares",
            "add",
            "docs",
            "/srv/docs",
            "--write-list",
            "alice",
        ])
        .unwrap();

        assert!(cli.debug);
        assert_eq!(cli.local, Some(PathBuf::from("/tmp/samba")));
        let Command::Shares(SharesCommand::Add(args)) = cli.command else {
            panic!("expected shares add");
        };
        let record = args.into_record();
        assert_eq!(record.write_list, "alice");
        assert!(record.browseable);
    }

    #[test]
    fn test_settings_pairs() {
        let cli = Cli::try_parse_from(["smbadmin", "settings", "set", "workgroup=", "server string=Files"])
            .unwrap();
        let Command::Settings(SettingsCommand::Set { pairs }) = cli.command else {
            panic!("expected settings set");
        };
        assert_eq!(
            pairs,
            vec![
                ("workgroup".to_string(), String::new()),
                ("server string".to_string(), "Files".to_string()),
            ]
        );
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_service_action_choices() {
        assert!(Cli::try_parse_from(["smbadmin", "service", "restart"]).is_ok());
        assert!(Cli::try_parse_from(["smbadmin", "service", "reload"]).is_err());
    }
}
