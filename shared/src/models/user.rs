//! Account models and parsers for identity-tool output

use serde::{Deserialize, Serialize};

/// Account flag marking a disabled Samba account
pub const DISABLED_FLAG: char = 'D';

/// One account in the Samba password database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SambaUser {
    pub username: String,
    pub enabled: bool,
    /// Raw flag characters without brackets or padding, e.g. `UX`
    pub flags: String,
}

impl SambaUser {
    pub fn from_flags(username: impl Into<String>, flags: &str) -> Self {
        let flags: String = flags
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        Self {
            username: username.into(),
            enabled: !flags.contains(DISABLED_FLAG),
            flags,
        }
    }
}

/// A local system user or group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAccount {
    pub name: String,
    pub id: u32,
    /// Primary group id for users, `None` for groups
    pub primary_gid: Option<u32>,
    /// Supplementary members for groups, empty for users
    #[serde(default)]
    pub members: Vec<String>,
}

/// Usernames from `pdbedit -L` (`name:uid:full name` per line)
pub fn parse_pdbedit_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split(':').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// `Account Flags` value from `pdbedit -v -u <user>` output
pub fn parse_account_flags(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (label, value) = line.split_once(':')?;
        (label.trim() == "Account Flags").then(|| value.trim().to_string())
    })
}

/// Accounts from an `smbpasswd` file; the fifth field holds the flags
pub fn parse_smbpasswd(content: &str) -> Vec<SambaUser> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 5 || fields[0].is_empty() {
                return None;
            }
            Some(SambaUser::from_flags(fields[0], fields[4]))
        })
        .collect()
}

/// Users from `getent passwd` with uid at or above `min_id`
pub fn parse_passwd(content: &str, min_id: u32) -> Vec<SystemAccount> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 4 {
                return None;
            }
            let id = fields[2].parse().ok()?;
            Some(SystemAccount {
                name: fields[0].to_string(),
                id,
                primary_gid: fields[3].parse().ok(),
                members: Vec::new(),
            })
        })
        .filter(|account| account.id >= min_id && account.id != NOBODY_ID)
        .collect()
}

/// Groups from `getent group` with gid at or above `min_id`
pub fn parse_group(content: &str, min_id: u32) -> Vec<SystemAccount> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 3 {
                return None;
            }
            let id = fields[2].parse().ok()?;
            let members = fields
                .get(3)
                .map(|m| {
                    m.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Some(SystemAccount {
                name: fields[0].to_string(),
                id,
                primary_gid: None,
                members,
            })
        })
        .filter(|account| account.id >= min_id && account.id != NOBODY_ID)
        .collect()
}

/// `nobody`/`nogroup` id, excluded from account listings
const NOBODY_ID: u32 = 65534;
