//! Server-wide (`[global]`) settings
//!
//! The recognised keys, their configuration-file spelling and their
//! defaults live in [`GLOBAL_SETTINGS`]. Values not present in the file keep
//! the default from that table.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::conf::{self, Section, GLOBAL_SECTION};

/// One recognised global setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingSpec {
    /// Normalized key (`server_string`)
    pub key: &'static str,
    /// Key as written in the configuration file (`server string`)
    pub conf_key: &'static str,
    pub default: &'static str,
}

const fn setting(key: &'static str, conf_key: &'static str, default: &'static str) -> SettingSpec {
    SettingSpec {
        key,
        conf_key,
        default,
    }
}

pub const GLOBAL_SETTINGS: [SettingSpec; 22] = [
    setting("server_string", "server string", "Samba Server"),
    setting("workgroup", "workgroup", "WORKGROUP"),
    setting("log_level", "log level", "1"),
    setting("server_role", "server role", "standalone"),
    setting("log_file", "log file", "/var/log/samba/log.%m"),
    setting("max_log_size", "max log size", "1000"),
    setting("security", "security", "user"),
    setting("encrypt_passwords", "encrypt passwords", "yes"),
    setting("guest_account", "guest account", "nobody"),
    setting("map_to_guest", "map to guest", "Bad User"),
    setting("interfaces", "interfaces", ""),
    setting("bind_interfaces_only", "bind interfaces only", "no"),
    setting("hosts_allow", "hosts allow", ""),
    setting("hosts_deny", "hosts deny", ""),
    setting("unix_charset", "unix charset", "UTF-8"),
    setting("dos_charset", "dos charset", "CP850"),
    setting("deadtime", "deadtime", "15"),
    setting("keepalive", "keepalive", "300"),
    setting("max_connections", "max connections", "0"),
    setting("socket_options", "socket options", "TCP_NODELAY IPTOS_LOWDELAY"),
    setting("dns_proxy", "dns proxy", "no"),
    setting("usershare_allow_guests", "usershare allow guests", "yes"),
];

/// Legacy extraction patterns, one per recognised key
static LEGACY_PATTERNS: Lazy<Vec<(&'static SettingSpec, Regex)>> = Lazy::new(|| {
    GLOBAL_SETTINGS
        .iter()
        .filter_map(|s| {
            let pattern = format!(r"{}\s*=\s*(.*)", regex::escape(s.conf_key));
            Regex::new(&pattern).ok().map(|re| (s, re))
        })
        .collect()
});

/// Find the table entry for a normalized key
pub fn lookup(key: &str) -> Option<&'static SettingSpec> {
    GLOBAL_SETTINGS.iter().find(|s| s.key == key)
}

/// Translate a normalized key to its configuration-file spelling
///
/// Keys that are not normalized names are returned unchanged, so callers may
/// pass either form.
pub fn conf_key_for(key: &str) -> &str {
    match lookup(key) {
        Some(spec) => spec.conf_key,
        None => key,
    }
}

/// Where a [`GlobalSettings`] value was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsSource {
    /// Parsed from the `[global]` section
    Structured,
    /// Regex scan over raw text with no `[global]` section
    LegacyScan,
    /// Nothing readable; every value is a default
    Defaults,
}

/// Global settings keyed by normalized name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    values: BTreeMap<String, String>,
    pub source: SettingsSource,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            values: GLOBAL_SETTINGS
                .iter()
                .map(|s| (s.key.to_string(), s.default.to_string()))
                .collect(),
            source: SettingsSource::Defaults,
        }
    }
}

impl GlobalSettings {
    /// Read settings from main configuration text
    ///
    /// The `[global]` section is read through the codec. Only when the text
    /// has no `[global]` section at all is the legacy regex table applied to
    /// the raw text, for files the codec cannot structure.
    pub fn from_config_text(text: &str) -> Self {
        let doc = conf::parse(text);
        match doc.section(GLOBAL_SECTION) {
            Some(global) => Self::from_section(global),
            None => {
                tracing::debug!("No [global] section found, scanning raw text for settings");
                Self::from_legacy_scan(text)
            }
        }
    }

    pub fn from_section(section: &Section) -> Self {
        let mut settings = Self::default();
        settings.source = SettingsSource::Structured;
        for spec in GLOBAL_SETTINGS.iter() {
            if let Some(value) = section.get(spec.conf_key) {
                settings.values.insert(spec.key.to_string(), value.to_string());
            }
        }
        settings
    }

    /// Case-sensitive `<key>\s*=\s*(.*)` scan; unmatched keys keep defaults
    pub fn from_legacy_scan(text: &str) -> Self {
        let mut settings = Self::default();
        settings.source = SettingsSource::LegacyScan;
        for (spec, re) in LEGACY_PATTERNS.iter() {
            if let Some(captures) = re.captures(text) {
                if let Some(value) = captures.get(1) {
                    settings
                        .values
                        .insert(spec.key.to_string(), value.as_str().trim().to_string());
                }
            }
        }
        settings
    }

    /// Value for a normalized key, if recognised
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Settings in table order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        GLOBAL_SETTINGS
            .iter()
            .map(move |s| (s.key, self.get(s.key).unwrap_or(s.default)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = GlobalSettings::default();
        assert_eq!(settings.get("workgroup"), Some("WORKGROUP"));
        assert_eq!(settings.get("map_to_guest"), Some("Bad User"));
        assert_eq!(settings.get("interfaces"), Some(""));
        assert_eq!(settings.iter().count(), GLOBAL_SETTINGS.len());
    }

    #[test]
    fn test_structured_read() {
        let text = "[global]\n    workgroup = OFFICE\n    log level = 3\n\n[docs]\n    max connections = 5\n";
        let settings = GlobalSettings::from_config_text(text);
        assert_eq!(settings.source, SettingsSource::Structured);
        assert_eq!(settings.get("workgroup"), Some("OFFICE"));
        assert_eq!(settings.get("log_level"), Some("3"));
        // Share-level parameters never leak into global settings
        assert_eq!(settings.get("max_connections"), Some("0"));
        assert_eq!(settings.get("server_string"), Some("Samba Server"));
    }

    #[test]
    fn test_legacy_scan_without_global_section() {
        let text = "workgroup = HOME\nserver string=Basement NAS\n";
        let settings = GlobalSettings::from_config_text(text);
        assert_eq!(settings.source, SettingsSource::LegacyScan);
        assert_eq!(settings.get("workgroup"), Some("HOME"));
        assert_eq!(settings.get("server_string"), Some("Basement NAS"));
        assert_eq!(settings.get("security"), Some("user"));
    }

    #[test]
    fn test_legacy_scan_is_case_sensitive() {
        let settings = GlobalSettings::from_legacy_scan("Workgroup = HOME\n");
        assert_eq!(settings.get("workgroup"), Some("WORKGROUP"));
    }

    #[test]
    fn test_conf_key_for() {
        assert_eq!(conf_key_for("server_string"), "server string");
        assert_eq!(conf_key_for("server string"), "server string");
        assert_eq!(conf_key_for("wins support"), "wins support");
        assert!(lookup("nonexistent").is_none());
    }
}
