//! Normalized share records
//!
//! Converts between the raw vocabulary of a share section (`read only`,
//! `valid users`, ...) and the [`ShareRecord`] shape used by the rest of the
//! system. Defaults are applied on the way in; a fixed set of required
//! parameters is always emitted on the way out.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::conf::Section;

/// Default value for `create mask` and `directory mask`
pub const DEFAULT_MASK: &str = "0775";

/// Default value for `force group`
pub const DEFAULT_FORCE_GROUP: &str = "smbusers";

/// Default value for `max connections` (unlimited)
pub const DEFAULT_MAX_CONNECTIONS: &str = "0";

/// Path given to a share section that does not declare one
pub const DEFAULT_PATH: &str = "/tmp";

/// Normalized share parameters known to the normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareField {
    Path,
    Comment,
    Browseable,
    ReadOnly,
    GuestOk,
    ValidUsers,
    WriteList,
    CreateMask,
    DirectoryMask,
    ForceGroup,
    MaxConnections,
}

/// Configuration-file key -> normalized field
///
/// `browsable` is an accepted alternate spelling merged onto `browseable`.
const KEY_RENAMES: [(&str, ShareField); 12] = [
    ("path", ShareField::Path),
    ("comment", ShareField::Comment),
    ("browseable", ShareField::Browseable),
    ("browsable", ShareField::Browseable),
    ("read only", ShareField::ReadOnly),
    ("guest ok", ShareField::GuestOk),
    ("valid users", ShareField::ValidUsers),
    ("write list", ShareField::WriteList),
    ("create mask", ShareField::CreateMask),
    ("directory mask", ShareField::DirectoryMask),
    ("force group", ShareField::ForceGroup),
    ("max connections", ShareField::MaxConnections),
];

/// Always written, even when empty, so readers of the file see a stable set
const REQUIRED_FIELDS: [ShareField; 5] = [
    ShareField::Path,
    ShareField::ValidUsers,
    ShareField::WriteList,
    ShareField::CreateMask,
    ShareField::DirectoryMask,
];

/// Written after the required fields, only when non-empty
const OPTIONAL_FIELDS: [ShareField; 6] = [
    ShareField::Comment,
    ShareField::Browseable,
    ShareField::ReadOnly,
    ShareField::GuestOk,
    ShareField::ForceGroup,
    ShareField::MaxConnections,
];

impl ShareField {
    /// Look up a configuration key (case-insensitive)
    pub fn from_conf_key(key: &str) -> Option<Self> {
        let key = key.to_ascii_lowercase();
        KEY_RENAMES
            .iter()
            .find(|(conf_key, _)| *conf_key == key)
            .map(|(_, field)| *field)
    }

    /// Canonical configuration-file key used when writing
    pub fn conf_key(self) -> &'static str {
        match self {
            ShareField::Path => "path",
            ShareField::Comment => "comment",
            ShareField::Browseable => "browseable",
            ShareField::ReadOnly => "read only",
            ShareField::GuestOk => "guest ok",
            ShareField::ValidUsers => "valid users",
            ShareField::WriteList => "write list",
            ShareField::CreateMask => "create mask",
            ShareField::DirectoryMask => "directory mask",
            ShareField::ForceGroup => "force group",
            ShareField::MaxConnections => "max connections",
        }
    }
}

/// Parse a boolean parameter value
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Some(true),
        "no" | "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn tokens(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|t| !t.is_empty())
}

/// A comma-joined access list split into user names and `@group` references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGroupList {
    pub users: Vec<String>,
    /// Group names without the leading `@`
    pub groups: Vec<String>,
}

impl UserGroupList {
    pub fn parse(value: &str) -> Self {
        let mut list = Self::default();
        for token in tokens(value) {
            match token.strip_prefix('@') {
                Some(group) => list.groups.push(group.to_string()),
                None => list.users.push(token.to_string()),
            }
        }
        list
    }

    /// Users first, then `@`-prefixed groups
    pub fn format(&self) -> String {
        self.users
            .iter()
            .cloned()
            .chain(self.groups.iter().map(|g| format!("@{}", g)))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }
}

/// Normalized representation of one share section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub name: String,
    pub path: String,
    pub comment: String,
    pub browseable: bool,
    pub read_only: bool,
    pub guest_ok: bool,
    /// Comma-joined user names and `@group` references allowed to connect
    pub valid_users: String,
    /// Comma-joined user names and `@group` references allowed to write
    pub write_list: String,
    pub create_mask: String,
    pub directory_mask: String,
    pub force_group: String,
    pub max_connections: String,
    /// Parameters the normalizer does not know, kept in file order
    #[serde(default)]
    pub extra: Vec<(String, String)>,
}

impl ShareRecord {
    /// Create a share with every field at its default
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            comment: String::new(),
            browseable: true,
            read_only: false,
            guest_ok: false,
            valid_users: String::new(),
            write_list: String::new(),
            create_mask: DEFAULT_MASK.to_string(),
            directory_mask: DEFAULT_MASK.to_string(),
            force_group: DEFAULT_FORCE_GROUP.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS.to_string(),
            extra: Vec::new(),
        }
    }

    /// Build a record from raw configuration parameters, filling defaults
    pub fn from_fields<'a, I>(name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut record = Self::new(name, DEFAULT_PATH);
        record.overlay(fields);
        record
    }

    pub fn from_section(section: &Section) -> Self {
        Self::from_fields(section.name(), section.params())
    }

    /// Apply only the parameters present in `fields`, leaving the rest as is
    pub fn overlay<'a, I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in fields {
            match ShareField::from_conf_key(key) {
                Some(field) => self.set_field(field, value),
                None => self.set_extra(key, value),
            }
        }
    }

    fn set_extra(&mut self, key: &str, value: &str) {
        match self.extra.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.extra.push((key.to_string(), value.to_string())),
        }
    }

    /// Set one normalized field from its raw text value
    ///
    /// An unrecognised boolean leaves the current value untouched.
    pub fn set_field(&mut self, field: ShareField, value: &str) {
        let value = value.trim();
        match field {
            ShareField::Path => self.path = value.to_string(),
            ShareField::Comment => self.comment = value.to_string(),
            ShareField::Browseable => {
                if let Some(b) = parse_bool(value) {
                    self.browseable = b;
                }
            }
            ShareField::ReadOnly => {
                if let Some(b) = parse_bool(value) {
                    self.read_only = b;
                }
            }
            ShareField::GuestOk => {
                if let Some(b) = parse_bool(value) {
                    self.guest_ok = b;
                }
            }
            ShareField::ValidUsers => self.valid_users = value.to_string(),
            ShareField::WriteList => self.write_list = value.to_string(),
            ShareField::CreateMask => self.create_mask = value.to_string(),
            ShareField::DirectoryMask => self.directory_mask = value.to_string(),
            ShareField::ForceGroup => self.force_group = value.to_string(),
            ShareField::MaxConnections => self.max_connections = value.to_string(),
        }
    }

    /// Text value of one normalized field
    pub fn field(&self, field: ShareField) -> String {
        match field {
            ShareField::Path => self.path.clone(),
            ShareField::Comment => self.comment.clone(),
            ShareField::Browseable => format_bool(self.browseable).to_string(),
            ShareField::ReadOnly => format_bool(self.read_only).to_string(),
            ShareField::GuestOk => format_bool(self.guest_ok).to_string(),
            ShareField::ValidUsers => self.valid_users.clone(),
            ShareField::WriteList => self.write_list.clone(),
            ShareField::CreateMask => self.create_mask.clone(),
            ShareField::DirectoryMask => self.directory_mask.clone(),
            ShareField::ForceGroup => self.force_group.clone(),
            ShareField::MaxConnections => self.max_connections.clone(),
        }
    }

    /// Raw configuration parameters for this share
    ///
    /// Required parameters come first and are present even when empty;
    /// everything else follows only when non-empty.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = REQUIRED_FIELDS
            .iter()
            .map(|f| (f.conf_key().to_string(), self.field(*f)))
            .collect();

        for field in OPTIONAL_FIELDS {
            let value = self.field(field);
            if !value.is_empty() {
                fields.push((field.conf_key().to_string(), value));
            }
        }

        fields.extend(
            self.extra
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .cloned(),
        );
        fields
    }

    pub fn to_section(&self) -> Section {
        let mut section = Section::new(self.name.clone());
        for (key, value) in self.to_fields() {
            section.set(key, value);
        }
        section
    }

    /// Restore the rule that everyone who may write may also connect
    ///
    /// An empty `valid_users` with a non-empty `write_list` takes the write
    /// list verbatim; otherwise any write token missing from `valid_users`
    /// is appended, in write-list order.
    pub fn repair_user_lists(&mut self) {
        if tokens(&self.write_list).next().is_none() {
            return;
        }

        if tokens(&self.valid_users).next().is_none() {
            self.valid_users = self.write_list.clone();
            return;
        }

        let valid: HashSet<&str> = tokens(&self.valid_users).collect();
        let mut seen = HashSet::new();
        let missing: Vec<&str> = tokens(&self.write_list)
            .filter(|t| !valid.contains(t) && seen.insert(*t))
            .collect();

        if !missing.is_empty() {
            tracing::debug!(
                "Adding write-list entries {:?} to valid users of share {}",
                missing,
                self.name
            );
            self.valid_users = format!("{},{}", self.valid_users, missing.join(","));
        }
    }

    /// True when every write-list token also appears in `valid_users`
    pub fn write_list_is_subset(&self) -> bool {
        let valid: HashSet<&str> = tokens(&self.valid_users).collect();
        tokens(&self.write_list).all(|t| valid.contains(t))
    }

    pub fn valid_user_list(&self) -> UserGroupList {
        UserGroupList::parse(&self.valid_users)
    }

    pub fn write_user_list(&self) -> UserGroupList {
        UserGroupList::parse(&self.write_list)
    }
}

/// Run [`ShareRecord::repair_user_lists`] over every record
pub fn repair_all(records: &mut [ShareRecord]) {
    for record in records.iter_mut() {
        record.repair_user_lists();
    }
}
