//! Section/key-value configuration text codec
//!
//! Parses and serializes the format shared by the main Samba configuration
//! file and the included shares file:
//!
//! ```text
//! [global]
//!     workgroup = OFFICE
//!     include = /etc/samba/shares.conf
//!
//! [docs]
//!     path = /srv/docs
//! ```
//!
//! Comments (`#`, `;`) and blank lines are dropped on parse, so a rewritten
//! file loses them. That is the accepted write policy for this format.

pub mod document;

pub use document::{is_non_share_section, ConfigDocument, Section, GLOBAL_SECTION, NON_SHARE_SECTIONS};

/// Indentation written before every parameter line
const PARAM_INDENT: &str = "    ";

fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with(';')
}

fn section_header(line: &str) -> Option<&str> {
    line.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

fn split_param(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Parse configuration text into a document
///
/// Parameters that appear before any section header are silently dropped.
pub fn parse(text: &str) -> ConfigDocument {
    let mut doc = ConfigDocument::new();
    let mut current: Option<String> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if is_skippable(line) {
            continue;
        }

        if let Some(name) = section_header(line) {
            doc.get_or_insert_section(name);
            current = Some(name.to_string());
            continue;
        }

        let (Some(section_name), Some((key, value))) = (current.as_deref(), split_param(line))
        else {
            continue;
        };

        if let Some(section) = doc.section_mut(section_name) {
            section.set(key, value);
        }
    }

    doc
}

/// Parse only the share sections of a file, in file order
///
/// `[global]`, `[printers]` and `[print$]` are never returned.
pub fn parse_share_sections(text: &str) -> Vec<Section> {
    parse(text).share_sections().cloned().collect()
}

/// Serialize a document back to text
///
/// Emits one header per section followed by one indented `key = value` line
/// per parameter, with a blank line after every section.
pub fn serialize(doc: &ConfigDocument) -> String {
    let mut out = String::new();
    for section in doc.sections() {
        out.push('[');
        out.push_str(section.name());
        out.push_str("]\n");
        for (key, value) in section.params() {
            out.push_str(PARAM_INDENT);
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}
