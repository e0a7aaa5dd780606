//! Ordered in-memory representation of a section/key-value configuration file
//!
//! A [`ConfigDocument`] is rebuilt from text at the start of every operation
//! and discarded once the operation's write completes. Section order and
//! parameter order are preserved so that a rewritten file reads the same way
//! as the one it replaced.

use serde::{Deserialize, Serialize};

/// Name of the section holding server-wide parameters
pub const GLOBAL_SECTION: &str = "global";

/// Sections that exist in the main file but are never treated as shares
pub const NON_SHARE_SECTIONS: [&str; 3] = [GLOBAL_SECTION, "printers", "print$"];

/// Returns true if `name` is a section that can never be a share
pub fn is_non_share_section(name: &str) -> bool {
    NON_SHARE_SECTIONS.contains(&name)
}

/// One named block of parameters
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Section {
    name: String,
    params: Vec<(String, String)>,
}

impl Section {
    /// Create an empty section
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Section name without brackets
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a parameter value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a parameter, overwriting an existing value in place
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key, value)),
        }
    }

    /// Remove a parameter, returning its previous value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.params.iter().position(|(k, _)| k == key)?;
        Some(self.params.remove(index).1)
    }

    /// Whether the parameter is present
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Parameters in file order
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Ordered mapping from section name to its parameters
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    sections: Vec<Section>,
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// Get a section, appending an empty one if it does not exist yet
    pub fn get_or_insert_section(&mut self, name: &str) -> &mut Section {
        let index = match self.sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    /// Add a section at the front, or return the existing one unchanged
    pub fn insert_section_front(&mut self, name: &str) -> &mut Section {
        if let Some(index) = self.sections.iter().position(|s| s.name == name) {
            return &mut self.sections[index];
        }
        self.sections.insert(0, Section::new(name));
        &mut self.sections[0]
    }

    /// Append a fully built section, replacing any section of the same name
    pub fn push_section(&mut self, section: Section) {
        match self.sections.iter_mut().find(|s| s.name == section.name) {
            Some(existing) => *existing = section,
            None => self.sections.push(section),
        }
    }

    pub fn remove_section(&mut self, name: &str) -> Option<Section> {
        let index = self.sections.iter().position(|s| s.name == name)?;
        Some(self.sections.remove(index))
    }

    /// All sections in document order
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Sections that describe shares (everything except global, printers, print$)
    pub fn share_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections
            .iter()
            .filter(|s| !is_non_share_section(&s.name))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_overwrites_in_place() {
        let mut section = Section::new("docs");
        section.set("path", "/srv/docs");
        section.set("comment", "Documents");
        section.set("path", "/srv/docs2");

        let params: Vec<_> = section.params().collect();
        assert_eq!(params, vec![("path", "/srv/docs2"), ("comment", "Documents")]);
    }

    #[test]
    fn test_remove_param() {
        let mut section = Section::new("global");
        section.set("workgroup", "OFFICE");
        assert_eq!(section.remove("workgroup").as_deref(), Some("OFFICE"));
        assert!(section.remove("workgroup").is_none());
        assert!(section.is_empty());
    }

    #[test]
    fn test_insert_section_front() {
        let mut doc = ConfigDocument::new();
        doc.get_or_insert_section("docs");
        doc.insert_section_front(GLOBAL_SECTION).set("workgroup", "HOME");

        let names: Vec<_> = doc.sections().map(|s| s.name()).collect();
        assert_eq!(names, vec!["global", "docs"]);

        // Existing section is returned untouched
        doc.insert_section_front("docs");
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_share_sections_skip_reserved() {
        let mut doc = ConfigDocument::new();
        for name in ["global", "printers", "print$", "docs", "media"] {
            doc.get_or_insert_section(name);
        }
        let shares: Vec<_> = doc.share_sections().map(|s| s.name()).collect();
        assert_eq!(shares, vec!["docs", "media"]);
    }
}
