//! Curation list that vetoes or renames node types before they reach the registry.

use crate::xml::XmlElement;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlacklistAction {
    Veto,
    Rename(String),
}

#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    // Keyed by lowercased type name.
    entries: HashMap<String, BlacklistAction>,
}

impl Blacklist {
    /// Loads the blacklist document. A missing file is an empty blacklist; a malformed one is
    /// logged and treated as empty.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match XmlElement::load(path) {
            Ok(doc) => Self::from_document(&doc),
            Err(err) => {
                log::warn!("[flow] ignoring blacklist {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Each child's first attribute names a type; a non-empty second attribute renames it,
    /// otherwise the type is vetoed.
    pub fn from_document(doc: &XmlElement) -> Self {
        let mut blacklist = Self::default();
        for child in &doc.children {
            let Some(from) = child.attr_at(0).filter(|n| !n.trim().is_empty()) else {
                continue;
            };
            match child.attr_at(1).map(str::trim).filter(|n| !n.is_empty()) {
                Some(to) => blacklist.rename(from, to),
                None => blacklist.veto(from),
            }
        }
        blacklist
    }

    pub fn veto(&mut self, name: &str) {
        self.entries
            .insert(name.trim().to_ascii_lowercase(), BlacklistAction::Veto);
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        self.entries.insert(
            from.trim().to_ascii_lowercase(),
            BlacklistAction::Rename(to.to_string()),
        );
    }

    pub fn action(&self, name: &str) -> Option<&BlacklistAction> {
        self.entries.get(&name.to_ascii_lowercase())
    }

    /// Final name to register `name` under, or `None` when it is vetoed.
    pub fn apply(&self, name: &str) -> Option<String> {
        match self.action(name) {
            None => Some(name.to_string()),
            Some(BlacklistAction::Veto) => None,
            Some(BlacklistAction::Rename(to)) => Some(to.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_attribute_decides_between_rename_and_veto() {
        let doc = XmlElement::parse(
            r#"<Blacklist>
                <Node Name="Debug:CSVDumper"/>
                <Node Name="Old:NodeName" Replacement="New:NodeName"/>
                <Node Name="Misc:Empty" Replacement=""/>
            </Blacklist>"#,
        )
        .unwrap();
        let blacklist = Blacklist::from_document(&doc);

        assert_eq!(blacklist.len(), 3);
        assert_eq!(blacklist.apply("debug:csvdumper"), None);
        assert_eq!(blacklist.apply("Misc:Empty"), None);
        assert_eq!(
            blacklist.apply("OLD:NODENAME").as_deref(),
            Some("New:NodeName")
        );
        assert_eq!(blacklist.apply("Math:Add").as_deref(), Some("Math:Add"));
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Blacklist::load(&dir.path().join("FlownodeBlacklist.xml")).is_empty());
    }

    #[test]
    fn malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("FlownodeBlacklist.xml");
        std::fs::write(&path, "<Blacklist><Node Name=\"A\"></Blacklist>").unwrap();
        assert!(Blacklist::load(&path).is_empty());
    }
}
