//! Curated UI names for node classes, read from JSON side tables.

use crate::error::InitDataError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct InitDataFile {
    #[serde(rename = "Nodes", default)]
    nodes: Vec<InitDataEntry>,
}

#[derive(Debug, Deserialize)]
struct InitDataEntry {
    #[serde(rename = "ClassTag")]
    class_tag: String,
    #[serde(rename = "UIName", default)]
    ui_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitDataRecord {
    pub ui_name: String,
    /// Set once a type with this class tag reaches the registry.
    pub registered: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InitData {
    by_class: BTreeMap<String, InitDataRecord>,
    by_ui_name: BTreeMap<String, String>,
}

impl InitData {
    /// Loads every `*.json` file of `dir` in name order. Later files overwrite earlier entries.
    /// Unreadable or malformed files are logged and skipped.
    pub fn load_dir(dir: &Path) -> Self {
        let mut data = Self::default();
        let Ok(entries) = std::fs::read_dir(dir) else {
            log::debug!("[flow] no init data directory at {}", dir.display());
            return data;
        };
        let mut files: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("json"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        for file in files {
            if let Err(err) = data.load_file(&file) {
                log::warn!("[flow] {err}");
            }
        }
        data
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), InitDataError> {
        let source = std::fs::read_to_string(path).map_err(|source| InitDataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: InitDataFile =
            serde_json::from_str(&source).map_err(|source| InitDataError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        for entry in file.nodes {
            let ui_name = entry.ui_name.unwrap_or_else(|| entry.class_tag.clone());
            self.insert(&entry.class_tag, &ui_name);
        }
        Ok(())
    }

    pub fn insert(&mut self, class_tag: &str, ui_name: &str) {
        let registered = match self.by_class.get(class_tag) {
            Some(old) => {
                self.by_ui_name.remove(&old.ui_name);
                old.registered
            }
            None => false,
        };
        self.by_class.insert(
            class_tag.to_string(),
            InitDataRecord {
                ui_name: ui_name.to_string(),
                registered,
            },
        );
        self.by_ui_name
            .insert(ui_name.to_string(), class_tag.to_string());
    }

    pub fn mark_registered(&mut self, class_tag: &str) {
        if let Some(record) = self.by_class.get_mut(class_tag) {
            record.registered = true;
        }
    }

    /// Forgets registration marks before the registry is rebuilt.
    pub fn clear_registered(&mut self) {
        for record in self.by_class.values_mut() {
            record.registered = false;
        }
    }

    pub fn record(&self, class_tag: &str) -> Option<&InitDataRecord> {
        self.by_class.get(class_tag)
    }

    pub fn ui_name(&self, class_tag: &str) -> Option<&str> {
        self.by_class.get(class_tag).map(|r| r.ui_name.as_str())
    }

    pub fn class_tag(&self, ui_name: &str) -> Option<&str> {
        self.by_ui_name.get(ui_name).map(String::as_str)
    }

    /// Curated class tags that no registered type matched.
    pub fn unregistered(&self) -> impl Iterator<Item = &str> {
        self.by_class
            .iter()
            .filter(|(_, r)| !r.registered)
            .map(|(tag, _)| tag.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_class.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_class.is_empty()
    }
}
