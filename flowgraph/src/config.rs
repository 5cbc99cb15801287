use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Flow system settings. Every field has a default, so partial documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSystemConfig {
    /// Root of the game data; node libraries live under `Libs/`.
    pub data_root: PathBuf,
    /// All node types are built in; external node providers are not consulted.
    pub monolithic: bool,
    /// Editor session: registry rebuilds report init-data entries that found no type.
    pub editor: bool,
    /// Start with inspectors enabled.
    pub inspecting: bool,
    pub updates_enabled: bool,
}

impl Default for FlowSystemConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("."),
            monolithic: false,
            editor: false,
            inspecting: false,
            updates_enabled: true,
        }
    }
}

impl FlowSystemConfig {
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }

    fn flow_nodes_dir(&self) -> PathBuf {
        self.data_root.join("Libs").join("FlowNodes")
    }

    pub fn blacklist_path(&self) -> PathBuf {
        self.flow_nodes_dir().join("FlownodeBlacklist.xml")
    }

    pub fn init_data_dir(&self) -> PathBuf {
        self.flow_nodes_dir().join("FlowInitData")
    }

    pub fn descriptor_dir(&self) -> PathBuf {
        self.flow_nodes_dir()
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.data_root.join("Libs").join("FlowgraphModules")
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }
}
