//! Run configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Assemblies to load
    pub assemblies: AssemblyPaths,
    /// Type filter and field classification settings
    pub extract: ExtractConfig,
    /// Generated header settings
    pub output: OutputConfig,
}

/// Which types make it into the output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterPolicy {
    /// Types with at least one marked field
    #[default]
    Annotation,
    /// Types named `*Def` deriving from the Def base type
    DefLineage,
}

/// Primary assembly plus everything needed to resolve its references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyPaths {
    /// Assembly whose types are extracted
    pub primary: PathBuf,
    /// Assemblies consulted only to resolve base types
    pub dependencies: Vec<PathBuf>,
    /// Directory whose `*.dll` files are added to the dependencies
    pub runtime_dir: Option<PathBuf>,
}

impl AssemblyPaths {
    pub fn new(primary: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            ..Default::default()
        }
    }

    pub fn with_dependency(mut self, path: impl Into<PathBuf>) -> Self {
        self.dependencies.push(path.into());
        self
    }

    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(dir.into());
        self
    }

    /// Switch the active target. The previous primary is evicted and the new
    /// one is no longer treated as a dependency.
    pub fn with_primary(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let previous = std::mem::replace(&mut self.primary, path);
        self.dependencies
            .retain(|p| *p != self.primary && *p != previous);
        self
    }
}

/// Filter and classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub policy: FilterPolicy,
    /// Substring looked up in attribute type names
    pub marker: String,
    /// Name suffix required by the Def-lineage policy
    pub def_suffix: String,
    /// Base type required by the Def-lineage policy
    pub def_base_type: String,
    /// Types always emitted so they can be referenced
    pub extra_roots: Vec<String>,
    /// Simple name of the generic list definition
    pub list_type_name: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            policy: FilterPolicy::Annotation,
            marker: "MustTranslate".to_string(),
            def_suffix: "Def".to_string(),
            def_base_type: "Verse.Def".to_string(),
            extra_roots: vec!["Verse.Editable".to_string()],
            list_type_name: "List`1".to_string(),
        }
    }
}

/// Fixed column widths of the generated table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnWidths {
    pub full_name: usize,
    pub namespace: usize,
    pub name: usize,
    pub base: usize,
}

impl Default for ColumnWidths {
    fn default() -> Self {
        Self {
            full_name: 44,
            namespace: 14,
            name: 35,
            base: 29,
        }
    }
}

/// Generated header settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Header file to write
    pub header_path: PathBuf,
    /// Optional JSON dump of the records
    pub json_path: Option<PathBuf>,
    /// Name of the generated table variable
    pub table_symbol: String,
    /// C++ type of the generated table
    pub table_type: String,
    /// Name of the generated version literal
    pub version_symbol: String,
    pub columns: ColumnWidths,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            header_path: PathBuf::from("RimWorldClasses.hpp"),
            json_path: None,
            table_symbol: "gRimWorldClasses".to_string(),
            table_type: "classinfo_dict_t".to_string(),
            version_symbol: "gRimWorldVersion".to_string(),
            columns: ColumnWidths::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }
}
