//! Metadata-only loading of the primary assembly and its dependencies

use crate::assembly::Assembly;
use crate::context::LoadContext;
use rimgen_core::{AssemblyPaths, Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Loads the assemblies named by an [`AssemblyPaths`] into a [`LoadContext`]
pub struct AssemblyLoader {
    paths: AssemblyPaths,
}

impl AssemblyLoader {
    pub fn new(paths: AssemblyPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AssemblyPaths {
        &self.paths
    }

    /// Every `*.dll` in the runtime directory, sorted
    pub fn runtime_assemblies(&self) -> Result<Vec<PathBuf>> {
        let Some(dir) = &self.paths.runtime_dir else {
            return Ok(Vec::new());
        };

        if !dir.is_dir() {
            return Err(Error::not_found(format!(
                "runtime directory {}",
                dir.display()
            )));
        }

        let pattern = dir.join("*.dll");
        let entries = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::Config(format!("Invalid runtime directory pattern: {}", e)))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    debug!("Unreadable runtime entry: {}", e);
                    None
                }
            })
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        debug!("Found {} runtime assemblies in {}", paths.len(), dir.display());
        Ok(paths)
    }

    /// Parse the primary assembly and its dependency set.
    ///
    /// The primary and explicit dependencies must be managed assemblies.
    /// Runtime directory files that fail to load are skipped.
    pub fn load(&self) -> Result<LoadContext> {
        let primary_path = &self.paths.primary;
        info!("Loading primary assembly {}", primary_path.display());
        let primary = load_required(primary_path)?;

        let mut seen: HashSet<PathBuf> = HashSet::new();
        seen.insert(primary_path.clone());
        let mut dependencies = Vec::new();

        for path in self.runtime_assemblies()? {
            if seen.contains(&path) {
                continue;
            }
            match Assembly::load(&path) {
                Ok(assembly) => {
                    seen.insert(path);
                    dependencies.push(assembly);
                }
                Err(Error::NotManaged(reason)) => debug!("Skipping {}", reason),
                Err(e) => warn!("Skipping runtime assembly {}: {}", path.display(), e),
            }
        }

        for path in &self.paths.dependencies {
            if !seen.insert(path.clone()) {
                debug!("Dependency {} already loaded", path.display());
                continue;
            }
            dependencies.push(load_required(path)?);
        }

        info!(
            "Loaded {} ({} types) with {} dependencies",
            primary.name(),
            primary.type_count(),
            dependencies.len()
        );

        Ok(LoadContext::new(primary, dependencies))
    }
}

fn load_required(path: &Path) -> Result<Assembly> {
    if !path.is_file() {
        return Err(Error::not_found(format!("assembly {}", path.display())));
    }
    Assembly::load(path)
}
