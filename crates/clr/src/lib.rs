//! ECMA-335 metadata reader and translation class extractor
//!
//! This crate reads .NET assemblies without executing them, walks the type
//! and field tables of a primary assembly, and builds the class table that
//! the generated C++ header is made from.

pub mod types;
pub mod tables;
pub mod metadata;
pub mod signature;
pub mod assembly;
pub mod context;
pub mod loader;
pub mod extractor;
pub mod output;

#[cfg(test)]
mod testing;

pub use assembly::Assembly;
pub use context::{FieldHandle, LoadContext, TypeHandle};
pub use extractor::Extractor;
pub use loader::AssemblyLoader;
pub use metadata::Metadata;
pub use output::{write_json, HeaderGenerator, NestedObjectReport};
pub use signature::{TypeName, TypeSig, TypeToken};

use rimgen_core::{AssemblyPaths, Config, ExtractResults, Result};
use std::path::{Path, PathBuf};

/// Load a primary assembly and explicit dependencies
pub fn load_types(primary: &Path, dependencies: &[PathBuf]) -> Result<LoadContext> {
    let paths = dependencies
        .iter()
        .fold(AssemblyPaths::new(primary), |paths, dep| paths.with_dependency(dep));
    AssemblyLoader::new(paths).load()
}

/// Load the configured assemblies and extract their class table
pub fn extract(config: &Config) -> Result<ExtractResults> {
    let context = AssemblyLoader::new(config.assemblies.clone()).load()?;
    Ok(Extractor::new(config.extract.clone()).extract(&context))
}
