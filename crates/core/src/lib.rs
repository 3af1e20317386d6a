//! Core types and configuration for rimgen
//!
//! This crate provides the value types shared by the parser, the extractor
//! and the command-line front end.

pub mod error;
pub mod types;
pub mod config;

pub use error::{Error, Result};
pub use types::*;
pub use config::{AssemblyPaths, ColumnWidths, Config, ExtractConfig, FilterPolicy, OutputConfig};
