//! rimgen: generate the RimWorld translation class table header.
//!
//! Reads the game's managed assemblies as metadata only, collects every type
//! carrying translatable fields, and writes the C++ header consumed by the
//! translation tooling.
//!
//! # Usage
//!
//! ```text
//! rimgen Assembly-CSharp.dll --runtime-dir /usr/lib/mono/4.7.1-api -o RimWorldClasses.hpp
//! rimgen -c rimgen.json --policy def-lineage --report
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use rimgen_clr::{write_json, AssemblyLoader, Extractor, HeaderGenerator, NestedObjectReport};
use rimgen_core::{Config, FilterPolicy};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Crates whose logs follow the verbosity flags. Everything else stays at warn.
const LOG_TARGETS: &[&str] = &["rimgen", "rimgen_core", "rimgen_binary_parser", "rimgen_clr"];

/// Generate the RimWorld class table from game assemblies.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    /// Primary assembly to extract (overrides the config file).
    primary: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra assembly used to resolve base types. Repeatable.
    #[arg(short = 'd', long = "dependency")]
    dependencies: Vec<PathBuf>,

    /// Directory whose `*.dll` files resolve framework base types.
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Which types make it into the table.
    #[arg(long, value_enum)]
    policy: Option<Policy>,

    /// Substring identifying the translation marker attribute.
    #[arg(long)]
    marker: Option<String>,

    /// Header file to write.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also dump the records as JSON.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Print every class holding nested object fields.
    #[arg(long)]
    report: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    /// Types with at least one marked field.
    Annotation,
    /// Types named `*Def` deriving from the Def base type.
    DefLineage,
}

impl From<Policy> for FilterPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Annotation => FilterPolicy::Annotation,
            Policy::DefLineage => FilterPolicy::DefLineage,
        }
    }
}

impl Cli {
    /// Load the config file, if any, and apply command-line overrides.
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(primary) = &self.primary {
            config.assemblies = config.assemblies.with_primary(primary);
        }
        for dependency in &self.dependencies {
            config.assemblies = config.assemblies.with_dependency(dependency);
        }
        if let Some(dir) = &self.runtime_dir {
            config.assemblies = config.assemblies.with_runtime_dir(dir);
        }
        if let Some(policy) = self.policy {
            config.extract.policy = policy.into();
        }
        if let Some(marker) = &self.marker {
            config.extract.marker = marker.clone();
        }
        if let Some(output) = &self.output {
            config.output.header_path = output.clone();
        }
        if let Some(json) = &self.json {
            config.output.json_path = Some(json.clone());
        }

        if config.assemblies.primary.as_os_str().is_empty() {
            bail!("no primary assembly given; pass PRIMARY or set assemblies.primary in the config");
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli.verbose.tracing_level_filter();
    let directives = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    let filter = EnvFilter::new(format!("warn,{directives}"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.resolve_config()?;
    debug!("Policy {:?}, marker {:?}", config.extract.policy, config.extract.marker);

    let context = AssemblyLoader::new(config.assemblies.clone())
        .load()
        .with_context(|| format!("failed to load {}", config.assemblies.primary.display()))?;
    let results = Extractor::new(config.extract.clone()).extract(&context);
    info!(
        "Scanned {} types, skipped {} types and {} fields",
        results.statistics.types_scanned,
        results.statistics.types_skipped,
        results.statistics.fields_skipped
    );

    let header_path = &config.output.header_path;
    HeaderGenerator::write_to_file(&results, &config.output, header_path)
        .with_context(|| format!("failed to write {}", header_path.display()))?;
    if let Some(json_path) = &config.output.json_path {
        write_json(&results, json_path)
            .with_context(|| format!("failed to write {}", json_path.display()))?;
    }

    if cli.report {
        print!("{}", NestedObjectReport::generate(&results.classes));
    }

    println!("File {} had been written.", header_path.display());
    println!("{} classes were exported.", results.classes.len());
    Ok(())
}
