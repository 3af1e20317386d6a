//! Output generators for extraction results

use rimgen_core::{ClassMap, ClassRecord, ColumnWidths, ExtractResults, FieldLink, OutputConfig, Result};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// C++ header holding the class table
pub struct HeaderGenerator;

impl HeaderGenerator {
    /// Generate the header text
    pub fn generate(results: &ExtractResults, config: &OutputConfig) -> String {
        let mut output = String::new();

        output.push_str("// Auto-generated RimWorld class table\n");
        output.push_str("// Do not edit manually\n\n");
        output.push_str("#pragma once\n\n");

        output.push_str(&format!(
            "inline constexpr char const {}[] = {};\n\n",
            config.version_symbol,
            quote(&results.version)
        ));

        output.push_str(&format!("inline {} const {}\n", config.table_type, config.table_symbol));
        output.push_str("{\n");
        for (full_name, record) in &results.classes {
            output.push_str(&Self::generate_row(full_name, record, &config.columns));
        }
        output.push_str("};\n\n");

        output
    }

    fn generate_row(full_name: &str, record: &ClassRecord, columns: &ColumnWidths) -> String {
        format!(
            "\t{{ {:<full$}, {{ {:<ns$}, {:<name$}, {:<base$}, {}, {}, {}, {}, }}, }},\n",
            quote(full_name),
            quote(&record.namespace),
            quote(&record.name),
            quote(&record.base),
            Self::string_list(&record.must_translate),
            Self::string_list(&record.arrays_must_translate),
            Self::link_list(&record.object_arrays),
            Self::link_list(&record.objects),
            full = columns.full_name,
            ns = columns.namespace,
            name = columns.name,
            base = columns.base,
        )
    }

    fn string_list(items: &[String]) -> String {
        if items.is_empty() {
            return "{}".to_string();
        }
        let items = items.iter().map(|s| quote(s)).collect::<Vec<_>>().join(", ");
        format!("{{ {} }}", items)
    }

    fn link_list(links: &[FieldLink]) -> String {
        if links.is_empty() {
            return "{}".to_string();
        }
        let links = links
            .iter()
            .map(|l| format!("{{ {}, {} }}", quote(&l.field), quote(&l.type_name)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{ {} }}", links)
    }

    /// Write the header to a file
    pub fn write_to_file(results: &ExtractResults, config: &OutputConfig, path: &Path) -> Result<()> {
        std::fs::write(path, Self::generate(results, config))?;
        info!("Wrote {} classes to {}", results.classes.len(), path.display());
        Ok(())
    }
}

/// Console listing of every class with nested object fields
pub struct NestedObjectReport;

impl NestedObjectReport {
    pub fn generate(classes: &ClassMap) -> String {
        let mut output = String::new();

        for (full_name, record) in classes.iter().filter(|(_, r)| r.has_links()) {
            let _ = writeln!(output, "{}", full_name);
            for link in record.object_arrays.iter() {
                let _ = writeln!(output, "    {} -> List<{}>", link.field, link.type_name);
            }
            for link in record.objects.iter() {
                let _ = writeln!(output, "    {} -> {}", link.field, link.type_name);
            }
        }

        output
    }
}

/// Write the results as pretty JSON
pub fn write_json(results: &ExtractResults, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(results)
        .map_err(|e| rimgen_core::Error::parse(e.to_string()))?;
    std::fs::write(path, content)?;
    info!("Wrote JSON dump to {}", path.display());
    Ok(())
}

/// Quote as a C string literal
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
