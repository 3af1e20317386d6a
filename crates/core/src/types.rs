//! Common types used throughout the application

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full name of the universal root type. A base of this type is not recorded.
pub const ROOT_OBJECT_TYPE: &str = "System.Object";

/// Binary format type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryFormat {
    PE,
}

/// A field whose type is another extracted class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLink {
    /// Field name
    pub field: String,
    /// Full name of the referenced class
    pub type_name: String,
}

impl FieldLink {
    pub fn new(field: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            type_name: type_name.into(),
        }
    }
}

/// Translation-relevant shape of one class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub namespace: String,
    pub name: String,
    /// Full name of the base type, empty when the base is `System.Object`
    pub base: String,
    /// Marked fields of a non-collection type
    pub must_translate: Vec<String>,
    /// Marked fields of a generic or array type
    pub arrays_must_translate: Vec<String>,
    /// `List<T>` fields whose element is another record
    pub object_arrays: Vec<FieldLink>,
    /// Fields whose type is another record
    pub objects: Vec<FieldLink>,
}

impl ClassRecord {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        base: impl Into<String>,
    ) -> Self {
        let mut base = base.into();
        if base == ROOT_OBJECT_TYPE {
            base.clear();
        }

        Self {
            namespace: namespace.into(),
            name: name.into(),
            base,
            ..Default::default()
        }
    }

    /// Whether any field carries the translation marker
    pub fn has_translations(&self) -> bool {
        !self.must_translate.is_empty() || !self.arrays_must_translate.is_empty()
    }

    pub fn has_links(&self) -> bool {
        !self.object_arrays.is_empty() || !self.objects.is_empty()
    }
}

/// Records keyed by full type name. Ordering drives output layout.
pub type ClassMap = BTreeMap<String, ClassRecord>;

/// Results of one extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResults {
    /// Version of the primary assembly, `"Unknown"` when it has none
    pub version: String,
    pub classes: ClassMap,
    pub statistics: ExtractStatistics,
}

/// Counters collected while extracting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractStatistics {
    pub types_scanned: usize,
    pub types_skipped: usize,
    pub fields_skipped: usize,
    pub classes_exported: usize,
    pub object_arrays_linked: usize,
    pub objects_linked: usize,
}
