//! Type filter, field classifier and cross-reference resolver

use crate::context::{FieldHandle, LoadContext, TypeHandle};
use crate::signature::TypeName;
use rimgen_core::{
    ClassMap, ClassRecord, ExtractConfig, ExtractResults, ExtractStatistics, FieldLink,
    FilterPolicy, Result,
};
use std::collections::HashSet;
use tracing::{debug, info, trace, warn};

/// Version reported when the primary assembly has no `Assembly` row
pub const UNKNOWN_VERSION: &str = "Unknown";

/// Field that may become a link once every record exists
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingLink {
    owner: String,
    field: String,
    type_name: String,
}

/// How a single field contributes to its record
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldClass {
    Translatable,
    ArrayTranslatable,
    ObjectArray(String),
    Object(String),
}

/// A successfully scanned type
struct ScannedType {
    full_name: String,
    record: ClassRecord,
    retained: bool,
    object_arrays: Vec<PendingLink>,
    objects: Vec<PendingLink>,
}

/// Builds the class map of the primary assembly in a [`LoadContext`]
pub struct Extractor {
    config: ExtractConfig,
}

impl Extractor {
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Run the filter over every primary type, then link records
    pub fn extract(&self, context: &LoadContext) -> ExtractResults {
        info!("Extracting classes with {:?} policy", self.config.policy);

        let mut statistics = ExtractStatistics::default();
        let mut classes = ClassMap::new();
        let injected = self.inject_roots(context, &mut classes);

        let mut pending_arrays = Vec::new();
        let mut pending_objects = Vec::new();

        for handle in context.primary_types() {
            if handle.is_module_type() || handle.is_generic_definition() {
                continue;
            }
            statistics.types_scanned += 1;

            let scanned = match self.scan_type(handle, context, &mut statistics) {
                Ok(scanned) => scanned,
                Err(e) => {
                    statistics.types_skipped += 1;
                    if e.is_recoverable() {
                        debug!("Skipping type {}: {}", handle.row(), e);
                    } else {
                        warn!("Skipping unreadable type {}: {}", handle.row(), e);
                    }
                    continue;
                }
            };

            pending_arrays.extend(scanned.object_arrays);
            pending_objects.extend(scanned.objects);

            if scanned.retained {
                let full_name = scanned.full_name;
                let replaced = classes.insert(full_name.clone(), scanned.record);
                if replaced.is_some() && !injected.contains(&full_name) {
                    warn!("Duplicate class {}, keeping the later definition", full_name);
                }
            }
        }

        statistics.object_arrays_linked =
            resolve_links(&mut classes, pending_arrays, |record| &mut record.object_arrays);
        statistics.objects_linked =
            resolve_links(&mut classes, pending_objects, |record| &mut record.objects);
        statistics.classes_exported = classes.len();

        let version = context
            .primary()
            .version()
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

        info!(
            "Extracted {} classes from {} types ({} skipped, {} fields skipped)",
            statistics.classes_exported,
            statistics.types_scanned,
            statistics.types_skipped,
            statistics.fields_skipped
        );
        debug!(
            "Linked {} object arrays and {} objects",
            statistics.object_arrays_linked, statistics.objects_linked
        );

        ExtractResults {
            version,
            classes,
            statistics,
        }
    }

    /// Insert bare records for the configured extra roots
    fn inject_roots(&self, context: &LoadContext, classes: &mut ClassMap) -> HashSet<String> {
        let mut injected = HashSet::new();

        for root in &self.config.extra_roots {
            let Some(handle) = context.resolve(root).filter(|h| h.is_primary()) else {
                warn!("Extra root type {} not found in primary assembly", root);
                continue;
            };

            match bare_record(handle) {
                Ok(record) => {
                    debug!("Injected root {}", root);
                    classes.insert(root.clone(), record);
                    injected.insert(root.clone());
                }
                Err(e) => warn!("Extra root type {} is unreadable: {}", root, e),
            }
        }

        injected
    }

    fn scan_type(
        &self,
        handle: TypeHandle<'_>,
        context: &LoadContext,
        statistics: &mut ExtractStatistics,
    ) -> Result<ScannedType> {
        let full_name = handle.full_name()?;
        let mut record = bare_record(handle)?;

        let in_lineage = match self.config.policy {
            FilterPolicy::DefLineage => {
                record.name.ends_with(&self.config.def_suffix)
                    && handle.is_assignable_to(&self.config.def_base_type)?
            }
            FilterPolicy::Annotation => false,
        };

        let mut object_arrays = Vec::new();
        let mut objects = Vec::new();

        for field in handle.fields()? {
            let name = match field.name() {
                Ok(name) => name,
                Err(e) => {
                    statistics.fields_skipped += 1;
                    debug!("Skipping unnamed field of {}: {}", full_name, e);
                    continue;
                }
            };

            match self.classify_field(&field, context) {
                Ok(Some(FieldClass::Translatable)) => record.must_translate.push(name.to_string()),
                Ok(Some(FieldClass::ArrayTranslatable)) => {
                    record.arrays_must_translate.push(name.to_string())
                }
                Ok(Some(FieldClass::ObjectArray(type_name))) => object_arrays.push(PendingLink {
                    owner: full_name.clone(),
                    field: name.to_string(),
                    type_name,
                }),
                Ok(Some(FieldClass::Object(type_name))) => objects.push(PendingLink {
                    owner: full_name.clone(),
                    field: name.to_string(),
                    type_name,
                }),
                Ok(None) => {}
                Err(e) => {
                    statistics.fields_skipped += 1;
                    debug!("Skipping field {}.{}: {}", full_name, name, e);
                }
            }
        }

        let retained = match self.config.policy {
            FilterPolicy::Annotation => record.has_translations(),
            FilterPolicy::DefLineage => in_lineage,
        };
        trace!("Scanned {} (retained: {})", full_name, retained);

        Ok(ScannedType {
            full_name,
            record,
            retained,
            object_arrays,
            objects,
        })
    }

    fn classify_field(
        &self,
        field: &FieldHandle<'_>,
        context: &LoadContext,
    ) -> Result<Option<FieldClass>> {
        let field_type = field.type_name()?;
        let attributes = field.attribute_types()?;

        if attributes.iter().any(|a| a.contains(&self.config.marker)) {
            return Ok(Some(if field_type.is_generic() || field_type.is_array() {
                FieldClass::ArrayTranslatable
            } else {
                FieldClass::Translatable
            }));
        }

        if let TypeName::GenericInst {
            simple_name,
            arguments,
            ..
        } = &field_type
        {
            if *simple_name == self.config.list_type_name {
                if let Some(element) = arguments.first() {
                    return Ok(Some(FieldClass::ObjectArray(element.to_string())));
                }
            }
        }

        let type_name = field_type.to_string();
        if context.defined_in_primary(&type_name) {
            return Ok(Some(FieldClass::Object(type_name)));
        }

        Ok(None)
    }
}

/// Record with names and base only
fn bare_record(handle: TypeHandle<'_>) -> Result<ClassRecord> {
    Ok(ClassRecord::new(
        handle.namespace()?,
        handle.name()?,
        handle.base_type_name()?.unwrap_or_default(),
    ))
}

/// Append each pending link whose owner and target are both records.
/// Returns the number appended.
fn resolve_links(
    classes: &mut ClassMap,
    pending: Vec<PendingLink>,
    list: impl Fn(&mut ClassRecord) -> &mut Vec<FieldLink>,
) -> usize {
    let mut linked = 0;

    for link in pending {
        if !classes.contains_key(&link.type_name) {
            trace!("Dropping {}.{}: {} not exported", link.owner, link.field, link.type_name);
            continue;
        }
        if let Some(owner) = classes.get_mut(&link.owner) {
            list(owner).push(FieldLink::new(link.field, link.type_name));
            linked += 1;
        }
    }

    linked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Assembly;
    use crate::testing::{sig, ImageBuilder, PRIVATE, PUBLIC, PUBLIC_STATIC};
    use crate::types::element_type;
    use pretty_assertions::assert_eq;

    fn context(builder: &ImageBuilder) -> LoadContext {
        let primary = Assembly::from_bytes("Game.dll", &builder.build()).unwrap();
        LoadContext::new(primary, Vec::new())
    }

    fn extract(builder: &ImageBuilder, config: ExtractConfig) -> ExtractResults {
        Extractor::new(config).extract(&context(builder))
    }

    fn annotation() -> ExtractConfig {
        ExtractConfig {
            extra_roots: Vec::new(),
            ..Default::default()
        }
    }

    fn keys(results: &ExtractResults) -> Vec<&str> {
        results.classes.keys().map(String::as_str).collect()
    }

    /// `A` with a marked scalar, `B : A` with a marked array
    fn base_and_derived() -> ImageBuilder {
        let mut builder = ImageBuilder::new("Game");
        let object = builder.type_ref("System", "Object");
        let marker = builder.type_ref("Verse", "MustTranslateAttribute");

        let a = builder.type_def("Verse", "A", Some(object));
        let name = builder.field("Name", PUBLIC, &sig::string());
        builder.attribute(name, marker);

        builder.type_def("Verse", "B", Some(a));
        let items = builder.field("Items", PUBLIC, &sig::sz_array(sig::string()));
        builder.attribute(items, marker);

        builder
    }

    #[test]
    fn test_base_and_derived_records() {
        let results = extract(&base_and_derived(), annotation());
        assert_eq!(keys(&results), vec!["Verse.A", "Verse.B"]);

        let a = &results.classes["Verse.A"];
        assert_eq!(a.namespace, "Verse");
        assert_eq!(a.name, "A");
        assert_eq!(a.base, "");
        assert_eq!(a.must_translate, vec!["Name"]);
        assert!(a.arrays_must_translate.is_empty());

        let b = &results.classes["Verse.B"];
        assert_eq!(b.base, "Verse.A");
        assert_eq!(b.arrays_must_translate, vec!["Items"]);
        assert_eq!(b.must_translate, vec!["Name"]);

        assert_eq!(results.version, "1.0.0.0");
        assert_eq!(results.statistics.types_scanned, 2);
        assert_eq!(results.statistics.classes_exported, 2);
    }

    #[test]
    fn test_generic_marked_field_is_array_translatable() {
        let mut builder = ImageBuilder::new("Game");
        let list = builder.type_ref("System.Collections.Generic", "List`1");
        let marker = builder.type_ref("Verse", "MustTranslateAttribute");
        builder.type_def("Verse", "RulePack", None);
        let rules = builder.field("rulesStrings", PUBLIC, &sig::generic(list, &[sig::string()]));
        builder.attribute(rules, marker);
        let label = builder.field("label", PUBLIC, &sig::string());
        builder.attribute(label, marker);

        let results = extract(&builder, annotation());
        let record = &results.classes["Verse.RulePack"];
        assert_eq!(record.arrays_must_translate, vec!["rulesStrings"]);
        assert_eq!(record.must_translate, vec!["label"]);
        assert!(record.object_arrays.is_empty());
    }

    #[test]
    fn test_marker_is_substring_match() {
        let mut builder = ImageBuilder::new("Game");
        let no_translate = builder.type_ref("Verse", "NoTranslateAttribute");
        let must_translate = builder.type_ref("Verse", "MustTranslateWhenSetAttribute");
        builder.type_def("Verse", "Hediff", None);
        let skipped = builder.field("defName", PUBLIC, &sig::string());
        builder.attribute(skipped, no_translate);
        let kept = builder.field("labelNoun", PUBLIC, &sig::string());
        builder.attribute(kept, must_translate);

        let results = extract(&builder, annotation());
        assert_eq!(results.classes["Verse.Hediff"].must_translate, vec!["labelNoun"]);
    }

    #[test]
    fn test_links_are_closed_over_records() {
        let mut builder = ImageBuilder::new("Game");
        let list = builder.type_ref("System.Collections.Generic", "List`1");
        let marker = builder.type_ref("Verse", "MustTranslateAttribute");

        let stage = builder.type_def("Verse", "HediffStage", None);
        let label = builder.field("label", PUBLIC, &sig::string());
        builder.attribute(label, marker);

        let plain = builder.type_def("Verse", "Plain", None);
        builder.field("value", PUBLIC, &sig::primitive(element_type::I4));

        builder.type_def("Verse", "HediffDef", None);
        let description = builder.field("description", PUBLIC, &sig::string());
        builder.attribute(description, marker);
        builder.field("stages", PUBLIC, &sig::generic(list, &[sig::class(stage)]));
        builder.field("plains", PUBLIC, &sig::generic(list, &[sig::class(plain)]));
        builder.field("stage", PUBLIC, &sig::class(stage));
        builder.field("plain", PUBLIC, &sig::class(plain));
        builder.field("count", PUBLIC, &sig::primitive(element_type::I4));

        let results = extract(&builder, annotation());
        assert_eq!(keys(&results), vec!["Verse.HediffDef", "Verse.HediffStage"]);

        let def = &results.classes["Verse.HediffDef"];
        assert_eq!(def.object_arrays, vec![FieldLink::new("stages", "Verse.HediffStage")]);
        assert_eq!(def.objects, vec![FieldLink::new("stage", "Verse.HediffStage")]);

        for record in results.classes.values() {
            for link in record.objects.iter().chain(&record.object_arrays) {
                assert!(results.classes.contains_key(&link.type_name));
            }
        }
        assert_eq!(results.statistics.object_arrays_linked, 1);
        assert_eq!(results.statistics.objects_linked, 1);
    }

    #[test]
    fn test_inherited_generic_fields_use_bound_arguments() {
        let mut builder = ImageBuilder::new("Game");
        let object = builder.type_ref("System", "Object");
        let list = builder.type_ref("System.Collections.Generic", "List`1");
        let marker = builder.type_ref("Verse", "MustTranslateAttribute");

        let thing = builder.type_def("Verse", "Thing", Some(object));
        let label = builder.field("label", PUBLIC, &sig::string());
        builder.attribute(label, marker);

        let holder = builder.type_def("Verse", "Holder`1", Some(object));
        builder.field("target", PUBLIC, &sig::var(0));
        builder.field("items", PUBLIC, &sig::generic(list, &[sig::var(0)]));
        builder.generic_param(holder, 0, "T");
        let holder_of_thing = builder.type_spec(&sig::generic(holder, &[sig::class(thing)]));
        builder.type_def("Verse", "Labels", Some(holder_of_thing));
        let title = builder.field("title", PUBLIC, &sig::string());
        builder.attribute(title, marker);

        let boxed = builder.type_def("Verse", "Box`1", Some(object));
        let value = builder.field("value", PUBLIC, &sig::var(0));
        builder.attribute(value, marker);
        builder.generic_param(boxed, 0, "T");
        let strings = sig::generic(list, &[sig::string()]);
        let box_of_strings = builder.type_spec(&sig::generic(boxed, &[strings]));
        builder.type_def("Verse", "Strings", Some(box_of_strings));

        let results = extract(&builder, annotation());
        assert_eq!(keys(&results), vec!["Verse.Labels", "Verse.Strings", "Verse.Thing"]);

        let labels = &results.classes["Verse.Labels"];
        assert_eq!(labels.must_translate, vec!["title"]);
        assert_eq!(labels.objects, vec![FieldLink::new("target", "Verse.Thing")]);
        assert_eq!(labels.object_arrays, vec![FieldLink::new("items", "Verse.Thing")]);

        let strings = &results.classes["Verse.Strings"];
        assert!(strings.must_translate.is_empty());
        assert_eq!(strings.arrays_must_translate, vec!["value"]);
    }

    #[test]
    fn test_links_need_a_retained_owner() {
        let mut builder = ImageBuilder::new("Game");
        let marker = builder.type_ref("Verse", "MustTranslateAttribute");
        let target = builder.type_def("Verse", "Target", None);
        let label = builder.field("label", PUBLIC, &sig::string());
        builder.attribute(label, marker);
        builder.type_def("Verse", "Holder", None);
        builder.field("target", PUBLIC, &sig::class(target));

        let results = extract(&builder, annotation());
        assert_eq!(keys(&results), vec!["Verse.Target"]);
        assert_eq!(results.statistics.objects_linked, 0);
    }

    #[test]
    fn test_injected_root_is_bare_and_replaceable() {
        let mut builder = ImageBuilder::new("Game");
        let object = builder.type_ref("System", "Object");
        let marker = builder.type_ref("Verse", "MustTranslateAttribute");
        let editable = builder.type_def("Verse", "Editable", Some(object));
        builder.field("note", PUBLIC, &sig::string());
        let target = builder.type_def("Verse", "Def", Some(editable));
        let label = builder.field("label", PUBLIC, &sig::string());
        builder.attribute(label, marker);
        builder.type_def("Verse", "Holder", None);
        builder.field("def", PUBLIC, &sig::class(target));

        let results = extract(&builder, ExtractConfig::default());
        assert_eq!(keys(&results), vec!["Verse.Def", "Verse.Editable"]);
        assert_eq!(results.classes["Verse.Editable"], ClassRecord::new("Verse", "Editable", ""));
        assert_eq!(results.classes["Verse.Def"].base, "Verse.Editable");

        let mut marked = base_and_derived();
        let marker = marked.type_ref("Verse", "MustTranslateAttribute");
        marked.type_def("Verse", "Editable", None);
        let title = marked.field("title", PUBLIC, &sig::string());
        marked.attribute(title, marker);

        let results = extract(&marked, ExtractConfig::default());
        assert_eq!(results.classes["Verse.Editable"].must_translate, vec!["title"]);
    }

    #[test]
    fn test_missing_root_is_ignored() {
        let results = extract(&base_and_derived(), ExtractConfig::default());
        assert_eq!(keys(&results), vec!["Verse.A", "Verse.B"]);
    }

    #[test]
    fn test_def_lineage_policy() {
        let mut builder = ImageBuilder::new("Game");
        let object = builder.type_ref("System", "Object");
        let editable = builder.type_def("Verse", "Editable", Some(object));
        let def = builder.type_def("Verse", "Def", Some(editable));
        let thing_def = builder.type_def("Verse", "ThingDef", Some(def));
        builder.field("graphic", PUBLIC, &sig::string());
        builder.type_def("Verse", "BuildableDef", Some(thing_def));
        builder.type_def("Verse", "ThingDefOf", Some(object));
        builder.type_def("Verse", "UnrelatedDef", Some(object));
        builder.type_def("Verse", "DefHolder", Some(def));
        builder.field("thing", PUBLIC, &sig::class(thing_def));

        let config = ExtractConfig {
            policy: FilterPolicy::DefLineage,
            ..Default::default()
        };
        let results = extract(&builder, config);

        assert_eq!(
            keys(&results),
            vec!["Verse.BuildableDef", "Verse.Def", "Verse.Editable", "Verse.ThingDef"]
        );
        assert_eq!(results.classes["Verse.ThingDef"].base, "Verse.Def");
    }

    #[test]
    fn test_malformed_items_shrink_output() {
        let mut builder = base_and_derived();
        let marker = builder.type_ref("Verse", "MustTranslateAttribute");
        let missing = builder.type_ref("Unity", "MonoBehaviour");

        builder.type_def("Verse", "Broken", Some(missing));
        let label = builder.field("label", PUBLIC, &sig::string());
        builder.attribute(label, marker);

        builder.type_def("Verse", "Partial", None);
        let bad = builder.raw_field("callback", PUBLIC, &[element_type::FIELD_SIG, element_type::FNPTR, 0]);
        builder.attribute(bad, marker);
        let good = builder.field("label", PUBLIC, &sig::string());
        builder.attribute(good, marker);

        let results = extract(&builder, annotation());
        assert_eq!(keys(&results), vec!["Verse.A", "Verse.B", "Verse.Partial"]);
        assert_eq!(results.classes["Verse.Partial"].must_translate, vec!["label"]);
        assert_eq!(results.statistics.types_skipped, 1);
        assert_eq!(results.statistics.fields_skipped, 1);
    }

    #[test]
    fn test_static_private_and_generic_types() {
        let mut builder = ImageBuilder::new("Game");
        let object = builder.type_ref("System", "Object");
        let marker = builder.type_ref("Verse", "MustTranslateAttribute");

        let base = builder.type_def("Verse", "Base", Some(object));
        let hidden = builder.field("hidden", PRIVATE, &sig::string());
        builder.attribute(hidden, marker);
        builder.type_def("Verse", "Child", Some(base));
        let constant = builder.field("Constant", PUBLIC_STATIC, &sig::string());
        builder.attribute(constant, marker);

        let generic = builder.type_def("Verse", "Holder`1", Some(object));
        let value = builder.field("value", PUBLIC, &sig::string());
        builder.attribute(value, marker);
        builder.generic_param(generic, 0, "T");

        let results = extract(&builder, annotation());
        assert_eq!(keys(&results), vec!["Verse.Base"]);
        assert_eq!(results.classes["Verse.Base"].must_translate, vec!["hidden"]);
    }

    #[test]
    fn test_nested_type_keys() {
        let mut builder = ImageBuilder::new("Game");
        let marker = builder.type_ref("Verse", "MustTranslateAttribute");
        let outer = builder.type_def("RimWorld", "QuestPart", None);
        let inner = builder.type_def("", "Entry", None);
        let label = builder.field("label", PUBLIC, &sig::string());
        builder.attribute(label, marker);
        builder.nest(inner, outer);

        let results = extract(&builder, annotation());
        assert_eq!(keys(&results), vec!["RimWorld.QuestPart+Entry"]);
        let record = &results.classes["RimWorld.QuestPart+Entry"];
        assert_eq!(record.namespace, "RimWorld");
        assert_eq!(record.name, "Entry");
    }

    #[test]
    fn test_unknown_version() {
        let mut builder = base_and_derived();
        builder.version(None);
        assert_eq!(extract(&builder, annotation()).version, UNKNOWN_VERSION);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let builder = base_and_derived();
        let first = extract(&builder, annotation());
        let second = extract(&builder, annotation());
        assert_eq!(first.classes, second.classes);
        assert_eq!(first.statistics, second.statistics);
    }
}
