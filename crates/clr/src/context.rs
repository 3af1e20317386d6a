//! Loaded assemblies and borrowed handles into them

use crate::assembly::Assembly;
use crate::signature::{TypeName, TypeSig, TypeToken};
use crate::types::{field_attributes, MODULE_TYPE_NAME};
use indexmap::IndexMap;
use rimgen_core::{Error, Result};
use std::rc::Rc;
use tracing::debug;

/// Base types whose fields are never inherited into scanned types
const HIERARCHY_ROOTS: [&str; 3] = ["System.Object", "System.ValueType", "System.Enum"];

/// Longest inheritance chain walked before the metadata is assumed cyclic
const MAX_HIERARCHY_DEPTH: usize = 256;

/// Where a type definition lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TypeLocation {
    assembly: usize,
    row: u32,
}

/// The primary assembly, its dependencies and a full-name index over all of
/// their type definitions. Dropping the context releases every image.
pub struct LoadContext {
    assemblies: Vec<Assembly>,
    index: IndexMap<String, TypeLocation>,
}

impl LoadContext {
    /// Build the context; the primary assembly wins name collisions, then
    /// dependencies in order
    pub fn new(primary: Assembly, dependencies: Vec<Assembly>) -> Self {
        let assemblies: Vec<Assembly> = std::iter::once(primary).chain(dependencies).collect();
        let mut index = IndexMap::new();

        for (assembly_index, assembly) in assemblies.iter().enumerate() {
            for row in 1..=assembly.type_count() {
                match assembly.type_full_name(row) {
                    Ok(name) => {
                        index.entry(name).or_insert(TypeLocation {
                            assembly: assembly_index,
                            row,
                        });
                    }
                    Err(e) => debug!(
                        "Unnamed type {} in {}: {}",
                        row,
                        assembly.path().display(),
                        e
                    ),
                }
            }
        }

        debug!(
            "Load context: {} assemblies, {} named types",
            assemblies.len(),
            index.len()
        );

        Self { assemblies, index }
    }

    pub fn primary(&self) -> &Assembly {
        &self.assemblies[0]
    }

    pub fn assemblies(&self) -> &[Assembly] {
        &self.assemblies
    }

    /// Number of distinct type names across the context
    pub fn type_count(&self) -> usize {
        self.index.len()
    }

    /// Every type definition of the primary assembly, in table order
    pub fn primary_types(&self) -> impl Iterator<Item = TypeHandle<'_>> + '_ {
        (1..=self.primary().type_count()).map(move |row| TypeHandle {
            context: self,
            location: TypeLocation { assembly: 0, row },
        })
    }

    /// Find a type definition by full name
    pub fn resolve(&self, full_name: &str) -> Option<TypeHandle<'_>> {
        self.index.get(full_name).map(|location| TypeHandle {
            context: self,
            location: *location,
        })
    }

    /// Whether the primary assembly defines a type of this name
    pub fn defined_in_primary(&self, full_name: &str) -> bool {
        self.resolve(full_name).map_or(false, |handle| handle.is_primary())
    }

    fn handle(&self, assembly: usize, row: u32) -> TypeHandle<'_> {
        TypeHandle {
            context: self,
            location: TypeLocation { assembly, row },
        }
    }
}

/// A type definition inside a [`LoadContext`]
#[derive(Clone, Copy)]
pub struct TypeHandle<'ctx> {
    context: &'ctx LoadContext,
    location: TypeLocation,
}

impl<'ctx> TypeHandle<'ctx> {
    pub fn assembly(&self) -> &'ctx Assembly {
        &self.context.assemblies[self.location.assembly]
    }

    pub fn row(&self) -> u32 {
        self.location.row
    }

    pub fn is_primary(&self) -> bool {
        self.location.assembly == 0
    }

    pub fn name(&self) -> Result<&'ctx str> {
        self.assembly().type_name(self.location.row)
    }

    pub fn namespace(&self) -> Result<&'ctx str> {
        self.assembly().type_namespace(self.location.row)
    }

    pub fn full_name(&self) -> Result<String> {
        self.assembly().type_full_name(self.location.row)
    }

    pub fn is_generic_definition(&self) -> bool {
        self.assembly().is_generic_definition(self.location.row)
    }

    /// The `<Module>` pseudo type holding global members
    pub fn is_module_type(&self) -> bool {
        !self.assembly().is_nested(self.location.row)
            && self.name().map_or(false, |name| name == MODULE_TYPE_NAME)
            && self.namespace().map_or(false, str::is_empty)
    }

    /// Full name of the base type without resolving it
    pub fn base_type_name(&self) -> Result<Option<String>> {
        let assembly = self.assembly();
        assembly
            .extends(self.location.row)?
            .map(|token| assembly.token_full_name(token))
            .transpose()
    }

    /// Resolve the base type definition, searching the whole context
    pub fn base_type(&self) -> Result<Option<TypeHandle<'ctx>>> {
        let assembly = self.assembly();
        let token = match assembly.extends(self.location.row)? {
            Some(TypeToken::Spec(row)) => assembly.spec_definition(row)?.ok_or_else(|| {
                Error::unresolved(format!("base of {} is not a class", self.location.row))
            })?,
            Some(token) => token,
            None => return Ok(None),
        };

        match token {
            TypeToken::Def(row) => Ok(Some(self.context.handle(self.location.assembly, row))),
            other => {
                let name = assembly.token_full_name(other)?;
                self.context
                    .resolve(&name)
                    .map(Some)
                    .ok_or_else(|| Error::unresolved(name))
            }
        }
    }

    /// Walk one step up the hierarchy, stopping at the runtime roots
    fn scanned_base(&self) -> Result<Option<TypeHandle<'ctx>>> {
        match self.base_type_name()? {
            None => Ok(None),
            Some(name) if HIERARCHY_ROOTS.contains(&name.as_str()) => Ok(None),
            Some(_) => self.base_type(),
        }
    }

    /// Type arguments this type passes to its base, with its own generic
    /// parameters bound to `arguments`
    fn base_arguments(&self, arguments: &[TypeName]) -> Result<Vec<TypeName>> {
        let assembly = self.assembly();
        match assembly.extends(self.location.row)? {
            Some(TypeToken::Spec(row)) => Ok(assembly
                .spec_arguments(row)?
                .iter()
                .map(|a| a.substitute(arguments))
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    /// Instance fields visible on this type: its own fields in declaration
    /// order, then the non-private fields of each base type, nearest first.
    /// Fields of a closed generic base see the arguments it was closed with.
    pub fn fields(&self) -> Result<Vec<FieldHandle<'ctx>>> {
        let mut arguments: Rc<[TypeName]> = Rc::from(Vec::new());
        let mut fields = self.declared_fields(true, &arguments)?;

        let mut current = *self;
        let mut depth = 0;
        while let Some(base) = current.scanned_base()? {
            depth += 1;
            if depth > MAX_HIERARCHY_DEPTH {
                return Err(Error::invalid_format(format!(
                    "Inheritance chain of {} is too deep",
                    self.full_name()?
                )));
            }
            arguments = Rc::from(current.base_arguments(&arguments)?);
            fields.extend(base.declared_fields(false, &arguments)?);
            current = base;
        }

        Ok(fields)
    }

    fn declared_fields(
        &self,
        include_private: bool,
        arguments: &Rc<[TypeName]>,
    ) -> Result<Vec<FieldHandle<'ctx>>> {
        let assembly = self.assembly();
        let mut fields = Vec::new();

        for row in assembly.type_fields(self.location.row)? {
            let flags = assembly.field(row)?.flags;
            if flags & field_attributes::STATIC != 0 {
                continue;
            }
            if !include_private
                && flags & field_attributes::FIELD_ACCESS_MASK <= field_attributes::PRIVATE
            {
                continue;
            }
            fields.push(FieldHandle {
                assembly,
                row,
                arguments: Rc::clone(arguments),
            });
        }

        Ok(fields)
    }

    /// Whether this type is `full_name` or derives from it
    pub fn is_assignable_to(&self, full_name: &str) -> Result<bool> {
        if self.full_name()? == full_name {
            return Ok(true);
        }

        let mut current = *self;
        for _ in 0..MAX_HIERARCHY_DEPTH {
            let base_name = match current.base_type_name()? {
                Some(name) => name,
                None => return Ok(false),
            };
            if base_name == full_name {
                return Ok(true);
            }
            if HIERARCHY_ROOTS.contains(&base_name.as_str()) {
                return Ok(false);
            }
            current = match current.base_type()? {
                Some(base) => base,
                None => return Ok(false),
            };
        }

        Err(Error::invalid_format(format!(
            "Inheritance chain of {} is too deep",
            full_name
        )))
    }
}

impl std::fmt::Debug for TypeHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeHandle")
            .field("assembly", &self.location.assembly)
            .field("row", &self.location.row)
            .finish()
    }
}

/// A field definition inside a [`LoadContext`], as seen from the type whose
/// fields were listed
#[derive(Clone)]
pub struct FieldHandle<'ctx> {
    assembly: &'ctx Assembly,
    row: u32,
    /// Arguments bound to the declaring type's generic parameters
    arguments: Rc<[TypeName]>,
}

impl<'ctx> FieldHandle<'ctx> {
    /// Assembly declaring the field; names in its signature resolve here
    pub fn assembly(&self) -> &'ctx Assembly {
        self.assembly
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn name(&self) -> Result<&'ctx str> {
        self.assembly.field_name(self.row)
    }

    /// Declared signature; generic parameters are unbound
    pub fn field_type(&self) -> Result<TypeSig> {
        self.assembly.field_type(self.row)
    }

    /// Field type with the declaring type's generic parameters bound
    pub fn type_name(&self) -> Result<TypeName> {
        let declared = self.assembly.sig_type_name(&self.field_type()?)?;
        Ok(declared.substitute(&self.arguments))
    }

    pub fn attribute_types(&self) -> Result<Vec<String>> {
        self.assembly.field_attribute_types(self.row)
    }
}
