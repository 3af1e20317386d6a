//! One loaded assembly: metadata plus the lookups the extractor needs

use crate::metadata::Metadata;
use crate::signature::{primitive_name, TypeName, TypeSig, TypeToken};
use crate::types::*;
use rimgen_binary_parser::ParseError;
use rimgen_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Deepest nesting accepted for nested type names
const MAX_NESTING_DEPTH: usize = 64;

/// A managed module parsed from disk
pub struct Assembly {
    path: PathBuf,
    metadata: Metadata,
    /// Nested type row -> enclosing type row
    enclosing: HashMap<u32, u32>,
    /// Type rows owning generic parameters
    generic_definitions: HashSet<u32>,
    /// Field row -> indices into the custom attribute table
    field_attributes: HashMap<u32, Vec<usize>>,
}

impl Assembly {
    /// Read and parse a managed assembly
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(path, &data)
    }

    /// Parse a managed assembly already in memory
    pub fn from_bytes(path: impl Into<PathBuf>, data: &[u8]) -> Result<Self> {
        let path = path.into();
        let binary = match rimgen_binary_parser::parse_binary(data) {
            Ok(binary) => binary,
            Err(ParseError::UnknownFormat) => {
                return Err(Error::NotManaged(format!("{} is not a PE image", path.display())))
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = Metadata::from_image(binary.as_ref()).map_err(|e| match e {
            Error::NotManaged(_) => Error::NotManaged(format!("{} has no CLI header", path.display())),
            other => other,
        })?;

        Ok(Self::new(path, metadata))
    }

    fn new(path: PathBuf, metadata: Metadata) -> Self {
        let enclosing = metadata
            .nested_classes
            .iter()
            .map(|n| (n.nested, n.enclosing))
            .collect();

        let generic_definitions = metadata
            .generic_params
            .iter()
            .filter(|p| p.owner.table == TableId::TypeDef)
            .map(|p| p.owner.row)
            .collect();

        let mut field_attributes: HashMap<u32, Vec<usize>> = HashMap::new();
        for (index, attribute) in metadata.custom_attributes.iter().enumerate() {
            if attribute.parent.table == TableId::Field {
                field_attributes
                    .entry(attribute.parent.row)
                    .or_default()
                    .push(index);
            }
        }

        debug!(
            "Indexed {}: {} nested types, {} generic definitions, {} attributed fields",
            path.display(),
            metadata.nested_classes.len(),
            metadata.generic_params.len(),
            field_attributes.len()
        );

        Self {
            path,
            metadata,
            enclosing,
            generic_definitions,
            field_attributes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Simple assembly name, falling back to the file stem
    pub fn name(&self) -> String {
        self.metadata
            .assembly
            .and_then(|row| self.metadata.get_string(row.name).ok())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                self.path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
    }

    /// `major.minor.build.revision` of the `Assembly` row
    pub fn version(&self) -> Option<String> {
        self.metadata.assembly.map(|row| {
            format!("{}.{}.{}.{}", row.major, row.minor, row.build, row.revision)
        })
    }

    pub fn type_count(&self) -> u32 {
        self.metadata.type_defs.len() as u32
    }

    pub fn type_def(&self, row: u32) -> Result<&TypeDefRow> {
        row.checked_sub(1)
            .and_then(|i| self.metadata.type_defs.get(i as usize))
            .ok_or(Error::RowOutOfRange {
                table: TableId::TypeDef.name(),
                row,
            })
    }

    pub fn type_name(&self, row: u32) -> Result<&str> {
        self.metadata.get_string(self.type_def(row)?.name)
    }

    /// Namespace of a type; nested types report their outermost type's namespace
    pub fn type_namespace(&self, row: u32) -> Result<&str> {
        let mut current = row;
        for _ in 0..MAX_NESTING_DEPTH {
            match self.enclosing.get(&current) {
                Some(outer) => current = *outer,
                None => return self.metadata.get_string(self.type_def(current)?.namespace),
            }
        }
        Err(Error::invalid_format(format!("Type {} nests too deeply", row)))
    }

    /// `Namespace.Name`, with nested types as `Namespace.Outer+Inner`
    pub fn type_full_name(&self, row: u32) -> Result<String> {
        let mut parts = vec![self.type_name(row)?];
        let mut current = row;

        while let Some(outer) = self.enclosing.get(&current) {
            if parts.len() > MAX_NESTING_DEPTH {
                return Err(Error::invalid_format(format!("Type {} nests too deeply", row)));
            }
            current = *outer;
            parts.push(self.type_name(current)?);
        }

        parts.reverse();
        let namespace = self.metadata.get_string(self.type_def(current)?.namespace)?;
        let name = parts.join("+");
        Ok(qualify(namespace, &name))
    }

    pub fn is_generic_definition(&self, row: u32) -> bool {
        self.generic_definitions.contains(&row)
    }

    pub fn is_nested(&self, row: u32) -> bool {
        self.enclosing.contains_key(&row)
    }

    /// Base type token from the `extends` column
    pub fn extends(&self, row: u32) -> Result<Option<TypeToken>> {
        Ok(TypeToken::from_coded(self.type_def(row)?.extends))
    }

    /// Logical field count, honouring `FieldPtr` indirection
    fn field_count(&self) -> u32 {
        if self.metadata.field_ptrs.is_empty() {
            self.metadata.fields.len() as u32
        } else {
            self.metadata.field_ptrs.len() as u32
        }
    }

    /// Field rows owned by a type, in declaration order
    pub fn type_fields(&self, row: u32) -> Result<Vec<u32>> {
        let start = self.type_def(row)?.field_list;
        let limit = self.field_count() + 1;
        let end = self
            .metadata
            .type_defs
            .get(row as usize)
            .map(|next| next.field_list)
            .unwrap_or(limit)
            .min(limit);

        if start == 0 || start > end {
            return Err(Error::invalid_format(format!(
                "Type {} has field list {}..{}",
                row, start, end
            )));
        }

        (start..end)
            .map(|position| {
                if self.metadata.field_ptrs.is_empty() {
                    Ok(position)
                } else {
                    self.metadata
                        .field_ptrs
                        .get(position as usize - 1)
                        .copied()
                        .ok_or(Error::RowOutOfRange {
                            table: TableId::FieldPtr.name(),
                            row: position,
                        })
                }
            })
            .collect()
    }

    pub fn field(&self, row: u32) -> Result<&FieldRow> {
        row.checked_sub(1)
            .and_then(|i| self.metadata.fields.get(i as usize))
            .ok_or(Error::RowOutOfRange {
                table: TableId::Field.name(),
                row,
            })
    }

    pub fn field_name(&self, row: u32) -> Result<&str> {
        self.metadata.get_string(self.field(row)?.name)
    }

    /// Decode the declared type of a field
    pub fn field_type(&self, row: u32) -> Result<TypeSig> {
        let blob = self.metadata.get_blob(self.field(row)?.signature)?;
        TypeSig::parse_field(blob)
    }

    /// Full names of the attribute types applied to a field
    pub fn field_attribute_types(&self, row: u32) -> Result<Vec<String>> {
        let Some(indices) = self.field_attributes.get(&row) else {
            return Ok(Vec::new());
        };

        indices
            .iter()
            .map(|index| {
                let constructor = self.metadata.custom_attributes[*index].constructor;
                self.constructor_type_name(constructor)
            })
            .collect()
    }

    fn constructor_type_name(&self, constructor: CodedToken) -> Result<String> {
        match constructor.table {
            TableId::MethodDef => {
                let owner = self.method_owner(constructor.row).ok_or(Error::RowOutOfRange {
                    table: TableId::MethodDef.name(),
                    row: constructor.row,
                })?;
                self.type_full_name(owner)
            }
            TableId::MemberRef => {
                let member = constructor
                    .row
                    .checked_sub(1)
                    .and_then(|i| self.metadata.member_refs.get(i as usize))
                    .ok_or(Error::RowOutOfRange {
                        table: TableId::MemberRef.name(),
                        row: constructor.row,
                    })?;
                match member.class.table {
                    TableId::TypeDef => self.type_full_name(member.class.row),
                    TableId::TypeRef => self.type_ref_full_name(member.class.row),
                    TableId::TypeSpec => self.token_full_name(TypeToken::Spec(member.class.row)),
                    other => Err(Error::parse(format!(
                        "Attribute constructor declared on {}",
                        other.name()
                    ))),
                }
            }
            other => Err(Error::parse(format!(
                "Attribute constructor in {}",
                other.name()
            ))),
        }
    }

    /// Type definition owning a method row
    pub fn method_owner(&self, method: u32) -> Option<u32> {
        let position = if self.metadata.method_ptrs.is_empty() {
            method
        } else {
            self.metadata
                .method_ptrs
                .iter()
                .position(|m| *m == method)? as u32
                + 1
        };

        let count = if self.metadata.method_ptrs.is_empty() {
            self.metadata.method_defs.len() as u32
        } else {
            self.metadata.method_ptrs.len() as u32
        };
        if position == 0 || position > count {
            return None;
        }

        self.metadata
            .type_defs
            .iter()
            .rposition(|t| t.method_list != 0 && t.method_list <= position)
            .map(|i| i as u32 + 1)
    }

    fn type_ref(&self, row: u32) -> Result<&TypeRefRow> {
        row.checked_sub(1)
            .and_then(|i| self.metadata.type_refs.get(i as usize))
            .ok_or(Error::RowOutOfRange {
                table: TableId::TypeRef.name(),
                row,
            })
    }

    /// Full name of a type reference; nested references use `Outer+Inner`
    pub fn type_ref_full_name(&self, row: u32) -> Result<String> {
        let mut parts = Vec::new();
        let mut current = self.type_ref(row)?;

        loop {
            parts.push(self.metadata.get_string(current.name)?);
            let scope = current.resolution_scope;
            if scope.table != TableId::TypeRef || scope.is_null() {
                break;
            }
            if parts.len() > MAX_NESTING_DEPTH {
                return Err(Error::invalid_format(format!("TypeRef {} nests too deeply", row)));
            }
            current = self.type_ref(scope.row)?;
        }

        parts.reverse();
        let namespace = self.metadata.get_string(current.namespace)?;
        Ok(qualify(namespace, &parts.join("+")))
    }

    fn type_spec(&self, row: u32) -> Result<TypeSig> {
        let spec = row
            .checked_sub(1)
            .and_then(|i| self.metadata.type_specs.get(i as usize))
            .ok_or(Error::RowOutOfRange {
                table: TableId::TypeSpec.name(),
                row,
            })?;
        TypeSig::parse_type_spec(self.metadata.get_blob(spec.signature)?)
    }

    /// Full name of a type token
    pub fn token_full_name(&self, token: TypeToken) -> Result<String> {
        match token {
            TypeToken::Def(row) => self.type_full_name(row),
            TypeToken::Ref(row) => self.type_ref_full_name(row),
            TypeToken::Spec(row) => self.sig_full_name(&self.type_spec(row)?),
        }
    }

    /// Simple name of a type token, e.g. ``List`1``
    pub fn token_simple_name(&self, token: TypeToken) -> Result<String> {
        match token {
            TypeToken::Def(row) => Ok(self.type_name(row)?.to_string()),
            TypeToken::Ref(row) => Ok(self.metadata.get_string(self.type_ref(row)?.name)?.to_string()),
            TypeToken::Spec(row) => match self.type_spec(row)? {
                TypeSig::GenericInst { definition, .. } => self.token_simple_name(definition),
                other => self.sig_full_name(&other),
            },
        }
    }

    /// Generic definition behind a `TypeSpec`, if it is a generic instance
    pub fn spec_definition(&self, row: u32) -> Result<Option<TypeToken>> {
        match self.type_spec(row)? {
            TypeSig::GenericInst { definition, .. } => Ok(Some(definition)),
            _ => Ok(None),
        }
    }

    /// Type arguments of a generic instance `TypeSpec`, empty for other specs
    pub fn spec_arguments(&self, row: u32) -> Result<Vec<TypeName>> {
        match self.type_spec(row)? {
            TypeSig::GenericInst { arguments, .. } => {
                arguments.iter().map(|a| self.sig_type_name(a)).collect()
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Resolve every token of a signature type to its name
    pub fn sig_type_name(&self, sig: &TypeSig) -> Result<TypeName> {
        Ok(match sig {
            TypeSig::Primitive(code) => {
                TypeName::Named(format!("System.{}", primitive_name(*code)))
            }
            TypeSig::Class(token) | TypeSig::ValueType(token) => {
                TypeName::Named(self.token_full_name(*token)?)
            }
            TypeSig::SzArray(element) => TypeName::SzArray(Box::new(self.sig_type_name(element)?)),
            TypeSig::Array { element, rank } => TypeName::Array {
                element: Box::new(self.sig_type_name(element)?),
                rank: *rank,
            },
            TypeSig::GenericInst {
                definition,
                arguments,
                ..
            } => TypeName::GenericInst {
                definition: self.token_full_name(*definition)?,
                simple_name: self.token_simple_name(*definition)?,
                arguments: arguments
                    .iter()
                    .map(|a| self.sig_type_name(a))
                    .collect::<Result<Vec<_>>>()?,
            },
            TypeSig::Var(number) => TypeName::Var(*number),
            TypeSig::MVar(number) => TypeName::MVar(*number),
            TypeSig::Ptr(element) => TypeName::Ptr(Box::new(self.sig_type_name(element)?)),
            TypeSig::ByRef(element) => TypeName::ByRef(Box::new(self.sig_type_name(element)?)),
        })
    }

    /// Display name of a signature type, see [`TypeName`]
    pub fn sig_full_name(&self, sig: &TypeSig) -> Result<String> {
        Ok(self.sig_type_name(sig)?.to_string())
    }
}

fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", namespace, name)
    }
}
