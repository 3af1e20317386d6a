//! CLI header, metadata root, heaps and typed table rows

use crate::tables::TableStream;
use crate::types::*;
use rimgen_binary_parser::{pe::cli_header, BinaryFile, BinaryReader};
use rimgen_core::{Error, Result};
use tracing::{debug, info};

/// Location of a heap inside the metadata buffer
#[derive(Debug, Clone, Copy, Default)]
struct HeapRange {
    offset: usize,
    size: usize,
}

/// Parsed ECMA-335 metadata of one module
pub struct Metadata {
    /// Raw metadata bytes, starting at the root signature
    data: Vec<u8>,
    /// Runtime version string from the root, e.g. `v4.0.30319`
    pub runtime_version: String,
    strings: HeapRange,
    blob: HeapRange,
    /// Table stream header
    pub tables: TableStream,
    pub type_refs: Vec<TypeRefRow>,
    pub type_defs: Vec<TypeDefRow>,
    pub field_ptrs: Vec<u32>,
    pub fields: Vec<FieldRow>,
    pub method_ptrs: Vec<u32>,
    pub method_defs: Vec<MethodDefRow>,
    pub member_refs: Vec<MemberRefRow>,
    pub custom_attributes: Vec<CustomAttributeRow>,
    pub type_specs: Vec<TypeSpecRow>,
    pub assembly: Option<AssemblyRow>,
    pub nested_classes: Vec<NestedClassRow>,
    pub generic_params: Vec<GenericParamRow>,
}

impl Metadata {
    /// Locate and parse the metadata of a managed PE image
    pub fn from_image(binary: &dyn BinaryFile) -> Result<Self> {
        let header = cli_header(binary)?
            .ok_or_else(|| Error::NotManaged("image has no CLI header".into()))?;

        debug!(
            "CLI header v{}.{} ({:?}): metadata at RVA {:#x} ({} bytes)",
            header.runtime_version.0,
            header.runtime_version.1,
            header.flags,
            header.metadata.rva,
            header.metadata.size
        );

        Self::parse(binary.read_directory(header.metadata)?)
    }

    /// Parse metadata starting at the root signature
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);

        let signature = reader.read_u32()?;
        if signature != METADATA_SIGNATURE {
            return Err(Error::InvalidMagic {
                expected: METADATA_SIGNATURE,
                actual: signature,
            });
        }

        let _major = reader.read_u16()?;
        let _minor = reader.read_u16()?;
        let _reserved = reader.read_u32()?;
        let version_length = reader.read_u32()? as usize;
        let runtime_version = String::from_utf8_lossy(reader.read_bytes(version_length)?)
            .trim_end_matches('\0')
            .to_string();
        let _flags = reader.read_u16()?;
        let stream_count = reader.read_u16()?;

        let mut tables_range = None;
        let mut strings = HeapRange::default();
        let mut blob = HeapRange::default();

        for _ in 0..stream_count {
            let offset = reader.read_u32()? as usize;
            let size = reader.read_u32()? as usize;
            let name = reader.read_cstring(32)?;
            reader.align(4)?;

            if offset.checked_add(size).map_or(true, |end| end > data.len()) {
                return Err(Error::invalid_format(format!(
                    "Stream {} exceeds metadata bounds",
                    name
                )));
            }

            let range = HeapRange { offset, size };
            match name.as_str() {
                stream_names::TABLES | stream_names::TABLES_UNCOMPRESSED => {
                    tables_range = Some(range)
                }
                stream_names::STRINGS => strings = range,
                stream_names::BLOB => blob = range,
                stream_names::GUID | stream_names::USER_STRINGS => {}
                other => debug!("Ignoring metadata stream {}", other),
            }
        }

        let tables_range =
            tables_range.ok_or_else(|| Error::invalid_format("Missing table stream"))?;
        let tables = TableStream::parse(data, tables_range.offset, tables_range.size)?;

        let mut metadata = Self {
            data: data.to_vec(),
            runtime_version,
            strings,
            blob,
            tables,
            type_refs: Vec::new(),
            type_defs: Vec::new(),
            field_ptrs: Vec::new(),
            fields: Vec::new(),
            method_ptrs: Vec::new(),
            method_defs: Vec::new(),
            member_refs: Vec::new(),
            custom_attributes: Vec::new(),
            type_specs: Vec::new(),
            assembly: None,
            nested_classes: Vec::new(),
            generic_params: Vec::new(),
        };
        metadata.read_rows()?;

        info!(
            "Parsed metadata {}: {} types, {} fields, {} attributes",
            metadata.runtime_version,
            metadata.type_defs.len(),
            metadata.fields.len(),
            metadata.custom_attributes.len()
        );

        Ok(metadata)
    }

    fn read_table<T>(&self, table: TableId, map: impl Fn(&[u32]) -> Result<T>) -> Result<Vec<T>> {
        (1..=self.tables.rows(table))
            .map(|row| map(self.tables.read_row(&self.data, table, row)?.as_slice()))
            .collect()
    }

    fn read_rows(&mut self) -> Result<()> {
        let tables = &self.tables;

        self.type_refs = self.read_table(TableId::TypeRef, |r| {
            Ok(TypeRefRow {
                resolution_scope: tables.decode_coded(CodedIndex::ResolutionScope, r[0])?,
                name: r[1],
                namespace: r[2],
            })
        })?;

        self.type_defs = self.read_table(TableId::TypeDef, |r| {
            Ok(TypeDefRow {
                flags: r[0],
                name: r[1],
                namespace: r[2],
                extends: tables.decode_coded(CodedIndex::TypeDefOrRef, r[3])?,
                field_list: r[4],
                method_list: r[5],
            })
        })?;

        self.field_ptrs = self.read_table(TableId::FieldPtr, |r| Ok(r[0]))?;

        self.fields = self.read_table(TableId::Field, |r| {
            Ok(FieldRow {
                flags: r[0] as u16,
                name: r[1],
                signature: r[2],
            })
        })?;

        self.method_ptrs = self.read_table(TableId::MethodPtr, |r| Ok(r[0]))?;

        self.method_defs = self.read_table(TableId::MethodDef, |r| {
            Ok(MethodDefRow {
                flags: r[2] as u16,
                name: r[3],
                signature: r[4],
            })
        })?;

        self.member_refs = self.read_table(TableId::MemberRef, |r| {
            Ok(MemberRefRow {
                class: tables.decode_coded(CodedIndex::MemberRefParent, r[0])?,
                name: r[1],
                signature: r[2],
            })
        })?;

        self.custom_attributes = self.read_table(TableId::CustomAttribute, |r| {
            Ok(CustomAttributeRow {
                parent: tables.decode_coded(CodedIndex::HasCustomAttribute, r[0])?,
                constructor: tables.decode_coded(CodedIndex::CustomAttributeType, r[1])?,
                value: r[2],
            })
        })?;

        self.type_specs = self.read_table(TableId::TypeSpec, |r| Ok(TypeSpecRow { signature: r[0] }))?;

        self.assembly = self
            .read_table(TableId::Assembly, |r| {
                Ok(AssemblyRow {
                    major: r[1] as u16,
                    minor: r[2] as u16,
                    build: r[3] as u16,
                    revision: r[4] as u16,
                    flags: r[5],
                    name: r[7],
                    culture: r[8],
                })
            })?
            .into_iter()
            .next();

        self.nested_classes = self.read_table(TableId::NestedClass, |r| {
            Ok(NestedClassRow {
                nested: r[0],
                enclosing: r[1],
            })
        })?;

        self.generic_params = self.read_table(TableId::GenericParam, |r| {
            Ok(GenericParamRow {
                number: r[0] as u16,
                flags: r[1] as u16,
                owner: tables.decode_coded(CodedIndex::TypeOrMethodDef, r[2])?,
                name: r[3],
            })
        })?;

        Ok(())
    }

    /// Get a string from the `#Strings` heap. Index 0 is the empty string.
    pub fn get_string(&self, index: u32) -> Result<&str> {
        let index = index as usize;
        if index >= self.strings.size {
            if index == 0 {
                return Ok("");
            }
            return Err(Error::parse(format!("String index {:#x} out of range", index)));
        }

        let heap = &self.data[self.strings.offset..self.strings.offset + self.strings.size];
        let end = heap[index..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| index + p)
            .unwrap_or(heap.len());

        std::str::from_utf8(&heap[index..end])
            .map_err(|_| Error::parse(format!("String at {:#x} is not UTF-8", index)))
    }

    /// Get a blob from the `#Blob` heap
    pub fn get_blob(&self, index: u32) -> Result<&[u8]> {
        let heap = &self.data[self.blob.offset..self.blob.offset + self.blob.size];
        if index as usize >= heap.len() {
            return Err(Error::parse(format!("Blob index {:#x} out of range", index)));
        }

        let mut reader = BinaryReader::new_at(heap, index as usize);
        let length = reader.read_compressed_u32()? as usize;
        Ok(reader.read_bytes(length)?)
    }
}
