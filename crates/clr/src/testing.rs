//! Writer for small synthetic assemblies used by the unit tests

use crate::signature::TypeToken;
use crate::tables::{schema, TableLayout};
use crate::types::*;
use rimgen_binary_parser::pe::CLI_HEADER_SIZE;
use std::collections::HashMap;

const FILE_ALIGNMENT: usize = 0x200;
const TEXT_RVA: u32 = 0x2000;
const IMAGE_BASE: u32 = 0x0040_0000;
const RUNTIME_VERSION: &[u8] = b"v4.0.30319\0\0";

/// Public, hide-by-sig special name constructor
const CTOR_FLAGS: u32 = 0x1886;
const CTOR_SIGNATURE: [u8; 3] = [0x20, 0x00, element_type::VOID];

/// Field access shortcuts
pub const PUBLIC: u16 = field_attributes::PUBLIC;
pub const PRIVATE: u16 = field_attributes::PRIVATE;
pub const FAMILY: u16 = field_attributes::FAMILY;
pub const PUBLIC_STATIC: u16 = field_attributes::PUBLIC | field_attributes::STATIC;

/// Encode an ECMA-335 compressed unsigned integer
pub fn compress(value: u32) -> Vec<u8> {
    match value {
        0..=0x7F => vec![value as u8],
        0x80..=0x3FFF => vec![0x80 | (value >> 8) as u8, value as u8],
        _ => vec![
            0xC0 | (value >> 24) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ],
    }
}

fn coded(kind: CodedIndex, table: TableId, row: u32) -> u32 {
    let tag = kind.tag_of(table).expect("table not addressable by coded index");
    (row << kind.tag_bits()) | tag
}

fn type_def_or_ref(token: TypeToken) -> u32 {
    match token {
        TypeToken::Def(row) => coded(CodedIndex::TypeDefOrRef, TableId::TypeDef, row),
        TypeToken::Ref(row) => coded(CodedIndex::TypeDefOrRef, TableId::TypeRef, row),
        TypeToken::Spec(row) => coded(CodedIndex::TypeDefOrRef, TableId::TypeSpec, row),
    }
}

fn pad4(bytes: &mut Vec<u8>) {
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_at(image: &mut [u8], offset: usize, bytes: &[u8]) {
    image[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Type portions of signature blobs
pub mod sig {
    use super::*;

    pub fn encode_token(token: TypeToken) -> Vec<u8> {
        let tag = match token {
            TypeToken::Def(_) => 0,
            TypeToken::Ref(_) => 1,
            TypeToken::Spec(_) => 2,
        };
        compress((token.row() << 2) | tag)
    }

    pub fn primitive(code: u8) -> Vec<u8> {
        vec![code]
    }

    pub fn string() -> Vec<u8> {
        primitive(element_type::STRING)
    }

    pub fn class(token: TypeToken) -> Vec<u8> {
        let mut out = vec![element_type::CLASS];
        out.extend(encode_token(token));
        out
    }

    pub fn value_type(token: TypeToken) -> Vec<u8> {
        let mut out = vec![element_type::VALUETYPE];
        out.extend(encode_token(token));
        out
    }

    pub fn sz_array(element: Vec<u8>) -> Vec<u8> {
        let mut out = vec![element_type::SZARRAY];
        out.extend(element);
        out
    }

    pub fn generic(definition: TypeToken, arguments: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![element_type::GENERICINST, element_type::CLASS];
        out.extend(encode_token(definition));
        out.extend(compress(arguments.len() as u32));
        for argument in arguments {
            out.extend_from_slice(argument);
        }
        out
    }

    pub fn var(number: u32) -> Vec<u8> {
        let mut out = vec![element_type::VAR];
        out.extend(compress(number));
        out
    }

    pub fn mvar(number: u32) -> Vec<u8> {
        let mut out = vec![element_type::MVAR];
        out.extend(compress(number));
        out
    }
}

/// Builds a PE32 image holding a single metadata module
#[derive(Clone)]
pub struct ImageBuilder {
    strings: Vec<u8>,
    string_index: HashMap<String, u32>,
    blobs: Vec<u8>,
    tables: Vec<Vec<Vec<u32>>>,
    assembly_name: String,
    version: Option<[u16; 4]>,
    ctor_refs: HashMap<TypeToken, u32>,
}

impl ImageBuilder {
    /// Start a module with `<Module>`, one `AssemblyRef` to mscorlib and
    /// assembly version 1.0.0.0
    pub fn new(assembly_name: &str) -> Self {
        let mut builder = Self {
            strings: vec![0],
            string_index: HashMap::new(),
            blobs: vec![0],
            tables: vec![Vec::new(); TABLE_COUNT],
            assembly_name: assembly_name.to_string(),
            version: Some([1, 0, 0, 0]),
            ctor_refs: HashMap::new(),
        };

        let module_name = builder.string(&format!("{}.dll", assembly_name));
        builder.push(TableId::Module, vec![0, module_name, 1, 0, 0]);

        let mscorlib = builder.string("mscorlib");
        builder.push(TableId::AssemblyRef, vec![4, 0, 0, 0, 0, 0, mscorlib, 0, 0]);

        builder.type_def("", MODULE_TYPE_NAME, None);
        builder
    }

    /// Set or clear the `Assembly` row version
    pub fn version(&mut self, version: Option<[u16; 4]>) -> &mut Self {
        self.version = version;
        self
    }

    fn push(&mut self, table: TableId, values: Vec<u32>) -> u32 {
        let rows = &mut self.tables[table.index()];
        rows.push(values);
        rows.len() as u32
    }

    fn rows(&self, table: TableId) -> u32 {
        self.tables[table.index()].len() as u32
    }

    pub fn string(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(index) = self.string_index.get(value) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.extend_from_slice(value.as_bytes());
        self.strings.push(0);
        self.string_index.insert(value.to_string(), index);
        index
    }

    pub fn blob(&mut self, bytes: &[u8]) -> u32 {
        let index = self.blobs.len() as u32;
        self.blobs.extend(compress(bytes.len() as u32));
        self.blobs.extend_from_slice(bytes);
        index
    }

    /// Reference a type living in mscorlib
    pub fn type_ref(&mut self, namespace: &str, name: &str) -> TypeToken {
        let scope = coded(CodedIndex::ResolutionScope, TableId::AssemblyRef, 1);
        let name = self.string(name);
        let namespace = self.string(namespace);
        TypeToken::Ref(self.push(TableId::TypeRef, vec![scope, name, namespace]))
    }

    /// Define a type. Fields and methods added afterwards belong to it.
    pub fn type_def(&mut self, namespace: &str, name: &str, extends: Option<TypeToken>) -> TypeToken {
        let name = self.string(name);
        let namespace = self.string(namespace);
        let extends = extends.map(type_def_or_ref).unwrap_or(0);
        let field_list = self.rows(TableId::Field) + 1;
        let method_list = self.rows(TableId::MethodDef) + 1;
        TypeToken::Def(self.push(
            TableId::TypeDef,
            vec![type_attributes::PUBLIC, name, namespace, extends, field_list, method_list],
        ))
    }

    /// Add a field to the last defined type
    pub fn field(&mut self, name: &str, flags: u16, field_type: &[u8]) -> u32 {
        let mut signature = vec![element_type::FIELD_SIG];
        signature.extend_from_slice(field_type);
        self.raw_field(name, flags, &signature)
    }

    /// Add a field with an arbitrary signature blob
    pub fn raw_field(&mut self, name: &str, flags: u16, signature: &[u8]) -> u32 {
        let name = self.string(name);
        let signature = self.blob(signature);
        self.push(TableId::Field, vec![flags as u32, name, signature])
    }

    /// Add a parameterless constructor to the last defined type
    pub fn constructor(&mut self) -> u32 {
        let name = self.string(".ctor");
        let signature = self.blob(&CTOR_SIGNATURE);
        let param_list = self.rows(TableId::Param) + 1;
        self.push(
            TableId::MethodDef,
            vec![0, 0, CTOR_FLAGS, name, signature, param_list],
        )
    }

    pub fn type_spec(&mut self, type_sig: &[u8]) -> TypeToken {
        let signature = self.blob(type_sig);
        TypeToken::Spec(self.push(TableId::TypeSpec, vec![signature]))
    }

    /// Attach an attribute of type `attribute` to a field through a
    /// `MemberRef` constructor
    pub fn attribute(&mut self, field: u32, attribute: TypeToken) {
        let ctor = match self.ctor_refs.get(&attribute) {
            Some(row) => *row,
            None => {
                let class = match attribute {
                    TypeToken::Def(row) => coded(CodedIndex::MemberRefParent, TableId::TypeDef, row),
                    TypeToken::Ref(row) => coded(CodedIndex::MemberRefParent, TableId::TypeRef, row),
                    TypeToken::Spec(row) => coded(CodedIndex::MemberRefParent, TableId::TypeSpec, row),
                };
                let name = self.string(".ctor");
                let signature = self.blob(&CTOR_SIGNATURE);
                let row = self.push(TableId::MemberRef, vec![class, name, signature]);
                self.ctor_refs.insert(attribute, row);
                row
            }
        };
        self.attribute_with_ctor(field, TableId::MemberRef, ctor);
    }

    /// Attach an attribute whose constructor is a method defined in this module
    pub fn attribute_from_method(&mut self, field: u32, constructor: u32) {
        self.attribute_with_ctor(field, TableId::MethodDef, constructor);
    }

    fn attribute_with_ctor(&mut self, field: u32, table: TableId, row: u32) {
        let parent = coded(CodedIndex::HasCustomAttribute, TableId::Field, field);
        let constructor = coded(CodedIndex::CustomAttributeType, table, row);
        let value = self.blob(&[0x01, 0x00, 0x00, 0x00]);
        self.push(TableId::CustomAttribute, vec![parent, constructor, value]);
    }

    /// Declare `nested` as a member of `enclosing`
    pub fn nest(&mut self, nested: TypeToken, enclosing: TypeToken) {
        self.push(TableId::NestedClass, vec![nested.row(), enclosing.row()]);
    }

    /// Give a type definition a generic parameter
    pub fn generic_param(&mut self, owner: TypeToken, number: u16, name: &str) {
        let owner = coded(CodedIndex::TypeOrMethodDef, TableId::TypeDef, owner.row());
        let name = self.string(name);
        self.push(TableId::GenericParam, vec![number as u32, 0, owner, name]);
    }

    /// Serialize the module into a PE image
    pub fn build(&self) -> Vec<u8> {
        let mut builder = self.clone();

        if let Some([major, minor, build, revision]) = builder.version {
            let assembly_name = builder.assembly_name.clone();
            let name = builder.string(&assembly_name);
            builder.push(
                TableId::Assembly,
                vec![0x8004, major as u32, minor as u32, build as u32, revision as u32, 0, 0, name, 0],
            );
        }

        let metadata = builder.metadata();

        let mut text = Vec::new();
        put_u32(&mut text, CLI_HEADER_SIZE);
        put_u16(&mut text, 2);
        put_u16(&mut text, 5);
        put_u32(&mut text, TEXT_RVA + CLI_HEADER_SIZE);
        put_u32(&mut text, metadata.len() as u32);
        put_u32(&mut text, 1);
        text.resize(CLI_HEADER_SIZE as usize, 0);
        text.extend(metadata);

        pe_image(&text, Some((TEXT_RVA, CLI_HEADER_SIZE)))
    }

    /// A PE image with no CLI header
    pub fn native_image() -> Vec<u8> {
        pe_image(&[0xC3; 16], None)
    }

    fn metadata(&self) -> Vec<u8> {
        let mut heap_flags = 0u8;
        if self.strings.len() > 0xFFFF {
            heap_flags |= heap_sizes::WIDE_STRINGS;
        }
        if self.blobs.len() > 0xFFFF {
            heap_flags |= heap_sizes::WIDE_BLOB;
        }

        let mut row_counts = [0u32; TABLE_COUNT];
        for table in TableId::ALL {
            row_counts[table.index()] = self.rows(table);
        }
        let layout = TableLayout::new(heap_flags, row_counts);

        let mut tables = Vec::new();
        put_u32(&mut tables, 0);
        tables.push(2);
        tables.push(0);
        tables.push(heap_flags);
        tables.push(1);
        let valid = TableId::ALL
            .iter()
            .filter(|t| self.rows(**t) > 0)
            .fold(0u64, |mask, t| mask | (1u64 << t.index()));
        tables.extend_from_slice(&valid.to_le_bytes());
        tables.extend_from_slice(&0u64.to_le_bytes());
        for table in TableId::ALL {
            if self.rows(table) > 0 {
                put_u32(&mut tables, self.rows(table));
            }
        }
        for table in TableId::ALL {
            for row in &self.tables[table.index()] {
                for (column, value) in schema(table).iter().zip(row) {
                    match layout.column_size(*column) {
                        2 => put_u16(&mut tables, *value as u16),
                        _ => put_u32(&mut tables, *value),
                    }
                }
            }
        }
        pad4(&mut tables);

        let mut strings = self.strings.clone();
        pad4(&mut strings);
        let mut blobs = self.blobs.clone();
        pad4(&mut blobs);
        let guid = vec![0x11u8; 16];

        let streams: [(&str, Vec<u8>); 4] = [
            (stream_names::TABLES, tables),
            (stream_names::STRINGS, strings),
            (stream_names::BLOB, blobs),
            (stream_names::GUID, guid),
        ];

        let header_len = 16
            + RUNTIME_VERSION.len()
            + 4
            + streams
                .iter()
                .map(|(name, _)| 8 + (name.len() + 1 + 3) / 4 * 4)
                .sum::<usize>();

        let mut root = Vec::new();
        put_u32(&mut root, METADATA_SIGNATURE);
        put_u16(&mut root, 1);
        put_u16(&mut root, 1);
        put_u32(&mut root, 0);
        put_u32(&mut root, RUNTIME_VERSION.len() as u32);
        root.extend_from_slice(RUNTIME_VERSION);
        put_u16(&mut root, 0);
        put_u16(&mut root, streams.len() as u16);

        let mut offset = header_len;
        for (name, data) in &streams {
            put_u32(&mut root, offset as u32);
            put_u32(&mut root, data.len() as u32);
            root.extend_from_slice(name.as_bytes());
            root.push(0);
            pad4(&mut root);
            offset += data.len();
        }
        assert_eq!(root.len(), header_len);

        for (_, data) in &streams {
            root.extend_from_slice(data);
        }
        root
    }
}

/// PE32 image with one `.text` section at [`TEXT_RVA`] holding `text`
fn pe_image(text: &[u8], com_descriptor: Option<(u32, u32)>) -> Vec<u8> {
    let raw_size = (text.len() + FILE_ALIGNMENT - 1) / FILE_ALIGNMENT * FILE_ALIGNMENT;
    let mut image = vec![0u8; FILE_ALIGNMENT + raw_size];

    write_at(&mut image, 0, b"MZ");
    write_at(&mut image, 0x3C, &0x80u32.to_le_bytes());
    write_at(&mut image, 0x80, b"PE\0\0");

    let coff = 0x84;
    write_at(&mut image, coff, &0x014Cu16.to_le_bytes());
    write_at(&mut image, coff + 2, &1u16.to_le_bytes());
    write_at(&mut image, coff + 16, &0xE0u16.to_le_bytes());
    write_at(&mut image, coff + 18, &0x2102u16.to_le_bytes());

    let opt = coff + 20;
    write_at(&mut image, opt, &0x10Bu16.to_le_bytes());
    write_at(&mut image, opt + 28, &IMAGE_BASE.to_le_bytes());
    write_at(&mut image, opt + 32, &0x2000u32.to_le_bytes());
    write_at(&mut image, opt + 36, &(FILE_ALIGNMENT as u32).to_le_bytes());
    write_at(&mut image, opt + 56, &(TEXT_RVA + raw_size as u32).to_le_bytes());
    write_at(&mut image, opt + 60, &(FILE_ALIGNMENT as u32).to_le_bytes());
    write_at(&mut image, opt + 68, &3u16.to_le_bytes());
    write_at(&mut image, opt + 92, &16u32.to_le_bytes());
    if let Some((rva, size)) = com_descriptor {
        let dir = opt + 96 + 14 * 8;
        write_at(&mut image, dir, &rva.to_le_bytes());
        write_at(&mut image, dir + 4, &size.to_le_bytes());
    }

    let section = opt + 0xE0;
    write_at(&mut image, section, b".text\0\0\0");
    write_at(&mut image, section + 8, &(text.len() as u32).to_le_bytes());
    write_at(&mut image, section + 12, &TEXT_RVA.to_le_bytes());
    write_at(&mut image, section + 16, &(raw_size as u32).to_le_bytes());
    write_at(&mut image, section + 20, &(FILE_ALIGNMENT as u32).to_le_bytes());
    write_at(&mut image, section + 36, &0x6000_0020u32.to_le_bytes());

    write_at(&mut image, FILE_ALIGNMENT, text);
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use rimgen_binary_parser::{BinaryFile, BinaryReader};

    #[test]
    fn test_compress_matches_reader() {
        for value in [0u32, 0x7F, 0x80, 0x2E57, 0x3FFF, 0x4000, 0x1FFF_FFFF] {
            let bytes = compress(value);
            let mut reader = BinaryReader::new(&bytes);
            assert_eq!(reader.read_compressed_u32().unwrap(), value);
        }
    }

    #[test]
    fn test_built_image_is_parseable_pe() {
        let image = ImageBuilder::new("Sample").build();
        let binary = rimgen_binary_parser::parse_binary(&image).unwrap();
        assert!(rimgen_binary_parser::pe::cli_header(binary.as_ref()).unwrap().is_some());
        assert_eq!(binary.read_rva(TEXT_RVA, 4).unwrap(), &CLI_HEADER_SIZE.to_le_bytes());
    }
}
