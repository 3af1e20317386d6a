//! ECMA-335 structure definitions
//!
//! These structures mirror the physical metadata layout described in
//! ECMA-335 partition II.

use serde::{Deserialize, Serialize};

/// Metadata root signature ("BSJB")
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// Name of the pseudo type holding module-level members
pub const MODULE_TYPE_NAME: &str = "<Module>";

/// Stream names inside the metadata root
pub mod stream_names {
    pub const TABLES: &str = "#~";
    pub const TABLES_UNCOMPRESSED: &str = "#-";
    pub const STRINGS: &str = "#Strings";
    pub const BLOB: &str = "#Blob";
    pub const GUID: &str = "#GUID";
    pub const USER_STRINGS: &str = "#US";
}

/// `HeapSizes` bits of the table stream header
pub mod heap_sizes {
    pub const WIDE_STRINGS: u8 = 0x01;
    pub const WIDE_GUID: u8 = 0x02;
    pub const WIDE_BLOB: u8 = 0x04;
    pub const EXTRA_DATA: u8 = 0x40;
}

/// Physical metadata tables, numbered as in II.22
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum TableId {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    FieldPtr = 0x03,
    Field = 0x04,
    MethodPtr = 0x05,
    MethodDef = 0x06,
    ParamPtr = 0x07,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0A,
    Constant = 0x0B,
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRva = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOs = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOs = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2A,
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
}

/// Number of table slots the reader understands
pub const TABLE_COUNT: usize = 0x2D;

impl TableId {
    pub const ALL: [TableId; TABLE_COUNT] = [
        TableId::Module,
        TableId::TypeRef,
        TableId::TypeDef,
        TableId::FieldPtr,
        TableId::Field,
        TableId::MethodPtr,
        TableId::MethodDef,
        TableId::ParamPtr,
        TableId::Param,
        TableId::InterfaceImpl,
        TableId::MemberRef,
        TableId::Constant,
        TableId::CustomAttribute,
        TableId::FieldMarshal,
        TableId::DeclSecurity,
        TableId::ClassLayout,
        TableId::FieldLayout,
        TableId::StandAloneSig,
        TableId::EventMap,
        TableId::EventPtr,
        TableId::Event,
        TableId::PropertyMap,
        TableId::PropertyPtr,
        TableId::Property,
        TableId::MethodSemantics,
        TableId::MethodImpl,
        TableId::ModuleRef,
        TableId::TypeSpec,
        TableId::ImplMap,
        TableId::FieldRva,
        TableId::EncLog,
        TableId::EncMap,
        TableId::Assembly,
        TableId::AssemblyProcessor,
        TableId::AssemblyOs,
        TableId::AssemblyRef,
        TableId::AssemblyRefProcessor,
        TableId::AssemblyRefOs,
        TableId::File,
        TableId::ExportedType,
        TableId::ManifestResource,
        TableId::NestedClass,
        TableId::GenericParam,
        TableId::MethodSpec,
        TableId::GenericParamConstraint,
    ];

    pub fn from_index(index: usize) -> Option<TableId> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TableId::Module => "Module",
            TableId::TypeRef => "TypeRef",
            TableId::TypeDef => "TypeDef",
            TableId::FieldPtr => "FieldPtr",
            TableId::Field => "Field",
            TableId::MethodPtr => "MethodPtr",
            TableId::MethodDef => "MethodDef",
            TableId::ParamPtr => "ParamPtr",
            TableId::Param => "Param",
            TableId::InterfaceImpl => "InterfaceImpl",
            TableId::MemberRef => "MemberRef",
            TableId::Constant => "Constant",
            TableId::CustomAttribute => "CustomAttribute",
            TableId::FieldMarshal => "FieldMarshal",
            TableId::DeclSecurity => "DeclSecurity",
            TableId::ClassLayout => "ClassLayout",
            TableId::FieldLayout => "FieldLayout",
            TableId::StandAloneSig => "StandAloneSig",
            TableId::EventMap => "EventMap",
            TableId::EventPtr => "EventPtr",
            TableId::Event => "Event",
            TableId::PropertyMap => "PropertyMap",
            TableId::PropertyPtr => "PropertyPtr",
            TableId::Property => "Property",
            TableId::MethodSemantics => "MethodSemantics",
            TableId::MethodImpl => "MethodImpl",
            TableId::ModuleRef => "ModuleRef",
            TableId::TypeSpec => "TypeSpec",
            TableId::ImplMap => "ImplMap",
            TableId::FieldRva => "FieldRVA",
            TableId::EncLog => "EncLog",
            TableId::EncMap => "EncMap",
            TableId::Assembly => "Assembly",
            TableId::AssemblyProcessor => "AssemblyProcessor",
            TableId::AssemblyOs => "AssemblyOS",
            TableId::AssemblyRef => "AssemblyRef",
            TableId::AssemblyRefProcessor => "AssemblyRefProcessor",
            TableId::AssemblyRefOs => "AssemblyRefOS",
            TableId::File => "File",
            TableId::ExportedType => "ExportedType",
            TableId::ManifestResource => "ManifestResource",
            TableId::NestedClass => "NestedClass",
            TableId::GenericParam => "GenericParam",
            TableId::MethodSpec => "MethodSpec",
            TableId::GenericParamConstraint => "GenericParamConstraint",
        }
    }
}

/// Coded index kinds (II.24.2.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedIndex {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndex {
    /// Tables addressed by each tag value; `None` marks an unused tag
    pub fn tables(self) -> &'static [Option<TableId>] {
        use TableId::*;
        match self {
            CodedIndex::TypeDefOrRef => &[Some(TypeDef), Some(TypeRef), Some(TypeSpec)],
            CodedIndex::HasConstant => &[Some(Field), Some(Param), Some(Property)],
            CodedIndex::HasCustomAttribute => &[
                Some(MethodDef),
                Some(Field),
                Some(TypeRef),
                Some(TypeDef),
                Some(Param),
                Some(InterfaceImpl),
                Some(MemberRef),
                Some(Module),
                Some(DeclSecurity),
                Some(Property),
                Some(Event),
                Some(StandAloneSig),
                Some(ModuleRef),
                Some(TypeSpec),
                Some(Assembly),
                Some(AssemblyRef),
                Some(File),
                Some(ExportedType),
                Some(ManifestResource),
                Some(GenericParam),
                Some(GenericParamConstraint),
                Some(MethodSpec),
            ],
            CodedIndex::HasFieldMarshal => &[Some(Field), Some(Param)],
            CodedIndex::HasDeclSecurity => &[Some(TypeDef), Some(MethodDef), Some(Assembly)],
            CodedIndex::MemberRefParent => &[
                Some(TypeDef),
                Some(TypeRef),
                Some(ModuleRef),
                Some(MethodDef),
                Some(TypeSpec),
            ],
            CodedIndex::HasSemantics => &[Some(Event), Some(Property)],
            CodedIndex::MethodDefOrRef => &[Some(MethodDef), Some(MemberRef)],
            CodedIndex::MemberForwarded => &[Some(Field), Some(MethodDef)],
            CodedIndex::Implementation => &[Some(File), Some(AssemblyRef), Some(ExportedType)],
            CodedIndex::CustomAttributeType => {
                &[None, None, Some(MethodDef), Some(MemberRef), None]
            }
            CodedIndex::ResolutionScope => {
                &[Some(Module), Some(ModuleRef), Some(AssemblyRef), Some(TypeRef)]
            }
            CodedIndex::TypeOrMethodDef => &[Some(TypeDef), Some(MethodDef)],
        }
    }

    /// Number of low bits carrying the tag
    pub fn tag_bits(self) -> u32 {
        let count = self.tables().len() as u32;
        u32::BITS - (count - 1).leading_zeros()
    }

    /// Position of `table` among the tags, used when encoding
    pub fn tag_of(self, table: TableId) -> Option<u32> {
        self.tables()
            .iter()
            .position(|t| *t == Some(table))
            .map(|p| p as u32)
    }
}

/// A decoded coded index. Row 0 is the null reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodedToken {
    pub table: TableId,
    pub row: u32,
}

impl CodedToken {
    pub fn new(table: TableId, row: u32) -> Self {
        Self { table, row }
    }

    pub fn is_null(&self) -> bool {
        self.row == 0
    }
}

/// `TypeRef` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRefRow {
    pub resolution_scope: CodedToken,
    pub name: u32,
    pub namespace: u32,
}

/// `TypeDef` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDefRow {
    pub flags: u32,
    pub name: u32,
    pub namespace: u32,
    pub extends: CodedToken,
    pub field_list: u32,
    pub method_list: u32,
}

/// `Field` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRow {
    pub flags: u16,
    pub name: u32,
    pub signature: u32,
}

/// `MethodDef` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDefRow {
    pub flags: u16,
    pub name: u32,
    pub signature: u32,
}

/// `MemberRef` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRefRow {
    pub class: CodedToken,
    pub name: u32,
    pub signature: u32,
}

/// `CustomAttribute` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomAttributeRow {
    pub parent: CodedToken,
    pub constructor: CodedToken,
    pub value: u32,
}

/// `TypeSpec` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSpecRow {
    pub signature: u32,
}

/// `Assembly` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyRow {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
    pub flags: u32,
    pub name: u32,
    pub culture: u32,
}

/// `NestedClass` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestedClassRow {
    pub nested: u32,
    pub enclosing: u32,
}

/// `GenericParam` row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericParamRow {
    pub number: u16,
    pub flags: u16,
    pub owner: CodedToken,
    pub name: u32,
}

/// Type attributes (II.23.1.15)
pub mod type_attributes {
    pub const VISIBILITY_MASK: u32 = 0x00000007;
    pub const NOT_PUBLIC: u32 = 0x00000000;
    pub const PUBLIC: u32 = 0x00000001;
    pub const NESTED_PUBLIC: u32 = 0x00000002;

    pub const CLASS_SEMANTIC_MASK: u32 = 0x00000020;
    pub const INTERFACE: u32 = 0x00000020;

    pub const ABSTRACT: u32 = 0x00000080;
    pub const SEALED: u32 = 0x00000100;
}

/// Field attributes (II.23.1.5)
pub mod field_attributes {
    pub const FIELD_ACCESS_MASK: u16 = 0x0007;
    pub const COMPILER_CONTROLLED: u16 = 0x0000;
    pub const PRIVATE: u16 = 0x0001;
    pub const FAM_AND_ASSEM: u16 = 0x0002;
    pub const ASSEMBLY: u16 = 0x0003;
    pub const FAMILY: u16 = 0x0004;
    pub const FAM_OR_ASSEM: u16 = 0x0005;
    pub const PUBLIC: u16 = 0x0006;

    pub const STATIC: u16 = 0x0010;
    pub const INIT_ONLY: u16 = 0x0020;
    pub const LITERAL: u16 = 0x0040;
}

/// Signature element types (II.23.1.16)
pub mod element_type {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R4: u8 = 0x0C;
    pub const R8: u8 = 0x0D;
    pub const STRING: u8 = 0x0E;
    pub const PTR: u8 = 0x0F;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1B;
    pub const OBJECT: u8 = 0x1C;
    pub const SZARRAY: u8 = 0x1D;
    pub const MVAR: u8 = 0x1E;
    pub const CMOD_REQD: u8 = 0x1F;
    pub const CMOD_OPT: u8 = 0x20;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;

    /// Calling convention byte opening a field signature
    pub const FIELD_SIG: u8 = 0x06;
}
