//! The `#~` table stream: schema, row sizes and raw row access

use crate::types::{heap_sizes, CodedIndex, CodedToken, TableId, TABLE_COUNT};
use byteorder::{LittleEndian, ReadBytesExt};
use rimgen_core::{Error, Result};
use std::io::Cursor;
use tracing::debug;

/// Column kinds of a metadata table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Index(TableId),
    Coded(CodedIndex),
}

/// Column layout of every table (II.22)
pub fn schema(table: TableId) -> &'static [Column] {
    use CodedIndex as C;
    use Column::*;
    use TableId as T;

    match table {
        T::Module => &[U16, Str, Guid, Guid, Guid],
        T::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
        T::TypeDef => &[U32, Str, Str, Coded(C::TypeDefOrRef), Index(T::Field), Index(T::MethodDef)],
        T::FieldPtr => &[Index(T::Field)],
        T::Field => &[U16, Str, Blob],
        T::MethodPtr => &[Index(T::MethodDef)],
        T::MethodDef => &[U32, U16, U16, Str, Blob, Index(T::Param)],
        T::ParamPtr => &[Index(T::Param)],
        T::Param => &[U16, U16, Str],
        T::InterfaceImpl => &[Index(T::TypeDef), Coded(C::TypeDefOrRef)],
        T::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
        // Type is one byte plus one byte of padding
        T::Constant => &[U16, Coded(C::HasConstant), Blob],
        T::CustomAttribute => &[Coded(C::HasCustomAttribute), Coded(C::CustomAttributeType), Blob],
        T::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
        T::DeclSecurity => &[U16, Coded(C::HasDeclSecurity), Blob],
        T::ClassLayout => &[U16, U32, Index(T::TypeDef)],
        T::FieldLayout => &[U32, Index(T::Field)],
        T::StandAloneSig => &[Blob],
        T::EventMap => &[Index(T::TypeDef), Index(T::Event)],
        T::EventPtr => &[Index(T::Event)],
        T::Event => &[U16, Str, Coded(C::TypeDefOrRef)],
        T::PropertyMap => &[Index(T::TypeDef), Index(T::Property)],
        T::PropertyPtr => &[Index(T::Property)],
        T::Property => &[U16, Str, Blob],
        T::MethodSemantics => &[U16, Index(T::MethodDef), Coded(C::HasSemantics)],
        T::MethodImpl => &[Index(T::TypeDef), Coded(C::MethodDefOrRef), Coded(C::MethodDefOrRef)],
        T::ModuleRef => &[Str],
        T::TypeSpec => &[Blob],
        T::ImplMap => &[U16, Coded(C::MemberForwarded), Str, Index(T::ModuleRef)],
        T::FieldRva => &[U32, Index(T::Field)],
        T::EncLog => &[U32, U32],
        T::EncMap => &[U32],
        T::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        T::AssemblyProcessor => &[U32],
        T::AssemblyOs => &[U32, U32, U32],
        T::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        T::AssemblyRefProcessor => &[U32, Index(T::AssemblyRef)],
        T::AssemblyRefOs => &[U32, U32, U32, Index(T::AssemblyRef)],
        T::File => &[U32, Str, Blob],
        T::ExportedType => &[U32, U32, Str, Str, Coded(C::Implementation)],
        T::ManifestResource => &[U32, U32, Str, Coded(C::Implementation)],
        T::NestedClass => &[Index(T::TypeDef), Index(T::TypeDef)],
        T::GenericParam => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
        T::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
        T::GenericParamConstraint => &[Index(T::GenericParam), Coded(C::TypeDefOrRef)],
    }
}

/// Row counts plus heap widths; everything needed to size a row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub heap_sizes: u8,
    pub row_counts: [u32; TABLE_COUNT],
}

impl TableLayout {
    pub fn new(heap_sizes: u8, row_counts: [u32; TABLE_COUNT]) -> Self {
        Self {
            heap_sizes,
            row_counts,
        }
    }

    pub fn rows(&self, table: TableId) -> u32 {
        self.row_counts[table.index()]
    }

    fn heap_index_size(&self, flag: u8) -> usize {
        if self.heap_sizes & flag != 0 {
            4
        } else {
            2
        }
    }

    pub fn column_size(&self, column: Column) -> usize {
        match column {
            Column::U16 => 2,
            Column::U32 => 4,
            Column::Str => self.heap_index_size(heap_sizes::WIDE_STRINGS),
            Column::Guid => self.heap_index_size(heap_sizes::WIDE_GUID),
            Column::Blob => self.heap_index_size(heap_sizes::WIDE_BLOB),
            Column::Index(table) => {
                if self.rows(table) > 0xFFFF {
                    4
                } else {
                    2
                }
            }
            Column::Coded(kind) => {
                let max_rows = kind
                    .tables()
                    .iter()
                    .flatten()
                    .map(|t| self.rows(*t))
                    .max()
                    .unwrap_or(0);
                if max_rows < (1u32 << (16 - kind.tag_bits())) {
                    2
                } else {
                    4
                }
            }
        }
    }

    pub fn row_size(&self, table: TableId) -> usize {
        schema(table).iter().map(|c| self.column_size(*c)).sum()
    }

    /// Split a raw coded index value into table and row
    pub fn decode_coded(&self, kind: CodedIndex, raw: u32) -> Result<CodedToken> {
        let bits = kind.tag_bits();
        let tag = (raw & ((1 << bits) - 1)) as usize;
        let table = kind
            .tables()
            .get(tag)
            .copied()
            .flatten()
            .ok_or_else(|| Error::invalid_format(format!("Invalid {:?} tag {}", kind, tag)))?;

        Ok(CodedToken::new(table, raw >> bits))
    }
}

/// Parsed table stream header with the offset of each table
#[derive(Debug, Clone)]
pub struct TableStream {
    pub major_version: u8,
    pub minor_version: u8,
    pub layout: TableLayout,
    /// Absolute offsets (into the metadata buffer) of each table's first row
    offsets: [usize; TABLE_COUNT],
}

impl TableStream {
    /// Parse the stream header at `offset` within `data`
    pub fn parse(data: &[u8], offset: usize, size: usize) -> Result<Self> {
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| Error::invalid_format("Table stream exceeds metadata"))?;

        let mut cursor = Cursor::new(&data[offset..end]);

        let _reserved = cursor.read_u32::<LittleEndian>()?;
        let major_version = cursor.read_u8()?;
        let minor_version = cursor.read_u8()?;
        let heap_flags = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let valid = cursor.read_u64::<LittleEndian>()?;
        let _sorted = cursor.read_u64::<LittleEndian>()?;

        let mut row_counts = [0u32; TABLE_COUNT];
        for bit in 0..64 {
            if valid & (1u64 << bit) == 0 {
                continue;
            }
            if bit >= TABLE_COUNT {
                return Err(Error::invalid_format(format!(
                    "Unsupported metadata table {:#04x}",
                    bit
                )));
            }
            row_counts[bit] = cursor.read_u32::<LittleEndian>()?;
        }

        if heap_flags & heap_sizes::EXTRA_DATA != 0 {
            let _extra = cursor.read_u32::<LittleEndian>()?;
        }

        let layout = TableLayout::new(heap_flags, row_counts);

        let mut offsets = [0usize; TABLE_COUNT];
        let mut position = offset + cursor.position() as usize;
        for table in TableId::ALL {
            offsets[table.index()] = position;
            position += layout.row_size(table) * layout.rows(table) as usize;
        }

        if position > end {
            return Err(Error::invalid_format(format!(
                "Table data needs {} bytes, stream has {}",
                position - offset,
                size
            )));
        }

        debug!(
            "Table stream v{}.{}: {} types, {} fields",
            major_version,
            minor_version,
            layout.rows(TableId::TypeDef),
            layout.rows(TableId::Field)
        );

        Ok(Self {
            major_version,
            minor_version,
            layout,
            offsets,
        })
    }

    pub fn rows(&self, table: TableId) -> u32 {
        self.layout.rows(table)
    }

    /// Read the raw column values of a 1-based row
    pub fn read_row(&self, data: &[u8], table: TableId, row: u32) -> Result<Vec<u32>> {
        if row == 0 || row > self.rows(table) {
            return Err(Error::RowOutOfRange {
                table: table.name(),
                row,
            });
        }

        let row_size = self.layout.row_size(table);
        let start = self.offsets[table.index()] + (row as usize - 1) * row_size;
        let mut cursor = Cursor::new(&data[start..start + row_size]);

        schema(table)
            .iter()
            .map(|column| -> Result<u32> {
                let value = match self.layout.column_size(*column) {
                    2 => cursor.read_u16::<LittleEndian>()? as u32,
                    _ => cursor.read_u32::<LittleEndian>()?,
                };
                Ok(value)
            })
            .collect()
    }

    pub fn decode_coded(&self, kind: CodedIndex, raw: u32) -> Result<CodedToken> {
        self.layout.decode_coded(kind, raw)
    }
}
