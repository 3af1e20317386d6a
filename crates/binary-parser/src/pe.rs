//! PE image parser, limited to what is needed to reach CLI metadata

use crate::common::{BinaryFile, BinaryReader, DataDirectory, Section};
use crate::error::{ParseError, ParseResult};
use tracing::{debug, trace};

const DOS_MAGIC: u16 = 0x5A4D; // "MZ"
const PE_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const E_LFANEW_OFFSET: usize = 0x3C;

const PE32_MAGIC: u16 = 0x10B;
const PE32PLUS_MAGIC: u16 = 0x20B;

/// Offset of NumberOfRvaAndSizes inside the optional header
const PE32_RVA_COUNT_OFFSET: usize = 92;
const PE32PLUS_RVA_COUNT_OFFSET: usize = 108;

const MAX_DATA_DIRECTORIES: usize = 16;

/// Data directory slot holding the CLI header
pub const IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR: usize = 14;

/// Size of the CLI header (ECMA-335 II.25.3.3)
pub const CLI_HEADER_SIZE: u32 = 72;

bitflags::bitflags! {
    /// Runtime flags from the CLI header
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CorFlags: u32 {
        const IL_ONLY = 0x0000_0001;
        const REQUIRES_32BIT = 0x0000_0002;
        const STRONG_NAME_SIGNED = 0x0000_0008;
        const NATIVE_ENTRYPOINT = 0x0000_0010;
        const PREFERS_32BIT = 0x0002_0000;
    }
}

/// CLI header of a managed image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CliHeader {
    pub runtime_version: (u16, u16),
    /// Location of the metadata root
    pub metadata: DataDirectory,
    pub flags: CorFlags,
    pub entry_point_token: u32,
}

impl CliHeader {
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        let mut reader = BinaryReader::new(data);
        let cb = reader.read_u32()?;
        if cb < CLI_HEADER_SIZE {
            return Err(ParseError::invalid_header(format!("CLI header too small: {} bytes", cb)));
        }

        let major = reader.read_u16()?;
        let minor = reader.read_u16()?;
        let metadata = DataDirectory {
            rva: reader.read_u32()?,
            size: reader.read_u32()?,
        };
        let flags = CorFlags::from_bits_truncate(reader.read_u32()?);
        let entry_point_token = reader.read_u32()?;

        Ok(Self {
            runtime_version: (major, minor),
            metadata,
            flags,
            entry_point_token,
        })
    }
}

/// Parsed PE image
pub struct PeFile {
    data: Vec<u8>,
    machine: u16,
    is_pe32_plus: bool,
    sections: Vec<Section>,
    data_directories: Vec<DataDirectory>,
}

impl PeFile {
    /// Parse a PE file from raw bytes
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        let mut reader = BinaryReader::new(data);

        let dos_magic = reader.read_u16()?;
        if dos_magic != DOS_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: DOS_MAGIC as u32,
                actual: dos_magic as u32,
            });
        }

        reader.set_offset(E_LFANEW_OFFSET);
        let pe_offset = reader.read_u32()? as usize;
        reader.set_offset(pe_offset);
        let signature = reader.read_u32()?;
        if signature != PE_SIGNATURE {
            return Err(ParseError::InvalidMagic {
                expected: PE_SIGNATURE,
                actual: signature,
            });
        }

        // COFF file header
        let machine = reader.read_u16()?;
        let section_count = reader.read_u16()?;
        reader.skip(12)?; // TimeDateStamp, PointerToSymbolTable, NumberOfSymbols
        let optional_header_size = reader.read_u16()? as usize;
        reader.skip(2)?; // Characteristics

        let optional_header = reader.offset();
        let is_pe32_plus = match reader.read_u16()? {
            PE32_MAGIC => false,
            PE32PLUS_MAGIC => true,
            other => {
                return Err(ParseError::invalid_header(format!(
                    "Invalid optional header magic: {:#x}",
                    other
                )))
            }
        };

        let rva_count_offset = if is_pe32_plus {
            PE32PLUS_RVA_COUNT_OFFSET
        } else {
            PE32_RVA_COUNT_OFFSET
        };
        reader.set_offset(optional_header + rva_count_offset);
        let directory_count = (reader.read_u32()? as usize).min(MAX_DATA_DIRECTORIES);
        let mut data_directories = Vec::with_capacity(directory_count);
        for _ in 0..directory_count {
            data_directories.push(DataDirectory {
                rva: reader.read_u32()?,
                size: reader.read_u32()?,
            });
        }

        reader.set_offset(optional_header + optional_header_size);
        let mut sections = Vec::with_capacity(section_count as usize);
        for _ in 0..section_count {
            let name = String::from_utf8_lossy(reader.read_bytes(8)?)
                .trim_end_matches('\0')
                .to_string();
            let virtual_size = reader.read_u32()?;
            let virtual_address = reader.read_u32()?;
            let raw_size = reader.read_u32()?;
            let raw_offset = reader.read_u32()?;
            reader.skip(16)?; // relocations, line numbers, characteristics

            trace!("Section {} at RVA {:#x}", name, virtual_address);
            sections.push(Section {
                name,
                virtual_address,
                virtual_size,
                raw_offset,
                raw_size,
            });
        }

        debug!(
            "PE machine {:#06x}, {}, {} sections",
            machine,
            if is_pe32_plus { "PE32+" } else { "PE32" },
            sections.len()
        );

        Ok(Self {
            data: data.to_vec(),
            machine,
            is_pe32_plus,
            sections,
            data_directories,
        })
    }

    /// COFF machine type
    pub fn machine(&self) -> u16 {
        self.machine
    }

    pub fn is_pe32_plus(&self) -> bool {
        self.is_pe32_plus
    }
}

impl BinaryFile for PeFile {
    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn data_directory(&self, index: usize) -> Option<DataDirectory> {
        self.data_directories
            .get(index)
            .copied()
            .filter(|dir| !dir.is_empty())
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

/// CLI header of a managed image, `None` for a native image
pub fn cli_header(binary: &dyn BinaryFile) -> ParseResult<Option<CliHeader>> {
    let Some(directory) = binary.data_directory(IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR) else {
        return Ok(None);
    };
    if directory.size < CLI_HEADER_SIZE {
        return Err(ParseError::invalid_header(format!(
            "CLI header directory too small: {} bytes",
            directory.size
        )));
    }

    CliHeader::parse(binary.read_directory(directory)?).map(Some)
}
