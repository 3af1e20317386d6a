//! Image trait and little-endian reader shared by the parsers

use crate::{ParseError, ParseResult};

/// A parsed image whose contents are addressed by RVA
pub trait BinaryFile: Send + Sync {
    fn sections(&self) -> &[Section];

    fn find_section(&self, name: &str) -> Option<&Section> {
        self.sections().iter().find(|s| s.name == name)
    }

    /// Optional header data directory, `None` when absent or empty
    fn data_directory(&self, index: usize) -> Option<DataDirectory>;

    /// Raw file contents
    fn data(&self) -> &[u8];

    /// File offset backing a relative virtual address
    fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        self.sections()
            .iter()
            .find(|s| s.contains(rva))
            .and_then(|s| s.raw_offset.checked_add(rva - s.virtual_address))
            .map(|offset| offset as usize)
    }

    /// Read `size` bytes starting at `rva`
    fn read_rva(&self, rva: u32, size: usize) -> ParseResult<&[u8]> {
        let offset = self
            .rva_to_offset(rva)
            .ok_or(ParseError::RvaOutOfRange(rva))?;
        let end = offset
            .checked_add(size)
            .ok_or(ParseError::RvaOutOfRange(rva))?;

        self.data()
            .get(offset..end)
            .ok_or(ParseError::RvaOutOfRange(rva))
    }

    /// Read the data a directory entry points at
    fn read_directory(&self, directory: DataDirectory) -> ParseResult<&[u8]> {
        self.read_rva(directory.rva, directory.size as usize)
    }
}

/// Section header, addresses relative to the image base
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub raw_offset: u32,
    pub raw_size: u32,
}

impl Section {
    /// Mapped size; linkers sometimes leave the virtual size zero
    pub fn mapped_size(&self) -> u32 {
        if self.virtual_size == 0 {
            self.raw_size
        } else {
            self.virtual_size
        }
    }

    pub fn contains(&self, rva: u32) -> bool {
        rva >= self.virtual_address && rva - self.virtual_address < self.mapped_size()
    }
}

/// RVA and size pair from the optional header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub rva: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_empty(&self) -> bool {
        self.rva == 0 || self.size == 0
    }
}

/// Cursor over a byte slice. PE and ECMA-335 structures are little-endian.
pub struct BinaryReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn new_at(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take<const N: usize>(&mut self) -> ParseResult<[u8; N]> {
        let bytes = self
            .data
            .get(self.offset..self.offset + N)
            .ok_or_else(|| ParseError::truncated(N, self.remaining()))?;
        self.offset += N;

        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> ParseResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn peek_u8(&self) -> ParseResult<u8> {
        self.data
            .get(self.offset)
            .copied()
            .ok_or_else(|| ParseError::truncated(1, 0))
    }

    pub fn read_u16(&mut self) -> ParseResult<u16> {
        self.take().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> ParseResult<u32> {
        self.take().map(u32::from_le_bytes)
    }

    /// Read an ECMA-335 compressed unsigned integer (II.23.2)
    pub fn read_compressed_u32(&mut self) -> ParseResult<u32> {
        let first = self.read_u8()?;

        match first {
            b if b & 0x80 == 0 => Ok(b as u32),
            b if b & 0xC0 == 0x80 => {
                let second = self.read_u8()?;
                Ok((((b & 0x3F) as u32) << 8) | second as u32)
            }
            b if b & 0xE0 == 0xC0 => {
                let [x, y, z] = self.take::<3>()?;
                Ok((((b & 0x1F) as u32) << 24) | ((x as u32) << 16) | ((y as u32) << 8) | z as u32)
            }
            b => Err(ParseError::parse(format!(
                "Invalid compressed integer lead byte {:#04x}",
                b
            ))),
        }
    }

    pub fn read_bytes(&mut self, count: usize) -> ParseResult<&'a [u8]> {
        let bytes = self
            .data
            .get(self.offset..self.offset + count)
            .ok_or_else(|| ParseError::truncated(count, self.remaining()))?;
        self.offset += count;
        Ok(bytes)
    }

    /// Read a NUL-terminated string of at most `max_len` bytes
    pub fn read_cstring(&mut self, max_len: usize) -> ParseResult<String> {
        let window = &self.data[self.offset.min(self.data.len())..];
        let window = &window[..max_len.min(window.len())];
        let end = window
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ParseError::parse("Unterminated string"))?;

        let s = String::from_utf8_lossy(&window[..end]).into_owned();
        self.offset += end + 1;
        Ok(s)
    }

    /// Advance to the next multiple of `alignment`
    pub fn align(&mut self, alignment: usize) -> ParseResult<()> {
        let padding = (alignment - self.offset % alignment) % alignment;
        self.skip(padding)
    }

    pub fn skip(&mut self, count: usize) -> ParseResult<()> {
        if count > self.remaining() {
            return Err(ParseError::truncated(count, self.remaining()));
        }
        self.offset += count;
        Ok(())
    }
}
