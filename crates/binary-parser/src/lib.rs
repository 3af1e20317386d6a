//! Binary format parsers for managed assembly analysis
//!
//! Only PE images are supported; that is the container every .NET assembly
//! ships in.

pub mod pe;
pub mod common;
pub mod error;

pub use common::{BinaryFile, BinaryReader, DataDirectory, Section};
pub use pe::{cli_header, CliHeader, CorFlags, PeFile};
pub use error::{ParseError, ParseResult};

use rimgen_core::BinaryFormat;

/// Detect binary format from magic bytes
pub fn detect_format(data: &[u8]) -> Option<BinaryFormat> {
    if data.len() < 4 {
        return None;
    }

    // PE: MZ header
    if &data[0..2] == b"MZ" {
        return Some(BinaryFormat::PE);
    }

    None
}

/// Parse binary data
pub fn parse_binary(data: &[u8]) -> ParseResult<Box<dyn BinaryFile>> {
    match detect_format(data) {
        Some(BinaryFormat::PE) => {
            let pe = pe::PeFile::parse(data)?;
            Ok(Box::new(pe))
        }
        None => Err(ParseError::UnknownFormat),
    }
}
