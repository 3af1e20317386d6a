//! Errors raised while reading PE images

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown binary format")]
    UnknownFormat,

    #[error("Invalid magic number: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("RVA {0:#x} is not backed by file data")]
    RvaOutOfRange(u32),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Truncated data: expected {expected} bytes, got {actual}")]
    TruncatedData { expected: usize, actual: usize },
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

impl ParseError {
    pub fn invalid_header(msg: impl Into<String>) -> Self {
        Self::InvalidHeader(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn truncated(expected: usize, actual: usize) -> Self {
        Self::TruncatedData { expected, actual }
    }
}

impl From<ParseError> for rimgen_core::Error {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Io(e) => rimgen_core::Error::Io(e),
            ParseError::InvalidMagic { expected, actual } => {
                rimgen_core::Error::InvalidMagic { expected, actual }
            }
            ParseError::InvalidHeader(msg) => rimgen_core::Error::InvalidFormat(msg),
            other => rimgen_core::Error::parse(other.to_string()),
        }
    }
}
