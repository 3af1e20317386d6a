//! Error types for rimgen

use thiserror::Error;

/// Errors raised while loading assemblies or generating output
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid magic number: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },

    /// The file is a native image or not a PE image at all
    #[error("Not a managed assembly: {0}")]
    NotManaged(String),

    /// A type name could not be found in any loaded assembly
    #[error("Unresolved type: {0}")]
    Unresolved(String),

    /// A field or type signature blob could not be decoded
    #[error("Bad signature: {0}")]
    BadSignature(String),

    #[error("Row {row} out of range for table {table}")]
    RowOutOfRange { table: &'static str, row: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unresolved(name: impl Into<String>) -> Self {
        Self::Unresolved(name.into())
    }

    pub fn bad_signature(msg: impl Into<String>) -> Self {
        Self::BadSignature(msg.into())
    }

    /// Whether this error only affects the item being read, not the whole assembly
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unresolved(_) | Self::BadSignature(_))
    }
}
