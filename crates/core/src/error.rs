//! Error types for the addendum save engine.

use thiserror::Error;

/// Primary error type for parsing, resolving and saving PDF documents.
#[derive(Error, Debug)]
pub enum PdfError {
    #[error("invalid token at position {pos}: {msg}")]
    TokenError { pos: usize, msg: String },

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("type error: expected {expected}, got {got}")]
    TypeError {
        expected: &'static str,
        got: &'static str,
    },

    #[error("key not found: {0}")]
    KeyError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF object not found: {0}")]
    ObjectNotFound(u32),

    #[error("no valid xref table found")]
    NoValidXRef,

    #[error("PDF syntax error: {0}")]
    SyntaxError(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The byte range `[begin, end)` of the underlying file is not resident yet.
    #[error("missing data in range [{begin}, {end})")]
    MissingData { begin: usize, end: usize },

    #[error("range source failure: {0}")]
    Transport(String),

    #[error("malformed structure: {0}")]
    Structure(String),

    #[error("XFA error: {0}")]
    Xfa(String),

    #[error("invalid edit data: {0}")]
    Edit(#[from] serde_json::Error),
}

impl PdfError {
    /// Whether the error only signals bytes that have not arrived yet.
    pub const fn is_missing_data(&self) -> bool {
        matches!(self, Self::MissingData { .. })
    }
}

/// Convenience Result type alias for PdfError.
pub type Result<T> = std::result::Result<T, PdfError>;
