//! Error types for Variant encoding and decoding

use thiserror::Error;

/// Errors raised while encoding a value
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// NaN and infinities have no binary representation
    #[error("non-finite float cannot be encoded")]
    NonFinite,

    /// Date outside the representable millisecond range
    #[error("date out of range: {ms} ms")]
    InvalidDate { ms: i64 },
}

/// Errors raised while decoding bytes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// First byte is not the Variant magic
    #[error("wrong magic byte: expected 0x56, got {0:#04x}")]
    WrongMagic(u8),

    /// Version byte is not one this build understands
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    /// Input ended before the value was complete
    #[error("truncated input")]
    Truncated,

    /// Type tag outside the known set
    #[error("unknown type tag {0:#04x}")]
    UnknownTag(u8),

    /// Bytes left over after the value was fully decoded
    #[error("trailing bytes after value")]
    TrailingBytes,

    /// String or object key was not valid UTF-8
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    /// Structurally valid but semantically impossible content
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
}

/// Errors raised by shred/merge
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShredError {
    #[error("shredding requires an object value")]
    NotAnObject,
}
