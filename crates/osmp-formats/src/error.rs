//! Error types for OSMP image parsing and building

use thiserror::Error;

/// Result type for format operations
pub type Result<T> = std::result::Result<T, FormatError>;

/// Errors that can occur when parsing or building OSMP structures
#[derive(Debug, Error)]
pub enum FormatError {
    /// Magic bytes did not match exactly
    #[error("invalid magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        /// Expected magic bytes
        expected: [u8; 8],
        /// Magic bytes found
        actual: [u8; 8],
    },

    /// Format version is not the single supported version
    #[error("unsupported version: expected 0x{expected:08X}, got 0x{actual:08X}")]
    UnsupportedVersion {
        /// Supported version
        expected: u32,
        /// Version found
        actual: u32,
    },

    /// Data is too short for the structure being parsed
    #[error("truncated data: expected {expected} bytes, got {actual} bytes")]
    Truncated {
        /// Required size
        expected: usize,
        /// Available size
        actual: usize,
    },

    /// Name does not fit its fixed capacity
    #[error("name too long: {len} bytes, at most {max} allowed")]
    NameTooLong {
        /// Length of the offending name
        len: usize,
        /// Maximum length allowed
        max: usize,
    },

    /// Name is empty or contains a NUL byte
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Offset or size arithmetic overflowed while laying out an image
    #[error("layout overflow: {0}")]
    LayoutOverflow(&'static str),

    /// Binary read/write error
    #[error("binary format error: {0}")]
    BinRw(#[from] binrw::Error),

    /// Manifest JSON error
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error while writing an image
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
