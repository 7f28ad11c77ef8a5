//! Metadata archive entry header
//!
//! The archive is a plain concatenation of entries with no index, padding or
//! checksum:
//!
//! ```text
//! [path: 256 bytes, NUL-padded][size: u64][payload: size bytes]
//! [path: 256 bytes, NUL-padded][size: u64][payload: size bytes]
//! ...
//! ```

use crate::error::{FormatError, Result};
use crate::name::{encode_fixed, fixed_field};
use crate::{FixedLayout, read_fixed, write_fixed};
use binrw::{BinRead, BinWrite};

/// Capacity of the NUL-padded path field
pub const META_PATH_CAPACITY: usize = 256;

/// Encoded size of [`MetaEntryHeader`]
pub const META_ENTRY_HEADER_SIZE: usize = META_PATH_CAPACITY + 8;

/// Owned metadata entry header, used when building an archive
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct MetaEntryHeader {
    /// NUL-padded path
    pub path: [u8; META_PATH_CAPACITY],
    /// Payload size in bytes
    pub size: u64,
}

impl MetaEntryHeader {
    /// Create a header for `path`
    ///
    /// The path must leave room for a terminating NUL and must not contain
    /// one itself.
    pub fn new(path: &str, size: u64) -> Result<Self> {
        validate_meta_path(path)?;
        Ok(Self {
            path: encode_fixed(path),
            size,
        })
    }

    /// Path bytes up to the first NUL
    pub fn path_bytes(&self) -> &[u8] {
        fixed_field(&self.path)
    }
}

impl FixedLayout for MetaEntryHeader {
    const SIZE: usize = META_ENTRY_HEADER_SIZE;

    fn parse(data: &[u8]) -> Result<Self> {
        read_fixed(data, Self::SIZE)
    }

    fn build(&self) -> Result<Vec<u8>> {
        write_fixed(self, Self::SIZE)
    }
}

pub(crate) fn validate_meta_path(path: &str) -> Result<()> {
    if path.is_empty() || path.as_bytes().contains(&0) {
        return Err(FormatError::InvalidName(path.to_string()));
    }
    if path.len() >= META_PATH_CAPACITY {
        return Err(FormatError::NameTooLong {
            len: path.len(),
            max: META_PATH_CAPACITY - 1,
        });
    }
    Ok(())
}

/// Borrowed view of an entry header in place
///
/// Reading an archive never copies the 256-byte path field; lookups compare
/// against it where it lies in the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaEntryView<'a> {
    path: &'a [u8],
    size: u64,
}

impl<'a> MetaEntryView<'a> {
    /// View the header at the front of `data`
    ///
    /// Returns [`FormatError::Truncated`] if fewer than
    /// [`META_ENTRY_HEADER_SIZE`] bytes are available.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self> {
        let header = data
            .get(..META_ENTRY_HEADER_SIZE)
            .ok_or(FormatError::Truncated {
                expected: META_ENTRY_HEADER_SIZE,
                actual: data.len(),
            })?;
        let (path, size) = header.split_at(META_PATH_CAPACITY);
        let mut size_bytes = [0u8; 8];
        size_bytes.copy_from_slice(size);
        Ok(Self {
            path: fixed_field(path),
            size: u64::from_le_bytes(size_bytes),
        })
    }

    /// Path bytes up to the first NUL, at most [`META_PATH_CAPACITY`]
    pub fn path_bytes(&self) -> &'a [u8] {
        self.path
    }

    /// Path as UTF-8, `None` if the bytes are not valid UTF-8
    pub fn path(&self) -> Option<&'a str> {
        std::str::from_utf8(self.path).ok()
    }

    /// Payload size declared by the header
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the path equals `name`
    ///
    /// Names longer than the path capacity never match.
    pub fn matches(&self, name: &str) -> bool {
        self.path == name.as_bytes()
    }
}
