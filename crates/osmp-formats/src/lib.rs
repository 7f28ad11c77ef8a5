//! Binary layout, parsers and builder for OSMP sample container images
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::return_self_not_must_use)] // Builder patterns
//! An OSMP image is a single file holding two partitions: a metadata archive
//! of small named files and an InstFS partition holding instrument sample
//! data. This crate describes that layout and nothing else; mounting and
//! reading live in `osmp-instfs`.
//!
//! # Layout
//!
//! ```text
//! offset 0        MasterHeader (80 bytes)   "OSMP_IMG", partition descriptors
//! meta_offset     MetaEntryHeader + payload, repeated, no index
//! instfs_offset   InstfsHeader (56 bytes)   "INSTFS\0\0", version 0x00010000
//!                 InstrumentEntry x N (56 bytes each) at instrument_table_offset
//!                 NUL-terminated names, instrument data
//! ```
//!
//! All integers are little-endian. Padding that a C compiler would insert is
//! spelled out explicitly, so the sizes above are exact on every platform.
//!
//! # Usage
//!
//! ```rust
//! use osmp_formats::{FixedLayout, ImageBuilder, InstrumentSpec, MasterHeader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let image = ImageBuilder::new()
//!     .add_meta_file("readme.txt", b"hello".to_vec())
//!     .add_instrument(InstrumentSpec::new("kick", vec![0u8; 1000]))
//!     .build()?;
//!
//! let header = MasterHeader::parse(&image)?;
//! header.validate()?;
//! assert_eq!(header.meta_offset, 80);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod builder;
pub mod container;
pub mod error;
pub mod manifest;
pub mod meta;
pub mod name;
pub mod table;

pub use builder::{ImageBuilder, InstrumentSpec};
pub use container::{MASTER_HEADER_SIZE, MasterHeader, OSMP_MAGIC, OSMP_VERSION};
pub use error::{FormatError, Result};
pub use manifest::{AmpEnvelope, INSTRUMENT_MANIFEST_NAME, InstrumentManifest, Region};
pub use meta::{META_ENTRY_HEADER_SIZE, META_PATH_CAPACITY, MetaEntryHeader, MetaEntryView};
pub use table::{
    INSTFS_HEADER_SIZE, INSTFS_MAGIC, INSTFS_MAX_NAME, INSTFS_VERSION, INSTRUMENT_ENTRY_SIZE,
    InstfsHeader, InstrumentEntry,
};

use binrw::{BinRead, BinWrite};
use std::io::Cursor;

/// Fixed-size on-disk structure with symmetric parse and build
///
/// Every header and entry in an OSMP image has a size known ahead of time.
/// `parse` reads exactly [`FixedLayout::SIZE`] bytes from the front of
/// `data` and ignores the rest; a shorter slice is
/// [`FormatError::Truncated`]. Parsing never validates magic or version;
/// callers do that explicitly so they can tell the failures apart.
pub trait FixedLayout: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Parse from the first `SIZE` bytes of `data`
    fn parse(data: &[u8]) -> Result<Self>;

    /// Encode to exactly `SIZE` bytes
    fn build(&self) -> Result<Vec<u8>>;
}

pub(crate) fn read_fixed<T>(data: &[u8], size: usize) -> Result<T>
where
    T: for<'a> BinRead<Args<'a> = ()>,
{
    let raw = data.get(..size).ok_or(FormatError::Truncated {
        expected: size,
        actual: data.len(),
    })?;
    Ok(T::read_le_args(&mut Cursor::new(raw), ())?)
}

pub(crate) fn write_fixed<T>(value: &T, size: usize) -> Result<Vec<u8>>
where
    T: for<'a> BinWrite<Args<'a> = ()>,
{
    let mut cursor = Cursor::new(Vec::with_capacity(size));
    value.write_le_args(&mut cursor, ())?;
    let bytes = cursor.into_inner();
    debug_assert_eq!(bytes.len(), size);
    Ok(bytes)
}
