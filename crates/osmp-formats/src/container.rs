//! Master header at offset 0 of every OSMP image
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 8    | Magic `OSMP_IMG` |
//! | 0x08   | 4    | Version |
//! | 0x0C   | 4    | Padding (zero) |
//! | 0x10   | 8    | Metadata partition offset |
//! | 0x18   | 8    | Metadata partition size |
//! | 0x20   | 8    | InstFS partition offset |
//! | 0x28   | 8    | InstFS partition size |
//! | 0x30   | 32   | Reserved (4 x u64, zero) |

use crate::error::{FormatError, Result};
use crate::{FixedLayout, read_fixed, write_fixed};
use binrw::{BinRead, BinWrite};
use std::ops::Range;

/// Magic bytes at the start of every image
pub const OSMP_MAGIC: [u8; 8] = *b"OSMP_IMG";

/// Version written by [`crate::ImageBuilder`]
///
/// Readers record the version but do not check it; only the InstFS
/// partition carries an exact-match version.
pub const OSMP_VERSION: u32 = 1;

/// Encoded size of [`MasterHeader`]
pub const MASTER_HEADER_SIZE: usize = 80;

/// Container master header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct MasterHeader {
    /// Magic bytes: "OSMP_IMG"
    pub magic: [u8; 8],

    /// Container version
    #[brw(pad_after = 4)]
    pub version: u32,

    /// Metadata archive offset from the start of the file
    pub meta_offset: u64,

    /// Metadata archive size in bytes
    pub meta_size: u64,

    /// InstFS partition offset from the start of the file
    pub instfs_offset: u64,

    /// InstFS partition size in bytes
    pub instfs_size: u64,

    /// Reserved, zero
    pub reserved: [u64; 4],
}

impl MasterHeader {
    /// Create a header describing the two partitions
    pub fn new(meta_offset: u64, meta_size: u64, instfs_offset: u64, instfs_size: u64) -> Self {
        Self {
            magic: OSMP_MAGIC,
            version: OSMP_VERSION,
            meta_offset,
            meta_size,
            instfs_offset,
            instfs_size,
            reserved: [0; 4],
        }
    }

    /// Check the magic bytes
    pub fn validate(&self) -> Result<()> {
        if self.magic != OSMP_MAGIC {
            return Err(FormatError::InvalidMagic {
                expected: OSMP_MAGIC,
                actual: self.magic,
            });
        }
        Ok(())
    }

    /// Byte range of the metadata archive, `None` if `offset + size` overflows
    pub fn meta_range(&self) -> Option<Range<u64>> {
        checked_range(self.meta_offset, self.meta_size)
    }

    /// Byte range of the InstFS partition, `None` if `offset + size` overflows
    pub fn instfs_range(&self) -> Option<Range<u64>> {
        checked_range(self.instfs_offset, self.instfs_size)
    }
}

fn checked_range(offset: u64, size: u64) -> Option<Range<u64>> {
    offset.checked_add(size).map(|end| offset..end)
}

impl FixedLayout for MasterHeader {
    const SIZE: usize = MASTER_HEADER_SIZE;

    fn parse(data: &[u8]) -> Result<Self> {
        read_fixed(data, Self::SIZE)
    }

    fn build(&self) -> Result<Vec<u8>> {
        write_fixed(self, Self::SIZE)
    }
}
