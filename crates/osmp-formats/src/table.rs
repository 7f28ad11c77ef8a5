//! InstFS partition header and instrument table entries
//!
//! All offsets inside the partition are relative to the partition start:
//!
//! ```text
//! +0                         InstfsHeader (56 bytes)
//! +instrument_table_offset   InstrumentEntry x num_instruments (56 bytes each)
//! +name_offset               NUL-terminated name, at most INSTFS_MAX_NAME bytes
//! +data_offset               data_size bytes of sample data
//! ```

use crate::error::{FormatError, Result};
use crate::{FixedLayout, read_fixed, write_fixed};
use binrw::{BinRead, BinWrite};

/// Magic bytes at the start of the InstFS partition, compared over all 8 bytes
pub const INSTFS_MAGIC: [u8; 8] = *b"INSTFS\0\0";

/// The single supported InstFS version (1.0)
pub const INSTFS_VERSION: u32 = 0x0001_0000;

/// Maximum stored name length, including the terminating NUL
pub const INSTFS_MAX_NAME: usize = 256;

/// Encoded size of [`InstfsHeader`]
pub const INSTFS_HEADER_SIZE: usize = 56;

/// Encoded size of [`InstrumentEntry`]
pub const INSTRUMENT_ENTRY_SIZE: usize = 56;

/// InstFS partition header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct InstfsHeader {
    /// Magic bytes: "INSTFS\0\0"
    pub magic: [u8; 8],
    /// Format version, must equal [`INSTFS_VERSION`]
    pub version: u32,
    /// Number of entries in the instrument table
    pub num_instruments: u32,
    /// Table offset from the partition start
    pub instrument_table_offset: u64,
    /// Reserved, zero
    pub reserved: [u64; 4],
}

impl InstfsHeader {
    /// Create a header for a table of `num_instruments` entries
    pub fn new(num_instruments: u32, instrument_table_offset: u64) -> Self {
        Self {
            magic: INSTFS_MAGIC,
            version: INSTFS_VERSION,
            num_instruments,
            instrument_table_offset,
            reserved: [0; 4],
        }
    }

    /// Check magic and exact version
    pub fn validate(&self) -> Result<()> {
        if self.magic != INSTFS_MAGIC {
            return Err(FormatError::InvalidMagic {
                expected: INSTFS_MAGIC,
                actual: self.magic,
            });
        }
        if self.version != INSTFS_VERSION {
            return Err(FormatError::UnsupportedVersion {
                expected: INSTFS_VERSION,
                actual: self.version,
            });
        }
        Ok(())
    }

    /// End of the instrument table relative to the partition start
    ///
    /// `None` if `instrument_table_offset + num_instruments * 56` overflows.
    pub fn table_end(&self) -> Option<u64> {
        u64::from(self.num_instruments)
            .checked_mul(INSTRUMENT_ENTRY_SIZE as u64)
            .and_then(|len| self.instrument_table_offset.checked_add(len))
    }
}

impl FixedLayout for InstfsHeader {
    const SIZE: usize = INSTFS_HEADER_SIZE;

    fn parse(data: &[u8]) -> Result<Self> {
        read_fixed(data, Self::SIZE)
    }

    fn build(&self) -> Result<Vec<u8>> {
        write_fixed(self, Self::SIZE)
    }
}

/// One instrument table entry
///
/// Offsets and sizes come straight from the file and are untrusted until a
/// reader has checked them against the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct InstrumentEntry {
    /// Name offset from the partition start
    pub name_offset: u64,
    /// Data offset from the partition start
    pub data_offset: u64,
    /// Data size in bytes
    pub data_size: u64,
    /// Sample format tag
    pub format: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Bits per sample
    #[brw(pad_after = 4)]
    pub bit_depth: u16,
    /// Reserved, zero
    pub reserved: [u64; 2],
}

impl InstrumentEntry {
    /// End of the data range, `None` if `data_offset + data_size` overflows
    pub fn data_end(&self) -> Option<u64> {
        self.data_offset.checked_add(self.data_size)
    }

    /// Bytes per frame, `None` when the entry describes zero channels or a
    /// bit depth that is not a whole number of bytes
    pub fn frame_size(&self) -> Option<usize> {
        if self.channels == 0 || self.bit_depth == 0 || self.bit_depth % 8 != 0 {
            return None;
        }
        Some(usize::from(self.channels) * usize::from(self.bit_depth / 8))
    }
}

impl FixedLayout for InstrumentEntry {
    const SIZE: usize = INSTRUMENT_ENTRY_SIZE;

    fn parse(data: &[u8]) -> Result<Self> {
        read_fixed(data, Self::SIZE)
    }

    fn build(&self) -> Result<Vec<u8>> {
        write_fixed(self, Self::SIZE)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry() -> InstrumentEntry {
        InstrumentEntry {
            name_offset: 0x100,
            data_offset: 0x200,
            data_size: 1000,
            format: 1,
            sample_rate: 44100,
            channels: 2,
            bit_depth: 16,
            reserved: [0; 2],
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = InstfsHeader::new(3, 56).build().expect("build");

        assert_eq!(bytes.len(), INSTFS_HEADER_SIZE);
        assert_eq!(&bytes[0..8], b"INSTFS\0\0");
        assert_eq!(&bytes[8..12], &0x0001_0000u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &3u32.to_le_bytes());
        assert_eq!(&bytes[16..24], &56u64.to_le_bytes());
        assert!(bytes[24..56].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_entry_layout() {
        let bytes = entry().build().expect("build");

        assert_eq!(bytes.len(), INSTRUMENT_ENTRY_SIZE);
        assert_eq!(&bytes[0..8], &0x100u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &0x200u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &1000u64.to_le_bytes());
        assert_eq!(&bytes[24..28], &1u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &44100u32.to_le_bytes());
        assert_eq!(&bytes[32..34], &2u16.to_le_bytes());
        assert_eq!(&bytes[34..36], &16u16.to_le_bytes());
        assert!(bytes[36..56].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_entry_parse() {
        let bytes = entry().build().expect("build");
        assert_eq!(InstrumentEntry::parse(&bytes).expect("parse"), entry());
    }

    #[test]
    fn test_magic_compared_over_all_bytes() {
        let mut header = InstfsHeader::new(0, 56);
        header.magic = *b"INSTFS\0X";
        assert!(matches!(
            header.validate(),
            Err(FormatError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_version_must_match_exactly() {
        for version in [0x0001_0001, 0x0002_0000, 0] {
            let mut header = InstfsHeader::new(0, 56);
            header.version = version;
            assert!(matches!(
                header.validate(),
                Err(FormatError::UnsupportedVersion { actual, .. }) if actual == version
            ));
        }
    }

    #[test]
    fn test_table_end() {
        assert_eq!(InstfsHeader::new(3, 56).table_end(), Some(56 + 3 * 56));
        assert_eq!(InstfsHeader::new(u32::MAX, u64::MAX - 10).table_end(), None);
    }

    #[test]
    fn test_data_end_overflow() {
        let mut e = entry();
        e.data_offset = u64::MAX;
        e.data_size = 1;
        assert_eq!(e.data_end(), None);
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(entry().frame_size(), Some(4));
        let mut e = entry();
        e.bit_depth = 12;
        assert_eq!(e.frame_size(), None);
        e.bit_depth = 24;
        e.channels = 1;
        assert_eq!(e.frame_size(), Some(3));
    }
}
