//! Instrument table reader
//!
//! Entry offsets and sizes come from the file and are checked against the
//! partition before every access. A bad entry is reported as not found or
//! corrupt; it never turns into an out-of-range read.

use crate::container::{Container, Partition};
use crate::{InstfsError, Result};
use osmp_formats::name::nul_terminated;
use osmp_formats::{
    FixedLayout, INSTFS_MAX_NAME, INSTRUMENT_ENTRY_SIZE, InstfsHeader, InstrumentEntry,
};
use serde::Serialize;
use std::ops::Range;
use tracing::{debug, warn};

/// Description of one instrument's sample data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstrumentInfo {
    /// Sample format tag
    pub format: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Bits per sample
    pub bit_depth: u16,
    /// Data size in bytes
    pub data_size: u64,
}

/// Size summary of the InstFS partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableStats {
    /// Partition size in bytes
    pub partition_size: u64,
    /// Number of table entries
    pub num_instruments: u32,
}

/// An instrument yielded by [`InstrumentTable::iter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentRef<'a> {
    /// Table index
    pub index: usize,
    /// Name read in place
    pub name: &'a str,
    /// Declared data size
    pub size: u64,
}

/// Reader over the InstFS partition
#[derive(Debug, Clone, Copy)]
pub struct InstrumentTable<'a> {
    partition: Partition<'a>,
    count: u32,
    table: &'a [u8],
}

impl<'a> InstrumentTable<'a> {
    /// Bind the InstFS partition of `container`
    ///
    /// Checks the magic and exact version, then that the whole entry table
    /// lies inside the partition.
    pub fn mount(container: &'a Container) -> Result<Self> {
        let partition = container.instfs_partition();
        let header = InstfsHeader::parse(partition.bytes())?;
        header.validate()?;

        let table_len = u64::from(header.num_instruments) * INSTRUMENT_ENTRY_SIZE as u64;
        let table = partition
            .slice(header.instrument_table_offset, table_len)
            .ok_or_else(|| {
                InstfsError::Corrupt(format!(
                    "instrument table {}+{table_len} exceeds partition of {} bytes",
                    header.instrument_table_offset,
                    partition.len()
                ))
            })?;

        debug!(
            "Instrument table: {} entries in {} byte partition",
            header.num_instruments,
            partition.len()
        );
        Ok(Self {
            partition,
            count: header.num_instruments,
            table,
        })
    }

    /// Number of table entries
    pub fn count(&self) -> usize {
        self.count as usize
    }

    /// Raw table entry at `index`
    pub fn entry(&self, index: usize) -> Result<InstrumentEntry> {
        let start = index
            .checked_mul(INSTRUMENT_ENTRY_SIZE)
            .filter(|_| index < self.count())
            .ok_or_else(|| self.index_error(index))?;
        Ok(InstrumentEntry::parse(&self.table[start..])?)
    }

    /// Name of the instrument at `index`, read in place
    ///
    /// A name with no NUL within 256 bytes or the partition end, or that is
    /// not UTF-8, is [`InstfsError::Corrupt`].
    pub fn name(&self, index: usize) -> Result<&'a str> {
        let entry = self.entry(index)?;
        self.entry_name(index, &entry)
    }

    fn entry_name(&self, index: usize, entry: &InstrumentEntry) -> Result<&'a str> {
        let raw = usize::try_from(entry.name_offset)
            .ok()
            .and_then(|offset| nul_terminated(self.partition.bytes(), offset, INSTFS_MAX_NAME))
            .ok_or_else(|| {
                InstfsError::Corrupt(format!(
                    "instrument {index} name at offset {} is unterminated or outside the partition",
                    entry.name_offset
                ))
            })?;
        std::str::from_utf8(raw)
            .map_err(|_| InstfsError::Corrupt(format!("instrument {index} name is not UTF-8")))
    }

    /// Index of the first instrument named `name`
    ///
    /// Entries with corrupt names are skipped.
    pub fn find_by_name(&self, name: &str) -> Result<usize> {
        self.iter()
            .find(|inst| inst.name == name)
            .map(|inst| inst.index)
            .ok_or_else(|| InstfsError::NotFound(format!("instrument {name:?}")))
    }

    /// Partition-relative byte range of the data of instrument `index`
    pub fn data_range(&self, index: usize) -> Result<Range<usize>> {
        let entry = self.entry(index)?;
        self.checked_data_range(&entry).ok_or_else(|| {
            warn!(
                "Instrument {index} data {}+{} lies outside the {} byte partition",
                entry.data_offset,
                entry.data_size,
                self.partition.len()
            );
            InstfsError::NotFound(format!("data of instrument {index}"))
        })
    }

    /// Data range of `index` if it lies inside the partition, without logging
    pub(crate) fn valid_data_range(&self, index: usize) -> Option<Range<usize>> {
        let entry = self.entry(index).ok()?;
        self.checked_data_range(&entry)
    }

    fn checked_data_range(&self, entry: &InstrumentEntry) -> Option<Range<usize>> {
        let end = usize::try_from(entry.data_end()?).ok()?;
        let start = usize::try_from(entry.data_offset).ok()?;
        (end <= self.partition.len()).then_some(start..end)
    }

    /// Data of instrument `index`, borrowed from the mapping
    ///
    /// A range that does not lie entirely inside the partition is reported
    /// as [`InstfsError::NotFound`].
    pub fn data(&self, index: usize) -> Result<&'a [u8]> {
        let range = self.data_range(index)?;
        Ok(&self.partition.bytes()[range])
    }

    /// Format description of instrument `index`
    pub fn info(&self, index: usize) -> Result<InstrumentInfo> {
        let entry = self.entry(index)?;
        Ok(InstrumentInfo {
            format: entry.format,
            sample_rate: entry.sample_rate,
            channels: entry.channels,
            bit_depth: entry.bit_depth,
            data_size: entry.data_size,
        })
    }

    /// Copy data of instrument `index` starting at `offset` into `dest`
    ///
    /// Copies `min(dest.len(), size - offset)` bytes; an offset at or past
    /// the end copies nothing and returns 0.
    pub fn read(&self, index: usize, dest: &mut [u8], offset: u64) -> Result<usize> {
        Ok(copy_clamped(self.data(index)?, offset, dest))
    }

    /// Visit every readable instrument in index order
    pub fn list(&self, mut visit: impl FnMut(usize, &'a str, u64)) {
        for inst in self.iter() {
            visit(inst.index, inst.name, inst.size);
        }
    }

    /// Instruments in index order, skipping entries with corrupt names
    pub fn iter(&self) -> impl Iterator<Item = InstrumentRef<'a>> + use<'a> {
        let table = *self;
        (0..table.count()).filter_map(move |index| {
            let entry = table.entry(index).ok()?;
            let name = table.entry_name(index, &entry).ok()?;
            Some(InstrumentRef {
                index,
                name,
                size: entry.data_size,
            })
        })
    }

    /// Partition size and entry count
    pub fn stats(&self) -> TableStats {
        TableStats {
            partition_size: self.partition.len() as u64,
            num_instruments: self.count,
        }
    }

    /// Underlying partition
    pub fn partition(&self) -> Partition<'a> {
        self.partition
    }

    fn index_error(&self, index: usize) -> InstfsError {
        InstfsError::NotFound(format!(
            "instrument index {index} (table has {})",
            self.count
        ))
    }
}

/// Copy from `data` at `offset` into `dest`, clamped to the end of `data`
pub(crate) fn copy_clamped(data: &[u8], offset: u64, dest: &mut [u8]) -> usize {
    let Some(src) = usize::try_from(offset).ok().and_then(|o| data.get(o..)) else {
        return 0;
    };
    let n = src.len().min(dest.len());
    dest[..n].copy_from_slice(&src[..n]);
    n
}
