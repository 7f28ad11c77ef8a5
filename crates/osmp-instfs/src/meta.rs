//! Metadata archive reader
//!
//! The archive has no index: every lookup walks the entries from the start
//! of the partition. This is an O(entries) scan by construction and suits
//! the handful of small files a container carries.

use crate::container::{Container, Partition};
use crate::{InstfsError, Result};
use osmp_formats::{
    INSTRUMENT_MANIFEST_NAME, InstrumentManifest, META_ENTRY_HEADER_SIZE, MetaEntryView,
};
use tracing::debug;

/// One metadata file, borrowed from the mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaEntry<'a> {
    index: usize,
    header: MetaEntryView<'a>,
    data: &'a [u8],
}

impl<'a> MetaEntry<'a> {
    /// Position of the entry in the archive
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw name bytes, at most 256
    pub fn name_bytes(&self) -> &'a [u8] {
        self.header.path_bytes()
    }

    /// Name as UTF-8, `None` if the stored bytes are not valid UTF-8
    pub fn name(&self) -> Option<&'a str> {
        self.header.path()
    }

    /// Whether the stored name equals `name`
    pub fn matches(&self, name: &str) -> bool {
        self.header.matches(name)
    }

    /// Payload size
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Payload bytes in place
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// Iterator over the entries of a metadata archive
///
/// Stops when fewer bytes remain than an entry header needs, or at the
/// first entry whose payload would run past the partition.
#[derive(Debug, Clone)]
pub struct MetaEntries<'a> {
    bytes: &'a [u8],
    pos: usize,
    index: usize,
}

impl<'a> Iterator for MetaEntries<'a> {
    type Item = MetaEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.bytes.get(self.pos..)?;
        let header = MetaEntryView::from_bytes(rest).ok()?;
        let size = usize::try_from(header.size()).ok()?;
        let data = rest.get(META_ENTRY_HEADER_SIZE..)?.get(..size)?;

        let entry = MetaEntry {
            index: self.index,
            header,
            data,
        };
        self.pos += META_ENTRY_HEADER_SIZE + size;
        self.index += 1;
        Some(entry)
    }
}

/// Reader over the metadata archive partition
#[derive(Debug, Clone, Copy)]
pub struct MetaArchive<'a> {
    partition: Partition<'a>,
    count: usize,
}

impl<'a> MetaArchive<'a> {
    /// Bind the metadata partition of `container`
    ///
    /// The archive is walked once to validate it: an entry whose payload
    /// would run past the partition is [`InstfsError::Corrupt`]. A trailing
    /// remainder too short for another header ends the archive.
    pub fn mount(container: &'a Container) -> Result<Self> {
        let partition = container.meta_partition();
        let bytes = partition.bytes();

        let mut pos = 0usize;
        let mut count = 0usize;
        while bytes.len() - pos >= META_ENTRY_HEADER_SIZE {
            let header = MetaEntryView::from_bytes(&bytes[pos..])?;
            let available = bytes.len() - pos - META_ENTRY_HEADER_SIZE;
            let size = usize::try_from(header.size())
                .ok()
                .filter(|&size| size <= available)
                .ok_or_else(|| {
                    InstfsError::Corrupt(format!(
                        "metadata entry {count} declares {} bytes, only {available} remain",
                        header.size()
                    ))
                })?;
            pos += META_ENTRY_HEADER_SIZE + size;
            count += 1;
        }

        if pos < bytes.len() {
            debug!(
                "Metadata archive has {} trailing bytes after {count} entries",
                bytes.len() - pos
            );
        }
        debug!("Metadata archive: {count} entries in {} bytes", bytes.len());
        Ok(Self { partition, count })
    }

    /// Number of entries
    pub fn count(&self) -> usize {
        self.count
    }

    /// Walk the entries in archive order
    pub fn iter(&self) -> MetaEntries<'a> {
        MetaEntries {
            bytes: self.partition.bytes(),
            pos: 0,
            index: 0,
        }
    }

    /// First entry whose name equals `name`
    pub fn find_by_name(&self, name: &str) -> Result<MetaEntry<'a>> {
        self.iter()
            .find(|entry| entry.matches(name))
            .ok_or_else(|| InstfsError::NotFound(format!("metadata file {name:?}")))
    }

    /// Entry at `index`
    pub fn get_entry(&self, index: usize) -> Result<MetaEntry<'a>> {
        self.iter().nth(index).ok_or_else(|| {
            InstfsError::NotFound(format!(
                "metadata entry {index} (archive has {})",
                self.count
            ))
        })
    }

    /// Decode `instrument.json`, `None` if the archive has none
    pub fn instrument_manifest(&self) -> Result<Option<InstrumentManifest>> {
        match self.find_by_name(INSTRUMENT_MANIFEST_NAME) {
            Ok(entry) => Ok(Some(InstrumentManifest::from_slice(entry.data())?)),
            Err(InstfsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Underlying partition
    pub fn partition(&self) -> Partition<'a> {
        self.partition
    }
}

impl<'a> IntoIterator for &MetaArchive<'a> {
    type Item = MetaEntry<'a>;
    type IntoIter = MetaEntries<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
