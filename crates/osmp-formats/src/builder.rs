//! Builder for complete OSMP images

use crate::container::{MASTER_HEADER_SIZE, MasterHeader};
use crate::error::{FormatError, Result};
use crate::manifest::{INSTRUMENT_MANIFEST_NAME, InstrumentManifest};
use crate::meta::{META_ENTRY_HEADER_SIZE, MetaEntryHeader};
use crate::table::{
    INSTFS_HEADER_SIZE, INSTFS_MAX_NAME, INSTRUMENT_ENTRY_SIZE, InstfsHeader, InstrumentEntry,
};
use crate::FixedLayout;
use std::io::Write;

/// One instrument to be written into the InstFS partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentSpec {
    /// Instrument name, stored NUL-terminated
    pub name: String,
    /// Raw sample data
    pub data: Vec<u8>,
    /// Sample format tag
    pub format: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Bits per sample
    pub bit_depth: u16,
}

impl InstrumentSpec {
    /// Instrument with the default description: format 1, 44100 Hz, stereo, 16-bit
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            format: 1,
            sample_rate: 44100,
            channels: 2,
            bit_depth: 16,
        }
    }

    /// Set the format tag
    #[must_use]
    pub fn with_format(mut self, format: u32) -> Self {
        self.format = format;
        self
    }

    /// Set the sample rate
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set channel count and bit depth
    #[must_use]
    pub fn with_layout(mut self, channels: u16, bit_depth: u16) -> Self {
        self.channels = channels;
        self.bit_depth = bit_depth;
        self
    }
}

/// Builder for a complete image
///
/// Files are written in insertion order. The image layout is fixed: master
/// header, metadata archive, then the InstFS partition with its header, the
/// entry table directly after the header, all names, then all data.
/// Name validation is deferred to [`ImageBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    meta_files: Vec<(String, Vec<u8>)>,
    instruments: Vec<InstrumentSpec>,
    manifest: Option<Vec<u8>>,
}

impl ImageBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to the metadata archive
    #[must_use]
    pub fn add_meta_file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.meta_files.push((path.into(), data.into()));
        self
    }

    /// Add an instrument to the InstFS partition
    #[must_use]
    pub fn add_instrument(mut self, instrument: InstrumentSpec) -> Self {
        self.instruments.push(instrument);
        self
    }

    /// Store `manifest` as the first metadata file, named `instrument.json`
    pub fn add_manifest(mut self, manifest: &InstrumentManifest) -> Result<Self> {
        self.manifest = Some(manifest.to_vec()?);
        Ok(self)
    }

    /// Encode the metadata archive partition
    pub fn build_meta_partition(&self) -> Result<Vec<u8>> {
        let files = self
            .manifest
            .as_ref()
            .map(|json| (INSTRUMENT_MANIFEST_NAME, json.as_slice()))
            .into_iter()
            .chain(
                self.meta_files
                    .iter()
                    .map(|(path, data)| (path.as_str(), data.as_slice())),
            );

        let mut out = Vec::new();
        for (path, data) in files {
            let header = MetaEntryHeader::new(path, data.len() as u64)?;
            out.extend_from_slice(&header.build()?);
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    /// Encode the InstFS partition
    pub fn build_instfs_partition(&self) -> Result<Vec<u8>> {
        for instrument in &self.instruments {
            validate_instrument_name(&instrument.name)?;
        }

        let count = u32::try_from(self.instruments.len())
            .map_err(|_| FormatError::LayoutOverflow("instrument count exceeds u32"))?;
        let table_offset = INSTFS_HEADER_SIZE;
        let names_offset = self
            .instruments
            .len()
            .checked_mul(INSTRUMENT_ENTRY_SIZE)
            .and_then(|len| len.checked_add(table_offset))
            .ok_or(FormatError::LayoutOverflow("instrument table"))?;
        let names_len: usize = self.instruments.iter().map(|i| i.name.len() + 1).sum();

        let mut name_offset = names_offset;
        let mut data_offset = names_offset + names_len;
        let mut entries = Vec::with_capacity(self.instruments.len());
        for instrument in &self.instruments {
            entries.push(InstrumentEntry {
                name_offset: name_offset as u64,
                data_offset: data_offset as u64,
                data_size: instrument.data.len() as u64,
                format: instrument.format,
                sample_rate: instrument.sample_rate,
                channels: instrument.channels,
                bit_depth: instrument.bit_depth,
                reserved: [0; 2],
            });
            name_offset += instrument.name.len() + 1;
            data_offset = data_offset
                .checked_add(instrument.data.len())
                .ok_or(FormatError::LayoutOverflow("instrument data"))?;
        }

        let mut out = Vec::with_capacity(data_offset);
        out.extend_from_slice(&InstfsHeader::new(count, table_offset as u64).build()?);
        for entry in &entries {
            out.extend_from_slice(&entry.build()?);
        }
        for instrument in &self.instruments {
            out.extend_from_slice(instrument.name.as_bytes());
            out.push(0);
        }
        for instrument in &self.instruments {
            out.extend_from_slice(&instrument.data);
        }
        debug_assert_eq!(out.len(), data_offset);
        Ok(out)
    }

    /// Encode the whole image
    pub fn build(&self) -> Result<Vec<u8>> {
        let meta = self.build_meta_partition()?;
        let instfs = self.build_instfs_partition()?;

        let meta_offset = MASTER_HEADER_SIZE as u64;
        let instfs_offset = meta_offset + meta.len() as u64;
        let header = MasterHeader::new(
            meta_offset,
            meta.len() as u64,
            instfs_offset,
            instfs.len() as u64,
        );

        let mut out = Vec::with_capacity(MASTER_HEADER_SIZE + meta.len() + instfs.len());
        out.extend_from_slice(&header.build()?);
        out.extend_from_slice(&meta);
        out.extend_from_slice(&instfs);
        Ok(out)
    }

    /// Encode the whole image into `writer`, returning the bytes written
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<u64> {
        let image = self.build()?;
        writer.write_all(&image)?;
        writer.flush()?;
        Ok(image.len() as u64)
    }
}

/// Instrument names are flat file names in the projection, so path
/// separators and the dot entries are rejected along with NUL.
fn validate_instrument_name(name: &str) -> Result<()> {
    if name.is_empty()
        || matches!(name, "." | "..")
        || name.bytes().any(|b| matches!(b, 0 | b'/' | b'\\'))
    {
        return Err(FormatError::InvalidName(name.to_string()));
    }
    if name.len() >= INSTFS_MAX_NAME {
        return Err(FormatError::NameTooLong {
            len: name.len(),
            max: INSTFS_MAX_NAME - 1,
        });
    }
    Ok(())
}

/// Size of the metadata archive holding files of the given payload sizes
pub fn meta_partition_size(payload_sizes: &[usize]) -> usize {
    payload_sizes.iter().map(|s| META_ENTRY_HEADER_SIZE + s).sum()
}
