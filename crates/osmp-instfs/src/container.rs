//! Container mounting and partition binding

use crate::config::MountOptions;
use crate::hint::AccessHint;
use crate::{InstfsError, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use memmap2::{Mmap, MmapOptions};
use osmp_formats::{FixedLayout, MASTER_HEADER_SIZE, MasterHeader};
use std::fmt;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bytes backing a mounted container
///
/// The whole file is mapped from offset 0, so file offsets and mapping
/// offsets coincide and no page-alignment adjustment has to be carried.
enum Backing {
    Mapped(Mmap),
    Memory(Box<[u8]>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => &mmap[..],
            Self::Memory(buf) => &buf[..],
        }
    }

    fn advise(&self, hint: AccessHint, offset: usize, len: usize) -> Result<()> {
        match self {
            #[cfg(unix)]
            Self::Mapped(mmap) => Ok(mmap.advise_range(hint.into(), offset, len)?),
            #[cfg(not(unix))]
            Self::Mapped(_) => {
                let _ = (hint, offset, len);
                Err(InstfsError::Unsupported(
                    "access hints are not available on this platform".to_string(),
                ))
            }
            Self::Memory(_) => Err(InstfsError::Unsupported(
                "memory-backed container has no mapping to advise".to_string(),
            )),
        }
    }
}

/// A mounted container: a validated master header over a read-only mapping
///
/// Both partition ranges are checked against the mapped length before
/// anything inside them is parsed. Mounting is all-or-nothing: on any
/// failure the mapping is released before the error is returned.
pub struct Container {
    backing: Backing,
    header: MasterHeader,
    meta: Range<usize>,
    instfs: Range<usize>,
    source: Option<PathBuf>,
    /// Open streams holding a hint, keyed by absolute `(start, len)`
    hint_holders: DashMap<(usize, usize), usize>,
}

impl Container {
    /// Map and validate the container at `path` with default options
    pub fn mount(path: impl AsRef<Path>) -> Result<Self> {
        Self::mount_with(path, &MountOptions::default())
    }

    /// Map and validate the container at `path`
    pub fn mount_with(path: impl AsRef<Path>, options: &MountOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        // A zero-length mapping is an error on some platforms; reject short
        // files before mapping anything.
        if len < MASTER_HEADER_SIZE as u64 {
            return Err(InstfsError::Corrupt(format!(
                "{} is {len} bytes, smaller than the {MASTER_HEADER_SIZE}-byte master header",
                path.display()
            )));
        }

        let mut map_options = MmapOptions::new();
        if options.populate {
            map_options.populate();
        }
        #[allow(unsafe_code)]
        let mmap = unsafe { map_options.map(&file)? };
        debug!("Mapped {} ({} bytes)", path.display(), mmap.len());

        let container = Self::bind(Backing::Mapped(mmap), Some(path.to_path_buf()))?;
        info!(
            "Mounted {}: meta {} bytes, instfs {} bytes",
            path.display(),
            container.meta.len(),
            container.instfs.len()
        );
        Ok(container)
    }

    /// Validate a container held in memory
    ///
    /// Hints on a memory-backed container report
    /// [`InstfsError::Unsupported`].
    pub fn mount_from_memory(buffer: impl Into<Box<[u8]>>) -> Result<Self> {
        let container = Self::bind(Backing::Memory(buffer.into()), None)?;
        debug!(
            "Mounted in-memory container: meta {} bytes, instfs {} bytes",
            container.meta.len(),
            container.instfs.len()
        );
        Ok(container)
    }

    fn bind(backing: Backing, source: Option<PathBuf>) -> Result<Self> {
        let bytes = backing.bytes();
        let header = MasterHeader::parse(bytes)?;
        header.validate()?;

        let len = bytes.len();
        let meta = checked_partition("metadata", header.meta_range(), len)?;
        let instfs = checked_partition("instfs", header.instfs_range(), len)?;

        Ok(Self {
            backing,
            header,
            meta,
            instfs,
            source,
            hint_holders: DashMap::new(),
        })
    }

    /// Release the mapping
    ///
    /// Every view, table and stream borrows from the container, so this
    /// cannot be called while any of them is alive.
    pub fn unmount(self) {
        match &self.source {
            Some(path) => info!("Unmounted {}", path.display()),
            None => debug!("Unmounted in-memory container"),
        }
    }

    /// Parsed master header
    pub fn header(&self) -> &MasterHeader {
        &self.header
    }

    /// Path the container was mounted from, `None` for memory-backed containers
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Total mapped length
    pub fn len(&self) -> usize {
        self.backing.bytes().len()
    }

    /// Whether the mapping is empty; never true for a mounted container
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the container is backed by a file mapping
    pub fn is_memory_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    /// Metadata archive partition
    pub fn meta_partition(&self) -> Partition<'_> {
        Partition::new(self, self.meta.clone())
    }

    /// InstFS partition
    pub fn instfs_partition(&self) -> Partition<'_> {
        Partition::new(self, self.instfs.clone())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("source", &self.source)
            .field("len", &self.len())
            .field("memory_mapped", &self.is_memory_mapped())
            .field("meta", &self.meta)
            .field("instfs", &self.instfs)
            .finish()
    }
}

fn checked_partition(name: &str, range: Option<Range<u64>>, len: usize) -> Result<Range<usize>> {
    let range = range.ok_or_else(|| {
        InstfsError::Corrupt(format!("{name} partition offset + size overflows"))
    })?;
    match (usize::try_from(range.start), usize::try_from(range.end)) {
        (Ok(start), Ok(end)) if end <= len => Ok(start..end),
        _ => Err(InstfsError::Corrupt(format!(
            "{name} partition {}..{} exceeds container length {len}",
            range.start, range.end
        ))),
    }
}

/// A bounds-checked byte range of a mounted container
///
/// All offsets taken by a partition are relative to its start.
#[derive(Clone, Copy)]
pub struct Partition<'a> {
    container: &'a Container,
    base: usize,
    bytes: &'a [u8],
}

impl<'a> Partition<'a> {
    fn new(container: &'a Container, range: Range<usize>) -> Self {
        let base = range.start;
        // Ranges are checked against the mapping in `Container::bind`.
        let bytes = container.backing.bytes().get(range).unwrap_or_default();
        Self {
            container,
            base,
            bytes,
        }
    }

    /// Partition contents
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Partition length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the partition is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Offset of the partition from the start of the container
    pub fn base(&self) -> usize {
        self.base
    }

    /// Sub-range `[offset, offset + len)`, `None` unless it lies entirely inside
    pub fn slice(&self, offset: u64, len: u64) -> Option<&'a [u8]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        self.bytes.get(start..end)
    }

    /// Apply an access hint to `[offset, offset + len)` of this partition
    ///
    /// The range must already lie inside the partition.
    pub(crate) fn advise(&self, hint: AccessHint, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.len()) {
            return Err(InstfsError::InvalidArgument(format!(
                "hint range {offset}+{len} outside partition of {} bytes",
                self.len()
            )));
        }
        self.container.backing.advise(hint, self.base + offset, len)
    }

    /// Apply a stream's hint to `[offset, offset + len)` and count the stream
    /// as a holder of that range
    ///
    /// Nothing is counted if the hint fails.
    pub(crate) fn hold(&self, hint: AccessHint, offset: usize, len: usize) -> Result<()> {
        match self.container.hint_holders.entry((self.base + offset, len)) {
            Entry::Occupied(mut holders) => {
                self.advise(hint, offset, len)?;
                *holders.get_mut() += 1;
            }
            Entry::Vacant(slot) => {
                self.advise(hint, offset, len)?;
                slot.insert(1);
            }
        }
        Ok(())
    }

    /// Drop one holder of `[offset, offset + len)`
    ///
    /// The range returns to [`AccessHint::Normal`] only when its last holder
    /// lets go. Ranges are matched exactly, so instruments sharing a page can
    /// still override each other's hints.
    pub(crate) fn unhold(&self, offset: usize, len: usize) -> Result<()> {
        let mut restored = Ok(());
        self.container
            .hint_holders
            .remove_if_mut(&(self.base + offset, len), |_, holders| {
                *holders -= 1;
                if *holders == 0 {
                    restored = self.advise(AccessHint::Normal, offset, len);
                }
                *holders == 0
            });
        restored
    }

    #[cfg(test)]
    pub(crate) fn holders(&self, offset: usize, len: usize) -> usize {
        self.container
            .hint_holders
            .get(&(self.base + offset, len))
            .map_or(0, |holders| *holders)
    }
}

impl fmt::Debug for Partition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("base", &self.base)
            .field("len", &self.len())
            .finish()
    }
}
