//! Read-only filesystem projection
//!
//! Presents a mounted container as a single flat directory rooted at `/`.
//! Every instrument and every metadata file is one regular file. When a name
//! exists in both sets the instrument wins, and that rule is applied the
//! same way by [`InstFs::getattr`], [`InstFs::readdir`], [`InstFs::open`] and
//! [`InstFs::read`].
//!
//! Only names usable as a single path component are projected, and an
//! instrument whose data range lies outside its partition is left out, so
//! every listed name can be looked up and opened.
//!
//! All methods take `&self` so one projection can serve requests from many
//! threads. Open instrument files keep a [`Stream`] in a concurrent handle
//! map; metadata files are resolved by name on every read.

use crate::config::MountOptions;
use crate::container::Container;
use crate::meta::{MetaArchive, MetaEntry};
use crate::stream::Stream;
use crate::table::{InstrumentRef, InstrumentTable, copy_clamped};
use crate::{InstfsError, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// The root directory
    Directory,
    /// An instrument or metadata file
    RegularFile,
}

/// Attributes reported for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    /// Entry kind
    pub kind: FileKind,
    /// Size in bytes, 0 for the root
    pub size: u64,
    /// Permission bits
    pub perm: u16,
    /// Link count
    pub nlink: u32,
}

impl FileAttr {
    fn directory() -> Self {
        Self {
            kind: FileKind::Directory,
            size: 0,
            perm: 0o555,
            nlink: 2,
        }
    }

    fn file(size: u64) -> Self {
        Self {
            kind: FileKind::RegularFile,
            size,
            perm: 0o444,
            nlink: 1,
        }
    }
}

/// One name returned by [`InstFs::readdir`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry<'a> {
    /// Entry name
    pub name: &'a str,
    /// Entry kind
    pub kind: FileKind,
}

/// Handle returned by [`InstFs::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u64);

impl FileHandle {
    /// Handle for files that keep no state between reads
    pub const STATELESS: Self = Self(0);
}

/// Requested access mode of an open call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read only
    ReadOnly,
    /// Write only
    WriteOnly,
    /// Read and write
    ReadWrite,
}

impl OpenMode {
    /// Access mode encoded in `open(2)` flags
    #[cfg(unix)]
    pub fn from_flags(flags: i32) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => Self::ReadOnly,
            libc::O_WRONLY => Self::WriteOnly,
            _ => Self::ReadWrite,
        }
    }
}

enum Resolved<'a> {
    Instrument(usize),
    Meta(MetaEntry<'a>),
}

/// Flat read-only view of a mounted container
pub struct InstFs<'a> {
    table: InstrumentTable<'a>,
    meta: Option<MetaArchive<'a>>,
    options: MountOptions,
    handles: DashMap<u64, Stream<'a>>,
    next_handle: AtomicU64,
}

impl<'a> InstFs<'a> {
    /// Mount the projection over `container`
    ///
    /// The instrument table must mount. A metadata archive that fails to
    /// mount is logged and left out; instruments stay available.
    pub fn mount(container: &'a Container, options: MountOptions) -> Result<Self> {
        let table = InstrumentTable::mount(container)?;
        let meta = match MetaArchive::mount(container) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("Metadata archive not mounted: {e}");
                None
            }
        };

        let fs = Self {
            table,
            meta,
            options,
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
        };
        let hidden = fs.table.count() - fs.visible_instruments().count();
        if hidden > 0 {
            warn!("{hidden} instruments have unusable names or data ranges and are hidden");
        }
        let hidden = fs.meta.as_ref().map_or(0, MetaArchive::count) - fs.visible_meta().count();
        if hidden > 0 {
            warn!("{hidden} metadata names are not single path components and are hidden");
        }

        info!(
            "Mounted projection: {} instruments, {} metadata files",
            fs.table.count(),
            fs.meta.as_ref().map_or(0, MetaArchive::count)
        );
        Ok(fs)
    }

    /// Close every open handle
    pub fn unmount(self) {
        let open = self.handles.len();
        for (_, stream) in self.handles {
            stream.close();
        }
        info!("Unmounted projection ({open} open handles closed)");
    }

    /// Instrument table behind the projection
    pub fn table(&self) -> &InstrumentTable<'a> {
        &self.table
    }

    /// Metadata archive behind the projection, if it mounted
    pub fn meta(&self) -> Option<&MetaArchive<'a>> {
        self.meta.as_ref()
    }

    /// Number of open instrument handles
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Attributes of `path`
    pub fn getattr(&self, path: &str) -> Result<FileAttr> {
        if path == "/" {
            return Ok(FileAttr::directory());
        }
        match self.resolve(path)? {
            Resolved::Instrument(index) => {
                Ok(FileAttr::file(self.table.data_range(index)?.len() as u64))
            }
            Resolved::Meta(entry) => Ok(FileAttr::file(entry.size())),
        }
    }

    /// Entries of the root directory
    ///
    /// `.` and `..` first, then instruments in table order, then metadata
    /// files in archive order. A metadata file shadowed by an instrument of
    /// the same name is not listed.
    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry<'a>>> {
        if path != "/" {
            return Err(InstfsError::NotFound(format!("directory {path:?}")));
        }

        let mut entries = vec![
            DirEntry {
                name: ".",
                kind: FileKind::Directory,
            },
            DirEntry {
                name: "..",
                kind: FileKind::Directory,
            },
        ];
        entries.extend(self.visible_instruments().map(|inst| DirEntry {
            name: inst.name,
            kind: FileKind::RegularFile,
        }));
        for entry in self.visible_meta() {
            if let Some(name) = entry.name()
                && self.find_instrument(name).is_none()
            {
                entries.push(DirEntry {
                    name,
                    kind: FileKind::RegularFile,
                });
            }
        }
        Ok(entries)
    }

    /// Open `path` for reading
    ///
    /// Instruments get a handle with an attached [`Stream`]; metadata files
    /// get [`FileHandle::STATELESS`]. Any mode other than read-only is
    /// [`InstfsError::AccessDenied`].
    pub fn open(&self, path: &str, mode: OpenMode) -> Result<FileHandle> {
        if mode != OpenMode::ReadOnly {
            return Err(InstfsError::AccessDenied(format!(
                "{path:?} opened {mode:?} on a read-only filesystem"
            )));
        }
        match self.resolve(path)? {
            Resolved::Instrument(index) => {
                let stream = Stream::open(&self.table, index, self.options.stream_mode)?;
                let fh = self.next_handle.fetch_add(1, Ordering::Relaxed);
                self.handles.insert(fh, stream);
                debug!("Opened {path} as handle {fh}");
                Ok(FileHandle(fh))
            }
            Resolved::Meta(_) => Ok(FileHandle::STATELESS),
        }
    }

    /// Read from `path` at `offset` into `buf`
    ///
    /// With an instrument handle the read is positional on its stream and
    /// leaves the stream cursor alone. Otherwise the path is resolved again.
    /// Reads at or past the end return 0.
    pub fn read(&self, path: &str, fh: FileHandle, buf: &mut [u8], offset: u64) -> Result<usize> {
        if let Some(mut stream) = self.handles.get_mut(&fh.0) {
            return Ok(stream.read_at(buf, offset));
        }
        match self.resolve(path)? {
            Resolved::Instrument(index) => self.table.read(index, buf, offset),
            Resolved::Meta(entry) => Ok(copy_clamped(entry.data(), offset, buf)),
        }
    }

    /// Close the stream attached to `fh`, if any
    pub fn release(&self, path: &str, fh: FileHandle) -> Result<()> {
        if let Some((_, stream)) = self.handles.remove(&fh.0) {
            debug!("Released {path} handle {}", fh.0);
            stream.close();
        }
        Ok(())
    }

    fn resolve(&self, path: &str) -> Result<Resolved<'a>> {
        let name = path
            .strip_prefix('/')
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .ok_or_else(|| InstfsError::NotFound(format!("path {path:?}")))?;

        if let Some(index) = self.find_instrument(name) {
            return Ok(Resolved::Instrument(index));
        }
        self.visible_meta()
            .find(|entry| entry.matches(name))
            .map(Resolved::Meta)
            .ok_or_else(|| InstfsError::NotFound(format!("path {path:?}")))
    }

    fn find_instrument(&self, name: &str) -> Option<usize> {
        self.visible_instruments()
            .find(|inst| inst.name == name)
            .map(|inst| inst.index)
    }

    fn visible_instruments(&self) -> impl Iterator<Item = InstrumentRef<'a>> + use<'a> {
        let strict = self.options.strict_names;
        let table = self.table;
        table.iter().filter(move |inst| {
            is_flat_name(inst.name, strict) && table.valid_data_range(inst.index).is_some()
        })
    }

    fn visible_meta(&self) -> impl Iterator<Item = MetaEntry<'a>> + use<'a> {
        let strict = self.options.strict_names;
        self.meta
            .into_iter()
            .flat_map(|meta| meta.iter())
            .filter(move |entry| entry.name().is_some_and(|name| is_flat_name(name, strict)))
    }
}

/// Whether `name` is usable as a single path component
///
/// A name containing `/` can never be looked up. Strict mode also refuses
/// the dot entries and backslashes.
fn is_flat_name(name: &str, strict: bool) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && (!strict || (!matches!(name, "." | "..") && !name.contains('\\')))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use osmp_formats::{
        FixedLayout, INSTFS_HEADER_SIZE, ImageBuilder, InstrumentSpec, MasterHeader,
    };
    use pretty_assertions::assert_eq;

    fn kit() -> Container {
        let image = ImageBuilder::new()
            .add_meta_file("meta.json", b"{\"kit\":1}".to_vec())
            .add_meta_file("../escape", b"x".to_vec())
            .add_instrument(InstrumentSpec::new("inst0", vec![0u8; 100]))
            .add_instrument(InstrumentSpec::new("inst1", vec![1u8; 200]))
            .build()
            .expect("build");
        Container::mount_from_memory(image).expect("mount")
    }

    fn names(fs: &InstFs<'_>) -> Vec<String> {
        fs.readdir("/")
            .expect("readdir")
            .iter()
            .map(|e| e.name.to_string())
            .collect()
    }

    #[test]
    fn test_root_attr() {
        let container = kit();
        let fs = InstFs::mount(&container, MountOptions::default()).expect("fs");
        assert_eq!(fs.getattr("/").expect("attr"), FileAttr::directory());
    }

    #[test]
    fn test_file_attrs() {
        let container = kit();
        let fs = InstFs::mount(&container, MountOptions::default()).expect("fs");

        assert_eq!(fs.getattr("/inst1").expect("attr"), FileAttr::file(200));
        assert_eq!(fs.getattr("/meta.json").expect("attr").size, 9);
        assert_eq!(fs.getattr("/meta.json").expect("attr").perm, 0o444);
        assert!(fs.getattr("/missing").unwrap_err().is_not_found());
        assert!(fs.getattr("inst0").unwrap_err().is_not_found());
        assert!(fs.getattr("/inst0/x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_strict_names_hide_traversal() {
        let container = kit();
        let fs = InstFs::mount(&container, MountOptions::default()).expect("fs");
        assert_eq!(names(&fs), vec![".", "..", "inst0", "inst1", "meta.json"]);

        let lax = InstFs::mount(&container, MountOptions::default().with_strict_names(false))
            .expect("fs");
        assert_eq!(names(&lax), vec![".", "..", "inst0", "inst1", "meta.json"]);
        assert!(lax.getattr("/../escape").unwrap_err().is_not_found());
    }

    #[test]
    fn test_readdir_other_path() {
        let container = kit();
        let fs = InstFs::mount(&container, MountOptions::default()).expect("fs");
        assert!(fs.readdir("/inst0").unwrap_err().is_not_found());
    }

    #[test]
    fn test_open_write_denied() {
        let container = kit();
        let fs = InstFs::mount(&container, MountOptions::default()).expect("fs");

        for mode in [OpenMode::WriteOnly, OpenMode::ReadWrite] {
            assert!(matches!(
                fs.open("/inst0", mode),
                Err(InstfsError::AccessDenied(_))
            ));
        }
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn test_instrument_handles() {
        let container = kit();
        let fs = InstFs::mount(&container, MountOptions::default()).expect("fs");

        let a = fs.open("/inst1", OpenMode::ReadOnly).expect("open");
        let b = fs.open("/inst1", OpenMode::ReadOnly).expect("open");
        assert_ne!(a, b);
        assert_ne!(a, FileHandle::STATELESS);
        assert_eq!(fs.open_handles(), 2);

        let mut buf = [9u8; 64];
        assert_eq!(fs.read("/inst1", a, &mut buf, 180).expect("read"), 20);
        assert_eq!(buf[..20], [1u8; 20]);
        assert_eq!(fs.read("/inst1", a, &mut buf, 0).expect("read"), 64);
        assert_eq!(fs.read("/inst1", a, &mut buf, 200).expect("read"), 0);

        fs.release("/inst1", a).expect("release");
        assert_eq!(fs.open_handles(), 1);
        fs.unmount();
    }

    #[test]
    fn test_metadata_reads_are_stateless() {
        let container = kit();
        let fs = InstFs::mount(&container, MountOptions::default()).expect("fs");

        let fh = fs.open("/meta.json", OpenMode::ReadOnly).expect("open");
        assert_eq!(fh, FileHandle::STATELESS);
        assert_eq!(fs.open_handles(), 0);

        let mut buf = [0u8; 4];
        assert_eq!(fs.read("/meta.json", fh, &mut buf, 2).expect("read"), 4);
        assert_eq!(&buf, b"kit\"");
        assert_eq!(fs.read("/meta.json", fh, &mut buf, 9).expect("read"), 0);
        fs.release("/meta.json", fh).expect("release");
    }

    #[test]
    fn test_instrument_wins_collision() {
        let image = ImageBuilder::new()
            .add_meta_file("kick", vec![5u8; 3])
            .add_instrument(InstrumentSpec::new("kick", vec![7u8; 50]))
            .build()
            .expect("build");
        let container = Container::mount_from_memory(image).expect("mount");
        let fs = InstFs::mount(&container, MountOptions::default()).expect("fs");

        assert_eq!(fs.getattr("/kick").expect("attr").size, 50);
        assert_eq!(names(&fs), vec![".", "..", "kick"]);
        let fh = fs.open("/kick", OpenMode::ReadOnly).expect("open");
        assert_ne!(fh, FileHandle::STATELESS);
        let mut buf = [0u8; 1];
        fs.read("/kick", FileHandle::STATELESS, &mut buf, 0).expect("read");
        assert_eq!(buf, [7]);
    }

    #[test]
    fn test_out_of_range_instrument_yields_to_metadata() {
        let mut image = ImageBuilder::new()
            .add_meta_file("kick", vec![5u8; 3])
            .add_instrument(InstrumentSpec::new("kick", vec![7u8; 50]))
            .add_instrument(InstrumentSpec::new("snare", vec![8u8; 20]))
            .build()
            .expect("build");
        let header = MasterHeader::parse(&image).expect("header");
        let size_at = header.instfs_offset as usize + INSTFS_HEADER_SIZE + 16;
        image[size_at..size_at + 8].copy_from_slice(&(u64::MAX - 100).to_le_bytes());

        let container = Container::mount_from_memory(image).expect("mount");
        let fs = InstFs::mount(&container, MountOptions::default()).expect("fs");

        assert_eq!(names(&fs), vec![".", "..", "snare", "kick"]);
        assert_eq!(fs.getattr("/kick").expect("attr"), FileAttr::file(3));
        assert_eq!(fs.getattr("/snare").expect("attr"), FileAttr::file(20));

        let fh = fs.open("/kick", OpenMode::ReadOnly).expect("open");
        assert_eq!(fh, FileHandle::STATELESS);
        let mut buf = [0u8; 8];
        assert_eq!(fs.read("/kick", fh, &mut buf, 0).expect("read"), 3);
        assert_eq!(buf[..3], [5u8; 3]);
    }

    #[cfg(unix)]
    #[test]
    fn test_open_mode_from_flags() {
        assert_eq!(OpenMode::from_flags(libc::O_RDONLY), OpenMode::ReadOnly);
        assert_eq!(
            OpenMode::from_flags(libc::O_WRONLY | libc::O_CREAT),
            OpenMode::WriteOnly
        );
        assert_eq!(OpenMode::from_flags(libc::O_RDWR), OpenMode::ReadWrite);
    }
}
