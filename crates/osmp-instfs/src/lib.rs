//! Zero-copy access to OSMP sample containers.
//!
//! An OSMP image packs small metadata files and large instrument sample data
//! into one file. This crate maps that file read-only and hands out borrowed
//! views into the mapping; nothing is copied unless the caller asks for a
//! copy.
//!
//! - [`Container`] maps and validates the file and bounds-checks both
//!   partitions before anything inside them is parsed.
//! - [`MetaArchive`] walks the unindexed metadata archive.
//! - [`InstrumentTable`] validates the InstFS header and resolves instrument
//!   names and data ranges.
//! - [`Stream`] is a cursor over one instrument with OS read-pattern hints
//!   and usage statistics.
//! - [`InstFs`] projects everything as a flat read-only directory, the
//!   shape a FUSE front-end needs.
//!
//! Every view borrows from the [`Container`], so the borrow checker enforces
//! that no stream or lookup result outlives the mount.
//!
//! # Example
//!
//! ```rust,no_run
//! use osmp_instfs::{Container, InstrumentTable, Stream, StreamMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let container = Container::mount("drums.osmp")?;
//! let table = InstrumentTable::mount(&container)?;
//!
//! let index = table.find_by_name("snare")?;
//! let mut stream = Stream::open(&table, index, StreamMode::Sequential)?;
//! let mut buf = [0u8; 4096];
//! while stream.read(&mut buf) > 0 {
//!     // process samples
//! }
//! stream.close();
//! container.unmount();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use osmp_formats::FormatError;
use thiserror::Error;

// Master header and partition binding
pub mod container;

// Metadata archive reader
pub mod meta;

// Instrument table reader
pub mod table;

// Per-instrument cursor
pub mod stream;

// OS access-pattern hints
pub mod hint;

// Mount configuration
pub mod config;

// Filesystem projection
pub mod fs;

pub use config::MountOptions;
pub use container::{Container, Partition};
pub use fs::{DirEntry, FileAttr, FileHandle, FileKind, InstFs, OpenMode};
pub use hint::AccessHint;
pub use meta::{MetaArchive, MetaEntry};
pub use table::{InstrumentInfo, InstrumentRef, InstrumentTable, TableStats};
pub use stream::{Stream, StreamMode, StreamStats, Whence};

/// Result type for InstFS operations.
pub type Result<T> = std::result::Result<T, InstfsError>;

/// Errors that can occur while mounting or reading a container.
#[derive(Debug, Error)]
pub enum InstfsError {
    /// Open, stat or map failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic or version mismatch, or an offset/size outside its bound.
    #[error("Corrupt container: {0}")]
    Corrupt(String),

    /// Name or index lookup miss.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Argument rejected before any access.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Hint or prefetch on a platform or backing without the primitive.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Write access requested on the read-only projection.
    #[error("Access denied: {0}")]
    AccessDenied(String),
}

impl From<FormatError> for InstfsError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::Io(e) => Self::Io(e),
            other => Self::Corrupt(other.to_string()),
        }
    }
}

impl InstfsError {
    /// Errno a filesystem front-end should return for this error
    #[cfg(unix)]
    pub fn errno(&self) -> i32 {
        match self {
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Self::Corrupt(_) => libc::EIO,
            Self::NotFound(_) => libc::ENOENT,
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::Unsupported(_) => libc::EOPNOTSUPP,
            Self::AccessDenied(_) => libc::EACCES,
        }
    }

    /// Whether this error is a lookup miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Version information for the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
