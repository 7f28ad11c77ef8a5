//! Per-instrument read cursor
//!
//! A [`Stream`] binds to one instrument's data range. Streams share the
//! container mapping and never copy it; each has its own cursor and
//! counters, so concurrent readers of one instrument open one stream each.
//!
//! Positions are always in `[0, size]`. Seeks clamp instead of failing and
//! reads past the end return 0.

use crate::container::Partition;
use crate::hint::{AccessHint, clamp_range};
use crate::table::{InstrumentTable, copy_clamped};
use crate::{InstfsError, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, SeekFrom};
use tracing::{debug, trace};

/// Read pattern announced to the OS when a stream is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamMode {
    /// Forward reads; readahead is increased
    #[default]
    Sequential,
    /// Scattered reads; readahead is disabled
    Random,
    /// The whole range is requested into memory at open
    WillNeed,
}

impl From<StreamMode> for AccessHint {
    fn from(mode: StreamMode) -> Self {
        match mode {
            StreamMode::Sequential => Self::Sequential,
            StreamMode::Random => Self::Random,
            StreamMode::WillNeed => Self::WillNeed,
        }
    }
}

/// Origin for [`Stream::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the data
    Start,
    /// From the current position
    Current,
    /// From the end of the data
    End,
}

/// Usage counters of one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    /// Bytes copied out by reads
    pub total_bytes_read: u64,
    /// Reads that copied at least one byte
    pub num_reads: u64,
    /// Seek calls, including those that did not move the cursor
    pub num_seeks: u64,
    /// Direct views handed out without copying
    pub cache_hits: u64,
    /// Direct views requested at end of data
    pub cache_misses: u64,
}

/// Cursor over one instrument's data
///
/// Not synchronized: one stream belongs to one reader at a time. Dropping a
/// stream closes it.
#[derive(Debug)]
pub struct Stream<'a> {
    partition: Partition<'a>,
    index: usize,
    start: usize,
    data: &'a [u8],
    position: u64,
    mode: StreamMode,
    stats: StreamStats,
    frame_size: Option<usize>,
    hinted: bool,
    closed: bool,
}

impl<'a> Stream<'a> {
    /// Bind a stream to instrument `index` and apply the hint for `mode`
    ///
    /// Fails if the index is out of range or the instrument's data does not
    /// lie inside the partition. A hint the platform rejects is ignored.
    pub fn open(table: &InstrumentTable<'a>, index: usize, mode: StreamMode) -> Result<Self> {
        let range = table.data_range(index)?;
        let partition = table.partition();
        let data = &partition.bytes()[range.clone()];

        let frame_size = table.entry(index)?.frame_size();
        let hinted = match partition.hold(mode.into(), range.start, range.len()) {
            Ok(()) => true,
            Err(e) => {
                trace!("Stream hint {mode:?} on instrument {index} not applied: {e}");
                false
            }
        };

        debug!(
            "Opened stream on instrument {index} ({} bytes, {mode:?})",
            data.len()
        );
        Ok(Self {
            partition,
            index,
            start: range.start,
            data,
            position: 0,
            mode,
            stats: StreamStats::default(),
            frame_size,
            hinted,
            closed: false,
        })
    }

    /// Close the stream
    ///
    /// The instrument range returns to the default hint once no other open
    /// stream on the same instrument still holds it. The container mapping
    /// is not affected.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.hinted
            && let Err(e) = self.partition.unhold(self.start, self.data.len())
        {
            trace!("Restoring hint on instrument {} failed: {e}", self.index);
        }
        debug!("Closed stream on instrument {}", self.index);
    }

    /// Copy from the cursor into `buf` and advance past the copied bytes
    ///
    /// Returns 0 at end of data.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = copy_clamped(self.data, self.position, buf);
        self.position += n as u64;
        self.count_read(n);
        n
    }

    /// Copy from `offset` into `buf` without moving the cursor
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> usize {
        let n = copy_clamped(self.data, offset, buf);
        self.count_read(n);
        n
    }

    fn count_read(&mut self, n: usize) {
        if n > 0 {
            self.stats.num_reads += 1;
            self.stats.total_bytes_read += n as u64;
        }
    }

    /// Read as many whole samples of `sample_size` bytes as fit in `buf`
    ///
    /// Returns the number of samples read. A trailing partial sample at the
    /// end of data is not read.
    pub fn read_samples(&mut self, buf: &mut [u8], sample_size: usize) -> Result<usize> {
        if sample_size == 0 {
            return Err(InstfsError::InvalidArgument(
                "sample size must be non-zero".to_string(),
            ));
        }
        let remaining = self.data.len() - self.position as usize;
        let samples = buf.len().min(remaining) / sample_size;
        let n = self.read(&mut buf[..samples * sample_size]);
        Ok(n / sample_size)
    }

    /// Read whole frames, one sample for every channel, as described by the
    /// instrument's table entry
    ///
    /// An instrument with zero channels or a bit depth that is not a whole
    /// number of bytes has no frame layout and is
    /// [`InstfsError::InvalidArgument`].
    pub fn read_frames(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_size = self.frame_size.ok_or_else(|| {
            InstfsError::InvalidArgument(format!(
                "instrument {} has no whole-byte frame layout",
                self.index
            ))
        })?;
        self.read_samples(buf, frame_size)
    }

    /// Bytes per frame, `None` when the channel count or bit depth rules
    /// out whole-byte frames
    pub fn frame_size(&self) -> Option<usize> {
        self.frame_size
    }

    /// Move the cursor, clamping the target into `[0, size]`
    ///
    /// Never fails; returns the new position.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> u64 {
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => i128::from(self.position),
            Whence::End => self.data.len() as i128,
        };
        let target = (base + i128::from(offset)).clamp(0, self.data.len() as i128);
        self.position = target as u64;
        self.stats.num_seeks += 1;
        self.position
    }

    /// Current position
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Whether the cursor is at the end of data
    pub fn eof(&self) -> bool {
        self.position >= self.data.len() as u64
    }

    /// Data size
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Instrument index this stream is bound to
    pub fn index(&self) -> usize {
        self.index
    }

    /// Mode the stream was opened with
    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Remaining data from the cursor, borrowed from the mapping
    ///
    /// The cursor does not move. Returns `None` at end of data.
    pub fn direct_view(&mut self) -> Option<&'a [u8]> {
        let view = self
            .data
            .get(self.position as usize..)
            .filter(|rest| !rest.is_empty());
        if view.is_some() {
            self.stats.cache_hits += 1;
        } else {
            self.stats.cache_misses += 1;
        }
        view
    }

    /// Apply `hint` to `[offset, offset + len)` of this stream's data
    ///
    /// The length is clamped to the data end. An offset at or past the end
    /// is [`InstfsError::InvalidArgument`]; a platform or backing without
    /// hints reports [`InstfsError::Unsupported`].
    pub fn advise(&self, offset: u64, len: u64, hint: AccessHint) -> Result<()> {
        let (offset, len) = clamp_range(offset, len, self.data.len()).ok_or_else(|| {
            InstfsError::InvalidArgument(format!(
                "hint offset {offset} at or past end of {} byte instrument",
                self.data.len()
            ))
        })?;
        if len == 0 {
            return Ok(());
        }
        self.partition.advise(hint, self.start + offset, len)
    }

    /// Request `[offset, offset + len)` into memory
    pub fn prefetch(&self, offset: u64, len: u64) -> Result<()> {
        self.advise(offset, len, AccessHint::WillNeed)
    }

    /// Counters accumulated since open or the last reset
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Zero the counters
    pub fn reset_stats(&mut self) {
        self.stats = StreamStats::default();
    }
}

impl Drop for Stream<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl io::Read for Stream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Stream::read(self, buf))
    }
}

/// Seeking before the start clamps to 0 instead of failing.
impl io::Seek for Stream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let position = match pos {
            SeekFrom::Start(offset) => {
                let offset = i64::try_from(offset).unwrap_or(i64::MAX);
                Stream::seek(self, offset, Whence::Start)
            }
            SeekFrom::Current(offset) => Stream::seek(self, offset, Whence::Current),
            SeekFrom::End(offset) => Stream::seek(self, offset, Whence::End),
        };
        Ok(position)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::container::Container;
    use osmp_formats::{ImageBuilder, InstrumentSpec};
    use pretty_assertions::assert_eq;
    use std::io::{Read, Seek};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn container(len: usize) -> Container {
        let image = ImageBuilder::new()
            .add_instrument(InstrumentSpec::new("pad", pattern(len)))
            .build()
            .expect("build");
        Container::mount_from_memory(image).expect("mount")
    }

    #[test]
    fn test_sequential_reads_to_end() {
        let container = container(10_000);
        let table = InstrumentTable::mount(&container).expect("table");
        let mut stream = Stream::open(&table, 0, StreamMode::Sequential).expect("open");
        let mut buf = vec![0u8; 4096];

        assert_eq!(stream.read(&mut buf), 4096);
        assert_eq!(stream.read(&mut buf), 4096);
        assert_eq!(stream.read(&mut buf), 1808);
        assert_eq!(stream.read(&mut buf), 0);
        assert!(stream.eof());

        let stats = stream.stats();
        assert_eq!(stats.num_reads, 3);
        assert_eq!(stats.total_bytes_read, 10_000);
    }

    #[test]
    fn test_seek_clamps_and_counts() {
        let container = container(100);
        let table = InstrumentTable::mount(&container).expect("table");
        let mut stream = Stream::open(&table, 0, StreamMode::Random).expect("open");

        assert_eq!(stream.seek(-5, Whence::Start), 0);
        assert_eq!(stream.seek(500, Whence::Start), 100);
        assert_eq!(stream.seek(-10, Whence::End), 90);
        assert_eq!(stream.seek(5, Whence::Current), 95);
        assert_eq!(stream.seek(i64::MAX, Whence::Current), 100);
        assert_eq!(stream.seek(i64::MIN, Whence::End), 0);
        assert_eq!(stream.seek(0, Whence::Current), 0);
        assert_eq!(stream.stats().num_seeks, 7);
    }

    #[test]
    fn test_direct_view_matches_read() {
        let container = container(300);
        let table = InstrumentTable::mount(&container).expect("table");
        let mut stream = Stream::open(&table, 0, StreamMode::Random).expect("open");
        stream.seek(120, Whence::Start);

        let view = stream.direct_view().expect("view");
        assert_eq!(view.len(), 180);
        assert_eq!(stream.tell(), 120);

        let mut buf = vec![0u8; 180];
        assert_eq!(stream.read(&mut buf), 180);
        assert_eq!(view, &buf[..]);
        assert_eq!(stream.stats().cache_hits, 1);
    }

    #[test]
    fn test_direct_view_at_end_is_miss() {
        let container = container(10);
        let table = InstrumentTable::mount(&container).expect("table");
        let mut stream = Stream::open(&table, 0, StreamMode::Sequential).expect("open");
        stream.seek(0, Whence::End);

        assert!(stream.direct_view().is_none());
        let stats = stream.stats();
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn test_read_at_leaves_cursor() {
        let container = container(50);
        let table = InstrumentTable::mount(&container).expect("table");
        let mut stream = Stream::open(&table, 0, StreamMode::Random).expect("open");
        let mut buf = [0u8; 8];

        assert_eq!(stream.read_at(&mut buf, 45), 5);
        assert_eq!(buf[..5], pattern(50)[45..]);
        assert_eq!(stream.tell(), 0);
        assert_eq!(stream.read_at(&mut buf, 50), 0);
        assert_eq!(stream.stats().num_reads, 1);
    }

    #[test]
    fn test_read_samples_whole_only() {
        let container = container(10);
        let table = InstrumentTable::mount(&container).expect("table");
        let mut stream = Stream::open(&table, 0, StreamMode::Sequential).expect("open");
        let mut buf = [0u8; 16];

        assert_eq!(stream.read_samples(&mut buf, 4).expect("read"), 2);
        assert_eq!(stream.tell(), 8);
        assert_eq!(stream.read_samples(&mut buf, 4).expect("read"), 0);
        assert_eq!(stream.tell(), 8);
        assert!(matches!(
            stream.read_samples(&mut buf, 0),
            Err(InstfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reset_stats() {
        let container = container(10);
        let table = InstrumentTable::mount(&container).expect("table");
        let mut stream = Stream::open(&table, 0, StreamMode::Sequential).expect("open");
        let mut buf = [0u8; 4];
        stream.read(&mut buf);
        stream.seek(0, Whence::Start);

        stream.reset_stats();
        assert_eq!(stream.stats(), StreamStats::default());
        assert_eq!(stream.tell(), 0);
    }

    #[test]
    fn test_hints_on_memory_backing() {
        let container = container(100);
        let table = InstrumentTable::mount(&container).expect("table");
        let stream = Stream::open(&table, 0, StreamMode::WillNeed).expect("open");

        assert!(matches!(
            stream.prefetch(0, 10),
            Err(InstfsError::Unsupported(_))
        ));
        assert!(matches!(
            stream.advise(100, 10, AccessHint::Random),
            Err(InstfsError::InvalidArgument(_))
        ));
        assert!(stream.advise(10, 0, AccessHint::Random).is_ok());
        stream.close();
    }

    #[test]
    fn test_invalid_index() {
        let container = container(10);
        let table = InstrumentTable::mount(&container).expect("table");
        assert!(Stream::open(&table, 1, StreamMode::Sequential)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_io_traits() {
        let container = container(1000);
        let table = InstrumentTable::mount(&container).expect("table");
        let mut stream = Stream::open(&table, 0, StreamMode::Sequential).expect("open");

        Seek::seek(&mut stream, SeekFrom::End(-100)).expect("seek");
        let mut tail = Vec::new();
        stream.read_to_end(&mut tail).expect("read");
        assert_eq!(tail, pattern(1000)[900..]);

        let pos = Seek::seek(&mut stream, SeekFrom::Current(-5000)).expect("seek");
        assert_eq!(pos, 0);
        let pos = Seek::seek(&mut stream, SeekFrom::Start(u64::MAX)).expect("seek");
        assert_eq!(pos, 1000);
    }

    #[test]
    fn test_independent_streams() {
        let container = container(100);
        let table = InstrumentTable::mount(&container).expect("table");
        let mut a = Stream::open(&table, 0, StreamMode::Sequential).expect("open");
        let mut b = Stream::open(&table, 0, StreamMode::Random).expect("open");

        a.seek(40, Whence::Start);
        assert_eq!(b.tell(), 0);
        let va = a.direct_view().expect("view");
        let vb = b.direct_view().expect("view");
        assert_eq!(va.as_ptr(), vb[40..].as_ptr());
    }
    #[test]
    fn test_read_frames_uses_entry_layout() {
        let image = ImageBuilder::new()
            .add_instrument(InstrumentSpec::new("stereo", pattern(10)))
            .add_instrument(InstrumentSpec::new("odd", pattern(10)).with_layout(1, 12))
            .add_instrument(InstrumentSpec::new("silent", pattern(10)).with_layout(0, 16))
            .build()
            .expect("build");
        let container = Container::mount_from_memory(image).expect("mount");
        let table = InstrumentTable::mount(&container).expect("table");

        let mut stereo = Stream::open(&table, 0, StreamMode::Sequential).expect("open");
        assert_eq!(stereo.frame_size(), Some(4));
        let mut buf = [0u8; 64];
        assert_eq!(stereo.read_frames(&mut buf).expect("frames"), 2);
        assert_eq!(stereo.tell(), 8);
        assert_eq!(stereo.read_frames(&mut buf).expect("frames"), 0);

        for index in [1, 2] {
            let mut stream = Stream::open(&table, index, StreamMode::Sequential).expect("open");
            assert_eq!(stream.frame_size(), None);
            assert!(matches!(
                stream.read_frames(&mut buf),
                Err(InstfsError::InvalidArgument(_))
            ));
            assert_eq!(stream.tell(), 0);
        }
    }

    #[test]
    fn test_memory_backing_holds_nothing() {
        let container = container(100);
        let table = InstrumentTable::mount(&container).expect("table");
        let range = table.data_range(0).expect("range");
        let stream = Stream::open(&table, 0, StreamMode::Random).expect("open");

        assert_eq!(table.partition().holders(range.start, range.len()), 0);
        stream.close();
        assert_eq!(table.partition().holders(range.start, range.len()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_hint_kept_until_last_stream_closes() {
        use std::io::Write;

        let image = ImageBuilder::new()
            .add_instrument(InstrumentSpec::new("pad", pattern(64 * 1024)))
            .build()
            .expect("build");
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(&image).expect("write");
        file.flush().expect("flush");

        let container = Container::mount(file.path()).expect("mount");
        let table = InstrumentTable::mount(&container).expect("table");
        let range = table.data_range(0).expect("range");
        let holders = || table.partition().holders(range.start, range.len());

        let first = Stream::open(&table, 0, StreamMode::Random).expect("open");
        let second = Stream::open(&table, 0, StreamMode::Random).expect("open");
        assert_eq!(holders(), 2);

        first.close();
        assert_eq!(holders(), 1);
        drop(second);
        assert_eq!(holders(), 0);

        let third = Stream::open(&table, 0, StreamMode::WillNeed).expect("open");
        assert_eq!(holders(), 1);
        third.close();
        assert_eq!(holders(), 0);
    }
}
