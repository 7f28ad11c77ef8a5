//! OS access-pattern hints over the container mapping

use serde::{Deserialize, Serialize};

/// Residency and readahead hint for a byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessHint {
    /// Default kernel behavior
    Normal,
    /// Aggressive forward readahead
    Sequential,
    /// Readahead disabled
    Random,
    /// Populate the range now
    WillNeed,
}

#[cfg(unix)]
impl From<AccessHint> for memmap2::Advice {
    fn from(hint: AccessHint) -> Self {
        match hint {
            AccessHint::Normal => Self::Normal,
            AccessHint::Sequential => Self::Sequential,
            AccessHint::Random => Self::Random,
            AccessHint::WillNeed => Self::WillNeed,
        }
    }
}

/// Clamp `(offset, len)` to a range of `size` bytes
///
/// Returns `None` when `offset` is at or past the end.
pub(crate) fn clamp_range(offset: u64, len: u64, size: usize) -> Option<(usize, usize)> {
    let offset = usize::try_from(offset).ok().filter(|&o| o < size)?;
    let available = size - offset;
    let len = usize::try_from(len).map_or(available, |l| l.min(available));
    Some((offset, len))
}
