//! Mount configuration

use crate::stream::StreamMode;
use serde::{Deserialize, Serialize};

/// Options applied when mounting a container and serving the projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    /// Pre-fault the whole mapping at mount (MAP_POPULATE on Linux)
    pub populate: bool,

    /// Access mode for streams the projection attaches to opened files
    pub stream_mode: StreamMode,

    /// Hide metadata names that are not a single path component
    pub strict_names: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            populate: false,
            stream_mode: StreamMode::Sequential,
            strict_names: true,
        }
    }
}

impl MountOptions {
    /// Enable or disable pre-faulting the mapping
    #[must_use]
    pub const fn with_populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    /// Set the access mode for projection streams
    #[must_use]
    pub const fn with_stream_mode(mut self, mode: StreamMode) -> Self {
        self.stream_mode = mode;
        self
    }

    /// Enable or disable hiding unsafe metadata names
    #[must_use]
    pub const fn with_strict_names(mut self, strict: bool) -> Self {
        self.strict_names = strict;
        self
    }
}
