use std::path::PathBuf;

/// Configuration for a tablet.
#[derive(Debug, Clone)]
pub struct TabletConfig {
    /// Directory holding the tablet's commit log, SSTables, and metadata.
    pub dir: PathBuf,

    /// Inclusive lower bound of the owned row-key range.
    pub start_key: String,

    /// Exclusive upper bound. An empty string means positive infinity.
    pub end_key: String,

    /// Fsync the commit log on every append (default: true). Disabling this
    /// trades the durability guarantee for write throughput.
    pub wal_sync: bool,
}

impl Default for TabletConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./tabletdb"),
            start_key: String::new(),
            end_key: String::new(),
            wal_sync: true,
        }
    }
}

impl TabletConfig {
    /// Create a new config with the given directory and the full key range.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the owned row-key range `[start, end)`.
    pub fn range(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start_key = start.into();
        self.end_key = end.into();
        self
    }

    /// Enable or disable fsync-per-append on the commit log.
    pub fn wal_sync(mut self, sync: bool) -> Self {
        self.wal_sync = sync;
        self
    }
}
