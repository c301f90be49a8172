//! Database configuration.

/// Configuration for opening a log database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Data capacity of a single chunk in bytes (excluding header/footer).
    pub chunk_size: u32,

    /// Whether `flush` also issues a full `sync_all` on chunk files.
    pub sync_on_flush: bool,

    /// Maximum entries buffered in the mutable memtable before it is
    /// swapped out and persisted as a ptable.
    pub max_mem_table_entries: usize,

    /// Upper bound on prepares re-read from the log while disambiguating
    /// a stream-hash collision.
    pub hash_collision_read_limit: usize,

    /// Maximum number of completed chunks whose contents are cached in
    /// memory at once. The writable tail chunk does not count against this.
    pub cached_chunk_limit: usize,

    /// How long (in log positions) tombstoned stream data other than the
    /// tombstone itself is retained before scavenge may remove it.
    /// The tombstone record itself is never scavenged.
    pub tombstone_retention: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            chunk_size: 256 * 1024 * 1024, // 256 MB
            sync_on_flush: true,
            max_mem_table_entries: 1_000_000,
            hash_collision_read_limit: 100,
            cached_chunk_limit: 4,
            tombstone_retention: 0,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the chunk data capacity in bytes.
    #[must_use]
    pub const fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets whether flush also syncs file metadata.
    #[must_use]
    pub const fn sync_on_flush(mut self, value: bool) -> Self {
        self.sync_on_flush = value;
        self
    }

    /// Sets the memtable entry budget.
    #[must_use]
    pub const fn max_mem_table_entries(mut self, value: usize) -> Self {
        self.max_mem_table_entries = value;
        self
    }

    /// Sets the hash-collision read limit.
    #[must_use]
    pub const fn hash_collision_read_limit(mut self, value: usize) -> Self {
        self.hash_collision_read_limit = value;
        self
    }

    /// Sets the cached-chunk budget.
    #[must_use]
    pub const fn cached_chunk_limit(mut self, value: usize) -> Self {
        self.cached_chunk_limit = value;
        self
    }

    /// Sets the tombstone retention window.
    #[must_use]
    pub const fn tombstone_retention(mut self, value: i64) -> Self {
        self.tombstone_retention = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_flush);
        assert_eq!(config.hash_collision_read_limit, 100);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .chunk_size(1024)
            .sync_on_flush(false)
            .max_mem_table_entries(16)
            .cached_chunk_limit(1);

        assert_eq!(config.chunk_size, 1024);
        assert!(!config.sync_on_flush);
        assert_eq!(config.max_mem_table_entries, 16);
        assert_eq!(config.cached_chunk_limit, 1);
    }
}
