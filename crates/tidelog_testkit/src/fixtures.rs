//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use tempfile::TempDir;
use tidelog_core::{AppendResult, Config, EventData, ExpectedVersion, LogDb};

/// A sensible default configuration for tests: small chunks so rotation
/// happens quickly, no fsync so tests stay fast.
pub fn test_config() -> Config {
    Config::default()
        .chunk_size(16 * 1024)
        .sync_on_flush(false)
        .max_mem_table_entries(64)
        .cached_chunk_limit(2)
}

/// A test database with automatic cleanup.
pub struct TestDb {
    /// The open database.
    pub db: LogDb,
    config: Config,
    temp_dir: TempDir,
}

impl TestDb {
    /// Creates a database in a fresh temp directory with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Creates a database in a fresh temp directory.
    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let db =
            LogDb::open(temp_dir.path(), config.clone()).expect("failed to open test database");
        Self {
            db,
            config,
            temp_dir,
        }
    }

    /// Closes and reopens the database over the same directory.
    pub fn reopen(self) -> Self {
        let Self {
            db,
            config,
            temp_dir,
        } = self;
        db.close().expect("failed to close test database");
        let db =
            LogDb::open(temp_dir.path(), config.clone()).expect("failed to reopen test database");
        Self {
            db,
            config,
            temp_dir,
        }
    }

    /// The database directory.
    pub fn path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDb {
    type Target = LogDb;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&LogDb) -> R,
{
    let test_db = TestDb::new();
    f(&test_db.db)
}

/// Appends `count` small events to a stream, panicking on any refusal.
pub fn fill_stream(db: &LogDb, stream_id: &str, count: usize) {
    for n in 0..count {
        let result = db
            .append_to_stream(
                stream_id,
                ExpectedVersion::Any,
                vec![EventData::new("test-event", format!("e{n}").into_bytes())],
            )
            .expect("append failed");
        assert!(
            matches!(result, AppendResult::Success { .. }),
            "append refused: {result:?}"
        );
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A database with one stream holding `count` events.
    pub fn populated_stream(count: usize) -> (TestDb, &'static str) {
        let test_db = TestDb::new();
        fill_stream(&test_db.db, "populated-1", count);
        (test_db, "populated-1")
    }

    /// A database with enough bulky events that several chunks exist.
    pub fn multi_chunk_database(streams: usize) -> TestDb {
        let test_db = TestDb::new();
        for s in 0..streams {
            let stream = format!("bulk-{s}");
            for _ in 0..8 {
                test_db
                    .db
                    .append_to_stream(
                        &stream,
                        ExpectedVersion::Any,
                        vec![EventData::new("bulk-event", vec![b'x'; 4096])],
                    )
                    .expect("append failed");
            }
        }
        test_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidelog_core::ReadStreamResult;

    #[test]
    fn fixture_roundtrips_through_reopen() {
        let (test_db, stream) = scenarios::populated_stream(5);
        let test_db = test_db.reopen();
        match test_db.read_stream_forward(stream, 0, 10).unwrap() {
            ReadStreamResult::Success { events, .. } => assert_eq!(events.len(), 5),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn with_temp_db_runs_the_closure() {
        let position = with_temp_db(|db| {
            fill_stream(db, "s", 1);
            db.position()
        });
        assert!(position > 0);
    }
}
