use rusqlite::{Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::error::{StudioError, StudioResult};

/// Default slot capacity, matching what browsers give local storage
pub const DEFAULT_CAPACITY_BYTES: usize = 5 * 1024 * 1024;

/// A named-slot key/value store.
///
/// Each slot holds one serialized value. Writes may fail with
/// [`StudioError::Persistence`] when the value does not fit.
pub trait SlotStore {
    /// Read a slot, `None` if it was never written
    fn read_slot(&self, key: &str) -> StudioResult<Option<String>>;

    /// Replace a slot's value
    fn write_slot(&mut self, key: &str, value: &str) -> StudioResult<()>;
}

/// The Library manages the SQLite file backing local persistence.
/// It stores one row per named slot (currently just the creation history).
pub struct Library {
    conn: Connection,
    db_path: PathBuf,
    capacity_bytes: usize,
}

impl Library {
    /// Open or create the database at `db_path`
    pub fn open(db_path: &Path, capacity_bytes: usize) -> StudioResult<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        tracing::info!("library opened at {}", db_path.display());

        let mut library = Library {
            conn,
            db_path: db_path.to_path_buf(),
            capacity_bytes,
        };
        library.init_schema()?;

        Ok(library)
    }

    /// A throwaway library that lives only as long as this value
    pub fn in_memory(capacity_bytes: usize) -> StudioResult<Self> {
        let mut library = Library {
            conn: Connection::open_in_memory()?,
            db_path: PathBuf::from(":memory:"),
            capacity_bytes,
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Where the database lives when no data dir is configured
    pub fn default_db_path() -> StudioResult<PathBuf> {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StudioError::Config("could not determine user data directory".into()))?;

        path.push("masterbot");
        path.push("masterbot.db");
        Ok(path)
    }

    /// Create the slots table if it doesn't exist.
    fn init_schema(&mut self) -> StudioResult<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS slots (
                key             TEXT PRIMARY KEY,
                value           TEXT NOT NULL,
                updated_at      INTEGER NOT NULL
            )",
            [],
        )?;

        tracing::debug!("library schema initialized");
        Ok(())
    }

    /// Get the path to the database file
    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Bytes used by every slot except `key`
    fn bytes_used_excluding(&self, key: &str) -> StudioResult<usize> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM slots WHERE key != ?1",
            [key],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(used).unwrap_or(usize::MAX))
    }
}

impl SlotStore for Library {
    fn read_slot(&self, key: &str) -> StudioResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM slots WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn write_slot(&mut self, key: &str, value: &str) -> StudioResult<()> {
        let needed = self.bytes_used_excluding(key)? + key.len() + value.len();
        if needed > self.capacity_bytes {
            return Err(StudioError::Persistence(format!(
                "slot '{}' needs {} bytes, capacity is {}",
                key, needed, self.capacity_bytes
            )));
        }

        let result = self.conn.execute(
            "INSERT INTO slots (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key, value, chrono::Utc::now().timestamp_millis()],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::DiskFull => {
                Err(StudioError::Persistence(format!("disk full while writing slot '{key}'")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .field("capacity_bytes", &self.capacity_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_slot_reads_none() {
        let library = Library::in_memory(1024).unwrap();
        assert_eq!(library.read_slot("masterbot-history").unwrap(), None);
    }

    #[test]
    fn test_write_then_overwrite() {
        let mut library = Library::in_memory(1024).unwrap();
        library.write_slot("k", "[1]").unwrap();
        library.write_slot("k", "[1,2]").unwrap();
        assert_eq!(library.read_slot("k").unwrap().as_deref(), Some("[1,2]"));
    }

    #[test]
    fn test_write_over_capacity_is_persistence_error() {
        let mut library = Library::in_memory(16).unwrap();
        library.write_slot("k", "small").unwrap();

        let err = library.write_slot("k", "this value is far too large").unwrap_err();
        assert!(matches!(err, StudioError::Persistence(_)));

        // The previous value survives the failed write
        assert_eq!(library.read_slot("k").unwrap().as_deref(), Some("small"));
    }

    #[test]
    fn test_file_backed_library_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("masterbot.db");

        {
            let mut library = Library::open(&path, DEFAULT_CAPACITY_BYTES).unwrap();
            library.write_slot("masterbot-history", "[]").unwrap();
        }

        let library = Library::open(&path, DEFAULT_CAPACITY_BYTES).unwrap();
        assert_eq!(library.path(), &path);
        assert_eq!(library.read_slot("masterbot-history").unwrap().as_deref(), Some("[]"));
    }
}
