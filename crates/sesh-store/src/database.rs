use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::info;

use crate::error::StoreError;
use crate::{functions, schema};

/// Thread-safe SQLite connection wrapper.
/// Uses parking_lot::Mutex for synchronous access (rusqlite is not Sync).
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }

        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        init_schema(&conn)?;

        info!(path = %path.display(), "database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Execute a closure with the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run a closure inside an IMMEDIATE transaction.
    ///
    /// The write lock is taken up front, so a read-then-write sequence inside
    /// `f` cannot interleave with another writer. Commits on `Ok`, rolls back
    /// on `Err` (the transaction is dropped uncommitted).
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            path: self.path.clone(),
        }
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    functions::register(conn).map_err(|e| StoreError::Database(format!("functions: {e}")))?;

    conn.execute_batch(schema::PRAGMAS)
        .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;

    conn.execute_batch(schema::CREATE_TABLES)
        .map_err(|e| StoreError::Database(format!("schema: {e}")))?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|e| StoreError::Database(format!("schema version: {e}")))?;

    match version {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [schema::SCHEMA_VERSION],
            )
            .map_err(|e| StoreError::Database(format!("schema version: {e}")))?;
        }
        Some(v) if v > schema::SCHEMA_VERSION => {
            return Err(StoreError::Conflict(format!(
                "database schema version {v} is newer than supported {}",
                schema::SCHEMA_VERSION
            )));
        }
        Some(1) => {
            conn.execute_batch(&format!("BEGIN IMMEDIATE;{}COMMIT;", schema::MIGRATE_V1_TO_V2))
                .map_err(|e| StoreError::Database(format!("migrate v1 to v2: {e}")))?;
            info!(from = 1, to = 2, "database schema migrated");
        }
        Some(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.path(), Path::new(":memory:"));
    }

    #[test]
    fn schema_version_set() {
        let db = Database::in_memory().unwrap();
        let version: u32 = db
            .with_conn(|conn| {
                conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))
                    .map_err(|e| StoreError::Database(e.to_string()))
            })
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn tables_created() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let tables: Vec<String> = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?;

            for expected in [
                "users",
                "ticks",
                "inferred_sessions",
                "session_member_overrides",
                "session_votes",
                "party_sessions",
            ] {
                assert!(tables.contains(&expected.to_string()), "missing {expected}");
            }
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn version_one_database_gets_party_rollups() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ticks (uuid, user_id, status, climbed_at, explicit_session_id,
                                    created_at)
                 VALUES ('p1', 'u1', 'send', '2024-01-15T10:00:00.000Z', 'party-1',
                         '2024-01-15T10:00:00.000Z')",
                [],
            )?;
            conn.execute("UPDATE schema_version SET version = 1", [])?;
            assert_eq!(crate::parties::PartyRepo::count(conn)?, 0);

            init_schema(conn)?;
            assert_eq!(crate::parties::PartyRepo::count(conn)?, 1);
            let version: u32 =
                conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;
            assert_eq!(version, schema::SCHEMA_VERSION);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn newer_schema_version_is_rejected() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE schema_version SET version = ?1", [schema::SCHEMA_VERSION + 1])?;
            assert!(matches!(init_schema(conn), Err(StoreError::Conflict(_))));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn open_file_database_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sesh.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let db2 = Database::open(&path).unwrap();
        let rows: i64 = db2
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(rows, 1);
        drop(db);
    }

    #[test]
    fn transaction_commits_on_ok() {
        let db = Database::in_memory().unwrap();
        db.transaction(|conn| -> Result<(), StoreError> {
            conn.execute(
                "INSERT INTO users (id, created_at) VALUES ('u1', '2024-01-01T00:00:00.000Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let db = Database::in_memory().unwrap();
        let result: Result<(), StoreError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO users (id, created_at) VALUES ('u1', '2024-01-01T00:00:00.000Z')",
                [],
            )?;
            Err(StoreError::Conflict("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}
