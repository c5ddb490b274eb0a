use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{types::Type, Connection, Row, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::DatabaseError;

/// Shared handle to the clinic database.
///
/// A single connection sits behind a mutex; every operation runs on the
/// blocking pool so async handlers never hold the lock across an await.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and run pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path.as_ref())?;
        configure_pragmas(&conn, true)?;
        run_migrations(&conn)?;
        info!("Opened database at {}", path.as_ref().display());
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        configure_pragmas(&conn, false)?;
        run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run a read-only closure against the connection.
    pub async fn read<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DatabaseError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn);
            f(&guard)
        })
        .await
        .map_err(|e| DatabaseError::TaskFailed(e.to_string()))?
    }

    /// Run a closure inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The transaction commits when the closure returns `Ok` and rolls back
    /// otherwise, so check-then-insert sequences are atomic.
    pub async fn write<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DatabaseError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn);
            let tx = guard
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(DatabaseError::from)?;
            let value = f(&tx)?;
            tx.commit().map_err(DatabaseError::from)?;
            Ok(value)
        })
        .await
        .map_err(|e| DatabaseError::TaskFailed(e.to_string()))?
    }

    /// Liveness check used by `/health`.
    pub async fn ping(&self) -> bool {
        self.read(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(DatabaseError::from)
        })
        .await
        .is_ok()
    }
}

/// A closure that panicked left no open transaction behind (the guard's drop
/// rolls it back), so the connection is still usable after poisoning.
fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| {
        warn!("Recovering database connection after a panicked operation");
        conn.clear_poison();
        poisoned.into_inner()
    })
}

fn configure_pragmas(conn: &Connection, on_disk: bool) -> Result<(), DatabaseError> {
    if on_disk {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    }
    conn.execute_batch(
        "PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = current_version(conn);

    let migrations: Vec<(i64, &str)> = vec![(1, include_str!("../migrations/001_initial.sql"))];

    for (version, sql) in migrations {
        if version > current_version {
            info!("Running migration v{version}");
            conn.execute_batch(sql).map_err(|e| DatabaseError::MigrationFailed {
                version,
                reason: e.to_string(),
            })?;
        }
    }

    debug!("Schema at v{}", current_version.max(1));
    Ok(())
}

/// Current schema version (0 if no schema exists yet)
fn current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i64>>(0)
    })
    .ok()
    .flatten()
    .unwrap_or(0)
}

/// Read a TEXT column into any `FromStr` type, typically a domain enum.
pub fn parse_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.get(column)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            format!("column {column}: {e}").into(),
        )
    })
}

/// Like [`parse_column`] for nullable TEXT columns.
pub fn parse_optional_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = row.get(column)?;
    raw.map(|raw| {
        raw.parse::<T>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                Type::Text,
                format!("column {column}: {e}").into(),
            )
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_count(conn: &Connection) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn in_memory_database_has_schema() {
        let db = Database::open_in_memory().unwrap();
        let count = db
            .read(|conn| Ok::<_, DatabaseError>(table_count(conn)))
            .await
            .unwrap();
        assert_eq!(count, 8);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert!(run_migrations(&conn).is_ok());
        assert_eq!(current_version(&conn), 1);
    }

    #[tokio::test]
    async fn foreign_keys_enabled() {
        let db = Database::open_in_memory().unwrap();
        let fk: i64 = db
            .read(|conn| {
                conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                    .map_err(DatabaseError::from)
            })
            .await
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[tokio::test]
    async fn failed_write_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let now = chrono::Utc::now();

        let result: Result<(), DatabaseError> = db
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, email, password_hash, first_name, last_name, role, created_at, updated_at)
                     VALUES (?1, 'a@clinic.test', 'x', 'A', 'B', 'admin', ?2, ?2)",
                    rusqlite::params![uuid::Uuid::new_v4(), now],
                )?;
                // Second insert with the same email violates UNIQUE
                conn.execute(
                    "INSERT INTO users (id, email, password_hash, first_name, last_name, role, created_at, updated_at)
                     VALUES (?1, 'a@clinic.test', 'x', 'A', 'B', 'admin', ?2, ?2)",
                    rusqlite::params![uuid::Uuid::new_v4(), now],
                )?;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_unique_violation());

        let users: i64 = db
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
                    .map_err(DatabaseError::from)
            })
            .await
            .unwrap();
        assert_eq!(users, 0);
    }

    #[tokio::test]
    async fn panicking_operation_does_not_take_the_database_down() {
        let db = Database::open_in_memory().unwrap();

        let result: Result<(), DatabaseError> = db
            .write(|conn| {
                conn.execute("DELETE FROM schema_version", [])?;
                panic!("operation failed midway");
            })
            .await;
        assert!(matches!(result, Err(DatabaseError::TaskFailed(_))));

        let version = db
            .read(|conn| Ok::<_, DatabaseError>(current_version(conn)))
            .await
            .unwrap();
        assert_eq!(version, 1);
        assert!(db.ping().await);
    }

    #[test]
    fn file_database_persists_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clinic.db");
        drop(Database::open(&path).unwrap());

        let conn = Connection::open(&path).unwrap();
        assert_eq!(current_version(&conn), 1);
    }
}
