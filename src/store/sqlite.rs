//! SQLite implementation of [`StateStore`].
//!
//! Durable storage that survives service restarts. Synchronous rusqlite
//! operations run under `tokio::task::spawn_blocking` so they never stall
//! the async runtime.
//!
//! # Schema Versioning
//!
//! The database uses SQLite's `user_version` pragma to track the schema
//! version. When the schema changes, increment `SCHEMA_VERSION` and add a
//! migration in `run_migrations`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{CrawlState, PrLocator, PrRecord, StateStore, StoreError};
use crate::github::PrLifecycle;
use crate::store::ReviewAnnotation;

/// Current schema version. Increment when making schema changes.
const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed state store.
///
/// Uses a `Mutex<Connection>` because `rusqlite::Connection` is not `Sync`;
/// each operation takes the lock inside a blocking task.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at the given path.
    ///
    /// The database is configured with `journal_mode = WAL` and a busy
    /// timeout so concurrent readers do not fail spuriously.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StoreError::backend("open database", e.to_string()))?;

        // WAL can silently stay off on filesystems without shared-memory
        // support, so verify what SQLite actually selected.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::backend("set journal_mode", e.to_string()))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            return Err(StoreError::backend(
                "set journal_mode",
                format!("expected WAL journal mode, got '{}'", journal_mode),
            ));
        }

        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .map_err(|e| StoreError::backend("configure pragmas", e.to_string()))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database, for tests.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::backend("open in-memory database", e.to_string()))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| StoreError::backend("read schema version", e.to_string()))?;

        if current_version > SCHEMA_VERSION {
            return Err(StoreError::backend(
                "check schema version",
                format!(
                    "database schema version {} is newer than supported version {}",
                    current_version, SCHEMA_VERSION
                ),
            ));
        }

        if current_version < SCHEMA_VERSION {
            Self::run_migrations(&conn, current_version)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|e| StoreError::backend("update schema version", e.to_string()))?;
        }

        Ok(())
    }

    fn run_migrations(conn: &Connection, from_version: i32) -> Result<(), StoreError> {
        if from_version < 1 {
            Self::migrate_v0_to_v1(conn)?;
        }
        Ok(())
    }

    fn migrate_v0_to_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pull_requests (
                owner       TEXT NOT NULL,
                repo        TEXT NOT NULL,
                number      INTEGER NOT NULL,
                state       TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                annotations TEXT NOT NULL,
                PRIMARY KEY (owner, repo, number)
            );

            CREATE TABLE IF NOT EXISTS crawl_state (
                id       INTEGER PRIMARY KEY CHECK (id = 0),
                last_run TEXT,
                running  INTEGER NOT NULL DEFAULT 0
            );

            INSERT OR IGNORE INTO crawl_state (id, last_run, running) VALUES (0, NULL, 0);
            "#,
        )
        .map_err(|e| StoreError::backend("create schema", e.to_string()))
    }

    /// Run a closure against the connection inside a blocking task.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("mutex poisoned");
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::backend(operation, format!("blocking task panicked: {}", e)))?
    }
}

fn row_to_record(
    owner: String,
    repo: String,
    number: u64,
    state: String,
    updated_at: String,
    annotations: String,
) -> Result<PrRecord, StoreError> {
    let key = format!("{}/{}#{}", owner, repo, number);

    let state: PrLifecycle = serde_json::from_value(serde_json::Value::String(state))
        .map_err(|e| StoreError::corrupt(key.clone(), format!("bad state: {}", e)))?;

    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| StoreError::corrupt(key.clone(), format!("bad timestamp: {}", e)))?
        .with_timezone(&Utc);

    let annotations: Vec<ReviewAnnotation> = serde_json::from_str(&annotations)
        .map_err(|e| StoreError::corrupt(key, format!("bad annotations: {}", e)))?;

    Ok(PrRecord {
        owner,
        repo,
        number,
        state,
        updated_at,
        annotations,
    })
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get_record(&self, locator: &PrLocator) -> Result<Option<PrRecord>, StoreError> {
        let locator = locator.clone();
        self.with_conn("get record", move |conn| {
            conn.query_row(
                "SELECT state, updated_at, annotations FROM pull_requests
                 WHERE owner = ?1 AND repo = ?2 AND number = ?3",
                params![locator.owner, locator.repo, locator.number],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StoreError::backend("get record", e.to_string()))?
            .map(|(state, updated_at, annotations)| {
                row_to_record(
                    locator.owner.clone(),
                    locator.repo.clone(),
                    locator.number,
                    state,
                    updated_at,
                    annotations,
                )
            })
            .transpose()
        })
        .await
    }

    async fn put_record(&self, record: PrRecord) -> Result<(), StoreError> {
        self.with_conn("put record", move |conn| {
            let annotations = serde_json::to_string(&record.annotations)
                .map_err(|e| StoreError::backend("put record", e.to_string()))?;

            conn.execute(
                "INSERT INTO pull_requests (owner, repo, number, state, updated_at, annotations)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (owner, repo, number) DO UPDATE SET
                     state = excluded.state,
                     updated_at = excluded.updated_at,
                     annotations = excluded.annotations",
                params![
                    record.owner,
                    record.repo,
                    record.number,
                    record.state.as_str(),
                    record.updated_at.to_rfc3339(),
                    annotations,
                ],
            )
            .map_err(|e| StoreError::backend("put record", e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn all_records(&self) -> Result<Vec<PrRecord>, StoreError> {
        self.with_conn("list records", |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT owner, repo, number, state, updated_at, annotations
                     FROM pull_requests",
                )
                .map_err(|e| StoreError::backend("list records", e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })
                .map_err(|e| StoreError::backend("list records", e.to_string()))?;

            let mut records = Vec::new();
            for row in rows {
                let (owner, repo, number, state, updated_at, annotations) =
                    row.map_err(|e| StoreError::backend("list records", e.to_string()))?;
                records.push(row_to_record(
                    owner, repo, number, state, updated_at, annotations,
                )?);
            }
            Ok(records)
        })
        .await
    }

    async fn crawl_state(&self) -> Result<CrawlState, StoreError> {
        self.with_conn("read crawl state", |conn| {
            conn.query_row(
                "SELECT last_run, running FROM crawl_state WHERE id = 0",
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, bool>(1)?,
                    ))
                },
            )
            .map_err(|e| StoreError::backend("read crawl state", e.to_string()))
            .and_then(|(last_run, running)| {
                let last_run = last_run
                    .map(|raw| {
                        DateTime::parse_from_rfc3339(&raw)
                            .map(|dt| dt.with_timezone(&Utc))
                            .map_err(|e| {
                                StoreError::corrupt("crawl-state", format!("bad timestamp: {}", e))
                            })
                    })
                    .transpose()?;
                Ok(CrawlState { last_run, running })
            })
        })
        .await
    }

    async fn set_crawl_running(&self, running: bool) -> Result<(), StoreError> {
        self.with_conn("set crawl running", move |conn| {
            conn.execute(
                "UPDATE crawl_state SET running = ?1 WHERE id = 0",
                params![running],
            )
            .map_err(|e| StoreError::backend("set crawl running", e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn finish_crawl(&self, finished_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_conn("finish crawl", move |conn| {
            conn.execute(
                "UPDATE crawl_state SET running = 0, last_run = ?1 WHERE id = 0",
                params![finished_at.to_rfc3339()],
            )
            .map_err(|e| StoreError::backend("finish crawl", e.to_string()))?;
            Ok(())
        })
        .await
    }
}
