//! SQLite handle shared by the queue, the markers and the citation store
//!
//! One database file holds all durable crawl state. WAL mode lets readers
//! proceed during writes; concurrent writers (threads or processes) are
//! serialized by SQLite itself, and a writer that loses the race gets
//! `SQLITE_BUSY`, which is retried here as a write conflict.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use citecrawl_core::{PersistenceError, RetryPolicy};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tokio::runtime::Handle;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS processed_papers (
    paper_id TEXT PRIMARY KEY,
    fields_of_study TEXT NOT NULL,
    processed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS citations (
    citing_id TEXT NOT NULL,
    cited_id TEXT NOT NULL,
    PRIMARY KEY (citing_id, cited_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_citations_cited ON citations(cited_id);

-- Pending work. visible_at doubles as the lease deadline while leased.
CREATE TABLE IF NOT EXISTS task_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    paper_id TEXT NOT NULL UNIQUE,
    payload TEXT NOT NULL,
    visible_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    lease INTEGER
);

CREATE INDEX IF NOT EXISTS idx_task_queue_visible ON task_queue(visible_at, seq);

-- Bloom filter geometry, fixed at first use
CREATE TABLE IF NOT EXISTS membership_filters (
    name TEXT PRIMARY KEY,
    num_bits INTEGER NOT NULL,
    num_hashes INTEGER NOT NULL
);

-- Sparse bit array: only words with at least one set bit are stored
CREATE TABLE IF NOT EXISTS membership_words (
    name TEXT NOT NULL,
    word INTEGER NOT NULL,
    bits INTEGER NOT NULL,
    PRIMARY KEY (name, word)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS crawl_counters (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    processed_papers INTEGER NOT NULL DEFAULT 0,
    citation_edges INTEGER NOT NULL DEFAULT 0,
    started_at INTEGER,
    last_processed_at INTEGER,
    last_edge_at INTEGER
);

INSERT OR IGNORE INTO crawl_counters (id) VALUES (1);
"#;

const RESET_SQL: &str = r#"
DELETE FROM processed_papers;
DELETE FROM citations;
DELETE FROM task_queue;
DELETE FROM membership_words;
UPDATE crawl_counters
SET processed_papers = 0, citation_edges = 0, started_at = NULL,
    last_processed_at = NULL, last_edge_at = NULL
WHERE id = 1;
"#;

/// Largest number of bind parameters put in one statement.
pub(crate) const MAX_BINDS: usize = 900;

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub max_connections: u32,
    /// How long SQLite itself waits on a locked database before BUSY.
    pub busy_timeout: Duration,
    pub acquire_timeout: Duration,
    /// Transaction retry on write conflicts.
    pub retry: RetryPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(30),
            retry: RetryPolicy::store(),
        }
    }
}

/// Connection pool plus the runtime handle used to drive it from sync code.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    handle: Handle,
    retry: RetryPolicy,
}

impl Database {
    /// Open (creating if needed) the database at `path` and apply the schema.
    ///
    /// Failure here is fatal for a crawl, so errors carry the path.
    pub fn open(path: &Path, handle: Handle, options: &StoreOptions) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let connect = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout);

        let pool = handle
            .block_on(
                SqlitePoolOptions::new()
                    .max_connections(options.max_connections.max(1))
                    .acquire_timeout(options.acquire_timeout)
                    .connect_with(connect),
            )
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        handle
            .block_on(sqlx::raw_sql(SCHEMA_SQL).execute(&pool))
            .context("Failed to initialize database schema")?;

        log::debug!("Opened crawl database {}", path.display());
        Ok(Self {
            pool,
            handle,
            retry: options.retry,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.handle.block_on(fut)
    }

    /// Run `op` to completion, retrying write conflicts with the store
    /// policy. `op` is re-invoked from scratch on every attempt, so it must
    /// open (and commit) its own transaction.
    pub fn with_retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        self.retry
            .run(label, || self.handle.block_on(op()), is_conflict)
            .map_err(|e| classify(e, self.retry.attempts()))
    }

    /// Wipe all crawl state in one transaction (fresh start). Marker
    /// geometry is kept.
    pub fn reset_crawl_state(&self) -> Result<(), PersistenceError> {
        let pool = &self.pool;
        self.with_retry("reset crawl state", || async move {
            let mut tx = pool.begin().await?;
            sqlx::raw_sql(RESET_SQL).execute(&mut *tx).await?;
            sqlx::query("UPDATE crawl_counters SET started_at = ? WHERE id = 1")
                .bind(now_millis())
                .execute(&mut *tx)
                .await?;
            tx.commit().await
        })
    }

    pub fn close(&self) {
        self.handle.block_on(self.pool.close());
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// BUSY/LOCKED (any extended code) or no free connection in time.
pub(crate) fn is_conflict(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => primary_code(db.as_ref()).is_some_and(|c| c == 5 || c == 6),
        _ => false,
    }
}

fn primary_code(db: &dyn sqlx::error::DatabaseError) -> Option<i32> {
    db.code()?.parse::<i32>().ok().map(|c| c & 0xff)
}

pub(crate) fn classify(e: sqlx::Error, attempts: u32) -> PersistenceError {
    if is_conflict(&e) {
        return PersistenceError::Conflict {
            attempts,
            message: e.to_string(),
        };
    }
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_) => PersistenceError::Unavailable(e.to_string()),
        // IOERR, FULL, CANTOPEN
        sqlx::Error::Database(db) if matches!(primary_code(db.as_ref()), Some(10 | 13 | 14)) => {
            PersistenceError::Unavailable(e.to_string())
        }
        _ => PersistenceError::Schema(e.to_string()),
    }
}

/// `?, ?, ...` with `n` placeholders.
pub(crate) fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 3);
    for i in 0..n {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}
