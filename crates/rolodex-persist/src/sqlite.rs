//! SQLite connection management

use rolodex_queue::job::NOTE_JOB_QUEUE_NAME;
use rolodex_queue::ClockHandle;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::backend::StorageError;
use crate::note_store::SqliteNoteStore;
use crate::queue::SqliteQueueBackend;

/// SQLite configuration options
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database URL (e.g., "sqlite:rolodex.db?mode=rwc" or "sqlite::memory:")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Enable WAL journal mode so API and worker processes can share the file
    pub wal_mode: bool,
    /// Enable foreign key enforcement
    pub foreign_keys: bool,
    /// Busy timeout in seconds
    pub busy_timeout_secs: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:rolodex.db?mode=rwc".to_string(),
            max_connections: 5,
            wal_mode: true,
            foreign_keys: true,
            busy_timeout_secs: 30,
        }
    }
}

impl SqliteConfig {
    /// Create config for in-memory database (testing)
    pub fn memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            wal_mode: false,
            foreign_keys: true,
            busy_timeout_secs: 5,
        }
    }

    /// Config for `url`; in-memory URLs get the single-connection memory config.
    pub fn for_url(url: &str) -> Self {
        if is_memory_url(url) {
            Self {
                url: url.to_string(),
                ..Self::memory()
            }
        } else {
            Self {
                url: url.to_string(),
                ..Default::default()
            }
        }
    }

    fn is_memory(&self) -> bool {
        is_memory_url(&self.url)
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// SQLite database shared by the note store and the job broker
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Connect to `url` and run migrations
    pub async fn new(url: &str) -> Result<Self, StorageError> {
        Self::new_with_config(SqliteConfig::for_url(url)).await
    }

    /// Create a new SQLite backend with full configuration
    pub async fn new_with_config(config: SqliteConfig) -> Result<Self, StorageError> {
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        if config.foreign_keys {
            options = options.pragma("foreign_keys", "ON");
        }
        options = options.busy_timeout(Duration::from_secs(config.busy_timeout_secs.into()));

        if config.wal_mode {
            options = options.pragma("journal_mode", "WAL");
        }

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
        if config.is_memory() {
            // Every new connection would open a fresh, empty database
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(
            url = %config.url,
            wal = config.wal_mode,
            max_connections = config.max_connections,
            "Connected to SQLite"
        );

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Internal(format!("Migration failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn is_healthy(&self) -> bool {
        !self.pool.is_closed() && sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub fn notes(&self) -> SqliteNoteStore {
        SqliteNoteStore::new(self.pool.clone())
    }

    /// Broker for the default note-job queue
    pub fn note_queue(&self) -> SqliteQueueBackend {
        self.queue(NOTE_JOB_QUEUE_NAME)
    }

    pub fn queue(&self, name: &str) -> SqliteQueueBackend {
        SqliteQueueBackend::new(self.pool.clone(), name)
    }

    pub fn queue_with_clock(&self, name: &str, clock: ClockHandle) -> SqliteQueueBackend {
        self.queue(name).with_clock(clock)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
