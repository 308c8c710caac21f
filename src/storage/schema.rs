use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

#[derive(Debug, Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // SEC-010: Pre-create the database file owner-only so it never exists
        // with default umask permissions.
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().is_none_or(|p| p.as_os_str().is_empty() || p.exists()) {
                // If creation fails, SQLite reports the error at connect_with.
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok();
            }
        }

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. Set through pragma() so every pooled
        // connection inherits it.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // SQLite is single-writer. A shared-cache in-memory database reports
        // table locks instead of waiting on them, so it gets one connection.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| match DatabaseError::from_sqlx(e) {
            DatabaseError::Other(inner) => DatabaseError::Migration(inner.to_string()),
            locked => locked,
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                delete_after TEXT NOT NULL DEFAULT '1month',
                UNIQUE(user_id, slug)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                title TEXT,
                site_link TEXT,
                hub TEXT,
                etag TEXT,
                last_modified TEXT,
                error_count INTEGER NOT NULL DEFAULT 0,
                next_poll_at INTEGER NOT NULL,
                poll_interval_secs INTEGER NOT NULL,
                media_safe INTEGER NOT NULL DEFAULT 0,
                disabled INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                last_polled_at INTEGER,
                UNIQUE(user_id, url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Due-feed scan: WHERE disabled = 0 AND next_poll_at <= ? ORDER BY next_poll_at
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_due ON feeds(disabled, next_poll_at)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                identity_key TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT,
                published INTEGER NOT NULL,
                raw_content TEXT NOT NULL,
                sanitized_content TEXT NOT NULL,
                sanitized_nomedia_content TEXT NOT NULL,
                fetched_at INTEGER NOT NULL,
                UNIQUE(feed_id, identity_key)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_feed_published ON entries(feed_id, published DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Every key an entry answers to: its primary key plus aliases.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entry_keys (
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                identity_key TEXT NOT NULL,
                entry_id INTEGER REFERENCES entries(id) ON DELETE SET NULL,
                PRIMARY KEY(feed_id, identity_key)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // A key whose entry is gone (entry_id NULL) is a tombstone: the entry
        // was purged and must not be ingested again.
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entry_keys_entry ON entry_keys(entry_id)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_entry_states (
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                read INTEGER NOT NULL DEFAULT 0,
                starred INTEGER NOT NULL DEFAULT 0,
                read_later INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY(user_id, entry_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_states_entry ON user_entry_states(entry_id)",
        )
        .execute(&mut *tx)
        .await?;

        // Partial index for unread counts
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_states_unread ON user_entry_states(user_id, entry_id) WHERE read = 0",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
