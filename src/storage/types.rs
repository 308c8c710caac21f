use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::model::{ErrorKind, Feed, RetentionPeriod, StoredEntry, Validators};

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Input rejected before reaching SQLite
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// Referenced row does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// A subscription to create.
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub user_id: i64,
    pub name: String,
    pub url: String,
    pub category_id: Option<i64>,
    /// Base polling interval; the scheduler backs off from here
    pub poll_interval: Duration,
    pub media_safe: bool,
}

/// A category as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub slug: String,
    pub retention: RetentionPeriod,
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for feed queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub user_id: i64,
    pub category_id: Option<i64>,
    pub name: String,
    pub url: String,
    pub title: Option<String>,
    pub site_link: Option<String>,
    pub hub: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub error_count: i64,
    pub next_poll_at: i64,
    pub poll_interval_secs: i64,
    pub media_safe: bool,
    pub disabled: bool,
    pub last_error: Option<String>,
    pub delete_after: String,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        let last_error = self
            .last_error
            .as_deref()
            .and_then(|e| e.parse::<ErrorKind>().ok());
        let retention = self.delete_after.parse().unwrap_or_else(|_| {
            tracing::warn!(
                feed_id = self.id,
                value = %self.delete_after,
                "Unknown retention period, using default"
            );
            RetentionPeriod::default()
        });

        Feed {
            id: self.id,
            user_id: self.user_id,
            category_id: self.category_id,
            name: self.name,
            url: self.url,
            title: self.title,
            site_link: self.site_link,
            hub: self.hub,
            validators: Validators {
                etag: self.etag,
                last_modified: self.last_modified,
            },
            error_count: u32::try_from(self.error_count.max(0)).unwrap_or(u32::MAX),
            next_poll_at: from_unix(self.next_poll_at),
            poll_interval: Duration::seconds(self.poll_interval_secs),
            media_safe: self.media_safe,
            disabled: self.disabled,
            last_error,
            retention,
        }
    }
}

/// Internal row type for entry queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub identity_key: String,
    pub title: String,
    pub link: Option<String>,
    pub published: i64,
    pub raw_content: String,
    pub sanitized_content: String,
    pub sanitized_nomedia_content: String,
    pub fetched_at: i64,
}

impl EntryDbRow {
    pub(crate) fn into_entry(self) -> StoredEntry {
        StoredEntry {
            id: self.id,
            feed_id: self.feed_id,
            identity_key: self.identity_key,
            title: self.title,
            link: self.link,
            published: from_unix(self.published),
            raw_content: self.raw_content,
            sanitized_content: self.sanitized_content,
            sanitized_no_media_content: self.sanitized_nomedia_content,
            fetched_at: from_unix(self.fetched_at),
        }
    }
}

/// Timestamps are stored as Unix seconds; out-of-range values clamp to the epoch.
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
