//! Persistence for users, categories, feeds, entries and per-user entry
//! state, backed by SQLite through sqlx.
//!
//! The polling pipeline only talks to storage through [`FeedStore`]; the
//! rest of [`Database`]'s API serves the CLI and account management.

mod categories;
mod entries;
mod feeds;
mod schema;
mod types;
mod user_state;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;

use crate::model::{CanonicalEntry, Feed, PollOutcome, Validators};

pub use schema::Database;
pub use types::{Category, DatabaseError, NewFeed};

/// Everything one poll wants persisted, applied atomically.
#[derive(Debug, Clone)]
pub struct PollCommit {
    pub outcome: PollOutcome,
    pub polled_at: DateTime<Utc>,
    /// New validators to store; `None` keeps the current ones
    pub validators: Option<Validators>,
    /// Entries to insert, in storage order
    pub new_entries: Vec<CanonicalEntry>,
    pub error_count: u32,
    pub next_poll_at: DateTime<Utc>,
    pub disabled: bool,
    /// Target of an all-permanent redirect chain
    pub new_url: Option<String>,
    /// Feed-level metadata from the parsed document; `None` keeps the stored value
    pub title: Option<String>,
    pub site_link: Option<String>,
    pub hub: Option<String>,
}

/// The storage operations the polling pipeline depends on.
pub trait FeedStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Enabled feeds with `next_poll_at <= now`, at most `limit`.
    fn load_due_feeds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Feed>, Self::Error>> + Send;

    /// The feed's current stored state, `None` once it has been deleted.
    fn load_feed(
        &self,
        feed_id: i64,
    ) -> impl Future<Output = Result<Option<Feed>, Self::Error>> + Send;

    /// Storage keys of every entry already recorded for the feed.
    fn load_known_identity_keys(
        &self,
        feed_id: i64,
    ) -> impl Future<Output = Result<HashSet<String>, Self::Error>> + Send;

    /// Applies a poll's result; returns the number of entries inserted.
    fn commit_poll_result(
        &self,
        feed_id: i64,
        commit: &PollCommit,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send;
}

impl FeedStore for Database {
    type Error = DatabaseError;

    async fn load_due_feeds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Feed>, DatabaseError> {
        Database::load_due_feeds(self, now, limit).await
    }

    async fn load_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        Database::get_feed(self, feed_id).await
    }

    async fn load_known_identity_keys(
        &self,
        feed_id: i64,
    ) -> Result<HashSet<String>, DatabaseError> {
        Database::load_known_identity_keys(self, feed_id).await
    }

    async fn commit_poll_result(
        &self,
        feed_id: i64,
        commit: &PollCommit,
    ) -> Result<usize, DatabaseError> {
        Database::commit_poll_result(self, feed_id, commit).await
    }
}
