use chrono::{DateTime, Utc};
use std::collections::HashSet;

use super::schema::Database;
use super::types::{DatabaseError, EntryDbRow};
use super::PollCommit;
use crate::model::{PollOutcome, RetentionPeriod, StoredEntry};

impl Database {
    // ========================================================================
    // Poll Results
    // ========================================================================

    /// Every identity key registered for a feed, aliases and keys of purged
    /// entries included.
    pub async fn load_known_identity_keys(
        &self,
        feed_id: i64,
    ) -> Result<HashSet<String>, DatabaseError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT identity_key FROM entry_keys WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    /// Apply one poll's result atomically.
    ///
    /// In a single transaction: updates the feed's schedule, health and
    /// validators, inserts the new entries with all their identity keys,
    /// and creates an unread state row for the feed's owner. Entries whose
    /// primary key is already registered, for a stored or a purged entry,
    /// are ignored. Returns the number of entries
    /// actually inserted.
    ///
    /// A permanent redirect target is only persisted if the owner has no
    /// other subscription at that URL.
    pub async fn commit_poll_result(
        &self,
        feed_id: i64,
        commit: &PollCommit,
    ) -> Result<usize, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let polled_at = commit.polled_at.timestamp();

        let last_error = match commit.outcome {
            PollOutcome::Error(kind) => Some(kind.to_string()),
            PollOutcome::Unchanged | PollOutcome::NewEntries(_) => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE feeds SET
                error_count = ?,
                next_poll_at = ?,
                disabled = ?,
                last_error = ?,
                last_polled_at = ?,
                title = COALESCE(?, title),
                site_link = COALESCE(?, site_link),
                hub = COALESCE(?, hub)
            WHERE id = ?
        "#,
        )
        .bind(i64::from(commit.error_count))
        .bind(commit.next_poll_at.timestamp())
        .bind(commit.disabled)
        .bind(last_error)
        .bind(polled_at)
        .bind(commit.title.as_deref())
        .bind(commit.site_link.as_deref())
        .bind(commit.hub.as_deref())
        .bind(feed_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("Feed"));
        }

        if let Some(validators) = &commit.validators {
            sqlx::query("UPDATE feeds SET etag = ?, last_modified = ? WHERE id = ?")
                .bind(validators.etag.as_deref())
                .bind(validators.last_modified.as_deref())
                .bind(feed_id)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(new_url) = &commit.new_url {
            let moved = sqlx::query(
                r#"
                UPDATE feeds SET url = ?
                WHERE id = ? AND NOT EXISTS (
                    SELECT 1 FROM feeds other
                    WHERE other.user_id = feeds.user_id AND other.url = ? AND other.id != ?
                )
            "#,
            )
            .bind(new_url)
            .bind(feed_id)
            .bind(new_url)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

            if moved.rows_affected() > 0 {
                tracing::info!(feed_id = feed_id, url = %new_url, "Feed moved permanently");
            } else {
                tracing::warn!(
                    feed_id = feed_id,
                    url = %new_url,
                    "Permanent redirect target already subscribed, keeping old URL"
                );
            }
        }

        let mut inserted = 0;
        for entry in &commit.new_entries {
            let row: Option<(i64,)> = sqlx::query_as(
                r#"
                INSERT OR IGNORE INTO entries (
                    feed_id, identity_key, title, link, published, raw_content,
                    sanitized_content, sanitized_nomedia_content, fetched_at
                )
                SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9
                WHERE NOT EXISTS (
                    SELECT 1 FROM entry_keys WHERE feed_id = ?1 AND identity_key = ?2
                )
                RETURNING id
            "#,
            )
            .bind(feed_id)
            .bind(entry.identity.storage_key())
            .bind(&entry.title)
            .bind(entry.link.as_deref())
            .bind(entry.published.timestamp())
            .bind(&entry.raw_content)
            .bind(&entry.sanitized.content)
            .bind(&entry.sanitized.no_media)
            .bind(polled_at)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((entry_id,)) = row else {
                tracing::debug!(feed_id = feed_id, key = %entry.identity, "Entry already stored");
                continue;
            };
            inserted += 1;

            for key in entry.all_keys() {
                sqlx::query(
                    "INSERT OR IGNORE INTO entry_keys (feed_id, identity_key, entry_id) VALUES (?, ?, ?)",
                )
                .bind(feed_id)
                .bind(key.storage_key())
                .bind(entry_id)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                r#"
                INSERT OR IGNORE INTO user_entry_states (user_id, entry_id)
                SELECT user_id, ? FROM feeds WHERE id = ?
            "#,
            )
            .bind(entry_id)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// A feed's entries, newest first.
    pub async fn entries_for_feed(
        &self,
        feed_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredEntry>, DatabaseError> {
        let rows: Vec<EntryDbRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, identity_key, title, link, published, raw_content,
                   sanitized_content, sanitized_nomedia_content, fetched_at
            FROM entries
            WHERE feed_id = ?
            ORDER BY published DESC, id DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EntryDbRow::into_entry).collect())
    }

    /// Delete one entry. Its identity keys go with it, so the same entry can
    /// be stored again if a later fetch still lists it.
    pub async fn delete_entry(&self, entry_id: i64) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entry_keys WHERE entry_id = ?")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM entries WHERE id = ?")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete entries older than their feed's category retention period.
    ///
    /// Feeds without a category use the default period. Starred entries are
    /// kept. The identity keys of purged entries stay registered, so an
    /// entry still listed upstream is not stored again. Returns the number of
    /// entries deleted.
    pub async fn purge_expired_entries(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut retention_seconds = String::from("CASE COALESCE(c.delete_after, '1month')");
        for period in RetentionPeriod::ALL {
            if let Some(duration) = period.duration() {
                retention_seconds.push_str(&format!(
                    " WHEN '{}' THEN {}",
                    period.as_str(),
                    duration.num_seconds()
                ));
            }
        }
        retention_seconds.push_str(" ELSE NULL END");

        let result = sqlx::query(&format!(
            r#"
            DELETE FROM entries WHERE id IN (
                SELECT e.id FROM entries e
                JOIN feeds f ON f.id = e.feed_id
                LEFT JOIN categories c ON c.id = f.category_id
                WHERE e.published < ? - ({retention_seconds})
                  AND NOT EXISTS (
                      SELECT 1 FROM user_entry_states s
                      WHERE s.entry_id = e.id AND s.starred = 1
                  )
            )
        "#
        ))
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(deleted = result.rows_affected(), "Purged expired entries");
        }
        Ok(result.rows_affected())
    }
}
