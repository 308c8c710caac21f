use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{DatabaseError, FeedDbRow, NewFeed};
use crate::model::Feed;
use crate::util::{strip_control_chars, validate_url};

/// Column list shared by every feed query; retention comes from the category.
const FEED_COLUMNS: &str = r#"
    f.id, f.user_id, f.category_id, f.name, f.url, f.title, f.site_link, f.hub,
    f.etag, f.last_modified, f.error_count, f.next_poll_at, f.poll_interval_secs,
    f.media_safe, f.disabled, f.last_error,
    COALESCE(c.delete_after, '1month') AS delete_after
"#;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe a user to a feed, returning the feed ID.
    ///
    /// The URL is validated (scheme, host, no private addresses) unless
    /// `allow_private` is set. Subscribing the same user to the same URL
    /// again updates the name and returns the existing ID. New feeds are due
    /// immediately.
    pub async fn insert_feed(
        &self,
        feed: &NewFeed,
        allow_private: bool,
    ) -> Result<i64, DatabaseError> {
        let url = if allow_private {
            url::Url::parse(feed.url.trim())
                .map_err(|e| DatabaseError::Invalid(format!("feed URL: {e}")))?
        } else {
            validate_url(&feed.url).map_err(|e| DatabaseError::Invalid(e.to_string()))?
        };
        if feed.poll_interval <= chrono::Duration::zero() {
            return Err(DatabaseError::Invalid(
                "poll interval must be positive".into(),
            ));
        }
        let name = strip_control_chars(&feed.name).trim().to_owned();
        let name = if name.is_empty() {
            url.to_string()
        } else {
            name
        };

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (user_id, category_id, name, url, next_poll_at, poll_interval_secs, media_safe)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, url) DO UPDATE SET name = excluded.name
            RETURNING id
        "#,
        )
        .bind(feed.user_id)
        .bind(feed.category_id)
        .bind(&name)
        .bind(url.as_str())
        .bind(Utc::now().timestamp())
        .bind(feed.poll_interval.num_seconds())
        .bind(feed.media_safe)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let row: Option<FeedDbRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds f LEFT JOIN categories c ON c.id = f.category_id WHERE f.id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    /// All of a user's feeds, disabled ones included, ordered by name.
    pub async fn list_feeds(&self, user_id: i64) -> Result<Vec<Feed>, DatabaseError> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds f LEFT JOIN categories c ON c.id = f.category_id \
             WHERE f.user_id = ? ORDER BY f.name, f.id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    /// Enabled feeds whose next poll time has passed, most overdue first.
    pub async fn load_due_feeds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Feed>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<FeedDbRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds f LEFT JOIN categories c ON c.id = f.category_id \
             WHERE f.disabled = 0 AND f.next_poll_at <= ? \
             ORDER BY f.next_poll_at, f.id LIMIT ?"
        ))
        .bind(now.timestamp())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    /// Re-enable a disabled feed and make it due immediately.
    ///
    /// Clears the error count and last error. Returns false if the feed does
    /// not exist.
    pub async fn reactivate_feed(&self, feed_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET disabled = 0, error_count = 0, last_error = NULL, next_poll_at = ?
            WHERE id = ?
        "#,
        )
        .bind(Utc::now().timestamp())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(feed_id = feed_id, "Feed reactivated");
        }
        Ok(result.rows_affected() > 0)
    }

    /// Move a feed into a category, or out of any if `category_id` is `None`.
    pub async fn set_feed_category(
        &self,
        feed_id: i64,
        category_id: Option<i64>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET category_id = ? WHERE id = ?")
            .bind(category_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a feed. Entries, identity keys and per-user states cascade.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let user_id = db.create_user("alice").await.unwrap();
        (db, user_id)
    }

    fn new_feed(user_id: i64, url: &str) -> NewFeed {
        NewFeed {
            user_id,
            name: "Example".into(),
            url: url.into(),
            category_id: None,
            poll_interval: Duration::minutes(30),
            media_safe: false,
        }
    }

    #[tokio::test]
    async fn test_insert_feed_is_due_immediately() {
        let (db, user_id) = setup().await;
        let id = db
            .insert_feed(&new_feed(user_id, "https://example.com/feed.xml"), false)
            .await
            .unwrap();

        let due = db
            .load_due_feeds(Utc::now() + Duration::seconds(1), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
        assert_eq!(due[0].poll_interval, Duration::minutes(30));
        assert_eq!(due[0].error_count, 0);
        assert!(!due[0].disabled);
    }

    #[tokio::test]
    async fn test_duplicate_subscription_returns_same_id() {
        let (db, user_id) = setup().await;
        let a = db
            .insert_feed(&new_feed(user_id, "https://example.com/feed.xml"), false)
            .await
            .unwrap();
        let mut renamed = new_feed(user_id, "https://example.com/feed.xml");
        renamed.name = "Renamed".into();
        let b = db.insert_feed(&renamed, false).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(db.get_feed(a).await.unwrap().unwrap().name, "Renamed");
    }

    #[tokio::test]
    async fn test_insert_feed_rejects_private_urls() {
        let (db, user_id) = setup().await;
        let err = db
            .insert_feed(&new_feed(user_id, "http://127.0.0.1/feed"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Invalid(_)));

        assert!(db
            .insert_feed(&new_feed(user_id, "http://127.0.0.1/feed"), true)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_due_feeds_exclude_disabled_and_future() {
        let (db, user_id) = setup().await;
        let a = db
            .insert_feed(&new_feed(user_id, "https://a.example/feed"), false)
            .await
            .unwrap();
        let b = db
            .insert_feed(&new_feed(user_id, "https://b.example/feed"), false)
            .await
            .unwrap();
        let c = db
            .insert_feed(&new_feed(user_id, "https://c.example/feed"), false)
            .await
            .unwrap();

        sqlx::query("UPDATE feeds SET disabled = 1 WHERE id = ?")
            .bind(b)
            .execute(&db.pool)
            .await
            .unwrap();
        sqlx::query("UPDATE feeds SET next_poll_at = ? WHERE id = ?")
            .bind((Utc::now() + Duration::hours(1)).timestamp())
            .bind(c)
            .execute(&db.pool)
            .await
            .unwrap();

        let due = db
            .load_due_feeds(Utc::now() + Duration::seconds(1), 10)
            .await
            .unwrap();
        let ids: Vec<_> = due.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![a]);
    }

    #[tokio::test]
    async fn test_reactivate_feed() {
        let (db, user_id) = setup().await;
        let id = db
            .insert_feed(&new_feed(user_id, "https://example.com/feed.xml"), false)
            .await
            .unwrap();
        sqlx::query("UPDATE feeds SET disabled = 1, error_count = 3, last_error = '404' WHERE id = ?")
            .bind(id)
            .execute(&db.pool)
            .await
            .unwrap();

        assert!(db.reactivate_feed(id).await.unwrap());
        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert!(!feed.disabled);
        assert_eq!(feed.error_count, 0);
        assert_eq!(feed.last_error, None);

        assert!(!db.reactivate_feed(9999).await.unwrap());
    }

    #[tokio::test]
    async fn test_category_retention_flows_into_feed() {
        let (db, user_id) = setup().await;
        let category = db
            .create_category(user_id, "News", crate::model::RetentionPeriod::OneWeek)
            .await
            .unwrap();
        let mut feed = new_feed(user_id, "https://example.com/feed.xml");
        feed.category_id = Some(category);
        let id = db.insert_feed(&feed, false).await.unwrap();

        let loaded = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(loaded.retention, crate::model::RetentionPeriod::OneWeek);

        db.set_feed_category(id, None).await.unwrap();
        let loaded = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(loaded.retention, crate::model::RetentionPeriod::OneMonth);
    }
}
