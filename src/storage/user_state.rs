use super::schema::Database;
use super::types::DatabaseError;
use crate::model::UserEntryState;

/// Flag columns of `user_entry_states`.
#[derive(Debug, Clone, Copy)]
enum Flag {
    Read,
    Starred,
    ReadLater,
}

impl Flag {
    fn column(self) -> &'static str {
        match self {
            Flag::Read => "read",
            Flag::Starred => "starred",
            Flag::ReadLater => "read_later",
        }
    }
}

impl Database {
    // ========================================================================
    // Per-user Entry State
    // ========================================================================

    /// A user's flags for an entry. Entries without a state row are unread
    /// and unflagged.
    pub async fn entry_state(
        &self,
        user_id: i64,
        entry_id: i64,
    ) -> Result<UserEntryState, DatabaseError> {
        let row: Option<(bool, bool, bool)> = sqlx::query_as(
            "SELECT read, starred, read_later FROM user_entry_states WHERE user_id = ? AND entry_id = ?",
        )
        .bind(user_id)
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(read, starred, read_later)| UserEntryState {
                read,
                starred,
                read_later,
            })
            .unwrap_or_default())
    }

    async fn set_flag(
        &self,
        user_id: i64,
        entry_id: i64,
        flag: Flag,
        value: bool,
    ) -> Result<(), DatabaseError> {
        let column = flag.column();
        sqlx::query(&format!(
            "INSERT INTO user_entry_states (user_id, entry_id, {column}) VALUES (?, ?, ?) \
             ON CONFLICT(user_id, entry_id) DO UPDATE SET {column} = excluded.{column}"
        ))
        .bind(user_id)
        .bind(entry_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_entry_read(&self, user_id: i64, entry_id: i64) -> Result<(), DatabaseError> {
        self.set_flag(user_id, entry_id, Flag::Read, true).await
    }

    pub async fn mark_entry_unread(
        &self,
        user_id: i64,
        entry_id: i64,
    ) -> Result<(), DatabaseError> {
        self.set_flag(user_id, entry_id, Flag::Read, false).await
    }

    pub async fn set_entry_starred(
        &self,
        user_id: i64,
        entry_id: i64,
        starred: bool,
    ) -> Result<(), DatabaseError> {
        self.set_flag(user_id, entry_id, Flag::Starred, starred).await
    }

    pub async fn set_entry_read_later(
        &self,
        user_id: i64,
        entry_id: i64,
        read_later: bool,
    ) -> Result<(), DatabaseError> {
        self.set_flag(user_id, entry_id, Flag::ReadLater, read_later)
            .await
    }

    /// Mark every entry of a feed read for a user. Returns the number of
    /// entries that changed state.
    pub async fn mark_feed_read(&self, user_id: i64, feed_id: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_entry_states (user_id, entry_id, read)
            SELECT ?, id, 1 FROM entries WHERE feed_id = ?
            ON CONFLICT(user_id, entry_id) DO UPDATE SET read = 1 WHERE read = 0
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn unread_count(&self, user_id: i64, feed_id: i64) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM entries e
            LEFT JOIN user_entry_states s ON s.entry_id = e.id AND s.user_id = ?
            WHERE e.feed_id = ? AND COALESCE(s.read, 0) = 0
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}
