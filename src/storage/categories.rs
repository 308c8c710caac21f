use chrono::Utc;

use super::schema::Database;
use super::types::{Category, DatabaseError};
use crate::model::RetentionPeriod;
use crate::util::strip_control_chars;

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Create a user, or return the ID of the existing user with that name.
    pub async fn create_user(&self, username: &str) -> Result<i64, DatabaseError> {
        let username = Self::clean_name(username, "username")?;
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO users (username, created_at) VALUES (?, ?)
            ON CONFLICT(username) DO UPDATE SET username = excluded.username
            RETURNING id
        "#,
        )
        .bind(&username)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Delete a user with everything they own: categories, feeds, entries
    /// and entry states.
    pub async fn delete_user(&self, user_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Category Operations
    // ========================================================================

    /// SEC-014: Strip control characters, trim, reject empty names.
    fn clean_name(name: &str, what: &str) -> Result<String, DatabaseError> {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            return Err(DatabaseError::Invalid(format!(
                "{what} cannot be empty or whitespace-only"
            )));
        }
        Ok(trimmed.to_owned())
    }

    fn slugify(name: &str) -> String {
        let mut slug = String::with_capacity(name.len());
        for c in name.chars().flat_map(char::to_lowercase) {
            if c.is_alphanumeric() {
                slug.push(c);
            } else if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug = slug.trim_end_matches('-');
        if slug.is_empty() {
            "category".to_owned()
        } else {
            slug.to_owned()
        }
    }

    /// Create a category for a user, returning its ID.
    ///
    /// The slug is derived from the name and unique per user; creating a
    /// category whose slug already exists updates its retention instead.
    pub async fn create_category(
        &self,
        user_id: i64,
        name: &str,
        retention: RetentionPeriod,
    ) -> Result<i64, DatabaseError> {
        let clean = Self::clean_name(name, "Category name")?;
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO categories (user_id, name, slug, delete_after) VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, slug) DO UPDATE SET delete_after = excluded.delete_after
            RETURNING id
        "#,
        )
        .bind(user_id)
        .bind(&clean)
        .bind(Self::slugify(&clean))
        .bind(retention.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn set_category_retention(
        &self,
        category_id: i64,
        retention: RetentionPeriod,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE categories SET delete_after = ? WHERE id = ?")
            .bind(retention.as_str())
            .bind(category_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("Category"));
        }
        Ok(())
    }

    pub async fn list_categories(&self, user_id: i64) -> Result<Vec<Category>, DatabaseError> {
        let rows: Vec<(i64, i64, String, String, String)> = sqlx::query_as(
            "SELECT id, user_id, name, slug, delete_after FROM categories WHERE user_id = ? ORDER BY name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, user_id, name, slug, delete_after)| Category {
                id,
                user_id,
                name,
                slug,
                retention: delete_after.parse().unwrap_or_default(),
            })
            .collect())
    }

    /// Delete a category. Its feeds become uncategorized (ON DELETE SET NULL).
    pub async fn delete_category(&self, category_id: i64) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(category_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
