//! User records
//!
//! Users own tasks and memories. Only the preferences object matters to the
//! workflow; it is surfaced verbatim in every context bundle.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{decode_json, now_millis};

/// User record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub preferences: serde_json::Value,
    pub created_at: i64,
}

/// User repository for database operations
pub struct UserRepository {
    pool: SqlitePool,
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let preferences: String = row.try_get("preferences")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        preferences: decode_json(&preferences),
        created_at: row.try_get("created_at")?,
    })
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user. Usernames are unique.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        preferences: &serde_json::Value,
    ) -> Result<User> {
        let now = now_millis();
        let prefs = serde_json::to_string(preferences)?;

        let result = sqlx::query(
            "INSERT INTO users (username, email, preferences, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(email)
        .bind(&prefs)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create user '{}'", username))?;

        Ok(User {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            email: email.to_string(),
            preferences: preferences.clone(),
            created_at: now,
        })
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, preferences, created_at FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Replace a user's preferences object
    ///
    /// Returns false when the user does not exist.
    pub async fn update_preferences(
        &self,
        user_id: i64,
        preferences: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET preferences = ? WHERE id = ?")
            .bind(serde_json::to_string(preferences)?)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to update user preferences")?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_update_user() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let users = db.users();

        let user = users
            .create_user("ada", "ada@example.com", &json!({"tone": "brief"}))
            .await
            .unwrap();

        let fetched = users.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(fetched.username, "ada");
        assert_eq!(fetched.preferences["tone"], "brief");

        assert!(users
            .update_preferences(user.id, &json!({"tone": "detailed"}))
            .await
            .unwrap());
        let fetched = users.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(fetched.preferences["tone"], "detailed");

        assert!(!users.update_preferences(999, &json!({})).await.unwrap());
        assert!(users.get_user(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let users = db.users();

        users.create_user("ada", "a@example.com", &json!({})).await.unwrap();
        assert!(users
            .create_user("ada", "b@example.com", &json!({}))
            .await
            .is_err());
    }
}
