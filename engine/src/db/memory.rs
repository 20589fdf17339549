//! Long-term memory repository
//!
//! Key/value records scoped to a user and ranked by importance, then by how
//! recently they were surfaced. `last_accessed` is only refreshed through
//! [`MemoryRepository::touch`], never on store.

use anyhow::{bail, Context, Result};
use sdk::MemoryKind;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{decode_json, now_millis};

/// A stored memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub user_id: i64,
    pub kind: MemoryKind,
    pub key: String,
    pub value: serde_json::Value,
    pub importance: i64,
    pub created_at: i64,
    pub last_accessed: i64,
}

const MEMORY_COLUMNS: &str =
    "id, user_id, memory_type, key, value, importance, created_at, last_accessed";

fn memory_from_row(row: &SqliteRow) -> Result<MemoryRecord> {
    let kind: String = row.try_get("memory_type")?;
    let value: String = row.try_get("value")?;
    Ok(MemoryRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: MemoryKind::from(kind),
        key: row.try_get("key")?,
        value: decode_json(&value),
        importance: row.try_get("importance")?,
        created_at: row.try_get("created_at")?,
        last_accessed: row.try_get("last_accessed")?,
    })
}

/// Escape LIKE wildcards so a key fragment matches literally
fn like_pattern(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len() + 2);
    escaped.push('%');
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn check_importance(importance: i64) -> Result<()> {
    if !(1..=10).contains(&importance) {
        bail!("Memory importance must be between 1 and 10, got {}", importance);
    }
    Ok(())
}

/// Repository for user memories
pub struct MemoryRepository {
    pool: SqlitePool,
}

impl MemoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a single memory
    pub async fn store(
        &self,
        user_id: i64,
        kind: &MemoryKind,
        key: &str,
        value: &serde_json::Value,
        importance: i64,
    ) -> Result<MemoryRecord> {
        check_importance(importance)?;
        let now = now_millis();

        let result = sqlx::query(
            "INSERT INTO memories (user_id, memory_type, key, value, importance, created_at, last_accessed) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(importance)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to store memory")?;

        Ok(MemoryRecord {
            id: result.last_insert_rowid(),
            user_id,
            kind: kind.clone(),
            key: key.to_string(),
            value: value.clone(),
            importance,
            created_at: now,
            last_accessed: now,
        })
    }

    /// Store one memory per entry in a single transaction
    pub async fn store_many(
        &self,
        user_id: i64,
        kind: &MemoryKind,
        entries: &serde_json::Map<String, serde_json::Value>,
        importance: i64,
    ) -> Result<usize> {
        check_importance(importance)?;
        let now = now_millis();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin memory transaction")?;

        for (key, value) in entries {
            sqlx::query(
                "INSERT INTO memories (user_id, memory_type, key, value, importance, created_at, last_accessed) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(kind.as_str())
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .bind(importance)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to store memory '{}'", key))?;
        }

        tx.commit().await.context("Failed to commit memories")?;
        Ok(entries.len())
    }

    /// Memories whose key contains `fragment`, most relevant first
    pub async fn find_relevant(
        &self,
        user_id: i64,
        fragment: &str,
        limit: i64,
    ) -> Result<Vec<MemoryRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM memories WHERE user_id = ? AND key LIKE ? ESCAPE '\\' ORDER BY importance DESC, last_accessed DESC, id DESC LIMIT ?",
            MEMORY_COLUMNS
        ))
        .bind(user_id)
        .bind(like_pattern(fragment))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch relevant memories")?;

        rows.iter().map(memory_from_row).collect()
    }

    /// Memories of one kind, most recently accessed first
    pub async fn recent_by_kind(
        &self,
        user_id: i64,
        kind: &MemoryKind,
        limit: i64,
    ) -> Result<Vec<MemoryRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM memories WHERE user_id = ? AND memory_type = ? ORDER BY last_accessed DESC, id DESC LIMIT ?",
            MEMORY_COLUMNS
        ))
        .bind(user_id)
        .bind(kind.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch memories by kind")?;

        rows.iter().map(memory_from_row).collect()
    }

    /// All memories of a user, optionally filtered by kind
    pub async fn list_for_user(
        &self,
        user_id: i64,
        kind: Option<&MemoryKind>,
    ) -> Result<Vec<MemoryRecord>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(&format!(
                    "SELECT {} FROM memories WHERE user_id = ? AND memory_type = ? ORDER BY importance DESC, last_accessed DESC, id DESC",
                    MEMORY_COLUMNS
                ))
                .bind(user_id)
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM memories WHERE user_id = ? ORDER BY importance DESC, last_accessed DESC, id DESC",
                    MEMORY_COLUMNS
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list memories")?;

        rows.iter().map(memory_from_row).collect()
    }

    /// Refresh `last_accessed` on the given memories, returning the timestamp used
    pub async fn touch(&self, ids: &[i64]) -> Result<i64> {
        let now = now_millis();
        if ids.is_empty() {
            return Ok(now);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin touch transaction")?;
        for id in ids {
            sqlx::query("UPDATE memories SET last_accessed = ? WHERE id = ?")
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to touch memory")?;
        }
        tx.commit().await.context("Failed to commit memory touch")?;

        Ok(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database, i64) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let user = db
            .users()
            .create_user("tester", "t@example.com", &json!({}))
            .await
            .unwrap();
        (temp_dir, db, user.id)
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("general"), "%general%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[tokio::test]
    async fn test_relevance_ordering() {
        let (_dir, db, user_id) = setup().await;
        let memories = db.memories();

        memories
            .store(user_id, &MemoryKind::Context, "general_low", &json!(1), 2)
            .await
            .unwrap();
        memories
            .store(user_id, &MemoryKind::Context, "general_high", &json!(2), 9)
            .await
            .unwrap();
        memories
            .store(user_id, &MemoryKind::Context, "travel", &json!(3), 10)
            .await
            .unwrap();

        let found = memories.find_relevant(user_id, "general", 10).await.unwrap();
        let keys: Vec<&str> = found.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["general_high", "general_low"]);
    }

    #[tokio::test]
    async fn test_underscore_is_literal() {
        let (_dir, db, user_id) = setup().await;
        let memories = db.memories();

        memories
            .store(user_id, &MemoryKind::Context, "aXb", &json!(1), 5)
            .await
            .unwrap();
        assert!(memories.find_relevant(user_id, "a_b", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_importance_bounds() {
        let (_dir, db, user_id) = setup().await;
        let memories = db.memories();

        assert!(memories
            .store(user_id, &MemoryKind::Preference, "k", &json!(1), 0)
            .await
            .is_err());
        assert!(memories
            .store(user_id, &MemoryKind::Preference, "k", &json!(1), 11)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_store_many_and_list_by_kind() {
        let (_dir, db, user_id) = setup().await;
        let memories = db.memories();

        let mut entries = serde_json::Map::new();
        entries.insert("general_budget".to_string(), json!(500));
        entries.insert("general_city".to_string(), json!("Lisbon"));
        let stored = memories
            .store_many(user_id, &MemoryKind::Context, &entries, 5)
            .await
            .unwrap();
        assert_eq!(stored, 2);
        memories
            .store(user_id, &MemoryKind::Preference, "diet", &json!("vegan"), 7)
            .await
            .unwrap();

        let context = memories
            .list_for_user(user_id, Some(&MemoryKind::Context))
            .await
            .unwrap();
        assert_eq!(context.len(), 2);
        let all = memories.list_for_user(user_id, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].key, "diet");
    }
}
