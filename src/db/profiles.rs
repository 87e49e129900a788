use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite};

use crate::db::models::ProfileRow;
use crate::error::Result;
use crate::types::{now_ms, Profile};

/// Display names for user ids handed to us by the identity provider.
#[derive(Clone)]
pub struct ProfileStore {
    pool: sqlx::SqlitePool,
}

impl ProfileStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the profile on first use; afterwards only the display name changes.
    pub async fn upsert(&self, user_id: &str, display_name: Option<&str>) -> Result<Profile> {
        let now = now_ms();
        let display_name = display_name.map(str::trim).filter(|s| !s.is_empty());

        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            INSERT INTO profiles (id, display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                updated_at = excluded.updated_at
            RETURNING id, display_name, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(display_name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, display_name, created_at, updated_at FROM profiles WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Profile::from))
    }

    /// user_id → display name, for the ids that have one set.
    pub async fn display_names(&self, user_ids: &[String]) -> Result<HashMap<String, String>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, display_name, created_at, updated_at FROM profiles \
             WHERE display_name IS NOT NULL AND id IN (",
        );
        let mut ids = qb.separated(", ");
        for id in user_ids {
            ids.push_bind(id.as_str());
        }
        ids.push_unseparated(")");

        let rows = qb
            .build_query_as::<ProfileRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| r.display_name.map(|name| (r.id, name)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn upsert_keeps_created_at_and_updates_name() {
        let store = ProfileStore::new(test_pool().await);

        let first = store.upsert("alice", Some("Alice")).await.unwrap();
        let second = store.upsert("alice", Some("  Alice B  ")).await.unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.display_name.as_deref(), Some("Alice B"));
        assert_eq!(store.get("alice").await.unwrap(), Some(second));
        assert!(store.get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn display_names_skips_unnamed_users() {
        let store = ProfileStore::new(test_pool().await);
        store.upsert("alice", Some("Alice")).await.unwrap();
        store.upsert("bob", Some("   ")).await.unwrap();

        let names = store
            .display_names(&["alice".to_string(), "bob".to_string(), "carol".to_string()])
            .await
            .unwrap();

        assert_eq!(names.len(), 1);
        assert_eq!(names.get("alice").map(String::as_str), Some("Alice"));
        assert!(store.display_names(&[]).await.unwrap().is_empty());
    }
}
