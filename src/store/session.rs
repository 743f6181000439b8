//! Session store: group folder -> opaque agent session id (§3, §4.6).

use crate::GroupFolder;
use crate::error::Result;
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};

#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                group_folder TEXT PRIMARY KEY,
                session_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create sessions table")?;
        Ok(())
    }

    pub async fn get(&self, group_folder: &GroupFolder) -> Result<Option<String>> {
        let row = sqlx::query("SELECT session_id FROM sessions WHERE group_folder = ?")
            .bind(group_folder.as_ref())
            .fetch_optional(&self.pool)
            .await
            .context("failed to read session")?;
        Ok(row.map(|r| r.try_get::<String, _>("session_id").unwrap_or_default()))
    }

    pub async fn set(&self, group_folder: &GroupFolder, session_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (group_folder, session_id) VALUES (?, ?)
            ON CONFLICT(group_folder) DO UPDATE SET session_id = excluded.session_id
            "#,
        )
        .bind(group_folder.as_ref())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("failed to write session")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn session_round_trips_and_overwrites() {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SessionStore::new(pool);
        store.initialize().await.unwrap();

        let folder = GroupFolder::from("g1");
        assert_eq!(store.get(&folder).await.unwrap(), None);

        store.set(&folder, "s1").await.unwrap();
        assert_eq!(store.get(&folder).await.unwrap(), Some("s1".to_string()));

        store.set(&folder, "s2").await.unwrap();
        assert_eq!(store.get(&folder).await.unwrap(), Some("s2".to_string()));
    }
}
