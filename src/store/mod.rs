//! Relational store: SQLite, opened once per process (§4.6).
//!
//! Two facades share the one pool: [`state::StateStore`] owns
//! Channel/Message/RouterState/Task rows, [`session::SessionStore`] owns
//! the group → session-id mapping. Splitting them mirrors the dependency
//! order in which the supervisor builds itself up (state store before
//! session store) without implying separate databases.

pub mod session;
pub mod state;

use crate::error::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;

/// Open the SQLite pool at `path`, creating the file and parent directory if
/// needed, and run the (idempotent) schema creation.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let url = format!("sqlite://{}?mode=rwc", path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    state::StateStore::new(pool.clone()).initialize().await?;
    session::SessionStore::new(pool.clone()).initialize().await?;

    Ok(pool)
}
