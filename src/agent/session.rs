//! On-disk session persistence for the agent sandbox (§4.6, §4.7).
//!
//! Sessions live inside the group's own mount (`.sessions/{id}.json`, §6.4)
//! rather than in a database — the sandbox only ever sees its one group
//! directory, never the host's SQLite file. The host's
//! [`crate::store::session::SessionStore`] only remembers *which* session
//! id is current for a group; the contents array itself is sandbox-owned.

use crate::agent::gemini::Content;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

fn sessions_dir(group_dir: &Path) -> PathBuf {
    group_dir.join(".sessions")
}

pub fn session_path(group_dir: &Path, session_id: &str) -> PathBuf {
    sessions_dir(group_dir).join(format!("{session_id}.json"))
}

/// Load a prior session's history, or an empty history if `session_id` is
/// `None` or the file doesn't exist yet (fresh session).
pub async fn load(group_dir: &Path, session_id: Option<&str>) -> Result<Vec<Content>> {
    let Some(session_id) = session_id else {
        return Ok(Vec::new());
    };

    let path = session_path(group_dir, session_id);
    match fs::read(&path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}

/// Persist `contents` under `session_id`, creating `.sessions/` if needed.
pub async fn save(group_dir: &Path, session_id: &str, contents: &[Content]) -> Result<()> {
    let dir = sessions_dir(group_dir);
    fs::create_dir_all(&dir).await?;
    let json = serde_json::to_vec_pretty(contents)?;
    fs::write(session_path(group_dir, session_id), json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_session_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let contents = load(dir.path(), Some("nope")).await.unwrap();
        assert!(contents.is_empty());
    }

    #[tokio::test]
    async fn none_session_id_loads_empty_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let contents = load(dir.path(), None).await.unwrap();
        assert!(contents.is_empty());
        assert!(!sessions_dir(dir.path()).exists());
    }

    #[tokio::test]
    async fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let original = vec![Content::user_text("hello")];
        save(dir.path(), "s1", &original).await.unwrap();

        let loaded = load(dir.path(), Some("s1")).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].role, "user");
    }
}
