//! Conversation transcript files (§6.4 `conversations/`).
//!
//! Plain dated JSON rather than the teacher's gzipped `TranscriptStep`
//! blobs (`conversation/worker_transcript.rs`): these are read by a human
//! skimming a group's working directory, not stored as a database row
//! under size pressure, so the extra compression step buys nothing here.

use crate::agent::gemini::Content;
use crate::error::Result;
use serde::Serialize;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize)]
struct Transcript<'a> {
    #[serde(rename = "sessionId")]
    session_id: &'a str,
    #[serde(rename = "channelId")]
    channel_id: &'a str,
    #[serde(rename = "generatedAt")]
    generated_at: String,
    contents: &'a [Content],
}

/// Write a dated transcript file under `{group_dir}/conversations/` (§4.7
/// "At loop end").
pub async fn write(
    group_dir: &Path,
    session_id: &str,
    channel_id: &str,
    contents: &[Content],
) -> Result<()> {
    let dir = group_dir.join("conversations");
    fs::create_dir_all(&dir).await?;

    let now = chrono::Utc::now();
    let file_name = format!("{}-{session_id}.json", now.format("%Y-%m-%dT%H-%M-%S"));

    let transcript = Transcript {
        session_id,
        channel_id,
        generated_at: now.to_rfc3339(),
        contents,
    };
    fs::write(dir.join(file_name), serde_json::to_vec_pretty(&transcript)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_one_file_per_call() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "s1", "c1", &[Content::user_text("hi")]).await.unwrap();

        let mut entries = fs::read_dir(dir.path().join("conversations")).await.unwrap();
        let entry = entries.next_entry().await.unwrap().unwrap();
        assert!(entry.file_name().to_string_lossy().ends_with("-s1.json"));
    }
}
