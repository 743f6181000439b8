//! `google_search` and `web_fetch` tools (§4.7, §1 "agent tool library").
//!
//! Both are thin passthroughs to an external API — the distilled spec
//! lists the agent tool library itself as an out-of-scope external
//! collaborator (§1), so these stay minimal: no retry policy, no caching,
//! no result re-ranking. `web_fetch` reuses `html2text` (already a pack
//! dependency, see `swedishembedded-sven`) to turn a fetched page into the
//! plain text a model turn can consume instead of raw markup.

use super::str_arg;
use crate::error::{AgentError, Result};
use serde_json::{json, Value};
use std::time::Duration;

const MAX_FETCH_BYTES: usize = 200_000;

pub async fn google_search(args: &Value) -> Result<Value> {
    let query = str_arg(args, "query", "google_search")?;

    let (Ok(api_key), Ok(cx)) = (
        std::env::var("GOOGLE_SEARCH_API_KEY"),
        std::env::var("GOOGLE_SEARCH_CX"),
    ) else {
        return Ok(json!({
            "error": "google_search is not configured (GOOGLE_SEARCH_API_KEY / GOOGLE_SEARCH_CX unset)"
        }));
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
        .map_err(|e| AgentError::Other(e.into()))?;

    let response = client
        .get("https://www.googleapis.com/customsearch/v1")
        .query(&[("key", api_key.as_str()), ("cx", cx.as_str()), ("q", query)])
        .send()
        .await
        .map_err(|e| AgentError::Other(e.into()))?;

    let payload: Value = response.json().await.map_err(|e| AgentError::Other(e.into()))?;

    let results: Vec<Value> = payload
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|item| {
            json!({
                "title": item.get("title").cloned().unwrap_or(Value::Null),
                "link": item.get("link").cloned().unwrap_or(Value::Null),
                "snippet": item.get("snippet").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    Ok(json!({ "results": results }))
}

pub async fn web_fetch(args: &Value) -> Result<Value> {
    let url = str_arg(args, "url", "web_fetch")?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
        .map_err(|e| AgentError::Other(e.into()))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AgentError::Other(e.into()))?;
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = response.text().await.map_err(|e| AgentError::Other(e.into()))?;
    let truncated: String = body.chars().take(MAX_FETCH_BYTES).collect();

    let text = if content_type.contains("html") {
        html2text::from_read(truncated.as_bytes(), 120)
    } else {
        truncated
    };

    Ok(json!({ "text": text }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn google_search_without_config_reports_unconfigured() {
        // SAFETY: test-only process-wide env mutation, no concurrent access.
        unsafe {
            std::env::remove_var("GOOGLE_SEARCH_API_KEY");
            std::env::remove_var("GOOGLE_SEARCH_CX");
        }
        let result = google_search(&json!({ "query": "rust" })).await.unwrap();
        assert!(result["error"].as_str().unwrap().contains("not configured"));
    }
}
