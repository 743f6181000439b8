//! Thin client for the Gemini `generateContent` API.
//!
//! The host only ever injects `GEMINI_API_KEY` and `GEMINI_MODEL` into the
//! sandbox (§4.4 "Secret injection") — no other provider config reaches
//! this process. Modeled after the teacher's `llm/manager.rs` split between
//! "holds credentials and an HTTP client" and "the provider-specific wire
//! shape lives elsewhere" (`llm/providers.rs`), but collapsed to a single
//! provider since that is all the sandbox ever talks to.
//!
//! `Content.parts` is kept as raw [`serde_json::Value`] rather than a typed
//! enum of part variants: the model can attach opaque fields (notably
//! `thoughtSignature`) to a part that must round-trip verbatim through the
//! session history (§9 "Opaque provider fields"). Typing the parts would
//! mean re-serializing them on every turn and silently dropping anything
//! this crate doesn't know about.

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// One turn of conversation history, Gemini's own wire shape (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Value>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![json!({ "text": text.into() })],
        }
    }

    pub fn function_response(name: &str, response: Value) -> Value {
        json!({ "functionResponse": { "name": name, "response": response } })
    }
}

/// A function Gemini may call, declared once per turn from the fixed tool
/// set (§4.7 step 2).
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A function call the model asked the sandbox to execute.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

/// The model's reply for one turn: any interleaved text and function
/// calls, plus the raw parts as returned (for verbatim history append).
#[derive(Debug, Clone)]
pub struct ModelTurn {
    pub raw_content: Content,
    pub text: String,
    pub function_calls: Vec<FunctionCall>,
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self { http, api_key, model }
    }

    /// Call `generateContent` with the full history, a system prompt, and
    /// the declared tool set; return the model's next turn (§4.7 step 1).
    pub async fn generate_content(
        &self,
        contents: &[Content],
        system_prompt: &str,
        tools: &[FunctionDeclaration],
    ) -> Result<ModelTurn> {
        let url = format!("{API_BASE}/{}:generateContent", self.model);

        let body = json!({
            "contents": contents,
            "systemInstruction": { "parts": [{ "text": system_prompt }] },
            "tools": [{ "functionDeclarations": tools }],
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::LlmRequest(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::LlmRequest(format!("{status}: {text}")).into());
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AgentError::LlmResponse(e.to_string()))?;

        parse_response(payload)
    }
}

fn parse_response(payload: Value) -> Result<ModelTurn> {
    let content_value = payload
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .cloned()
        .ok_or_else(|| AgentError::LlmResponse("missing candidates[0].content".to_string()))?;

    let raw_content: Content = serde_json::from_value(content_value)
        .map_err(|e| AgentError::LlmResponse(format!("malformed content: {e}")))?;

    let mut text = String::new();
    let mut function_calls = Vec::new();
    for part in &raw_content.parts {
        if let Some(t) = part.get("text").and_then(Value::as_str) {
            text.push_str(t);
        }
        if let Some(fc) = part.get("functionCall") {
            let name = fc
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let args = fc.get("args").cloned().unwrap_or_else(|| json!({}));
            function_calls.push(FunctionCall { name, args });
        }
    }

    Ok(ModelTurn { raw_content, text, function_calls })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_only_response() {
        let payload = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "hi there" }] }
            }]
        });
        let turn = parse_response(payload).unwrap();
        assert_eq!(turn.text, "hi there");
        assert!(turn.function_calls.is_empty());
    }

    #[test]
    fn parses_function_call_and_preserves_opaque_fields() {
        let payload = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{
                        "functionCall": { "name": "bash", "args": { "command": "ls" } },
                        "thoughtSignature": "opaque-blob"
                    }]
                }
            }]
        });
        let turn = parse_response(payload).unwrap();
        assert_eq!(turn.function_calls.len(), 1);
        assert_eq!(turn.function_calls[0].name, "bash");
        // The opaque field must survive in raw_content for history round-trip.
        assert_eq!(
            turn.raw_content.parts[0]["thoughtSignature"],
            json!("opaque-blob")
        );
    }

    #[test]
    fn missing_candidates_is_an_error() {
        assert!(parse_response(json!({})).is_err());
    }
}
