//! The bounded function-calling loop (§4.7). Runs entirely inside the
//! sandbox, on one [`crate::wire::ContainerInput`], producing one
//! [`crate::wire::ContainerOutput`].

use crate::agent::gemini::{Content, GeminiClient};
use crate::agent::tools::{self, ToolContext};
use crate::agent::{session, transcript};
use crate::error::Result;
use crate::wire::{AgentResponse, ContainerInput, ContainerOutput, OutputType};
use std::path::PathBuf;

/// Hard cap on function-calling iterations per invocation (§4.7).
pub const MAX_TURNS: u32 = 30;

/// Everything the turn loop needs that isn't already on the wire
/// (§6.1): credentials and the resolved mount paths inside the sandbox.
pub struct AgentConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub group_dir: PathBuf,
    pub ipc_dir: PathBuf,
    pub global_dir: PathBuf,
}

/// Run one turn to completion (or `MAX_TURNS` exhaustion) and return the
/// framed output the host expects. Never panics or propagates an error —
/// an internal failure becomes `ContainerOutput::error` (§6.2 `status`).
pub async fn run_turn(input: ContainerInput, config: AgentConfig) -> ContainerOutput {
    match run_turn_inner(input, config).await {
        Ok(output) => output,
        Err(error) => {
            tracing::error!(%error, "agent turn failed");
            ContainerOutput::error(error.to_string())
        }
    }
}

async fn run_turn_inner(input: ContainerInput, config: AgentConfig) -> Result<ContainerOutput> {
    let mut contents = session::load(&config.group_dir, input.session_id.as_deref()).await?;
    contents.push(build_user_turn(&input));

    let system_prompt = load_system_prompt(&config, input.is_main).await?;
    let client = GeminiClient::new(config.gemini_api_key.clone(), config.gemini_model.clone());
    let declarations = tools::declarations();
    let ctx = ToolContext {
        group_dir: &config.group_dir,
        ipc_dir: &config.ipc_dir,
        channel_id: &input.channel_id,
        is_main: input.is_main,
    };

    let mut final_text: Option<String> = None;
    let mut turn_count = 0u32;

    loop {
        turn_count += 1;
        if turn_count > MAX_TURNS {
            tracing::warn!(turns = turn_count, "agent loop exceeded MAX_TURNS");
            break;
        }

        let model_turn = client
            .generate_content(&contents, &system_prompt, &declarations)
            .await?;
        // Append the model's raw parts verbatim, preserving any opaque
        // provider fields like thoughtSignature (§9).
        contents.push(model_turn.raw_content.clone());

        if model_turn.function_calls.is_empty() {
            final_text = Some(strip_silent_markers(&model_turn.text));
            break;
        }

        let mut response_parts = Vec::with_capacity(model_turn.function_calls.len());
        for call in &model_turn.function_calls {
            let result = tools::dispatch(&call.name, call.args.clone(), &ctx).await;
            response_parts.push(Content::function_response(&call.name, result));
        }
        contents.push(Content { role: "user".to_string(), parts: response_parts });
    }

    let session_id = input
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    session::save(&config.group_dir, &session_id, &contents).await?;
    transcript::write(&config.group_dir, &session_id, &input.channel_id, &contents).await?;

    let result = match final_text {
        Some(text) if !text.is_empty() => AgentResponse {
            output_type: OutputType::Message,
            user_message: Some(text),
            internal_log: None,
        },
        Some(_) => AgentResponse {
            output_type: OutputType::Log,
            user_message: None,
            internal_log: Some("agent turn ended silently ([SILENT] marker)".to_string()),
        },
        None => AgentResponse {
            output_type: OutputType::Log,
            user_message: None,
            internal_log: Some(format!("agent loop exceeded MAX_TURNS ({MAX_TURNS})")),
        },
    };

    Ok(ContainerOutput::success(result, Some(session_id)))
}

fn build_user_turn(input: &ContainerInput) -> Content {
    let mut parts = vec![serde_json::json!({ "text": input.prompt })];
    if let Some(images) = &input.images {
        for image in images {
            parts.push(serde_json::json!({
                "inlineData": { "mimeType": image.mime_type, "data": image.data }
            }));
        }
    }
    Content { role: "user".to_string(), parts }
}

async fn load_system_prompt(config: &AgentConfig, is_main: bool) -> Result<String> {
    let group_prompt = read_optional(&config.group_dir.join("GEMINI.md")).await?;
    if is_main {
        return Ok(group_prompt);
    }
    let global_prompt = read_optional(&config.global_dir.join("GEMINI.md")).await?;
    if global_prompt.is_empty() {
        Ok(group_prompt)
    } else if group_prompt.is_empty() {
        Ok(global_prompt)
    } else {
        Ok(format!("{group_prompt}\n\n{global_prompt}"))
    }
}

async fn read_optional(path: &std::path::Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(error) => Err(error.into()),
    }
}

/// Strip stray `[SILENT]` markers and trim (§4.7 step 3).
fn strip_silent_markers(text: &str) -> String {
    text.replace("[SILENT]", "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_silent_removes_marker_and_trims() {
        assert_eq!(strip_silent_markers("  [SILENT]  "), "");
        assert_eq!(strip_silent_markers("hello [SILENT]"), "hello");
        assert_eq!(strip_silent_markers("no marker here"), "no marker here");
    }

    #[tokio::test]
    async fn load_system_prompt_concatenates_group_and_global_for_non_main() {
        let group_dir = tempfile::tempdir().unwrap();
        let global_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(group_dir.path().join("GEMINI.md"), "group rules").await.unwrap();
        tokio::fs::write(global_dir.path().join("GEMINI.md"), "global rules").await.unwrap();

        let config = AgentConfig {
            gemini_api_key: String::new(),
            gemini_model: String::new(),
            group_dir: group_dir.path().to_path_buf(),
            ipc_dir: PathBuf::new(),
            global_dir: global_dir.path().to_path_buf(),
        };

        let prompt = load_system_prompt(&config, false).await.unwrap();
        assert!(prompt.contains("group rules"));
        assert!(prompt.contains("global rules"));
    }

    #[tokio::test]
    async fn load_system_prompt_ignores_global_for_main() {
        let group_dir = tempfile::tempdir().unwrap();
        let global_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(group_dir.path().join("GEMINI.md"), "group rules").await.unwrap();
        tokio::fs::write(global_dir.path().join("GEMINI.md"), "global rules").await.unwrap();

        let config = AgentConfig {
            gemini_api_key: String::new(),
            gemini_model: String::new(),
            group_dir: group_dir.path().to_path_buf(),
            ipc_dir: PathBuf::new(),
            global_dir: global_dir.path().to_path_buf(),
        };

        let prompt = load_system_prompt(&config, true).await.unwrap();
        assert_eq!(prompt, "group rules");
    }

    #[tokio::test]
    async fn missing_gemini_md_yields_empty_prompt() {
        let group_dir = tempfile::tempdir().unwrap();
        let global_dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            gemini_api_key: String::new(),
            gemini_model: String::new(),
            group_dir: group_dir.path().to_path_buf(),
            ipc_dir: PathBuf::new(),
            global_dir: global_dir.path().to_path_buf(),
        };
        assert_eq!(load_system_prompt(&config, false).await.unwrap(), "");
    }
}
