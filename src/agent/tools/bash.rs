//! Shell tool (§4.7, §1 "agent tool library").
//!
//! Mirrors the teacher's `tools/shell.rs` shape (spawn via `sh -c`, capture
//! both streams, format a readable result) with one addition required by
//! the distilled spec: the child's environment is stripped of the two
//! secrets the host ever injects into this container, so the agent cannot
//! exfiltrate them through a shell command (§4.7 "sanitize the environment").

use super::{str_arg, ToolContext};
use crate::error::Result;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;

/// Environment variables never forwarded to `bash`-spawned children (§4.7).
const SECRET_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GEMINI_MODEL"];

pub async fn run(args: &Value, ctx: &ToolContext<'_>) -> Result<Value> {
    let command = str_arg(args, "command", "bash")?;

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd.current_dir(ctx.group_dir);
    for key in SECRET_ENV_VARS {
        cmd.env_remove(key);
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let output = cmd.output().await?;

    Ok(json!({
        "exitCode": output.status.code().unwrap_or(-1),
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_command_in_group_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext {
            group_dir: dir.path(),
            ipc_dir: dir.path(),
            channel_id: "c1",
            is_main: false,
        };
        let result = run(&json!({ "command": "pwd" }), &ctx).await.unwrap();
        assert_eq!(result["exitCode"], 0);
        assert!(result["stdout"].as_str().unwrap().trim().ends_with(
            dir.path().file_name().unwrap().to_str().unwrap()
        ));
    }

    #[tokio::test]
    async fn strips_secrets_from_child_env() {
        // SAFETY: test-only process-wide env mutation, no concurrent access.
        unsafe {
            std::env::set_var("GEMINI_API_KEY", "super-secret");
        }
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext {
            group_dir: dir.path(),
            ipc_dir: dir.path(),
            channel_id: "c1",
            is_main: false,
        };
        let result = run(&json!({ "command": "echo \"[$GEMINI_API_KEY]\"" }), &ctx)
            .await
            .unwrap();
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "[]");
        unsafe {
            std::env::remove_var("GEMINI_API_KEY");
        }
    }
}
