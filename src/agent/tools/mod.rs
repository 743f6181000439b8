//! Tool dispatch table for the agent function-calling loop (§4.7 step 2).
//!
//! One file per tool family, the way the teacher lays out `tools/shell.rs`,
//! `tools/file.rs`, `tools/exec.rs` etc. — except these are plain async
//! functions dispatched by name from [`dispatch`] rather than `rig::Tool`
//! impls, since the sandbox talks to Gemini directly instead of through
//! Rig (§9, `gemini` module doc comment).

mod bash;
mod files;
mod ipc_actions;
mod web;

use crate::agent::gemini::FunctionDeclaration;
use crate::error::{AgentError, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Everything a tool call needs to know about the invocation it is running
/// inside (§6.1): which group directory it may touch, where to drop IPC
/// files, and whether this is the privileged main group.
pub struct ToolContext<'a> {
    pub group_dir: &'a Path,
    pub ipc_dir: &'a Path,
    pub channel_id: &'a str,
    pub is_main: bool,
}

/// The fixed tool set declared to the model every turn (§4.7 step 1, §1
/// "agent tool library").
pub fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: "bash".to_string(),
            description: "Run a shell command in the group's working directory and return its \
                output."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"]
            }),
        },
        FunctionDeclaration {
            name: "read_file".to_string(),
            description: "Read a text file from the group's working directory.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
        },
        FunctionDeclaration {
            name: "write_file".to_string(),
            description: "Write (overwrite) a text file in the group's working directory."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        },
        FunctionDeclaration {
            name: "edit_file".to_string(),
            description: "Replace the first occurrence of a string in a file with another \
                string."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "find": { "type": "string" },
                    "replace": { "type": "string" }
                },
                "required": ["path", "find", "replace"]
            }),
        },
        FunctionDeclaration {
            name: "list_files".to_string(),
            description: "List entries of a directory in the group's working directory."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string", "default": "." } },
            }),
        },
        FunctionDeclaration {
            name: "search_files".to_string(),
            description: "Search file contents under the group's working directory for a \
                substring."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "path": { "type": "string", "default": "." }
                },
                "required": ["query"]
            }),
        },
        FunctionDeclaration {
            name: "google_search".to_string(),
            description: "Search the web and return a list of result snippets.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        },
        FunctionDeclaration {
            name: "web_fetch".to_string(),
            description: "Fetch a URL and return its content as plain text.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"]
            }),
        },
        FunctionDeclaration {
            name: "send_message".to_string(),
            description: "Send a chat message to a channel via the host (§4.5). Main group may \
                target any channel; other groups may only target their own."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "channelId": { "type": "string" },
                    "text": { "type": "string" }
                },
                "required": ["channelId", "text"]
            }),
        },
        FunctionDeclaration {
            name: "schedule_task".to_string(),
            description: "Schedule a future agent invocation (cron, interval, or one-shot)."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string" },
                    "scheduleType": { "type": "string", "enum": ["cron", "interval", "once"] },
                    "scheduleValue": { "type": "string" },
                    "contextMode": { "type": "string", "enum": ["group", "isolated"] },
                    "targetChannelId": { "type": "string" }
                },
                "required": ["prompt", "scheduleType", "scheduleValue", "contextMode"]
            }),
        },
        FunctionDeclaration {
            name: "list_tasks".to_string(),
            description: "List scheduled tasks visible to this group.".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
        FunctionDeclaration {
            name: "pause_task".to_string(),
            description: "Pause a scheduled task by id.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "taskId": { "type": "string" } },
                "required": ["taskId"]
            }),
        },
        FunctionDeclaration {
            name: "resume_task".to_string(),
            description: "Resume a paused task by id.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "taskId": { "type": "string" } },
                "required": ["taskId"]
            }),
        },
        FunctionDeclaration {
            name: "cancel_task".to_string(),
            description: "Cancel a scheduled task by id.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "taskId": { "type": "string" } },
                "required": ["taskId"]
            }),
        },
    ]
}

/// Execute a function call by name, returning the value to embed in the
/// `functionResponse` part. A tool failure is captured as `{"error": ..}`
/// rather than aborting the turn loop — the model gets to see it and
/// decide how to proceed, matching the teacher's shell/exec tools which
/// return a result struct on both success and failure rather than
/// propagating process errors up to the caller.
pub async fn dispatch(name: &str, args: Value, ctx: &ToolContext<'_>) -> Value {
    let result = match name {
        "bash" => bash::run(&args, ctx).await,
        "read_file" => files::read_file(&args, ctx).await,
        "write_file" => files::write_file(&args, ctx).await,
        "edit_file" => files::edit_file(&args, ctx).await,
        "list_files" => files::list_files(&args, ctx).await,
        "search_files" => files::search_files(&args, ctx).await,
        "google_search" => web::google_search(&args).await,
        "web_fetch" => web::web_fetch(&args).await,
        "send_message" => ipc_actions::send_message(&args, ctx).await,
        "schedule_task" => ipc_actions::schedule_task(&args, ctx).await,
        "list_tasks" => ipc_actions::list_tasks(ctx).await,
        "pause_task" => ipc_actions::pause_task(&args, ctx).await,
        "resume_task" => ipc_actions::resume_task(&args, ctx).await,
        "cancel_task" => ipc_actions::cancel_task(&args, ctx).await,
        other => Err(AgentError::UnknownTool(other.to_string()).into()),
    };

    match result {
        Ok(value) => value,
        Err(error) => json!({ "error": error.to_string() }),
    }
}

/// Resolve `relative` against `group_dir`, rejecting any path that would
/// escape it (absolute paths, `..` components). Shared by every tool that
/// touches the group's working directory.
pub fn resolve_in_group(group_dir: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() || candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(AgentError::PathEscape(relative.to_string()).into());
    }
    Ok(group_dir.join(candidate))
}

fn str_arg<'a>(args: &'a Value, key: &str, tool: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::InvalidArgs {
            tool: tool.to_string(),
            reason: format!("missing or non-string field '{key}'"),
        }.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absolute_and_parent_escapes() {
        let base = Path::new("/data/groups/g1");
        assert!(resolve_in_group(base, "notes.txt").is_ok());
        assert!(resolve_in_group(base, "/etc/passwd").is_err());
        assert!(resolve_in_group(base, "../other/secret").is_err());
    }

    #[test]
    fn declarations_cover_every_spec_tool() {
        let names: Vec<&str> = declarations().iter().map(|d| d.name.as_str()).collect();
        for expected in [
            "bash", "read_file", "write_file", "edit_file", "list_files", "search_files",
            "google_search", "web_fetch", "send_message", "schedule_task", "list_tasks",
            "pause_task", "resume_task", "cancel_task",
        ] {
            assert!(names.contains(&expected), "missing tool declaration: {expected}");
        }
    }
}
