//! Tools that act through the host via file-based IPC (§4.5): outbound
//! messages and task management. Everything here writes one of the
//! [`crate::wire::IpcMessage`] variants into the group's `ipc/{folder}/`
//! mount — using the exact same tagged enum the host's watcher decodes
//! means the two sides can never drift on this wire shape (§0).
//!
//! `list_tasks` is the one read-only exception: it doesn't round-trip
//! through the host at all, it just reads the `tasks.json` snapshot the
//! host already dropped into the mount before launch (§4.5 "Snapshots
//! flowing the other way").

use super::{str_arg, ToolContext};
use crate::error::{AgentError, Result};
use crate::wire::{IpcMessage, WireContextMode, WireScheduleKind};
use serde_json::{json, Value};
use tokio::fs;
use uuid::Uuid;

async fn drop_ipc_message(ctx: &ToolContext<'_>, subdir: &str, message: &IpcMessage) -> Result<()> {
    let dir = ctx.ipc_dir.join(subdir);
    fs::create_dir_all(&dir).await?;

    let file_name = format!("{}.json", Uuid::new_v4());
    let tmp_path = dir.join(format!("{file_name}.tmp"));
    let final_path = dir.join(file_name);

    let json = serde_json::to_vec_pretty(message)?;
    fs::write(&tmp_path, json).await?;
    fs::rename(&tmp_path, &final_path).await?;
    Ok(())
}

pub async fn send_message(args: &Value, ctx: &ToolContext<'_>) -> Result<Value> {
    let channel_id = str_arg(args, "channelId", "send_message")?;
    let text = str_arg(args, "text", "send_message")?;

    drop_ipc_message(
        ctx,
        "messages",
        &IpcMessage::Message {
            timestamp: chrono::Utc::now().to_rfc3339(),
            channel_id: channel_id.to_string(),
            text: text.to_string(),
        },
    )
    .await?;

    Ok(json!({ "success": true }))
}

fn schedule_kind(raw: &str) -> Result<WireScheduleKind> {
    match raw {
        "cron" => Ok(WireScheduleKind::Cron),
        "interval" => Ok(WireScheduleKind::Interval),
        "once" => Ok(WireScheduleKind::Once),
        other => Err(AgentError::InvalidArgs {
            tool: "schedule_task".to_string(),
            reason: format!("unknown scheduleType '{other}'"),
        }
        .into()),
    }
}

fn context_mode(raw: &str) -> Result<WireContextMode> {
    match raw {
        "group" => Ok(WireContextMode::Group),
        "isolated" => Ok(WireContextMode::Isolated),
        other => Err(AgentError::InvalidArgs {
            tool: "schedule_task".to_string(),
            reason: format!("unknown contextMode '{other}'"),
        }
        .into()),
    }
}

pub async fn schedule_task(args: &Value, ctx: &ToolContext<'_>) -> Result<Value> {
    let prompt = str_arg(args, "prompt", "schedule_task")?;
    let schedule_type = schedule_kind(str_arg(args, "scheduleType", "schedule_task")?)?;
    let schedule_value = str_arg(args, "scheduleValue", "schedule_task")?;
    let context_mode = context_mode(str_arg(args, "contextMode", "schedule_task")?)?;
    let target_channel_id = args
        .get("targetChannelId")
        .and_then(Value::as_str)
        .unwrap_or(ctx.channel_id);

    drop_ipc_message(
        ctx,
        "tasks",
        &IpcMessage::ScheduleTask {
            timestamp: chrono::Utc::now().to_rfc3339(),
            prompt: prompt.to_string(),
            schedule_type,
            schedule_value: schedule_value.to_string(),
            context_mode,
            target_channel_id: target_channel_id.to_string(),
        },
    )
    .await?;

    Ok(json!({ "success": true }))
}

pub async fn list_tasks(ctx: &ToolContext<'_>) -> Result<Value> {
    let snapshot_path = ctx.ipc_dir.join("tasks.json");
    match fs::read(&snapshot_path).await {
        Ok(bytes) => {
            let tasks: Value = serde_json::from_slice(&bytes)?;
            Ok(json!({ "tasks": tasks }))
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(json!({ "tasks": [] })),
        Err(error) => Err(error.into()),
    }
}

pub async fn pause_task(args: &Value, ctx: &ToolContext<'_>) -> Result<Value> {
    let task_id = str_arg(args, "taskId", "pause_task")?;
    drop_ipc_message(
        ctx,
        "tasks",
        &IpcMessage::PauseTask { timestamp: chrono::Utc::now().to_rfc3339(), task_id: task_id.to_string() },
    )
    .await?;
    Ok(json!({ "success": true }))
}

pub async fn resume_task(args: &Value, ctx: &ToolContext<'_>) -> Result<Value> {
    let task_id = str_arg(args, "taskId", "resume_task")?;
    drop_ipc_message(
        ctx,
        "tasks",
        &IpcMessage::ResumeTask { timestamp: chrono::Utc::now().to_rfc3339(), task_id: task_id.to_string() },
    )
    .await?;
    Ok(json!({ "success": true }))
}

pub async fn cancel_task(args: &Value, ctx: &ToolContext<'_>) -> Result<Value> {
    let task_id = str_arg(args, "taskId", "cancel_task")?;
    drop_ipc_message(
        ctx,
        "tasks",
        &IpcMessage::CancelTask { timestamp: chrono::Utc::now().to_rfc3339(), task_id: task_id.to_string() },
    )
    .await?;
    Ok(json!({ "success": true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &std::path::Path) -> ToolContext<'_> {
        ToolContext { group_dir: dir, ipc_dir: dir, channel_id: "c1", is_main: false }
    }

    #[tokio::test]
    async fn send_message_drops_atomic_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        send_message(&json!({ "channelId": "c1", "text": "hi" }), &c).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path().join("messages")).await.unwrap();
        let entry = entries.next_entry().await.unwrap().unwrap();
        assert!(entry.file_name().to_string_lossy().ends_with(".json"));
        assert!(!entry.file_name().to_string_lossy().ends_with(".json.tmp"));
    }

    #[tokio::test]
    async fn schedule_task_defaults_target_channel_to_caller() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        schedule_task(
            &json!({
                "prompt": "say hi",
                "scheduleType": "once",
                "scheduleValue": "2026-01-01T00:00:00Z",
                "contextMode": "isolated"
            }),
            &c,
        )
        .await
        .unwrap();

        let mut entries = tokio::fs::read_dir(dir.path().join("tasks")).await.unwrap();
        let entry = entries.next_entry().await.unwrap().unwrap();
        let raw = tokio::fs::read_to_string(entry.path()).await.unwrap();
        assert!(raw.contains("\"targetChannelId\": \"c1\""));
    }

    #[tokio::test]
    async fn list_tasks_without_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        let result = list_tasks(&c).await.unwrap();
        assert_eq!(result["tasks"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn schedule_task_rejects_unknown_schedule_type() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        let result = schedule_task(
            &json!({
                "prompt": "say hi",
                "scheduleType": "yearly",
                "scheduleValue": "x",
                "contextMode": "group"
            }),
            &c,
        )
        .await;
        assert!(result.is_err());
    }
}
