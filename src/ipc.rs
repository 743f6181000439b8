//! File-based IPC from agent back to host (§4.5).
//!
//! *The directory path is the authoritative source of the message's
//! origin* — a payload's own claims about which group it came from are
//! never trusted. Agents write atomically (`.json.tmp` then rename); the
//! watcher only ever looks at `.json` files, and moves anything it can't
//! parse or authorize into `ipc/errors/` (poison quarantine) rather than
//! retrying it.

use crate::config::Config;
use crate::error::Result;
use crate::store::state::{ContextMode, RegisteredGroup, ScheduleKind, StateStore, TaskStatus};
use crate::wire::{IpcMessage, WireContextMode, WireScheduleKind};
use crate::{ChannelId, GroupFolder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Effects the watcher asks the supervisor to perform once an IPC action
/// has been authorized and applied to the store. Kept separate from the
/// store mutation itself so the watcher has no direct dependency on the
/// outbound chat collaborator or the per-channel queue (§9 "Cyclic
/// references").
pub enum IpcEffect {
    DeliverMessage { channel_id: ChannelId, text: String },
    GroupsRefreshed,
}

pub struct IpcWatcher {
    config: Arc<Config>,
    store: Arc<StateStore>,
}

impl IpcWatcher {
    pub fn new(config: Arc<Config>, store: Arc<StateStore>) -> Self {
        Self { config, store }
    }

    /// One poll pass: scan every group's `messages/` and `tasks/` drop
    /// directories (§4.5 algorithm). Returns the effects the caller (the
    /// supervisor) must carry out.
    pub async fn poll_once(&self) -> Result<Vec<IpcEffect>> {
        let ipc_root = self.config.ipc_dir();
        fs::create_dir_all(&ipc_root).await?;
        fs::create_dir_all(self.config.ipc_errors_dir()).await?;

        let mut effects = Vec::new();
        let mut entries = match fs::read_dir(&ipc_root).await {
            Ok(e) => e,
            Err(error) => {
                tracing::warn!(%error, "failed to list IPC root");
                return Ok(effects);
            }
        };

        let mut group_folders = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name() == "errors" {
                continue;
            }
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                group_folders.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        for folder in group_folders {
            self.poll_group(&folder, &mut effects).await;
        }

        Ok(effects)
    }

    async fn poll_group(&self, source_folder: &str, effects: &mut Vec<IpcEffect>) {
        let is_main = source_folder == self.config.main_group_folder;
        let group_dir = self.config.group_ipc_dir(source_folder);

        for sub in ["messages", "tasks"] {
            let dir = group_dir.join(sub);
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                continue;
            };

            let mut files = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    files.push(path);
                }
            }
            // Filesystem-listing order; cross-file ordering is not
            // guaranteed by the protocol (§5).
            files.sort();

            for path in files {
                self.handle_file(source_folder, is_main, &path, effects).await;
            }
        }
    }

    async fn handle_file(
        &self,
        source_folder: &str,
        is_main: bool,
        path: &Path,
        effects: &mut Vec<IpcEffect>,
    ) {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to read IPC file");
                return;
            }
        };

        let message: IpcMessage = match serde_json::from_str(&raw) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "invalid IPC payload, quarantining");
                self.quarantine(source_folder, path).await;
                return;
            }
        };

        match self.dispatch(source_folder, is_main, message, effects).await {
            Ok(()) => {
                if let Err(error) = fs::remove_file(path).await {
                    tracing::warn!(path = %path.display(), %error, "failed to remove consumed IPC file");
                }
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "IPC dispatch failed, quarantining");
                self.quarantine(source_folder, path).await;
            }
        }
    }

    async fn quarantine(&self, source_folder: &str, path: &Path) {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown.json".to_string());
        let dest = self
            .config
            .ipc_errors_dir()
            .join(format!("{source_folder}-{file_name}"));
        if let Err(error) = fs::rename(path, &dest).await {
            tracing::error!(path = %path.display(), %error, "failed to quarantine poison IPC file");
        }
    }

    async fn dispatch(
        &self,
        source_folder: &str,
        is_main: bool,
        message: IpcMessage,
        effects: &mut Vec<IpcEffect>,
    ) -> Result<()> {
        match message {
            IpcMessage::Message { channel_id, text, .. } => {
                self.authorize_channel(source_folder, is_main, &channel_id).await?;
                effects.push(IpcEffect::DeliverMessage {
                    channel_id: ChannelId::from(channel_id),
                    text,
                });
                Ok(())
            }
            IpcMessage::ScheduleTask {
                prompt,
                schedule_type,
                schedule_value,
                context_mode,
                target_channel_id,
                ..
            } => {
                self.authorize_channel(source_folder, is_main, &target_channel_id).await?;
                validate_schedule(schedule_type, &schedule_value)?;
                let next_run = compute_initial_next_run(schedule_type, &schedule_value)?;
                self.store
                    .create_task(
                        &GroupFolder::from(source_folder),
                        &ChannelId::from(target_channel_id),
                        &prompt,
                        wire_schedule_kind(schedule_type),
                        &schedule_value,
                        wire_context_mode(context_mode),
                        next_run.as_deref(),
                        &now_iso8601(),
                    )
                    .await?;
                Ok(())
            }
            IpcMessage::PauseTask { task_id, .. } => {
                self.authorize_task(source_folder, is_main, &task_id).await?;
                self.store.set_task_status(&task_id, TaskStatus::Paused).await
            }
            IpcMessage::ResumeTask { task_id, .. } => {
                self.authorize_task(source_folder, is_main, &task_id).await?;
                self.store.set_task_status(&task_id, TaskStatus::Active).await
            }
            IpcMessage::CancelTask { task_id, .. } => {
                self.authorize_task(source_folder, is_main, &task_id).await?;
                self.store.delete_task(&task_id).await
            }
            IpcMessage::RefreshGroups { .. } => {
                self.require_main(is_main, "refresh_groups")?;
                effects.push(IpcEffect::GroupsRefreshed);
                Ok(())
            }
            IpcMessage::RegisterChannel {
                channel_id,
                name,
                folder,
                trigger,
                container_config,
                ..
            } => {
                self.require_main(is_main, "register_channel")?;
                let overrides = container_config
                    .map(|c| crate::store::state::ContainerOverrides {
                        cap_drop_all: None,
                        read_only: None,
                        memory_mb: c.memory_mb,
                        cpus: c.cpus,
                    })
                    .unwrap_or_default();
                self.store
                    .register_group(&RegisteredGroup {
                        channel_id: ChannelId::from(channel_id),
                        name,
                        folder: GroupFolder::from(folder),
                        trigger,
                        requires_trigger: true,
                        container_overrides: overrides,
                        added_at: now_iso8601(),
                    })
                    .await
            }
        }
    }

    /// Non-main sources may only act on channels whose registered folder
    /// equals their own source folder; main may act anywhere (§4.5, §6.3,
    /// Testable Property 6).
    async fn authorize_channel(&self, source_folder: &str, is_main: bool, channel_id: &str) -> Result<()> {
        if is_main {
            return Ok(());
        }
        let group = self
            .store
            .get_registered_group(&ChannelId::from(channel_id.to_string()))
            .await?;
        let target_folder = group.map(|g| g.folder.to_string()).unwrap_or_default();
        if target_folder == source_folder {
            Ok(())
        } else {
            Err(crate::error::IpcError::Unauthorized {
                source: source_folder.to_string(),
                target: target_folder,
            }
            .into())
        }
    }

    async fn authorize_task(&self, source_folder: &str, is_main: bool, task_id: &str) -> Result<()> {
        if is_main {
            return Ok(());
        }
        let task = self.store.get_task(task_id).await?;
        let target_folder = task.map(|t| t.group_folder.to_string()).unwrap_or_default();
        if target_folder == source_folder {
            Ok(())
        } else {
            Err(crate::error::IpcError::Unauthorized {
                source: source_folder.to_string(),
                target: target_folder,
            }
            .into())
        }
    }

    fn require_main(&self, is_main: bool, action: &str) -> Result<()> {
        if is_main {
            Ok(())
        } else {
            Err(crate::error::IpcError::Unauthorized {
                source: "non-main".to_string(),
                target: action.to_string(),
            }
            .into())
        }
    }

    /// Write the `tasks.json` / `groups.json` snapshots into a group's IPC
    /// mount before launch (§4.5 "Snapshots flowing the other way").
    pub async fn write_snapshots(
        &self,
        group_folder: &str,
        is_main: bool,
        all_groups: &[RegisteredGroup],
        chats: &[(String, String, String)],
    ) -> Result<()> {
        let ipc_dir = self.config.group_ipc_dir(group_folder);
        fs::create_dir_all(&ipc_dir).await?;

        let tasks = if is_main {
            self.store.list_all_tasks().await?
        } else {
            self.store.list_tasks_for_group(group_folder).await?
        };
        let task_views: Vec<crate::wire::TaskView> = tasks
            .into_iter()
            .map(|t| crate::wire::TaskView {
                id: t.id,
                group_folder: t.group_folder.to_string(),
                channel_id: t.channel_id.to_string(),
                prompt: t.prompt,
                schedule_type: t.schedule_kind.as_str().to_string(),
                schedule_value: t.schedule_value,
                context_mode: t.context_mode.as_str().to_string(),
                status: t.status.as_str().to_string(),
                next_run: t.next_run,
            })
            .collect();
        write_atomic_json(&ipc_dir.join("tasks.json"), &task_views).await?;

        let registered_by_channel: std::collections::HashMap<String, &RegisteredGroup> =
            all_groups.iter().map(|g| (g.channel_id.to_string(), g)).collect();

        let group_views: Vec<crate::wire::GroupView> = if is_main {
            chats
                .iter()
                .map(|(jid, name, last_activity)| crate::wire::GroupView {
                    channel_id: jid.clone(),
                    name: name.clone(),
                    last_activity: last_activity.clone(),
                    is_registered: registered_by_channel.contains_key(jid),
                })
                .collect()
        } else {
            all_groups
                .iter()
                .filter(|g| g.folder.as_ref() == group_folder)
                .map(|g| crate::wire::GroupView {
                    channel_id: g.channel_id.to_string(),
                    name: g.name.clone(),
                    last_activity: String::new(),
                    is_registered: true,
                })
                .collect()
        };
        write_atomic_json(&ipc_dir.join("groups.json"), &group_views).await?;

        Ok(())
    }
}

async fn write_atomic_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

fn wire_schedule_kind(kind: WireScheduleKind) -> ScheduleKind {
    match kind {
        WireScheduleKind::Cron => ScheduleKind::Cron,
        WireScheduleKind::Interval => ScheduleKind::Interval,
        WireScheduleKind::Once => ScheduleKind::Once,
    }
}

fn wire_context_mode(mode: WireContextMode) -> ContextMode {
    match mode {
        WireContextMode::Group => ContextMode::Group,
        WireContextMode::Isolated => ContextMode::Isolated,
    }
}

fn validate_schedule(kind: WireScheduleKind, value: &str) -> Result<()> {
    match kind {
        WireScheduleKind::Cron => {
            crate::scheduler::normalize_cron_expr(value)
                .parse::<cron::Schedule>()
                .map_err(|e| crate::error::SchedulerError::InvalidCron(value.to_string(), e.to_string()))?;
        }
        WireScheduleKind::Interval => {
            value
                .parse::<u64>()
                .map_err(|_| crate::error::SchedulerError::InvalidSchedule(format!("interval '{value}' is not a millisecond integer")))?;
        }
        WireScheduleKind::Once => {
            chrono::DateTime::parse_from_rfc3339(value)
                .map_err(|_| crate::error::SchedulerError::InvalidSchedule(format!("once '{value}' is not a valid ISO-8601 timestamp")))?;
        }
    }
    Ok(())
}

/// Compute the first `next_run` for a freshly scheduled task (§3 Task
/// invariant: `next_run` must point to a future instant while active).
/// Evaluated in UTC here; the scheduler's recompute-on-fire path (§4.3) is
/// the one that honors the configured `TIMEZONE` for cron.
fn compute_initial_next_run(kind: WireScheduleKind, value: &str) -> Result<Option<String>> {
    match kind {
        WireScheduleKind::Cron => {
            let schedule: cron::Schedule = crate::scheduler::normalize_cron_expr(value)
                .parse()
                .map_err(|e: cron::error::Error| crate::error::SchedulerError::InvalidCron(value.to_string(), e.to_string()))?;
            let next = schedule
                .upcoming(chrono::Utc)
                .next()
                .ok_or_else(|| crate::error::SchedulerError::InvalidSchedule(format!("cron '{value}' has no upcoming occurrence")))?;
            Ok(Some(next.to_rfc3339()))
        }
        WireScheduleKind::Interval => {
            let ms: i64 = value
                .parse()
                .map_err(|_| crate::error::SchedulerError::InvalidSchedule(format!("interval '{value}' is not a millisecond integer")))?;
            Ok(Some((chrono::Utc::now() + chrono::Duration::milliseconds(ms)).to_rfc3339()))
        }
        WireScheduleKind::Once => Ok(Some(value.to_string())),
    }
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> Arc<StateStore> {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let store = StateStore::new(pool);
        store.initialize().await.unwrap();
        Arc::new(store)
    }

    fn test_config(dir: &Path) -> Arc<Config> {
        Arc::new(Config {
            data_dir: dir.to_path_buf(),
            max_concurrent_containers: 2,
            poll_interval: std::time::Duration::from_secs(1),
            ipc_poll_interval: std::time::Duration::from_millis(100),
            scheduler_tick_interval: std::time::Duration::from_secs(1),
            base_retry: std::time::Duration::from_secs(1),
            max_retries: 5,
            timezone: chrono_tz::UTC,
            assistant_name: "nano".into(),
            main_group_folder: "main".into(),
            agent_image: "nanoclaw-agent:latest".into(),
            shutdown_grace: std::time::Duration::from_secs(10),
        })
    }

    #[tokio::test]
    async fn non_main_cannot_cancel_task_in_another_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store = test_store().await;

        let chan = ChannelId::from("c1");
        let folder = GroupFolder::from("g1");
        let task = store
            .create_task(
                &folder,
                &chan,
                "do thing",
                ScheduleKind::Once,
                "2026-01-01T00:00:00Z",
                ContextMode::Isolated,
                Some("2026-01-01T00:00:00Z"),
                "2026-01-01T00:00:00Z",
            )
            .await
            .unwrap();

        let watcher = IpcWatcher::new(config.clone(), store.clone());

        let source_dir = config.group_ipc_dir("g2").join("tasks");
        fs::create_dir_all(&source_dir).await.unwrap();
        let file_path = source_dir.join("abc.json");
        fs::write(
            &file_path,
            format!(r#"{{"type":"cancel_task","timestamp":"2026-01-01T00:00:00Z","taskId":"{}"}}"#, task.id),
        )
        .await
        .unwrap();

        let mut effects = Vec::new();
        watcher.handle_file("g2", false, &file_path, &mut effects).await;

        // File was quarantined, not consumed.
        assert!(!file_path.exists());
        let quarantined = config.ipc_errors_dir().join("g2-abc.json");
        assert!(quarantined.exists());

        // Task still exists.
        assert!(store.get_task(&task.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn main_can_cancel_task_in_any_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store = test_store().await;

        let chan = ChannelId::from("c1");
        let folder = GroupFolder::from("g1");
        let task = store
            .create_task(
                &folder,
                &chan,
                "do thing",
                ScheduleKind::Once,
                "2026-01-01T00:00:00Z",
                ContextMode::Isolated,
                Some("2026-01-01T00:00:00Z"),
                "2026-01-01T00:00:00Z",
            )
            .await
            .unwrap();

        let watcher = IpcWatcher::new(config.clone(), store.clone());
        let source_dir = config.group_ipc_dir("main").join("tasks");
        fs::create_dir_all(&source_dir).await.unwrap();
        let file_path = source_dir.join("abc.json");
        fs::write(
            &file_path,
            format!(r#"{{"type":"cancel_task","timestamp":"2026-01-01T00:00:00Z","taskId":"{}"}}"#, task.id),
        )
        .await
        .unwrap();

        let mut effects = Vec::new();
        watcher.handle_file("main", true, &file_path, &mut effects).await;

        assert!(!file_path.exists());
        assert!(store.get_task(&task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_payload_is_quarantined() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store = test_store().await;
        let watcher = IpcWatcher::new(config.clone(), store);

        let source_dir = config.group_ipc_dir("g1").join("messages");
        fs::create_dir_all(&source_dir).await.unwrap();
        let file_path = source_dir.join("bad.json");
        fs::write(&file_path, "not json at all").await.unwrap();

        let mut effects = Vec::new();
        watcher.handle_file("g1", false, &file_path, &mut effects).await;

        assert!(!file_path.exists());
        assert!(config.ipc_errors_dir().join("g1-bad.json").exists());
    }
}
