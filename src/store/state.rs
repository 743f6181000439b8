//! State store: messages, chat metadata, registered groups, router
//! watermarks, and scheduled tasks (§3, §4.6).

use crate::error::{Result, StoreError};
use crate::{ChannelId, GroupFolder};
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use sqlx::{Row as _, SqlitePool};
use std::collections::HashMap;

/// An ingested chat message row. Appended on receipt, never mutated (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: ChannelId,
    pub sender_name: String,
    pub content: String,
    /// Lexicographically orderable ISO-8601 timestamp.
    pub timestamp: String,
    pub mentions_bot: bool,
}

/// Optional per-group container overrides (§4.4 "unless explicitly
/// overridden by group config").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerOverrides {
    pub cap_drop_all: Option<bool>,
    pub read_only: Option<bool>,
    pub memory_mb: Option<i64>,
    pub cpus: Option<f64>,
}

/// A registered chat endpoint and its backing working directory (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredGroup {
    pub channel_id: ChannelId,
    pub name: String,
    pub folder: GroupFolder,
    /// `None` means "no custom regex"; the default trigger (§6.5) applies.
    pub trigger: Option<String>,
    pub requires_trigger: bool,
    pub container_overrides: ContainerOverrides,
    pub added_at: String,
}

impl RegisteredGroup {
    pub fn is_main(&self, main_group_folder: &str) -> bool {
        self.folder.as_ref() == main_group_folder
    }
}

#[derive(Serialize, Deserialize)]
struct RegisteredGroupConfig {
    name: String,
    folder: String,
    trigger: Option<String>,
    requires_trigger: bool,
    container_overrides: ContainerOverrides,
    added_at: String,
}

/// Schedule kind for a [`Task`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron,
    Interval,
    Once,
}

impl ScheduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleKind::Cron => "cron",
            ScheduleKind::Interval => "interval",
            ScheduleKind::Once => "once",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cron" => Some(ScheduleKind::Cron),
            "interval" => Some(ScheduleKind::Interval),
            "once" => Some(ScheduleKind::Once),
            _ => None,
        }
    }
}

/// Whether a scheduled invocation resumes the group's shared session or
/// starts fresh (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    Group,
    Isolated,
}

impl ContextMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextMode::Group => "group",
            ContextMode::Isolated => "isolated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "group" => Some(ContextMode::Group),
            "isolated" => Some(ContextMode::Isolated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TaskStatus::Active),
            "paused" => Some(TaskStatus::Paused),
            _ => None,
        }
    }
}

/// A scheduled future agent invocation (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub group_folder: GroupFolder,
    pub channel_id: ChannelId,
    pub prompt: String,
    pub schedule_kind: ScheduleKind,
    pub schedule_value: String,
    pub context_mode: ContextMode,
    pub status: TaskStatus,
    pub next_run: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                mentions_bot INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create messages table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_channel_ts ON messages(channel_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages(timestamp)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                jid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                last_message_time TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create chats table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS registered_groups (
                channel_id TEXT PRIMARY KEY,
                config_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create registered_groups table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS router_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create router_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                group_folder TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                prompt TEXT NOT NULL,
                schedule_kind TEXT NOT NULL,
                schedule_value TEXT NOT NULL,
                context_mode TEXT NOT NULL,
                status TEXT NOT NULL,
                next_run TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create tasks table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status_next_run ON tasks(status, next_run)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_group_folder ON tasks(group_folder)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ---- chats (unregistered channel discovery) ----

    pub async fn upsert_chat(&self, jid: &str, name: &str, last_message_time: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chats (jid, name, last_message_time) VALUES (?, ?, ?)
            ON CONFLICT(jid) DO UPDATE SET name = excluded.name, last_message_time = excluded.last_message_time
            "#,
        )
        .bind(jid)
        .bind(name)
        .bind(last_message_time)
        .execute(&self.pool)
        .await
        .context("failed to upsert chat metadata")?;
        Ok(())
    }

    pub async fn list_chats(&self) -> Result<Vec<(String, String, String)>> {
        let rows = sqlx::query("SELECT jid, name, last_message_time FROM chats")
            .fetch_all(&self.pool)
            .await
            .context("failed to list chats")?;
        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.try_get::<String, _>("jid").unwrap_or_default(),
                    r.try_get::<String, _>("name").unwrap_or_default(),
                    r.try_get::<String, _>("last_message_time").unwrap_or_default(),
                )
            })
            .collect())
    }

    // ---- messages ----

    pub async fn insert_message(
        &self,
        channel_id: &ChannelId,
        sender_name: &str,
        content: &str,
        timestamp: &str,
        mentions_bot: bool,
    ) -> Result<Message> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO messages (id, channel_id, sender_name, content, timestamp, mentions_bot)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(channel_id.as_ref())
        .bind(sender_name)
        .bind(content)
        .bind(timestamp)
        .bind(mentions_bot as i64)
        .execute(&self.pool)
        .await
        .context("failed to insert message")?;

        Ok(Message {
            id,
            channel_id: channel_id.clone(),
            sender_name: sender_name.to_string(),
            content: content.to_string(),
            timestamp: timestamp.to_string(),
            mentions_bot,
        })
    }

    /// Messages for any registered channel with `timestamp > since`, sender
    /// not equal to `bot_sender_name` (§4.2 polling loop step).
    pub async fn messages_since_for_registered_channels(
        &self,
        since: &str,
        bot_sender_name: &str,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.channel_id, m.sender_name, m.content, m.timestamp, m.mentions_bot
            FROM messages m
            JOIN registered_groups g ON g.channel_id = m.channel_id
            WHERE m.timestamp > ? AND m.sender_name != ?
            ORDER BY m.timestamp ASC
            "#,
        )
        .bind(since)
        .bind(bot_sender_name)
        .fetch_all(&self.pool)
        .await
        .context("failed to query messages since watermark")?;

        Ok(rows.into_iter().map(row_to_message).collect())
    }

    /// Messages for one channel with `timestamp > since`, sender not the bot
    /// (§4.2 per-channel processor step 1, and startup recovery).
    pub async fn messages_for_channel_since(
        &self,
        channel_id: &ChannelId,
        since: &str,
        bot_sender_name: &str,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, channel_id, sender_name, content, timestamp, mentions_bot
            FROM messages
            WHERE channel_id = ? AND timestamp > ? AND sender_name != ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(channel_id.as_ref())
        .bind(since)
        .bind(bot_sender_name)
        .fetch_all(&self.pool)
        .await
        .context("failed to query messages for channel")?;

        Ok(rows.into_iter().map(row_to_message).collect())
    }

    // ---- registered groups ----

    pub async fn register_group(&self, group: &RegisteredGroup) -> Result<()> {
        let config = RegisteredGroupConfig {
            name: group.name.clone(),
            folder: group.folder.to_string(),
            trigger: group.trigger.clone(),
            requires_trigger: group.requires_trigger,
            container_overrides: group.container_overrides.clone(),
            added_at: group.added_at.clone(),
        };
        let config_json = serde_json::to_string(&config).context("failed to serialize group config")?;

        sqlx::query(
            r#"
            INSERT INTO registered_groups (channel_id, config_json) VALUES (?, ?)
            ON CONFLICT(channel_id) DO UPDATE SET config_json = excluded.config_json
            "#,
        )
        .bind(group.channel_id.as_ref())
        .bind(&config_json)
        .execute(&self.pool)
        .await
        .context("failed to register group")?;

        Ok(())
    }

    pub async fn get_registered_group(&self, channel_id: &ChannelId) -> Result<Option<RegisteredGroup>> {
        let row = sqlx::query("SELECT channel_id, config_json FROM registered_groups WHERE channel_id = ?")
            .bind(channel_id.as_ref())
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch registered group")?;

        row.map(row_to_registered_group).transpose()
    }

    pub async fn list_registered_groups(&self) -> Result<Vec<RegisteredGroup>> {
        let rows = sqlx::query("SELECT channel_id, config_json FROM registered_groups")
            .fetch_all(&self.pool)
            .await
            .context("failed to list registered groups")?;

        rows.into_iter().map(row_to_registered_group).collect()
    }

    // ---- router watermarks ----

    const LAST_TIMESTAMP_KEY: &'static str = "last_timestamp";
    const LAST_AGENT_TIMESTAMP_KEY: &'static str = "last_agent_timestamp";

    pub async fn get_last_timestamp(&self) -> Result<Option<String>> {
        self.get_router_value(Self::LAST_TIMESTAMP_KEY).await
    }

    pub async fn set_last_timestamp(&self, ts: &str) -> Result<()> {
        self.set_router_value(Self::LAST_TIMESTAMP_KEY, ts).await
    }

    pub async fn get_last_agent_timestamps(&self) -> Result<HashMap<String, String>> {
        match self.get_router_value(Self::LAST_AGENT_TIMESTAMP_KEY).await? {
            Some(json) => Ok(serde_json::from_str(&json).unwrap_or_default()),
            None => Ok(HashMap::new()),
        }
    }

    pub async fn get_last_agent_timestamp(&self, channel_id: &ChannelId) -> Result<Option<String>> {
        Ok(self
            .get_last_agent_timestamps()
            .await?
            .get(channel_id.as_ref())
            .cloned())
    }

    /// Advance `last_agent_timestamp[channel_id]`. Callers are responsible
    /// for only ever calling this with a larger value (§5 monotonicity).
    pub async fn set_last_agent_timestamp(&self, channel_id: &ChannelId, ts: &str) -> Result<()> {
        let mut map = self.get_last_agent_timestamps().await?;
        map.insert(channel_id.to_string(), ts.to_string());
        let json = serde_json::to_string(&map).context("failed to serialize last_agent_timestamp map")?;
        self.set_router_value(Self::LAST_AGENT_TIMESTAMP_KEY, &json).await
    }

    async fn get_router_value(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM router_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read router_state")?;
        Ok(row.map(|r| r.try_get::<String, _>("value").unwrap_or_default()))
    }

    async fn set_router_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO router_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("failed to write router_state")?;
        Ok(())
    }

    // ---- tasks ----

    #[allow(clippy::too_many_arguments)]
    pub async fn create_task(
        &self,
        group_folder: &GroupFolder,
        channel_id: &ChannelId,
        prompt: &str,
        schedule_kind: ScheduleKind,
        schedule_value: &str,
        context_mode: ContextMode,
        next_run: Option<&str>,
        created_at: &str,
    ) -> Result<Task> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, group_folder, channel_id, prompt, schedule_kind, schedule_value,
                context_mode, status, next_run, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(group_folder.as_ref())
        .bind(channel_id.as_ref())
        .bind(prompt)
        .bind(schedule_kind.as_str())
        .bind(schedule_value)
        .bind(context_mode.as_str())
        .bind(TaskStatus::Active.as_str())
        .bind(next_run)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert task")?;

        Ok(Task {
            id,
            group_folder: group_folder.clone(),
            channel_id: channel_id.clone(),
            prompt: prompt.to_string(),
            schedule_kind,
            schedule_value: schedule_value.to_string(),
            context_mode,
            status: TaskStatus::Active,
            next_run: next_run.map(str::to_string),
            created_at: created_at.to_string(),
        })
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(
            r#"
            SELECT id, group_folder, channel_id, prompt, schedule_kind, schedule_value,
                   context_mode, status, next_run, created_at
            FROM tasks WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch task")?;

        row.map(row_to_task).transpose()
    }

    /// Tasks with `status = active` and `next_run <= now` (§4.3 step 1).
    pub async fn due_tasks(&self, now: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, group_folder, channel_id, prompt, schedule_kind, schedule_value,
                   context_mode, status, next_run, created_at
            FROM tasks
            WHERE status = 'active' AND next_run IS NOT NULL AND next_run <= ?
            ORDER BY next_run ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("failed to query due tasks")?;

        rows.into_iter().map(row_to_task).collect()
    }

    pub async fn list_tasks_for_group(&self, group_folder: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, group_folder, channel_id, prompt, schedule_kind, schedule_value,
                   context_mode, status, next_run, created_at
            FROM tasks WHERE group_folder = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(group_folder)
        .fetch_all(&self.pool)
        .await
        .context("failed to list tasks for group")?;

        rows.into_iter().map(row_to_task).collect()
    }

    pub async fn list_all_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, group_folder, channel_id, prompt, schedule_kind, schedule_value,
                   context_mode, status, next_run, created_at
            FROM tasks ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list all tasks")?;

        rows.into_iter().map(row_to_task).collect()
    }

    /// Recompute and persist `next_run` for a recurring task (§4.3 step 2,
    /// §5 "at-most-once"). Must be called before the job is dispatched.
    pub async fn update_task_next_run(&self, id: &str, next_run: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE tasks SET next_run = ? WHERE id = ?")
            .bind(next_run)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to update task next_run")?;
        Ok(())
    }

    pub async fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let result = sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to update task status")?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(id.to_string()).into());
        }
        Ok(())
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to delete task")?;
        Ok(())
    }
}

fn row_to_message(row: sqlx::sqlite::SqliteRow) -> Message {
    Message {
        id: row.try_get("id").unwrap_or_default(),
        channel_id: ChannelId::from(row.try_get::<String, _>("channel_id").unwrap_or_default()),
        sender_name: row.try_get("sender_name").unwrap_or_default(),
        content: row.try_get("content").unwrap_or_default(),
        timestamp: row.try_get("timestamp").unwrap_or_default(),
        mentions_bot: row.try_get::<i64, _>("mentions_bot").unwrap_or(0) != 0,
    }
}

fn row_to_registered_group(row: sqlx::sqlite::SqliteRow) -> Result<RegisteredGroup> {
    let channel_id: String = row.try_get("channel_id").context("missing channel_id")?;
    let config_json: String = row.try_get("config_json").context("missing config_json")?;
    let config: RegisteredGroupConfig =
        serde_json::from_str(&config_json).context("failed to parse registered group config")?;

    Ok(RegisteredGroup {
        channel_id: ChannelId::from(channel_id),
        name: config.name,
        folder: GroupFolder::from(config.folder),
        trigger: config.trigger,
        requires_trigger: config.requires_trigger,
        container_overrides: config.container_overrides,
        added_at: config.added_at,
    })
}

fn row_to_task(row: sqlx::sqlite::SqliteRow) -> Result<Task> {
    let schedule_kind_str: String = row.try_get("schedule_kind").context("missing schedule_kind")?;
    let context_mode_str: String = row.try_get("context_mode").context("missing context_mode")?;
    let status_str: String = row.try_get("status").context("missing status")?;

    Ok(Task {
        id: row.try_get("id").context("missing id")?,
        group_folder: GroupFolder::from(row.try_get::<String, _>("group_folder").context("missing group_folder")?),
        channel_id: ChannelId::from(row.try_get::<String, _>("channel_id").context("missing channel_id")?),
        prompt: row.try_get("prompt").context("missing prompt")?,
        schedule_kind: ScheduleKind::parse(&schedule_kind_str)
            .with_context(|| format!("invalid schedule_kind '{schedule_kind_str}'"))?,
        schedule_value: row.try_get("schedule_value").context("missing schedule_value")?,
        context_mode: ContextMode::parse(&context_mode_str)
            .with_context(|| format!("invalid context_mode '{context_mode_str}'"))?,
        status: TaskStatus::parse(&status_str).with_context(|| format!("invalid status '{status_str}'"))?,
        next_run: row.try_get("next_run").ok(),
        created_at: row.try_get("created_at").context("missing created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> StateStore {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = StateStore::new(pool);
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn watermark_round_trips() {
        let store = test_store().await;
        assert_eq!(store.get_last_timestamp().await.unwrap(), None);
        store.set_last_timestamp("2026-01-01T00:00:00Z").await.unwrap();
        assert_eq!(
            store.get_last_timestamp().await.unwrap(),
            Some("2026-01-01T00:00:00Z".to_string())
        );
    }

    #[tokio::test]
    async fn last_agent_timestamp_is_per_channel() {
        let store = test_store().await;
        let c1: ChannelId = ChannelId::from("c1");
        let c2: ChannelId = ChannelId::from("c2");
        store.set_last_agent_timestamp(&c1, "5").await.unwrap();
        store.set_last_agent_timestamp(&c2, "9").await.unwrap();
        assert_eq!(store.get_last_agent_timestamp(&c1).await.unwrap().unwrap(), "5");
        assert_eq!(store.get_last_agent_timestamp(&c2).await.unwrap().unwrap(), "9");
    }

    #[tokio::test]
    async fn messages_since_excludes_bot_and_unregistered_channels() {
        let store = test_store().await;
        let c1: ChannelId = ChannelId::from("c1");
        store
            .insert_message(&c1, "bot", "ignored", "1", false)
            .await
            .unwrap();
        store
            .insert_message(&c1, "u1", "also ignored (unregistered)", "2", false)
            .await
            .unwrap();

        let group = RegisteredGroup {
            channel_id: c1.clone(),
            name: "g1".into(),
            folder: GroupFolder::from("g1"),
            trigger: None,
            requires_trigger: true,
            container_overrides: ContainerOverrides::default(),
            added_at: "0".into(),
        };
        store.register_group(&group).await.unwrap();

        store.insert_message(&c1, "u1", "seen", "3", false).await.unwrap();

        let msgs = store
            .messages_since_for_registered_channels("0", "bot")
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "seen");
    }

    #[tokio::test]
    async fn due_tasks_respects_status_and_next_run() {
        let store = test_store().await;
        let folder = GroupFolder::from("g1");
        let chan = ChannelId::from("c1");
        let t1 = store
            .create_task(
                &folder,
                &chan,
                "do thing",
                ScheduleKind::Interval,
                "60000",
                ContextMode::Isolated,
                Some("2026-01-01T00:00:00Z"),
                "2026-01-01T00:00:00Z",
            )
            .await
            .unwrap();

        let due = store.due_tasks("2026-01-01T00:00:01Z").await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, t1.id);

        store.set_task_status(&t1.id, TaskStatus::Paused).await.unwrap();
        let due = store.due_tasks("2026-01-01T00:00:01Z").await.unwrap();
        assert!(due.is_empty());
    }
}
