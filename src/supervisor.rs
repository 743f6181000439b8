//! Supervisor: message intake, the per-channel backlog processor, the
//! polling loop, and the glue between the store, the container runner, the
//! queue, the IPC watcher and the scheduler (§4.2).

use crate::config::Config;
use crate::container::{ContainerRunner, LaunchSpec, MainMounts};
use crate::error::{ContainerError, Result};
use crate::ipc::{IpcEffect, IpcWatcher};
use crate::messaging::{OutboundChat, deliver_chunked};
use crate::queue::ChannelQueue;
use crate::scheduler::{SCHEDULED_TASK_BANNER, Scheduler, TaskInvoker};
use crate::store::session::SessionStore;
use crate::store::state::{ContextMode, Message, RegisteredGroup, StateStore, Task};
use crate::wire::{ContainerInput, ContainerOutput, ContainerStatus, OutputType};
use crate::xml::format_messages;
use crate::{ChannelId, PromptMessage, SupervisorEvent};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const TYPING_REFRESH_INTERVAL: Duration = Duration::from_secs(9);

/// One inbound chat event, fed to [`Supervisor::ingest`] (§4.2 intake).
/// Mention/reply detection happens on the chat-platform side of the
/// [`OutboundChat`] boundary (§1) and arrives here already computed.
pub struct InboundChatEvent {
    pub channel_id: ChannelId,
    pub chat_name: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: String,
    pub mentions_bot: bool,
    pub replied_to_bot: bool,
}

pub struct Supervisor {
    config: Arc<Config>,
    state: Arc<StateStore>,
    sessions: Arc<SessionStore>,
    queue: Arc<ChannelQueue>,
    runner: Arc<ContainerRunner>,
    ipc: Arc<IpcWatcher>,
    chat: Arc<dyn OutboundChat>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Supervisor {
    /// Wire the queue's message processor and container controller callbacks
    /// back into itself, resolving the constructor cycle documented in §9
    /// "cyclic references" the same way [`IpcWatcher`] resolves its own via
    /// [`IpcEffect`].
    pub fn new(
        config: Arc<Config>,
        state: Arc<StateStore>,
        sessions: Arc<SessionStore>,
        runner: Arc<ContainerRunner>,
        chat: Arc<dyn OutboundChat>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let queue = ChannelQueue::new(
            config.max_concurrent_containers,
            config.base_retry,
            config.max_retries,
            events.clone(),
        );

        let stop_runner = Arc::clone(&runner);
        let kill_runner = Arc::clone(&runner);
        queue.set_container_controller(
            Arc::new(move |name: String| {
                let runner = Arc::clone(&stop_runner);
                Box::pin(async move { runner.stop(&name).await })
            }),
            Arc::new(move |name: String| {
                let runner = Arc::clone(&kill_runner);
                Box::pin(async move { runner.kill(&name).await })
            }),
        );

        let ipc = Arc::new(IpcWatcher::new(Arc::clone(&config), Arc::clone(&state)));

        let supervisor = Arc::new(Self {
            config,
            state,
            sessions,
            queue: Arc::clone(&queue),
            runner,
            ipc,
            chat,
            events,
        });

        let processor_supervisor = Arc::clone(&supervisor);
        queue.set_message_processor(Arc::new(move |channel_id: ChannelId| {
            let supervisor = Arc::clone(&processor_supervisor);
            Box::pin(async move { supervisor.process_channel(channel_id).await })
        }));

        supervisor
    }

    pub fn events(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    fn build_scheduler(self: &Arc<Self>) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.state),
            Arc::clone(&self.queue),
            self.config.timezone,
            self.config.scheduler_tick_interval,
            self.task_invoker(),
        )
    }

    /// Drive the supervisor until `shutdown` fires: recover any channel with
    /// an unprocessed backlog, then run the polling loop, the IPC watcher,
    /// and the scheduler concurrently (§4.2, §4.3, §4.5).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.runner.cleanup_stopped("nanoclaw-").await.ok();
        self.startup_recovery().await?;

        let scheduler = self.build_scheduler();

        let poll_handle = tokio::spawn(Arc::clone(&self).poll_loop(shutdown.clone()));
        let ipc_handle = tokio::spawn(Arc::clone(&self).ipc_watch_loop(shutdown.clone()));
        let scheduler_shutdown = shutdown.clone();
        let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

        let _ = shutdown.changed().await;

        self.queue.shutdown(self.config.shutdown_grace).await?;

        let _ = tokio::join!(poll_handle, ipc_handle, scheduler_handle);
        Ok(())
    }

    // ---- intake (§4.2) ----

    /// Store chat metadata unconditionally; append a message row only for
    /// registered channels, with `mentions_bot` computed from the caller's
    /// own mention/reply detection (§4.2 step "intake").
    pub async fn ingest(&self, event: InboundChatEvent) -> Result<()> {
        self.state
            .upsert_chat(event.channel_id.as_ref(), &event.chat_name, &event.timestamp)
            .await?;

        if self.state.get_registered_group(&event.channel_id).await?.is_some() {
            let mentions_bot = event.mentions_bot || event.replied_to_bot;
            self.state
                .insert_message(&event.channel_id, &event.sender_name, &event.content, &event.timestamp, mentions_bot)
                .await?;
        }

        Ok(())
    }

    // ---- polling loop (§4.2) ----

    async fn poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.poll_once().await {
                        tracing::error!(%error, "poll loop iteration failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn poll_once(self: &Arc<Self>) -> Result<()> {
        let since = self.state.get_last_timestamp().await?.unwrap_or_default();
        let messages = self
            .state
            .messages_since_for_registered_channels(&since, &self.config.assistant_name)
            .await?;
        if messages.is_empty() {
            return Ok(());
        }

        // Advance the watermark *before* enqueueing so a crash mid-dispatch
        // can never reprocess a message twice from this loop (§5).
        let max_ts = messages
            .iter()
            .map(|m| m.timestamp.clone())
            .max()
            .expect("checked non-empty above");
        self.state.set_last_timestamp(&max_ts).await?;

        let mut seen = std::collections::HashSet::new();
        for message in &messages {
            if seen.insert(message.channel_id.clone()) {
                self.queue.enqueue_message_check(message.channel_id.clone()).await;
            }
        }
        Ok(())
    }

    /// On boot, re-check every registered channel for a backlog that
    /// accumulated while the supervisor was down (§4.2 "Startup recovery").
    async fn startup_recovery(self: &Arc<Self>) -> Result<()> {
        for group in self.state.list_registered_groups().await? {
            let since = self
                .state
                .get_last_agent_timestamp(&group.channel_id)
                .await?
                .unwrap_or_default();
            let pending = self
                .state
                .messages_for_channel_since(&group.channel_id, &since, &self.config.assistant_name)
                .await?;
            if !pending.is_empty() {
                self.queue.enqueue_message_check(group.channel_id.clone()).await;
            }
        }
        Ok(())
    }

    // ---- per-channel message processor (§4.2) ----

    async fn process_channel(self: Arc<Self>, channel_id: ChannelId) -> bool {
        match self.process_channel_inner(&channel_id).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%channel_id, %error, "channel backlog processing failed, will retry");
                false
            }
        }
    }

    async fn process_channel_inner(self: &Arc<Self>, channel_id: &ChannelId) -> Result<()> {
        let Some(group) = self.state.get_registered_group(channel_id).await? else {
            tracing::warn!(%channel_id, "channel no longer registered, dropping backlog check");
            return Ok(());
        };

        let since = self.state.get_last_agent_timestamp(channel_id).await?.unwrap_or_default();
        let messages = self
            .state
            .messages_for_channel_since(channel_id, &since, &self.config.assistant_name)
            .await?;
        if messages.is_empty() {
            return Ok(());
        }

        let is_main = group.is_main(&self.config.main_group_folder);
        if !is_main && group.requires_trigger && !has_trigger(&messages, group.trigger.as_deref(), &self.config.assistant_name) {
            return Ok(());
        }

        let prompt = format_messages(&to_prompt_messages(&messages));
        let session_id = self.sessions.get(&group.folder).await?;

        let typing = self.spawn_typing_indicator(channel_id.clone());
        let result = self.invoke_agent(&group, channel_id, prompt, session_id, false).await;
        typing.abort();

        let output = result?;
        if output.status == ContainerStatus::Error {
            return Err(ContainerError::AgentError(output.error.unwrap_or_default()).into());
        }

        let last_ts = messages.last().expect("checked non-empty above").timestamp.clone();
        self.state.set_last_agent_timestamp(channel_id, &last_ts).await?;

        if let Some(new_session_id) = &output.new_session_id {
            self.sessions.set(&group.folder, new_session_id).await?;
        }

        self.deliver_result(channel_id, &output).await;
        Ok(())
    }

    async fn deliver_result(&self, channel_id: &ChannelId, output: &ContainerOutput) {
        let Some(result) = &output.result else { return };
        if result.output_type != OutputType::Message {
            return;
        }
        if let Some(text) = &result.user_message {
            deliver_chunked(self.chat.as_ref(), channel_id, text).await;
        }
    }

    fn spawn_typing_indicator(self: &Arc<Self>, channel_id: ChannelId) -> tokio::task::JoinHandle<()> {
        let chat = Arc::clone(&self.chat);
        tokio::spawn(async move {
            loop {
                if let Err(error) = chat.typing(&channel_id).await {
                    tracing::debug!(%channel_id, %error, "typing indicator refresh failed");
                }
                tokio::time::sleep(TYPING_REFRESH_INTERVAL).await;
            }
        })
    }

    // ---- container launch (§4.4) ----

    async fn prepare_group_dirs(&self, folder: &str) -> Result<()> {
        let group_dir = self.config.group_folder(folder);
        for sub in ["conversations", ".sessions", "logs", "attachments"] {
            tokio::fs::create_dir_all(group_dir.join(sub)).await?;
        }
        let ipc_dir = self.config.group_ipc_dir(folder);
        for sub in ["messages", "tasks"] {
            tokio::fs::create_dir_all(ipc_dir.join(sub)).await?;
        }
        tokio::fs::create_dir_all(self.config.global_dir()).await?;
        if folder == self.config.main_group_folder {
            tokio::fs::create_dir_all(self.config.project_dir()).await?;
        }
        Ok(())
    }

    async fn invoke_agent(
        self: &Arc<Self>,
        group: &RegisteredGroup,
        channel_id: &ChannelId,
        prompt: String,
        session_id: Option<String>,
        is_scheduled_task: bool,
    ) -> Result<ContainerOutput> {
        let is_main = group.is_main(&self.config.main_group_folder);
        let folder = group.folder.as_ref();

        self.prepare_group_dirs(folder).await?;

        let all_groups = self.state.list_registered_groups().await?;
        let chats = self.state.list_chats().await?;
        self.ipc.write_snapshots(folder, is_main, &all_groups, &chats).await?;

        let main_mounts = if is_main {
            Some(MainMounts {
                project_dir: self.config.project_dir(),
                global_dir: self.config.global_dir(),
            })
        } else {
            None
        };
        let global_dir_ro = if is_main { None } else { Some(self.config.global_dir()) };

        let mut secrets = Vec::new();
        for key in ["GEMINI_API_KEY", "GEMINI_MODEL"] {
            match std::env::var(key) {
                Ok(value) => secrets.push((key.to_string(), value)),
                Err(_) => tracing::warn!(%key, "secret not set in supervisor environment"),
            }
        }

        let input = ContainerInput {
            prompt,
            session_id,
            group_folder: folder.to_string(),
            channel_id: channel_id.to_string(),
            is_main,
            is_scheduled_task,
            images: None,
        };

        let spec = LaunchSpec {
            image: self.config.agent_image.clone(),
            group_folder: folder.to_string(),
            group_dir: self.config.group_folder(folder),
            ipc_dir: self.config.group_ipc_dir(folder),
            main_mounts,
            global_dir_ro,
            overrides: group.container_overrides.clone(),
            secrets,
            input,
        };

        let queue = Arc::clone(&self.queue);
        let events = self.events.clone();
        let channel_id_owned = channel_id.clone();
        let launched_name = Arc::new(std::sync::Mutex::new(None));
        let launched_name_for_spawn = Arc::clone(&launched_name);

        let result = self
            .runner
            .run(
                spec,
                Box::new(move |process, name| {
                    *launched_name_for_spawn.lock().unwrap() = Some(name.clone());
                    let _ = events.send(SupervisorEvent::ContainerLaunched {
                        channel_id: channel_id_owned.clone(),
                        container_name: name.clone(),
                    });
                    let channel_id_for_register = channel_id_owned.clone();
                    tokio::spawn(async move {
                        queue.register_process(&channel_id_for_register, process, name).await;
                    });
                }),
            )
            .await;

        let success = matches!(&result, Ok(output) if output.status == ContainerStatus::Success);
        let name = launched_name.lock().unwrap().clone();
        if let Some(name) = name {
            let _ = self.events.send(SupervisorEvent::ContainerExited {
                channel_id: channel_id.clone(),
                container_name: name,
                success,
            });
        }

        result
    }

    // ---- scheduled tasks (§4.3) ----

    fn task_invoker(self: &Arc<Self>) -> TaskInvoker {
        let supervisor = Arc::clone(self);
        Arc::new(move |task: Task| {
            let supervisor = Arc::clone(&supervisor);
            Box::pin(async move { supervisor.run_task(task).await })
        })
    }

    async fn run_task(self: &Arc<Self>, task: Task) {
        let group = match self.state.get_registered_group(&task.channel_id).await {
            Ok(Some(group)) => group,
            Ok(None) => {
                tracing::warn!(task_id = %task.id, "scheduled task's channel is no longer registered");
                return;
            }
            Err(error) => {
                tracing::error!(task_id = %task.id, %error, "failed to load scheduled task's group");
                return;
            }
        };

        let session_id = match task.context_mode {
            ContextMode::Group => self.sessions.get(&group.folder).await.ok().flatten(),
            ContextMode::Isolated => None,
        };

        let _ = self.events.send(SupervisorEvent::TaskFired {
            task_id: task.id.clone(),
            channel_id: task.channel_id.clone(),
        });

        let prompt = format!("{SCHEDULED_TASK_BANNER}{}", task.prompt);
        let typing = self.spawn_typing_indicator(task.channel_id.clone());
        let result = self
            .invoke_agent(&group, &task.channel_id, prompt, session_id, true)
            .await;
        typing.abort();

        match result {
            Ok(output) if output.status == ContainerStatus::Success => {
                if let Some(new_session_id) = &output.new_session_id {
                    let _ = self.sessions.set(&group.folder, new_session_id).await;
                }
                self.deliver_result(&task.channel_id, &output).await;
            }
            Ok(output) => {
                tracing::error!(task_id = %task.id, error = ?output.error, "scheduled task agent reported an error");
            }
            Err(error) => {
                tracing::error!(task_id = %task.id, %error, "scheduled task invocation failed");
            }
        }
    }

    // ---- IPC (§4.5) ----

    async fn ipc_watch_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.ipc_poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.ipc.poll_once().await {
                        Ok(effects) => self.apply_ipc_effects(effects).await,
                        Err(error) => tracing::error!(%error, "IPC poll failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn apply_ipc_effects(&self, effects: Vec<IpcEffect>) {
        for effect in effects {
            match effect {
                IpcEffect::DeliverMessage { channel_id, text } => {
                    deliver_chunked(self.chat.as_ref(), &channel_id, &text).await;
                }
                IpcEffect::GroupsRefreshed => {
                    tracing::info!("groups refreshed via IPC");
                }
            }
        }
    }
}

fn to_prompt_messages(messages: &[Message]) -> Vec<PromptMessage> {
    messages
        .iter()
        .map(|m| PromptMessage {
            sender: m.sender_name.clone(),
            time: m.timestamp.clone(),
            content: m.content.clone(),
        })
        .collect()
}

/// Whether any message in the batch trips the trigger: either the chat
/// platform's own mention/reply detection already flagged it, or its text
/// matches the group's trigger regex (or, absent an override, the default
/// `\b{ASSISTANT_NAME}\b` pattern) case-insensitively (§6.5).
fn has_trigger(messages: &[Message], trigger_override: Option<&str>, assistant_name: &str) -> bool {
    let pattern = trigger_override
        .map(str::to_string)
        .unwrap_or_else(|| default_trigger_pattern(assistant_name));
    let Ok(regex) = Regex::new(&format!("(?i){pattern}")) else {
        tracing::warn!(%pattern, "invalid trigger regex, falling back to mention flag only");
        return messages.iter().any(|m| m.mentions_bot);
    };
    messages.iter().any(|m| m.mentions_bot || regex.is_match(&m.content))
}

fn default_trigger_pattern(assistant_name: &str) -> String {
    format!(r"\b{}\b", regex::escape(assistant_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::state::ContainerOverrides;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_state() -> Arc<StateStore> {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let store = StateStore::new(pool);
        store.initialize().await.unwrap();
        Arc::new(store)
    }

    fn msg(content: &str, mentions_bot: bool) -> Message {
        Message {
            id: "1".into(),
            channel_id: ChannelId::from("c1"),
            sender_name: "u1".into(),
            content: content.into(),
            timestamp: "1".into(),
            mentions_bot,
        }
    }

    #[test]
    fn default_trigger_matches_assistant_name_case_insensitively() {
        let messages = vec![msg("hey Nanoclaw, do the thing", false)];
        assert!(has_trigger(&messages, None, "nanoclaw"));
    }

    #[test]
    fn default_trigger_does_not_match_substring() {
        let messages = vec![msg("nanoclawed is not a word", false)];
        assert!(!has_trigger(&messages, None, "nanoclaw"));
    }

    #[test]
    fn mentions_bot_flag_bypasses_regex() {
        let messages = vec![msg("totally unrelated text", true)];
        assert!(has_trigger(&messages, None, "nanoclaw"));
    }

    #[test]
    fn custom_trigger_overrides_default() {
        let messages = vec![msg("yo assistant help", false)];
        assert!(has_trigger(&messages, Some("assistant"), "nanoclaw"));

        let messages = vec![msg("hey nanoclaw help", false)];
        assert!(!has_trigger(&messages, Some("assistant"), "nanoclaw"));
    }

    #[tokio::test]
    async fn ingest_stores_chat_unconditionally_but_message_only_if_registered() {
        let state = test_state().await;
        let chan = ChannelId::from("c1");

        state.upsert_chat(chan.as_ref(), "general", "t1").await.unwrap();
        assert!(state.get_registered_group(&chan).await.unwrap().is_none());

        let group = RegisteredGroup {
            channel_id: chan.clone(),
            name: "general".into(),
            folder: crate::GroupFolder::from("g1"),
            trigger: None,
            requires_trigger: true,
            container_overrides: ContainerOverrides::default(),
            added_at: "t0".into(),
        };
        state.register_group(&group).await.unwrap();

        state.insert_message(&chan, "u1", "hi", "t2", false).await.unwrap();
        let messages = state.messages_for_channel_since(&chan, "0", "bot").await.unwrap();
        assert_eq!(messages.len(), 1);
    }
}
