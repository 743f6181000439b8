//! Per-channel work queue: enforces "at most one agent per channel" and
//! "at most N agents process-wide" while letting many channels make
//! progress concurrently (§4.1).

use crate::error::{QueueError, Result};
use crate::{ChannelId, SupervisorEvent};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Injected by the supervisor: runs the backlog check for one channel and
/// reports success/failure so the queue can apply retry backoff.
pub type MessageProcessor = Arc<dyn Fn(ChannelId) -> BoxFuture<'static, bool> + Send + Sync>;

/// Injected by the container-runner: politely stop / force-kill a container
/// by name, used by [`ChannelQueue::shutdown`].
pub type ContainerStopper = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// An out-of-band job submitted via [`ChannelQueue::enqueue_task`], deduped
/// by `task_id` within a channel's pending list.
pub struct PendingTask {
    pub task_id: String,
    pub run: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>,
}

/// Handle to a live subprocess/container, transferred to the queue by the
/// runner via [`ChannelQueue::register_process`] so only the queue may
/// terminate it (§9 "subprocess ownership").
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub container_id: String,
}

struct ChannelSlot {
    active: bool,
    pending_msg: bool,
    pending_task_ids: HashSet<String>,
    pending_tasks: VecDeque<PendingTask>,
    process: Option<ProcessHandle>,
    container_name: Option<String>,
    retry_count: u32,
}

impl ChannelSlot {
    fn new() -> Self {
        Self {
            active: false,
            pending_msg: false,
            pending_task_ids: HashSet::new(),
            pending_tasks: VecDeque::new(),
            process: None,
            container_name: None,
            retry_count: 0,
        }
    }
}

enum StartedJob {
    Message(ChannelId),
    Task(ChannelId, PendingTask),
}

struct Inner {
    channels: HashMap<ChannelId, ChannelSlot>,
    active_count: usize,
    waiting: VecDeque<ChannelId>,
    shutting_down: bool,
}

/// The per-channel queue and global concurrency gate.
pub struct ChannelQueue {
    inner: Mutex<Inner>,
    cap: usize,
    base_retry: Duration,
    max_retries: u32,
    processor: arc_swap::ArcSwapOption<MessageProcessor>,
    stop_container: arc_swap::ArcSwapOption<ContainerStopper>,
    kill_container: arc_swap::ArcSwapOption<ContainerStopper>,
    event_tx: broadcast::Sender<SupervisorEvent>,
}

impl ChannelQueue {
    pub fn new(cap: usize, base_retry: Duration, max_retries: u32, event_tx: broadcast::Sender<SupervisorEvent>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                channels: HashMap::new(),
                active_count: 0,
                waiting: VecDeque::new(),
                shutting_down: false,
            }),
            cap,
            base_retry,
            max_retries,
            processor: arc_swap::ArcSwapOption::from(None),
            stop_container: arc_swap::ArcSwapOption::from(None),
            kill_container: arc_swap::ArcSwapOption::from(None),
            event_tx,
        })
    }

    /// Inject the per-channel message processor. Must be called before any
    /// message enqueue is drained, resolving the queue/supervisor
    /// constructor cycle (§9).
    pub fn set_message_processor(&self, processor: MessageProcessor) {
        self.processor.store(Some(Arc::new(processor)));
    }

    /// Inject the container stop/kill callbacks used by [`Self::shutdown`].
    pub fn set_container_controller(&self, stop: ContainerStopper, kill: ContainerStopper) {
        self.stop_container.store(Some(Arc::new(stop)));
        self.kill_container.store(Some(Arc::new(kill)));
    }

    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.active_count
    }

    /// Idempotent request to process any backlog for `channel_id`.
    pub async fn enqueue_message_check(self: &Arc<Self>, channel_id: ChannelId) {
        let started = {
            let mut inner = self.inner.lock().await;
            if inner.shutting_down {
                return;
            }
            let cap = self.cap;
            let slot = inner.channels.entry(channel_id.clone()).or_insert_with(ChannelSlot::new);

            if slot.active {
                slot.pending_msg = true;
                None
            } else if inner.active_count >= cap {
                slot.pending_msg = true;
                if !inner.waiting.contains(&channel_id) {
                    inner.waiting.push_back(channel_id.clone());
                }
                None
            } else {
                slot.active = true;
                slot.pending_msg = false;
                inner.active_count += 1;
                Some(StartedJob::Message(channel_id.clone()))
            }
        };

        if let Some(job) = started {
            self.spawn_job(job);
        }
    }

    /// Submit an out-of-band job for the channel, deduped by `task_id`.
    pub async fn enqueue_task(
        self: &Arc<Self>,
        channel_id: ChannelId,
        task_id: String,
        run: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>,
    ) {
        let started = {
            let mut inner = self.inner.lock().await;
            if inner.shutting_down {
                return;
            }
            let cap = self.cap;
            let slot = inner.channels.entry(channel_id.clone()).or_insert_with(ChannelSlot::new);

            if slot.pending_task_ids.contains(&task_id) {
                return;
            }

            let task = PendingTask { task_id: task_id.clone(), run };

            if slot.active {
                slot.pending_task_ids.insert(task_id);
                slot.pending_tasks.push_back(task);
                None
            } else if inner.active_count >= cap {
                slot.pending_task_ids.insert(task_id);
                slot.pending_tasks.push_back(task);
                if !inner.waiting.contains(&channel_id) {
                    inner.waiting.push_back(channel_id.clone());
                }
                None
            } else {
                slot.active = true;
                inner.active_count += 1;
                Some(StartedJob::Task(channel_id.clone(), task))
            }
        };

        if let Some(job) = started {
            self.spawn_job(job);
        }
    }

    /// Record the live process/container for a channel's in-flight job.
    pub async fn register_process(&self, channel_id: &ChannelId, process: ProcessHandle, container_name: String) {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.channels.get_mut(channel_id) {
            slot.process = Some(process);
            slot.container_name = Some(container_name);
        }
    }

    fn spawn_job(self: &Arc<Self>, job: StartedJob) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match job {
                StartedJob::Message(channel_id) => this.run_message_job(channel_id).await,
                StartedJob::Task(channel_id, task) => this.run_task_job(channel_id, task).await,
            }
        });
    }

    async fn run_message_job(self: Arc<Self>, channel_id: ChannelId) {
        let processor = self.processor.load_full();
        let success = match processor {
            Some(p) => (p)(channel_id.clone()).await,
            None => {
                tracing::error!(%channel_id, "no message processor registered");
                false
            }
        };

        if success {
            self.reset_retry(&channel_id).await;
        } else {
            self.schedule_retry(channel_id.clone()).await;
        }

        self.finish_and_drain(channel_id).await;
    }

    async fn run_task_job(self: Arc<Self>, channel_id: ChannelId, task: PendingTask) {
        (task.run)().await;
        self.finish_and_drain(channel_id).await;
    }

    async fn reset_retry(&self, channel_id: &ChannelId) {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.channels.get_mut(channel_id) {
            slot.retry_count = 0;
        }
    }

    /// §4.1 `scheduleRetry`: exponential backoff, 5 attempts max, then drop.
    async fn schedule_retry(self: &Arc<Self>, channel_id: ChannelId) {
        let (delay_ms, retry_count) = {
            let mut inner = self.inner.lock().await;
            let Some(slot) = inner.channels.get_mut(&channel_id) else {
                return;
            };
            slot.retry_count += 1;
            if slot.retry_count > self.max_retries {
                slot.retry_count = 0;
                return;
            }
            (self.base_retry.as_millis() as u64 * 2u64.pow(slot.retry_count - 1), slot.retry_count)
        };

        let _ = self.event_tx.send(SupervisorEvent::ChannelRetryScheduled {
            channel_id: channel_id.clone(),
            retry_count,
            delay_ms,
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if this.inner.lock().await.shutting_down {
                return;
            }
            this.enqueue_message_check(channel_id).await;
        });
    }

    /// §4.1 `drain`: prefer the channel's own pending task over its pending
    /// messages; if neither, free the slot for a waiting channel.
    async fn finish_and_drain(self: Arc<Self>, channel_id: ChannelId) {
        let started = {
            let mut inner = self.inner.lock().await;
            inner.active_count -= 1;
            let Some(slot) = inner.channels.get_mut(&channel_id) else {
                drop(inner);
                return self.drain_waiters().await;
            };
            slot.active = false;
            slot.process = None;
            slot.container_name = None;

            if let Some(task) = slot.pending_tasks.pop_front() {
                slot.pending_task_ids.remove(&task.task_id);
                slot.active = true;
                inner.active_count += 1;
                Some(StartedJob::Task(channel_id.clone(), task))
            } else if slot.pending_msg {
                slot.pending_msg = false;
                slot.active = true;
                inner.active_count += 1;
                Some(StartedJob::Message(channel_id.clone()))
            } else {
                None
            }
        };

        match started {
            Some(job) => self.spawn_job(job),
            None => self.drain_waiters().await,
        }
    }

    /// §4.1 `drainWaiters`.
    async fn drain_waiters(self: Arc<Self>) {
        let mut to_start = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            while inner.active_count < self.cap {
                let Some(channel_id) = inner.waiting.pop_front() else {
                    break;
                };
                let Some(slot) = inner.channels.get_mut(&channel_id) else {
                    continue;
                };
                if let Some(task) = slot.pending_tasks.pop_front() {
                    slot.pending_task_ids.remove(&task.task_id);
                    slot.active = true;
                    inner.active_count += 1;
                    to_start.push(StartedJob::Task(channel_id, task));
                } else if slot.pending_msg {
                    slot.pending_msg = false;
                    slot.active = true;
                    inner.active_count += 1;
                    to_start.push(StartedJob::Message(channel_id));
                }
                // A channel with neither pending kind should never have been
                // in `waiting`; drop it silently rather than spin.
            }
        }

        for job in to_start {
            self.spawn_job(job);
        }
    }

    /// Stop accepting new work, politely terminate in-flight containers by
    /// name, escalate to force-kill after `grace`.
    pub async fn shutdown(self: &Arc<Self>, grace: Duration) -> Result<()> {
        let (already_idle, targets) = {
            let mut inner = self.inner.lock().await;
            inner.shutting_down = true;
            if inner.active_count == 0 {
                (true, Vec::new())
            } else {
                let targets: Vec<String> = inner
                    .channels
                    .values()
                    .filter(|s| s.active)
                    .filter_map(|s| s.container_name.clone())
                    .collect();
                (false, targets)
            }
        };

        if already_idle {
            return Ok(());
        }

        if let Some(stop) = self.stop_container.load_full() {
            for name in targets {
                let name = sanitize_container_name(&name);
                let stop = Arc::clone(&stop);
                tokio::spawn(async move { (stop)(name).await });
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.inner.lock().await.active_count == 0 {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let remaining: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .channels
                .values()
                .filter(|s| s.active)
                .filter_map(|s| s.container_name.clone())
                .collect()
        };

        if let Some(kill) = self.kill_container.load_full() {
            for name in remaining {
                let name = sanitize_container_name(&name);
                (kill)(name).await;
            }
        }

        Ok(())
    }
}

/// Re-sanitize a container name to `[A-Za-z0-9-]+` before any external use
/// (§4.1 Shutdown, §4.4 naming), even though names were already sanitized at
/// build time.
pub fn sanitize_container_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_event_tx() -> broadcast::Sender<SupervisorEvent> {
        broadcast::channel(16).0
    }

    #[tokio::test]
    async fn sanitize_strips_shell_metacharacters() {
        assert_eq!(sanitize_container_name("nanoclaw-g1-ab;rm -rf /"), "nanoclaw-g1-abrm-rf");
    }

    #[tokio::test]
    async fn shutdown_with_no_active_returns_immediately() {
        let queue = ChannelQueue::new(2, Duration::from_millis(10), 5, noop_event_tx());
        let start = tokio::time::Instant::now();
        queue.shutdown(Duration::from_secs(30)).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn coalesces_rapid_enqueues_into_one_drain_pass() {
        let queue = ChannelQueue::new(4, Duration::from_millis(10), 5, noop_event_tx());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(tokio::sync::Notify::new());

        let calls_clone = Arc::clone(&calls);
        let release_clone = Arc::clone(&release);
        queue.set_message_processor(Arc::new(move |_channel| {
            let calls = Arc::clone(&calls_clone);
            let release = Arc::clone(&release_clone);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                true
            })
        }));

        let chan: ChannelId = ChannelId::from("c1");
        queue.enqueue_message_check(chan.clone()).await;
        // Give the first job a chance to mark itself active before coalescing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue_message_check(chan.clone()).await;
        queue.enqueue_message_check(chan.clone()).await;
        queue.enqueue_message_check(chan.clone()).await;

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // First run + exactly one coalesced re-run == 2 calls total.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cap_queues_extra_channels_as_waiters() {
        let queue = ChannelQueue::new(1, Duration::from_millis(10), 5, noop_event_tx());
        let release = Arc::new(tokio::sync::Notify::new());
        let started = Arc::new(AtomicUsize::new(0));

        let release_clone = Arc::clone(&release);
        let started_clone = Arc::clone(&started);
        queue.set_message_processor(Arc::new(move |_channel| {
            let release = Arc::clone(&release_clone);
            let started = Arc::clone(&started_clone);
            Box::pin(async move {
                started.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                true
            })
        }));

        let c1: ChannelId = ChannelId::from("c1");
        let c2: ChannelId = ChannelId::from("c2");
        queue.enqueue_message_check(c1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue_message_check(c2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(queue.active_count().await, 1);
        assert_eq!(started.load(Ordering::SeqCst), 1);

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_exhausts_after_max_attempts() {
        let queue = ChannelQueue::new(4, Duration::from_millis(1), 2, noop_event_tx());
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);
        queue.set_message_processor(Arc::new(move |_channel| {
            attempts_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { false })
        }));

        let chan: ChannelId = ChannelId::from("c1");
        queue.enqueue_message_check(chan).await;

        // initial + 2 retries = 3 attempts, then it stops.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
