//! Task scheduler: a polling loop that materializes due tasks (cron / fixed
//! interval / one-shot) into agent invocations without double-firing across
//! crashes (§4.3).

use crate::error::Result;
use crate::queue::ChannelQueue;
use crate::store::state::{ScheduleKind, StateStore, Task};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Injected by the supervisor: run one task's agent invocation to
/// completion. The task runner reports its own errors (logging only) —
/// task failures never feed the per-channel message retry backoff (§4.1
/// "Running a task job: ... retry is not applied").
pub type TaskInvoker = Arc<dyn Fn(Task) -> BoxFuture<'static, ()> + Send + Sync>;

/// Prefixed onto every scheduled-task prompt so the agent can tell a
/// cron/interval/once firing apart from a real user message (§4.3).
pub const SCHEDULED_TASK_BANNER: &str =
    "[This is a scheduled task, not a message from a user. Act on the instruction below autonomously.]\n\n";

/// Cooperative loop that fires due tasks on a fixed cadence (§4.3).
pub struct Scheduler {
    store: Arc<StateStore>,
    queue: Arc<ChannelQueue>,
    timezone: chrono_tz::Tz,
    tick_interval: std::time::Duration,
    invoker: TaskInvoker,
}

impl Scheduler {
    pub fn new(
        store: Arc<StateStore>,
        queue: Arc<ChannelQueue>,
        timezone: chrono_tz::Tz,
        tick_interval: std::time::Duration,
        invoker: TaskInvoker,
    ) -> Self {
        Self { store, queue, timezone, tick_interval, invoker }
    }

    /// Run until `shutdown` is signaled (§5 "observe shuttingDown at their
    /// next wake").
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.tick().await {
                        tracing::error!(%error, "scheduler tick failed");
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

    /// One scheduler tick (§4.3 steps 1-3).
    pub async fn tick(&self) -> Result<()> {
        let now = now_iso8601();
        for task in self.store.due_tasks(&now).await? {
            self.fire(task).await?;
        }
        Ok(())
    }

    async fn fire(&self, task: Task) -> Result<()> {
        // Recompute-and-persist next_run *before* dispatch (or delete, for
        // `once`) so a crash between these two steps can never double-fire
        // (§4.3 step 2, §5 "at-most-once for `once` tasks").
        match task.schedule_kind {
            ScheduleKind::Once => self.store.delete_task(&task.id).await?,
            ScheduleKind::Cron => {
                let next = compute_cron_next(&task.schedule_value, self.timezone)?;
                self.store.update_task_next_run(&task.id, Some(&next)).await?;
            }
            ScheduleKind::Interval => {
                let next = compute_interval_next(&task.schedule_value)?;
                self.store.update_task_next_run(&task.id, Some(&next)).await?;
            }
        }

        let invoker = Arc::clone(&self.invoker);
        let task_id = task.id.clone();
        let channel_id = task.channel_id.clone();
        self.queue
            .enqueue_task(channel_id, task_id, Box::new(move || (invoker)(task)))
            .await;
        Ok(())
    }
}

/// `cron = "0.12"` parses 6/7-field, seconds-first expressions only, but
/// schedule values arrive as standard 5-field Unix cron (§8 scenario 5:
/// `"*/5 * * * *"`). Prepend a `0` seconds field before parsing whenever the
/// expression has exactly 5 whitespace-separated fields. Shared by the
/// scheduler's recompute-on-fire path and `ipc`'s creation-time validation
/// so the two can never disagree on what parses.
pub(crate) fn normalize_cron_expr(value: &str) -> String {
    if value.split_whitespace().count() == 5 {
        format!("0 {value}")
    } else {
        value.to_string()
    }
}

fn compute_cron_next(value: &str, tz: chrono_tz::Tz) -> Result<String> {
    let schedule: cron::Schedule = normalize_cron_expr(value).parse().map_err(|e: cron::error::Error| {
        crate::error::SchedulerError::InvalidCron(value.to_string(), e.to_string())
    })?;
    let next = schedule.upcoming(tz).next().ok_or_else(|| {
        crate::error::SchedulerError::InvalidSchedule(format!("cron '{value}' has no upcoming occurrence"))
    })?;
    Ok(next.to_rfc3339())
}

fn compute_interval_next(value: &str) -> Result<String> {
    let ms: i64 = value.parse().map_err(|_| {
        crate::error::SchedulerError::InvalidSchedule(format!("interval '{value}' is not a millisecond integer"))
    })?;
    Ok((chrono::Utc::now() + chrono::Duration::milliseconds(ms)).to_rfc3339())
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::state::{ContextMode, StateStore};
    use crate::{ChannelId, GroupFolder};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    async fn test_store() -> Arc<StateStore> {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let store = StateStore::new(pool);
        store.initialize().await.unwrap();
        Arc::new(store)
    }

    #[test]
    fn cron_next_is_strictly_future() {
        let next = compute_cron_next("0 0 * * * *", chrono_tz::UTC).unwrap();
        let parsed = chrono::DateTime::parse_from_rfc3339(&next).unwrap();
        assert!(parsed > chrono::Utc::now());
    }

    #[test]
    fn cron_next_accepts_five_field_unix_expression() {
        let next = compute_cron_next("*/5 * * * *", chrono_tz::UTC).unwrap();
        let parsed = chrono::DateTime::parse_from_rfc3339(&next).unwrap();
        assert!(parsed > chrono::Utc::now());
    }

    #[test]
    fn interval_next_adds_milliseconds() {
        let next = compute_interval_next("60000").unwrap();
        let parsed = chrono::DateTime::parse_from_rfc3339(&next).unwrap();
        let delta = parsed.with_timezone(&chrono::Utc) - chrono::Utc::now();
        assert!(delta.num_seconds() > 50 && delta.num_seconds() <= 60);
    }

    #[tokio::test]
    async fn once_task_is_deleted_not_rescheduled() {
        let store = test_store().await;
        let queue = ChannelQueue::new(4, Duration::from_secs(1), 5, broadcast::channel(16).0);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let invoker: TaskInvoker = Arc::new(move |_task| {
            let calls = Arc::clone(&calls_clone);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        });

        let folder = GroupFolder::from("g1");
        let chan = ChannelId::from("c1");
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

        let scheduler = Scheduler::new(
            Arc::clone(&store),
            queue,
            chrono_tz::UTC,
            Duration::from_secs(1),
            invoker,
        );
        scheduler.tick().await.unwrap();

        assert!(store.get_task(&task.id).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn interval_task_is_rescheduled_not_deleted() {
        let store = test_store().await;
        let queue = ChannelQueue::new(4, Duration::from_secs(1), 5, broadcast::channel(16).0);
        let invoker: TaskInvoker = Arc::new(|_task| Box::pin(async {}));

        let folder = GroupFolder::from("g1");
        let chan = ChannelId::from("c1");
        let task = store
            .create_task(
                &folder,
                &chan,
                "do thing",
                ScheduleKind::Interval,
                "60000",
                ContextMode::Group,
                Some("2026-01-01T00:00:00Z"),
                "2026-01-01T00:00:00Z",
            )
            .await
            .unwrap();

        let scheduler = Scheduler::new(
            Arc::clone(&store),
            queue,
            chrono_tz::UTC,
            Duration::from_secs(1),
            invoker,
        );
        scheduler.tick().await.unwrap();

        let reloaded = store.get_task(&task.id).await.unwrap().unwrap();
        assert!(reloaded.next_run.unwrap() > "2026-01-01T00:00:00Z".to_string());
    }
}
