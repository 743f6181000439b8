//! Configuration loading and validation.
//!
//! Every tunable the supervisor needs is read from the environment with a
//! documented default, validated once at startup. There is no hot-reloadable
//! config layer here (unlike group registration, which does need one — see
//! [`crate::store::state::RegisteredGroup`]): these values only matter at
//! process boot.

use crate::error::{ConfigError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Spacebot-style supervisor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory. Holds the SQLite store, `groups/`, and `ipc/`.
    pub data_dir: PathBuf,

    /// Maximum number of agent containers allowed to run concurrently,
    /// process-wide (§4.1 `MAX_CONCURRENT_CONTAINERS`).
    pub max_concurrent_containers: usize,

    /// How often the supervisor polls the store for new messages (§4.2).
    pub poll_interval: Duration,

    /// How often the IPC watcher scans drop directories (§4.5).
    pub ipc_poll_interval: Duration,

    /// How often the task scheduler checks for due tasks (§4.3).
    pub scheduler_tick_interval: Duration,

    /// Base delay for the per-channel retry backoff; doubles each attempt
    /// (§4.1 `BASE_RETRY_MS`).
    pub base_retry: Duration,

    /// Number of retries before a channel's backlog is dropped (§4.1
    /// `MAX_RETRIES`).
    pub max_retries: u32,

    /// IANA timezone used to evaluate cron schedules (§4.3 `TIMEZONE`).
    pub timezone: chrono_tz::Tz,

    /// Display name the trigger regex matches against, case-insensitively
    /// (§6.5).
    pub assistant_name: String,

    /// Folder slug of the privileged main group (§3, §4.5 `MAIN_GROUP_FOLDER`).
    pub main_group_folder: String,

    /// Sandbox image used for every agent invocation (§4.4).
    pub agent_image: String,

    /// Grace period before a shutdown escalates from polite stop to kill
    /// (§4.1 `Shutdown(grace)`).
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from the environment, applying defaults and
    /// validating invariants up front so a misconfiguration is a fast,
    /// loud startup failure rather than a silent runtime surprise.
    pub fn load() -> Result<Self> {
        let data_dir = std::env::var("NANOCLAW_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .map(|d| d.join("nanoclaw"))
                    .unwrap_or_else(|| PathBuf::from("./data"))
            });

        std::fs::create_dir_all(&data_dir).map_err(|e| ConfigError::Invalid(format!(
            "failed to create data directory {}: {e}",
            data_dir.display()
        )))?;

        let max_concurrent_containers = env_usize("MAX_CONCURRENT_CONTAINERS", 3)?;
        let poll_interval = Duration::from_millis(env_u64("POLL_INTERVAL_MS", 2_000)?);
        let ipc_poll_interval = Duration::from_millis(env_u64("IPC_POLL_INTERVAL_MS", 500)?);
        let scheduler_tick_interval = Duration::from_millis(env_u64("SCHEDULER_TICK_MS", 10_000)?);
        let base_retry = Duration::from_millis(env_u64("BASE_RETRY_MS", 5_000)?);
        let max_retries = env_usize("MAX_RETRIES", 5)? as u32;

        let timezone_str =
            std::env::var("TIMEZONE").unwrap_or_else(|_| "UTC".to_string());
        let timezone: chrono_tz::Tz = timezone_str
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid TIMEZONE '{timezone_str}'")))?;

        let assistant_name =
            std::env::var("ASSISTANT_NAME").unwrap_or_else(|_| "nanoclaw".to_string());

        let main_group_folder =
            std::env::var("MAIN_GROUP_FOLDER").unwrap_or_else(|_| "main".to_string());

        let agent_image =
            std::env::var("AGENT_IMAGE").unwrap_or_else(|_| "nanoclaw-agent:latest".to_string());

        let shutdown_grace = Duration::from_millis(env_u64("SHUTDOWN_GRACE_MS", 10_000)?);

        if max_concurrent_containers == 0 {
            return Err(ConfigError::Invalid(
                "MAX_CONCURRENT_CONTAINERS must be at least 1".into(),
            )
            .into());
        }

        Ok(Self {
            data_dir,
            max_concurrent_containers,
            poll_interval,
            ipc_poll_interval,
            scheduler_tick_interval,
            base_retry,
            max_retries,
            timezone,
            assistant_name,
            main_group_folder,
            agent_image,
            shutdown_grace,
        })
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("nanoclaw.db")
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.data_dir.join("groups")
    }

    pub fn ipc_dir(&self) -> PathBuf {
        self.data_dir.join("ipc")
    }

    pub fn ipc_errors_dir(&self) -> PathBuf {
        self.ipc_dir().join("errors")
    }

    pub fn group_folder(&self, folder: &str) -> PathBuf {
        self.groups_dir().join(folder)
    }

    pub fn group_ipc_dir(&self, folder: &str) -> PathBuf {
        self.ipc_dir().join(folder)
    }

    /// `{groupsDir}/global`, mounted read-write at `/workspace/global` for
    /// the main group only (§4.4).
    pub fn global_dir(&self) -> PathBuf {
        self.groups_dir().join("global")
    }

    /// Project root mounted read-write at `/workspace/project` for the main
    /// group only (§4.4). Defaults to the process's current directory;
    /// overridable since the supervisor is rarely launched from the project
    /// root itself in production.
    pub fn project_dir(&self) -> PathBuf {
        std::env::var("NANOCLAW_PROJECT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{key} must be a non-negative integer")).into()),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{key} must be a non-negative integer")).into()),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_u64_falls_back_to_default() {
        // SAFETY: test-only process-wide env mutation, no concurrent access.
        unsafe {
            std::env::remove_var("NANOCLAW_TEST_KEY_ABSENT");
        }
        assert_eq!(env_u64("NANOCLAW_TEST_KEY_ABSENT", 42).unwrap(), 42);
    }

    #[test]
    fn env_usize_rejects_garbage() {
        // SAFETY: test-only process-wide env mutation, no concurrent access.
        unsafe {
            std::env::set_var("NANOCLAW_TEST_KEY_GARBAGE", "not-a-number");
        }
        assert!(env_usize("NANOCLAW_TEST_KEY_GARBAGE", 1).is_err());
        unsafe {
            std::env::remove_var("NANOCLAW_TEST_KEY_GARBAGE");
        }
    }
}
