//! Crate-wide error types.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required env var: {0}")]
    MissingEnv(String),
}

/// State/session store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("channel not registered: {0}")]
    ChannelNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Per-channel queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is shutting down")]
    ShuttingDown,

    #[error("channel {0} has no registered processor")]
    NoProcessor(String),
}

/// Container-runner errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("no container runtime available (checked docker, container)")]
    NoRuntime,

    #[error("container runtime health check failed: {0}")]
    RuntimeUnhealthy(String),

    #[error("failed to launch container: {0}")]
    Launch(String),

    #[error("container exited without producing output markers")]
    MissingOutputMarkers,

    #[error("failed to parse container output: {0}")]
    InvalidOutput(String),

    #[error("agent reported an error: {0}")]
    AgentError(String),
}

/// IPC watcher errors.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("invalid IPC payload: {0}")]
    InvalidPayload(String),

    #[error("unauthorized: group '{source}' may not act on group '{target}'")]
    Unauthorized { source: String, target: String },

    #[error("unknown IPC message type: {0}")]
    UnknownType(String),
}

/// Task scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{0}': {1}")]
    InvalidCron(String, String),

    #[error("invalid schedule value: {0}")]
    InvalidSchedule(String),
}

/// Errors from the agent function-calling loop running inside the sandbox
/// (§4.7). Distinct from [`ContainerError`], which is the host's view of a
/// container invocation gone wrong.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM returned an unparseable response: {0}")]
    LlmResponse(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid tool arguments for {tool}: {reason}")]
    InvalidArgs { tool: String, reason: String },

    #[error("path escapes the group working directory: {0}")]
    PathEscape(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
