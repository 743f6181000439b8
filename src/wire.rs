//! Wire types shared between the host (`nanoclaw`) and the sandboxed agent
//! (`nanoclaw-agent`): the stdin/stdout JSON contract (§6.1, §6.2) and the
//! IPC file payloads (§6.3). Living in the shared library means the two
//! binaries can never drift on these shapes (§0 of the expanded spec).
//!
//! Dynamic JSON at these boundaries is modeled with tagged variants and
//! strict decode; unknown shapes are the caller's problem to quarantine
//! (§9 "Dynamic JSON at boundaries").

use serde::{Deserialize, Serialize};

/// Framing markers around the single JSON line the sandbox writes to
/// stdout (§6.2).
pub const OUTPUT_START_MARKER: &str = "---NANOCLAW_OUTPUT_START---";
pub const OUTPUT_END_MARKER: &str = "---NANOCLAW_OUTPUT_END---";

/// An image attachment forwarded to the sandbox (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePayload {
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

/// Host -> sandbox stdin payload (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInput {
    pub prompt: String,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "groupFolder")]
    pub group_folder: String,
    #[serde(rename = "channelId")]
    pub channel_id: String,
    #[serde(rename = "isMain")]
    pub is_main: bool,
    #[serde(rename = "isScheduledTask", default)]
    pub is_scheduled_task: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImagePayload>>,
}

/// Kind of output the agent produced (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Message,
    Log,
}

/// The agent's reply, present only when `status == success` (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(rename = "outputType")]
    pub output_type: OutputType,
    #[serde(rename = "userMessage", default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(rename = "internalLog", default, skip_serializing_if = "Option::is_none")]
    pub internal_log: Option<String>,
}

/// Sandbox -> host stdout payload, framed by [`OUTPUT_START_MARKER`] /
/// [`OUTPUT_END_MARKER`] (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerOutput {
    pub status: ContainerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentResponse>,
    #[serde(rename = "newSessionId", default, skip_serializing_if = "Option::is_none")]
    pub new_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Success,
    Error,
}

impl ContainerOutput {
    pub fn success(result: AgentResponse, new_session_id: Option<String>) -> Self {
        Self {
            status: ContainerStatus::Success,
            result: Some(result),
            new_session_id,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ContainerStatus::Error,
            result: None,
            new_session_id: None,
            error: Some(message.into()),
        }
    }

    /// Wrap the single-line JSON in the framing markers, one per line (§6.2).
    pub fn to_framed_stdout(&self) -> serde_json::Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{OUTPUT_START_MARKER}\n{json}\n{OUTPUT_END_MARKER}\n"))
    }

    /// Parse only the content between the *last* matching pair of framing
    /// markers in `stdout`; anything else is noise (§4.4 "I/O contract").
    pub fn parse_framed_stdout(stdout: &str) -> Option<Self> {
        let start = stdout.rfind(OUTPUT_START_MARKER)?;
        let after_start = start + OUTPUT_START_MARKER.len();
        let end = stdout[after_start..].rfind(OUTPUT_END_MARKER)? + after_start;
        let json = stdout[after_start..end].trim();
        serde_json::from_str(json).ok()
    }
}

/// Schedule kind accepted over IPC (§6.3); distinct from
/// [`crate::store::state::ScheduleKind`] so the wire shape can be validated
/// independently of the storage representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireScheduleKind {
    Cron,
    Interval,
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireContextMode {
    Group,
    Isolated,
}

/// Optional per-invocation container override carried in
/// `register_channel` (§6.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
}

/// A single IPC drop file, dispatched on its `type` tag (§6.3). Strict
/// decode: an unrecognized `type` or a recognized type missing required
/// fields both fail to deserialize and the watcher quarantines the file
/// rather than guessing at partial semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcMessage {
    Message {
        timestamp: String,
        #[serde(rename = "channelId")]
        channel_id: String,
        text: String,
    },
    ScheduleTask {
        timestamp: String,
        prompt: String,
        schedule_type: WireScheduleKind,
        schedule_value: String,
        context_mode: WireContextMode,
        #[serde(rename = "targetChannelId")]
        target_channel_id: String,
    },
    PauseTask {
        timestamp: String,
        #[serde(rename = "taskId")]
        task_id: String,
    },
    ResumeTask {
        timestamp: String,
        #[serde(rename = "taskId")]
        task_id: String,
    },
    CancelTask {
        timestamp: String,
        #[serde(rename = "taskId")]
        task_id: String,
    },
    RefreshGroups {
        timestamp: String,
    },
    RegisterChannel {
        timestamp: String,
        #[serde(rename = "channelId")]
        channel_id: String,
        name: String,
        folder: String,
        #[serde(default)]
        trigger: Option<String>,
        #[serde(rename = "containerConfig", default)]
        container_config: Option<WireContainerConfig>,
    },
}

/// One entry of the `tasks.json` snapshot written into a group's IPC mount
/// before launch (§4.5 "Snapshots flowing the other way").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub id: String,
    #[serde(rename = "groupFolder")]
    pub group_folder: String,
    #[serde(rename = "channelId")]
    pub channel_id: String,
    pub prompt: String,
    #[serde(rename = "scheduleType")]
    pub schedule_type: String,
    #[serde(rename = "scheduleValue")]
    pub schedule_value: String,
    #[serde(rename = "contextMode")]
    pub context_mode: String,
    pub status: String,
    #[serde(rename = "nextRun")]
    pub next_run: Option<String>,
}

/// One entry of the `groups.json` snapshot (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupView {
    #[serde(rename = "channelId")]
    pub channel_id: String,
    pub name: String,
    #[serde(rename = "lastActivity")]
    pub last_activity: String,
    #[serde(rename = "isRegistered")]
    pub is_registered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_and_parses_round_trip() {
        let output = ContainerOutput::success(
            AgentResponse {
                output_type: OutputType::Message,
                user_message: Some("hi".into()),
                internal_log: None,
            },
            Some("s1".into()),
        );
        let framed = output.to_framed_stdout().unwrap();
        let parsed = ContainerOutput::parse_framed_stdout(&framed).unwrap();
        assert_eq!(parsed.status, ContainerStatus::Success);
        assert_eq!(parsed.new_session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn parse_ignores_noise_and_uses_last_pair() {
        let stdout = format!(
            "some log line\n{}\n{{\"status\":\"error\",\"error\":\"first\"}}\n{}\nmore noise\n{}\n{{\"status\":\"error\",\"error\":\"second\"}}\n{}\n",
            OUTPUT_START_MARKER, OUTPUT_END_MARKER, OUTPUT_START_MARKER, OUTPUT_END_MARKER
        );
        let parsed = ContainerOutput::parse_framed_stdout(&stdout).unwrap();
        assert_eq!(parsed.error.as_deref(), Some("second"));
    }

    #[test]
    fn parse_returns_none_without_markers() {
        assert!(ContainerOutput::parse_framed_stdout("just logs, no markers").is_none());
    }

    #[test]
    fn unknown_ipc_type_fails_strict_decode() {
        let raw = r#"{"type":"frobnicate","timestamp":"2026-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<IpcMessage>(raw).is_err());
    }

    #[test]
    fn message_ipc_decodes() {
        let raw = r#"{"type":"message","timestamp":"2026-01-01T00:00:00Z","channelId":"c1","text":"hi"}"#;
        let msg: IpcMessage = serde_json::from_str(raw).unwrap();
        matches!(msg, IpcMessage::Message { .. });
    }
}
