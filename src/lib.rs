//! nanoclaw: a chat-driven AI agent supervisor.
//!
//! The supervisor collects inbound chat messages, decides when an agent
//! should reply, launches the agent as a short-lived sandboxed container
//! (one per invocation), forwards the reply to chat, and persists
//! conversation and scheduling state across restarts.

pub mod agent;
pub mod config;
pub mod container;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod messaging;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod wire;
pub mod xml;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque chat channel id.
pub type ChannelId = Arc<str>;

/// Filesystem-safe, unique folder slug for a group's working directory.
pub type GroupFolder = Arc<str>;

/// Internal lifecycle events, broadcast for logging and tests. No external
/// API surface is implied by this — the chat platform's own status UI is
/// out of scope (§1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    ContainerLaunched {
        channel_id: ChannelId,
        container_name: String,
    },
    ContainerExited {
        channel_id: ChannelId,
        container_name: String,
        success: bool,
    },
    TaskFired {
        task_id: String,
        channel_id: ChannelId,
    },
    ChannelRetryScheduled {
        channel_id: ChannelId,
        retry_count: u32,
        delay_ms: u64,
    },
}

/// A chat message formatted into the `<messages>` block sent to the agent.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub sender: String,
    pub time: String,
    pub content: String,
}

/// Append one `[file: name | mimeType | relPath]` line per attachment to the
/// message text. If `text` is empty, the attachment lines become the entire
/// content (§4.6 `buildMessageContent`).
pub fn build_message_content(text: &str, attachments: &[Attachment]) -> String {
    let lines: Vec<String> = attachments
        .iter()
        .map(|a| format!("[file: {} | {} | {}]", a.name, a.mime_type, a.rel_path))
        .collect();

    if lines.is_empty() {
        return text.to_string();
    }

    if text.is_empty() {
        lines.join("\n")
    } else {
        format!("{text}\n{}", lines.join("\n"))
    }
}

/// An attachment referenced by [`build_message_content`].
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub rel_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_message_content_empty_attachments_is_identity() {
        assert_eq!(build_message_content("hello", &[]), "hello");
    }

    #[test]
    fn build_message_content_appends_attachment_lines() {
        let atts = vec![Attachment {
            name: "a.png".into(),
            mime_type: "image/png".into(),
            rel_path: "attachments/m1/a.png".into(),
        }];
        assert_eq!(
            build_message_content("look", &atts),
            "look\n[file: a.png | image/png | attachments/m1/a.png]"
        );
    }

    #[test]
    fn build_message_content_empty_text_is_just_lines() {
        let atts = vec![
            Attachment {
                name: "a.png".into(),
                mime_type: "image/png".into(),
                rel_path: "x/a.png".into(),
            },
            Attachment {
                name: "b.png".into(),
                mime_type: "image/png".into(),
                rel_path: "x/b.png".into(),
            },
        ];
        assert_eq!(
            build_message_content("", &atts),
            "[file: a.png | image/png | x/a.png]\n[file: b.png | image/png | x/b.png]"
        );
    }
}
