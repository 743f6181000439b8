//! Outbound chat collaborator contract (§1 "deliberately out of scope").
//!
//! The chat platform client itself — mention detection, the actual wire
//! protocol to Slack/Discord/whatever — lives outside this crate. What the
//! supervisor needs from it is a narrow trait: send a message to a channel,
//! optionally show a typing indicator while an agent runs. Modeled the way
//! the teacher splits `Messaging` (static, for impls) from `MessagingDyn`
//! (object-safe, for storage as `Arc<dyn ..>`) in `messaging/traits.rs`.

use crate::ChannelId;
use crate::error::Result;
use std::pin::Pin;

/// Maximum outbound chunk size before a chat message must be split (§4.2
/// step 8).
pub const MAX_CHUNK_CHARS: usize = 2000;

/// Object-safe outbound chat collaborator. The supervisor holds one
/// `Arc<dyn OutboundChat>` and never knows which concrete platform it is
/// talking to.
pub trait OutboundChat: Send + Sync + 'static {
    /// Send a single chunk of text to a channel.
    fn send<'a>(
        &'a self,
        channel_id: &'a ChannelId,
        text: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    /// Show (or refresh) a typing indicator on a channel. Best-effort: a
    /// failure here must never fail the calling turn.
    fn typing<'a>(
        &'a self,
        channel_id: &'a ChannelId,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        let _ = channel_id;
        Box::pin(async { Ok(()) })
    }
}

/// Deliver `text` to `channel_id`, chunked to [`MAX_CHUNK_CHARS`] at the
/// nearest newline then space, falling back to a hard split (§4.2 step 8).
/// A send failure for one chunk is logged and does not stop later chunks.
pub async fn deliver_chunked(chat: &dyn OutboundChat, channel_id: &ChannelId, text: &str) {
    for chunk in chunk_message(text, MAX_CHUNK_CHARS) {
        if let Err(error) = chat.send(channel_id, &chunk).await {
            tracing::error!(%channel_id, %error, "failed to deliver outbound chat chunk");
        }
    }
}

/// Split `text` into chunks of at most `max_chars` characters, breaking at
/// the nearest newline, then the nearest space, before the limit; falling
/// back to a hard split mid-word only when neither is available.
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= max_chars {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        let window = &chars[start..start + max_chars];
        let split_at = window
            .iter()
            .rposition(|&c| c == '\n')
            .or_else(|| window.iter().rposition(|&c| c == ' '))
            .map(|i| i + 1)
            .unwrap_or(max_chars);

        let split_at = split_at.max(1);
        chunks.push(chars[start..start + split_at].iter().collect());
        start += split_at;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_message("hello", 2000), vec!["hello".to_string()]);
    }

    #[test]
    fn empty_text_is_no_chunks() {
        assert!(chunk_message("", 2000).is_empty());
    }

    #[test]
    fn splits_at_nearest_newline() {
        let text = format!("{}\n{}", "a".repeat(10), "b".repeat(10));
        let chunks = chunk_message(&text, 15);
        assert_eq!(chunks[0], format!("{}\n", "a".repeat(10)));
        assert_eq!(chunks[1], "b".repeat(10));
    }

    #[test]
    fn falls_back_to_hard_split_with_no_boundary() {
        let text = "a".repeat(25);
        let chunks = chunk_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[1].len(), 10);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn splits_at_nearest_space_when_no_newline() {
        let text = format!("{} {}", "a".repeat(8), "b".repeat(8));
        let chunks = chunk_message(&text, 12);
        assert_eq!(chunks[0], format!("{} ", "a".repeat(8)));
        assert_eq!(chunks[1], "b".repeat(8));
    }
}
