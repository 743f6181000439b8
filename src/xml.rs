//! Minimal XML escaping for the `<messages>` prompt block (§4.2 step 4).
//!
//! Deliberately hand-rolled rather than pulling in a templating engine: the
//! only requirement is escaping the five predefined XML entities in attribute
//! and text positions.

use crate::PromptMessage;

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Format messages into `<messages><message sender=".." time="..">..</message>…</messages>`.
pub fn format_messages(messages: &[PromptMessage]) -> String {
    let mut out = String::from("<messages>");
    for m in messages {
        out.push_str(&format!(
            "<message sender=\"{}\" time=\"{}\">{}</message>",
            escape(&m.sender),
            escape(&m.time),
            escape(&m.content)
        ));
    }
    out.push_str("</messages>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_attribute_and_text_content() {
        let messages = vec![PromptMessage {
            sender: "u1 <admin>".into(),
            time: "1".into(),
            content: "hey & \"nano\" help".into(),
        }];
        assert_eq!(
            format_messages(&messages),
            "<messages><message sender=\"u1 &lt;admin&gt;\" time=\"1\">hey &amp; &quot;nano&quot; help</message></messages>"
        );
    }

    #[test]
    fn empty_batch_round_trips() {
        assert_eq!(format_messages(&[]), "<messages></messages>");
    }

    #[test]
    fn formats_in_order() {
        let messages = vec![
            PromptMessage { sender: "u1".into(), time: "2".into(), content: "a".into() },
            PromptMessage { sender: "u1".into(), time: "3".into(), content: "b".into() },
            PromptMessage { sender: "u1".into(), time: "4".into(), content: "c".into() },
        ];
        assert_eq!(
            format_messages(&messages),
            "<messages><message sender=\"u1\" time=\"2\">a</message><message sender=\"u1\" time=\"3\">b</message><message sender=\"u1\" time=\"4\">c</message></messages>"
        );
    }
}
