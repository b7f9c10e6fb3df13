//! Telegram destination: MarkdownV2 text via the Bot API's `sendMessage`
//! shape (the destination URL already encodes the bot token and chat id).

use serde_json::{json, Value};

use super::{event_presentation, NotificationEvent};

/// Escape the characters MarkdownV2 treats as special.
fn escape_markdown_v2(s: &str) -> String {
    const SPECIAL: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    ];
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn build_payload(event: &NotificationEvent) -> Value {
    let (emoji, _color, title) = event_presentation(&event.event_type);

    let mut text = format!("{emoji} *{}*", escape_markdown_v2(title));
    for (label, value) in [
        ("Deployment", event.deployment.as_ref()),
        ("Build", event.build.as_ref()),
        ("Service", event.service.as_ref()),
        ("Database", event.database.as_ref()),
    ] {
        if let Some(value) = value {
            text.push_str(&format!("\n*{label}:* {}", escape_markdown_v2(&value.to_string())));
        }
    }

    json!({
        "text": text,
        "parse_mode": "MarkdownV2"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markdown_v2_special_characters() {
        assert_eq!(escape_markdown_v2("v1.2.3-rc.1"), "v1\\.2\\.3\\-rc\\.1");
    }
}
