//! Slack destination: a single block-kit message with a header and context.

use serde_json::{json, Value};

use super::{event_presentation, NotificationEvent};

pub fn build_payload(event: &NotificationEvent) -> Value {
    let (emoji, _color, title) = event_presentation(&event.event_type);

    let mut fields = Vec::new();
    for (label, value) in [
        ("Deployment", event.deployment.as_ref()),
        ("Build", event.build.as_ref()),
        ("Service", event.service.as_ref()),
        ("Database", event.database.as_ref()),
    ] {
        if let Some(value) = value {
            fields.push(json!({
                "type": "mrkdwn",
                "text": format!("*{label}*\n{value}")
            }));
        }
    }

    json!({
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": format!("{emoji} {title}"), "emoji": true }
            },
            {
                "type": "section",
                "fields": fields
            },
            {
                "type": "context",
                "elements": [
                    { "type": "mrkdwn", "text": format!("event `{}` at {}", event.event_type, event.timestamp.to_rfc3339()) }
                ]
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn payload_has_header_block_with_title() {
        let event = NotificationEvent {
            id: uuid::Uuid::new_v4(),
            event_type: "deployment.succeeded".to_string(),
            project_id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            deployment: Some(json!({"name": "api"})),
            build: None,
            service: None,
            database: None,
        };
        let payload = build_payload(&event);
        let header_text = payload["blocks"][0]["text"]["text"].as_str().unwrap();
        assert!(header_text.contains("Deployment succeeded"));
    }
}
