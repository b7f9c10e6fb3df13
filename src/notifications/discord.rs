//! Discord destination: a single embed; success is HTTP 204 on Discord's
//! webhook endpoint.

use serde_json::{json, Value};

use super::{event_presentation, NotificationEvent};

pub fn build_payload(event: &NotificationEvent) -> Value {
    let (emoji, color, title) = event_presentation(&event.event_type);
    let color_decimal = i64::from_str_radix(color.trim_start_matches('#'), 16).unwrap_or(0);

    let mut fields = Vec::new();
    for (name, value) in [
        ("Deployment", event.deployment.as_ref()),
        ("Build", event.build.as_ref()),
        ("Service", event.service.as_ref()),
        ("Database", event.database.as_ref()),
    ] {
        if let Some(value) = value {
            fields.push(json!({ "name": name, "value": value.to_string(), "inline": true }));
        }
    }

    json!({
        "embeds": [{
            "title": format!("{emoji} {title}"),
            "color": color_decimal,
            "timestamp": event.timestamp.to_rfc3339(),
            "fields": fields
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn payload_encodes_color_as_decimal() {
        let event = NotificationEvent {
            id: uuid::Uuid::new_v4(),
            event_type: "deployment.failed".to_string(),
            project_id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            deployment: None,
            build: None,
            service: None,
            database: None,
        };
        let payload = build_payload(&event);
        assert_eq!(payload["embeds"][0]["color"], json!(0xdc2626_i64));
    }
}
