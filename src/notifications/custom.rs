//! Custom webhook destination: plain JSON signed with HMAC-SHA256.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use super::NotificationEvent;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize)]
struct CustomPayload<'a> {
    id: uuid::Uuid,
    #[serde(rename = "type")]
    event_type: &'a str,
    timestamp: chrono::DateTime<chrono::Utc>,
    project: uuid::Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    deployment: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a serde_json::Value>,
}

/// Builds the exact request body bytes and the `X-Enclii-*` headers,
/// including a constant-time-verifiable signature over those same bytes.
///
/// Returns the serialized `Vec<u8>`, not a `serde_json::Value` — re-running
/// the bytes through `serde_json::to_value` and back would reorder the map
/// (this crate's `serde_json` has no `preserve_order` feature, so a `Value`'s
/// object is a `BTreeMap` and serializes keys alphabetically). The caller
/// must send these bytes verbatim as the request body; re-serializing the
/// payload through `.json(&value)` would ship different bytes than the ones
/// the signature was computed over.
pub fn build_signed_request(
    event: &NotificationEvent,
    signing_secret: &str,
) -> (Vec<u8>, Vec<(&'static str, String)>) {
    let payload = CustomPayload {
        id: event.id,
        event_type: &event.event_type,
        timestamp: event.timestamp,
        project: event.project_id,
        deployment: event.deployment.as_ref(),
        build: event.build.as_ref(),
        service: event.service.as_ref(),
        database: event.database.as_ref(),
    };

    let body_bytes = serde_json::to_vec(&payload).unwrap_or_default();
    let signature = sign(&body_bytes, signing_secret);

    let headers = vec![
        ("X-Enclii-Event", event.event_type.clone()),
        ("X-Enclii-Delivery", event.id.to_string()),
        ("X-Enclii-Timestamp", event.timestamp.timestamp().to_string()),
        ("X-Enclii-Signature", signature),
    ];

    (body_bytes, headers)
}

fn sign(body: &[u8], signing_secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(signing_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    encode_hex(&mac.finalize().into_bytes())
}

fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(&mut out, "{byte:02x}").expect("writing to a String never fails");
    }
    out
}

/// Constant-time verification for a recipient validating a received signature.
pub fn verify(body: &[u8], signing_secret: &str, signature: &str) -> bool {
    use subtle::ConstantTimeEq;

    let expected = sign(body, signing_secret);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_event() -> NotificationEvent {
        NotificationEvent {
            id: uuid::Uuid::new_v4(),
            event_type: "deployment.succeeded".to_string(),
            project_id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            deployment: None,
            build: None,
            service: None,
            database: None,
        }
    }

    #[test]
    fn signature_verifies_against_its_own_body() {
        let event = sample_event();
        let (body, headers) = build_signed_request(&event, "shh");
        let signature = headers
            .iter()
            .find(|(k, _)| *k == "X-Enclii-Signature")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(verify(&body, "shh", &signature));
    }

    #[test]
    fn signature_fails_with_wrong_secret() {
        let event = sample_event();
        let (body, headers) = build_signed_request(&event, "shh");
        let signature = headers
            .iter()
            .find(|(k, _)| *k == "X-Enclii-Signature")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(!verify(&body, "different", &signature));
    }

    #[test]
    fn returned_body_is_the_exact_bytes_that_were_signed() {
        // Guards against reintroducing a re-serialization step (e.g. through
        // serde_json::Value, whose map has no declared field order) between
        // signing and sending.
        let event = sample_event();
        let (body, headers) = build_signed_request(&event, "shh");
        let signature = headers
            .iter()
            .find(|(k, _)| *k == "X-Enclii-Signature")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(sign(&body, "shh"), signature);
    }
}
