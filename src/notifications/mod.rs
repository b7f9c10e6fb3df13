//! Notification fan-out: per-destination async delivery of platform events
//! to Slack, Discord, Telegram, or a signed custom webhook.

pub mod custom;
pub mod discord;
pub mod slack;
pub mod telegram;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::models::{DeliveryStatus, WebhookDestination, WebhookKind};
use crate::db::webhooks as db_webhooks;
use crate::errors::{CoreError, CoreResult};
use crate::state::ControllerState;

/// (emoji, color, title) keyed by event type, driving vendor-specific rendering.
fn event_presentation(event_type: &str) -> (&'static str, &'static str, &'static str) {
    match event_type {
        "deployment.started" => (":rocket:", "#2563eb", "Deployment started"),
        "deployment.succeeded" => (":white_check_mark:", "#16a34a", "Deployment succeeded"),
        "deployment.failed" => (":x:", "#dc2626", "Deployment failed"),
        "build.completed" => (":hammer:", "#2563eb", "Build completed"),
        "build.failed" => (":x:", "#dc2626", "Build failed"),
        "database.ready" => (":floppy_disk:", "#16a34a", "Database addon ready"),
        "database.failed" => (":x:", "#dc2626", "Database addon failed"),
        "rotation.completed" => (":lock:", "#16a34a", "Secret rotation completed"),
        "rotation.rolled_back" => (":warning:", "#d97706", "Secret rotation rolled back"),
        _ => (":bell:", "#6b7280", event_type),
    }
}

/// Minimal in-process shape of the event being fanned out. `deployment` /
/// `build` / `service` / `database` carry whichever context block applies;
/// vendor payload builders read only the fields they need.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub event_type: String,
    pub project_id: Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<serde_json::Value>,
}

fn timeout_for(kind: WebhookKind) -> Duration {
    match kind {
        WebhookKind::Discord => Duration::from_secs(10),
        WebhookKind::Slack => Duration::from_secs(10),
        WebhookKind::Telegram => Duration::from_secs(15),
        WebhookKind::Custom => Duration::from_secs(30),
    }
}

pub struct NotificationFanout {
    state: Arc<ControllerState>,
    http: reqwest::Client,
}

impl NotificationFanout {
    pub fn new(state: Arc<ControllerState>) -> Self {
        Self {
            state,
            http: reqwest::Client::new(),
        }
    }

    /// Look up every enabled destination subscribed to the event's type and
    /// spawn an independent delivery task for each (fire-and-forget).
    pub async fn fan_out(self: &Arc<Self>, event: NotificationEvent) -> CoreResult<()> {
        let destinations =
            db_webhooks::list_subscribed(&self.state.db_pool, event.project_id, &event.event_type)
                .await
                .map_err(|e| CoreError::from_db_error("listing subscribed webhook destinations", e))?;

        for destination in destinations {
            let fanout = self.clone();
            let event = event.clone();
            tokio::spawn(async move {
                fanout.deliver(destination, event).await;
            });
        }

        Ok(())
    }

    async fn deliver(&self, destination: WebhookDestination, event: NotificationEvent) {
        let delivery = match db_webhooks::create_delivery(&self.state.db_pool, destination.id, event.id).await {
            Ok(d) => d,
            Err(e) => {
                error!(destination_id = %destination.id, error = %e, "failed to create delivery row");
                return;
            }
        };

        let started = Instant::now();
        let result = self.send(&destination, &event).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let (status, http_status, error_message, outcome) = match &result {
            Ok(code) => (DeliveryStatus::Success, Some(*code as i32), None, "success"),
            Err(e) => (DeliveryStatus::Failed, None, Some(e.to_string()), "failed"),
        };

        if let Err(e) = db_webhooks::finalize_delivery(
            &self.state.db_pool,
            delivery.id,
            status,
            http_status,
            duration_ms,
            error_message.as_deref(),
        )
        .await
        {
            error!(delivery_id = %delivery.id, error = %e, "failed to finalize webhook delivery");
        }

        let record_result = match status {
            DeliveryStatus::Success => db_webhooks::record_success(&self.state.db_pool, destination.id).await,
            _ => db_webhooks::record_failure(&self.state.db_pool, destination.id).await,
        };
        if let Err(e) = record_result {
            warn!(destination_id = %destination.id, error = %e, "failed to update destination failure counter");
        }

        self.state
            .metrics
            .notification_deliveries_total
            .with_label_values(&[destination.kind.to_string().as_str(), outcome])
            .inc();

        info!(delivery_id = %delivery.id, destination_id = %destination.id, outcome, "webhook delivery complete");
    }

    /// Sends the destination-specific payload, returning the HTTP status
    /// code on success (any 2xx, or the vendor's documented success code).
    async fn send(&self, destination: &WebhookDestination, event: &NotificationEvent) -> anyhow::Result<u16> {
        let timeout = timeout_for(destination.kind);

        let response = match destination.kind {
            WebhookKind::Slack => {
                let payload = slack::build_payload(event);
                self.http
                    .post(&destination.url)
                    .json(&payload)
                    .timeout(timeout)
                    .send()
                    .await?
            }
            WebhookKind::Discord => {
                let payload = discord::build_payload(event);
                self.http
                    .post(&destination.url)
                    .json(&payload)
                    .timeout(timeout)
                    .send()
                    .await?
            }
            WebhookKind::Telegram => {
                let payload = telegram::build_payload(event);
                self.http
                    .post(&destination.url)
                    .json(&payload)
                    .timeout(timeout)
                    .send()
                    .await?
            }
            WebhookKind::Custom => {
                let (body, headers) = custom::build_signed_request(
                    event,
                    destination.signing_secret.as_deref().unwrap_or_default(),
                );
                // Send the exact bytes the signature was computed over. Going
                // through `.json(&value)` here would re-serialize the payload
                // and could reorder its keys, breaking the recipient's HMAC check.
                let mut req = self
                    .http
                    .post(&destination.url)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .timeout(timeout);
                for (key, value) in headers {
                    req = req.header(key, value);
                }
                req.send().await?
            }
        };

        let status = response.status();
        let expected_success = match destination.kind {
            WebhookKind::Discord => status.as_u16() == 204 || status.is_success(),
            _ => status.is_success(),
        };

        if expected_success {
            Ok(status.as_u16())
        } else {
            anyhow::bail!("destination responded with status {}", status.as_u16())
        }
    }

    /// `RetryDelivery`: on-demand manual retry. The caller re-supplies the
    /// event payload since deliveries do not persist their own body; there is
    /// no automatic retry policy in the core.
    pub async fn retry_delivery(&self, delivery_id: Uuid, event: NotificationEvent) -> CoreResult<()> {
        let delivery = db_webhooks::find_delivery(&self.state.db_pool, delivery_id)
            .await
            .map_err(|e| CoreError::from_db_error("loading webhook delivery", e))?
            .ok_or_else(|| CoreError::not_found(format!("webhook delivery {delivery_id} not found")))?;

        let destination = db_webhooks::find_destination(&self.state.db_pool, delivery.destination_id)
            .await
            .map_err(|e| CoreError::from_db_error("loading webhook destination", e))?
            .ok_or_else(|| {
                CoreError::not_found(format!("webhook destination {} not found", delivery.destination_id))
            })?;

        self.deliver(destination, event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentation_falls_back_for_unknown_event_type() {
        let (emoji, color, title) = event_presentation("something.custom");
        assert_eq!(emoji, ":bell:");
        assert_eq!(color, "#6b7280");
        assert_eq!(title, "something.custom");
    }
}
