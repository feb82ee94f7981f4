//! Download notifications via a Slack incoming webhook
//!
//! Fire-and-forget: failures are logged, never returned to the caller.

use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackPayload {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackAttachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl SlackPayload {
    pub fn new(message: &str, saved_path: Option<&str>, image_url: Option<&str>) -> Self {
        let mut attachments = Vec::new();
        if saved_path.is_some() || image_url.is_some() {
            attachments.push(SlackAttachment {
                text: saved_path.map(|p| format!("Saved to: {}", p)),
                image_url: image_url.map(str::to_string),
            });
        }
        Self { text: message.to_string(), attachments }
    }
}

#[derive(Debug, Clone)]
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), webhook_url }
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Post a notification. Returns whether it was accepted.
    pub async fn notify(&self, message: &str, saved_path: Option<&str>, image_url: Option<&str>) -> bool {
        let Some(url) = &self.webhook_url else {
            debug!("Slack webhook not configured, skipping notification");
            return false;
        };

        let payload = SlackPayload::new(message, saved_path, image_url);
        match self.http.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Slack notification sent");
                true
            }
            Ok(response) => {
                warn!(status = %response.status(), "Slack rejected notification");
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to send Slack notification");
                false
            }
        }
    }

    /// Send in a detached task without waiting for the outcome.
    pub fn notify_detached(&self, message: String, saved_path: Option<String>, image_url: Option<String>) {
        if !self.is_enabled() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier
                .notify(&message, saved_path.as_deref(), image_url.as_deref())
                .await;
        });
    }
}
