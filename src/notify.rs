//! Webhook alerts to Slack and Discord.
//!
//! Delivery is best-effort: a webhook failure is logged and swallowed so
//! an unreachable chat service can never stall transcript processing.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

const COLOR_ERROR_HEX: &str = "#dc3545";
const COLOR_OK_HEX: &str = "#28a745";
const COLOR_ERROR_INT: u32 = 0xDC3545;
const COLOR_OK_INT: u32 = 0x28A745;

pub struct Notifier {
    client: reqwest::Client,
    slack_url: Option<String>,
    discord_url: Option<String>,
}

impl Notifier {
    pub fn new(slack_url: Option<String>, discord_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            slack_url,
            discord_url,
        }
    }

    pub fn has_webhooks(&self) -> bool {
        self.slack_url.is_some() || self.discord_url.is_some()
    }

    /// Send an alert to every configured webhook. Never fails.
    pub async fn alert(&self, title: &str, message: &str, is_error: bool) {
        if let Some(url) = &self.slack_url
            && let Err(e) = self.send_slack(url, title, message, is_error).await
        {
            tracing::error!(error = %e, "failed to send Slack notification");
        }
        if let Some(url) = &self.discord_url
            && let Err(e) = self.send_discord(url, title, message, is_error).await
        {
            tracing::error!(error = %e, "failed to send Discord notification");
        }
    }

    async fn send_slack(
        &self,
        url: &str,
        title: &str,
        message: &str,
        is_error: bool,
    ) -> Result<(), reqwest::Error> {
        let payload = json!({
            "attachments": [{
                "color": if is_error { COLOR_ERROR_HEX } else { COLOR_OK_HEX },
                "title": title,
                "text": message,
                "ts": Utc::now().timestamp(),
            }]
        });
        let response = self
            .client
            .post(url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "Slack webhook failed");
        }
        Ok(())
    }

    async fn send_discord(
        &self,
        url: &str,
        title: &str,
        message: &str,
        is_error: bool,
    ) -> Result<(), reqwest::Error> {
        let payload = json!({
            "embeds": [{
                "title": title,
                "description": message,
                "color": if is_error { COLOR_ERROR_INT } else { COLOR_OK_INT },
                "timestamp": Utc::now().to_rfc3339(),
            }]
        });
        let response = self
            .client
            .post(url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        // Discord returns 204 on success.
        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "Discord webhook failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_webhooks() {
        assert!(!Notifier::new(None, None).has_webhooks());
        assert!(Notifier::new(Some("https://hooks.slack.test/x".into()), None).has_webhooks());
        assert!(Notifier::new(None, Some("https://discord.test/x".into())).has_webhooks());
    }

    #[tokio::test]
    async fn test_alert_with_no_webhooks_is_a_noop() {
        let notifier = Notifier::new(None, None);
        notifier.alert("title", "message", true).await;
    }

    #[tokio::test]
    async fn test_alert_swallows_unreachable_webhook() {
        // TEST-NET address; must not error or panic.
        let notifier = Notifier::new(
            Some("http://192.0.2.1:9/slack".into()),
            Some("http://192.0.2.1:9/discord".into()),
        );
        notifier.alert("title", "message", false).await;
    }
}
