//! Task-tracker client: creates one card per extracted action item.
//!
//! Authentication goes in query parameters (key/token), which is how the
//! tracker's REST API wants it. Credentials come from the environment via
//! [`crate::config::Secrets`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::TrackerSection;
use crate::errors::TrackerError;
use crate::store::models::{ActionItem, PublishedCard};

/// Publishing seam used by the maturation engine and the retry handler.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, name: &str, description: &str) -> Result<PublishedCard, TrackerError>;
}

#[derive(Debug, Deserialize)]
struct CardResponse {
    id: String,
    #[serde(rename = "shortUrl")]
    short_url: Option<String>,
    url: Option<String>,
}

pub struct TrackerClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_token: String,
    list_id: String,
    timeout_seconds: u64,
}

impl TrackerClient {
    pub fn new(config: &TrackerSection, key: String, token: String, list_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: key,
            api_token: token,
            list_id,
            timeout_seconds: config.timeout_seconds,
        }
    }

    fn auth_params(&self) -> [(&'static str, &str); 2] {
        [("key", self.api_key.as_str()), ("token", self.api_token.as_str())]
    }

    /// Check that the API accepts our credentials.
    pub async fn health_check(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/members/me", self.base_url))
            .query(&self.auth_params())
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        matches!(result, Ok(r) if r.status().is_success())
    }
}

#[async_trait]
impl Publish for TrackerClient {
    async fn publish(&self, name: &str, description: &str) -> Result<PublishedCard, TrackerError> {
        let response = self
            .client
            .post(format!("{}/cards", self.base_url))
            .query(&self.auth_params())
            .query(&[
                ("idList", self.list_id.as_str()),
                ("name", name),
                ("desc", description),
            ])
            .timeout(Duration::from_secs(self.timeout_seconds))
            .send()
            .await
            .map_err(TrackerError::Request)?;

        match response.status().as_u16() {
            401 => return Err(TrackerError::InvalidCredentials),
            404 => {
                return Err(TrackerError::ListNotFound {
                    list_id: self.list_id.clone(),
                });
            }
            status if status != 200 => {
                let body = response.text().await.unwrap_or_default();
                return Err(TrackerError::BadStatus { status, body });
            }
            _ => {}
        }

        let card: CardResponse = response.json().await.map_err(TrackerError::Request)?;
        let url = card.short_url.or(card.url).unwrap_or_default();
        tracing::info!(card_id = %card.id, %url, "created tracker card");
        Ok(PublishedCard { id: card.id, url })
    }
}

/// Render the card body for an action item.
pub fn card_description(action: &ActionItem, meeting_title: &str, meeting_date: Option<DateTime<Utc>>) -> String {
    let mut parts = Vec::new();

    if !action.context.is_empty() {
        parts.push(format!("**Context:** {}", action.context));
    }
    if !action.description.is_empty() {
        parts.push(format!("\n{}", action.description));
    }
    if let Some(assignee) = &action.assignee {
        parts.push(format!("\n**Assignee:** {}", assignee));
    }
    parts.push(format!("\n---\n*From meeting: {}*", meeting_title));
    if let Some(date) = meeting_date {
        parts.push(format!("\n*Date: {}*", date.format("%Y-%m-%d")));
    }

    parts.join("\n")
}
