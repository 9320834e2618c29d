use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::calendar::ResponseCache;
use crate::traits::{BusyInterval, CalendarAvailability, CalendarMutator, ExternalEventBody};

/// HTTP client for a Google-Calendar-shaped events API.
///
/// The credential handle is a bearer token; token refresh and the auth
/// handshake live outside this crate.
pub struct HttpCalendar {
    client: Client,
    base_url: String,
    cache: ResponseCache,
}

impl HttpCalendar {
    pub fn new(base_url: &str, cache: ResponseCache) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
        })
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/primary/events", self.base_url)
    }

    fn event_body(body: &ExternalEventBody) -> Value {
        json!({
            "summary": body.summary,
            "location": body.location.clone().unwrap_or_default(),
            "start": {
                "dateTime": body.start_at.to_rfc3339(),
                "timeZone": body.timezone,
            },
            "end": {
                "dateTime": body.end_at.to_rfc3339(),
                "timeZone": body.timezone,
            },
        })
    }
}

#[async_trait]
impl CalendarAvailability for HttpCalendar {
    async fn list_busy(
        &self,
        credential: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<BusyInterval>> {
        let url = format!(
            "{}?timeMin={}&timeMax={}&singleEvents=true&orderBy=startTime",
            self.events_url(),
            window_start.to_rfc3339(),
            window_end.to_rfc3339(),
        );

        // Cache key includes the credential so tenants never see each
        // other's responses.
        let cache_key = format!("{}|{}", credential, url);
        let data = match self.cache.get(&cache_key).await {
            Some(cached) => {
                debug!("Busy-interval cache hit");
                cached
            }
            None => {
                let resp = self
                    .client
                    .get(&url)
                    .header("Authorization", format!("Bearer {}", credential))
                    .send()
                    .await?;
                let status = resp.status();
                let text = resp.text().await?;
                if !status.is_success() {
                    anyhow::bail!("calendar list failed ({}): {}", status, text);
                }
                let data: Value = serde_json::from_str(&text)?;
                self.cache.put(&cache_key, data.clone()).await;
                data
            }
        };

        let mut busy = Vec::new();
        if let Some(items) = data["items"].as_array() {
            for item in items {
                // All-day events carry "date" instead of "dateTime"; they
                // don't block hourly slots here.
                let (Some(start), Some(end)) = (
                    item["start"]["dateTime"].as_str(),
                    item["end"]["dateTime"].as_str(),
                ) else {
                    continue;
                };
                let (Ok(start), Ok(end)) = (
                    DateTime::parse_from_rfc3339(start),
                    DateTime::parse_from_rfc3339(end),
                ) else {
                    debug!("Skipping event with unparsable times");
                    continue;
                };
                busy.push(BusyInterval {
                    start: start.with_timezone(&Utc),
                    end: end.with_timezone(&Utc),
                });
            }
        }

        debug!(count = busy.len(), "Fetched busy intervals");
        Ok(busy)
    }
}

#[async_trait]
impl CalendarMutator for HttpCalendar {
    async fn insert(&self, credential: &str, body: &ExternalEventBody) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(self.events_url())
            .header("Authorization", format!("Bearer {}", credential))
            .json(&Self::event_body(body))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("calendar insert failed ({}): {}", status, text);
        }

        let data: Value = serde_json::from_str(&text)?;
        let id = data["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("calendar insert response missing id"))?;
        info!(external_id = id, "Inserted external calendar event");
        Ok(id.to_string())
    }

    async fn update(
        &self,
        credential: &str,
        external_id: &str,
        body: &ExternalEventBody,
    ) -> anyhow::Result<()> {
        let url = format!("{}/{}", self.events_url(), external_id);
        let resp = self
            .client
            .put(&url)
            .header("Authorization", format!("Bearer {}", credential))
            .json(&Self::event_body(body))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await?;
            anyhow::bail!("calendar update failed ({}): {}", status, text);
        }
        Ok(())
    }

    async fn delete(&self, credential: &str, external_id: &str) -> anyhow::Result<()> {
        let url = format!("{}/{}", self.events_url(), external_id);
        let resp = self
            .client
            .delete(&url)
            .header("Authorization", format!("Bearer {}", credential))
            .send()
            .await?;

        let status = resp.status();
        // Already gone is as good as deleted.
        if !status.is_success() && status.as_u16() != 404 {
            let text = resp.text().await?;
            anyhow::bail!("calendar delete failed ({}): {}", status, text);
        }
        Ok(())
    }
}
