use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::ExtractorConfig;
use crate::traits::{ExtractionHints, TextExtractor};

/// Structured extraction via an OpenAI-compatible chat-completions endpoint.
///
/// The model is asked for a strict JSON object; the intent parser owns
/// validation, this client only moves bytes.
pub struct OpenAiExtractor {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiExtractor {
    pub fn new(config: &ExtractorConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn system_prompt(hints: &ExtractionHints) -> String {
        format!(
            r#"Parse the user's calendar message and return a JSON response.
Current time: {local_now}
User timezone: {timezone}

Return JSON format:
{{
    "action": "schedule" or "modify" or "cancel" or "query" or "unknown",
    "event": {{
        "summary": "EXACT NAME OF THE APPOINTMENT/MEETING",
        "location": "FULL ADDRESS OR LOCATION IF PROVIDED",
        "start_time": "YYYY-MM-DD HH:MM:SS",
        "duration_minutes": 60,
        "reminder_minutes": null or number of minutes before the event
    }},
    "modification": {{
        "original_time": "YYYY-MM-DD HH:MM",
        "new_time": "YYYY-MM-DD HH:MM"
    }}
}}

RULES:
- Use 24-hour time format (00-23), local to the user timezone
- Capture the EXACT appointment name and location from the message
- If "tomorrow" is mentioned, use tomorrow's date relative to current time
- If no specific time is mentioned, do not include start_time
- Use "modify" for move/reschedule messages and fill in "modification"
- Use "cancel" if the message is about canceling an event
- Use "query" if the user asks to see or list their events"#,
            local_now = hints.local_now,
            timezone = hints.timezone,
        )
    }
}

#[async_trait]
impl TextExtractor for OpenAiExtractor {
    async fn extract(&self, text: &str, hints: &ExtractionHints) -> anyhow::Result<Value> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": Self::system_prompt(hints) },
                { "role": "user", "content": text },
            ],
            "response_format": { "type": "json_object" },
        });

        let url = format!("{}/chat/completions", self.base_url);
        info!(model = %self.model, "Calling extraction backend");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("extraction backend error ({}): {}", status, text);
        }
        debug!("Extraction response: {}", text);

        let data: Value = serde_json::from_str(&text)?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("no content in extraction response"))?;

        Ok(serde_json::from_str(content)?)
    }
}
