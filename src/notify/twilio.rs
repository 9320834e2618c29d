use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use crate::config::SmsConfig;
use crate::traits::Notifier;

/// SMS delivery via the Twilio messages API.
pub struct TwilioSms {
    client: Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioSms {
    pub fn new(config: &SmsConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
        })
    }
}

#[async_trait]
impl Notifier for TwilioSms {
    async fn send(&self, to: &str, text: &str) -> anyhow::Result<()> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", &self.from_number), ("Body", text)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await?;
            anyhow::bail!("SMS send failed ({}): {}", status, body);
        }

        info!(to, "SMS sent");
        Ok(())
    }
}
