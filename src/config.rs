use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub extractor: ExtractorConfig,
    pub sms: SmsConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// The structured-extraction (LLM) backend behind the intent parser.
#[derive(Debug, Deserialize, Clone)]
pub struct ExtractorConfig {
    pub api_key: String,
    #[serde(default = "default_extractor_base_url")]
    pub base_url: String,
    #[serde(default = "default_extractor_model")]
    pub model: String,
    #[serde(default = "default_extractor_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_extractor_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_extractor_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_extractor_timeout_secs() -> u64 {
    20
}

/// Twilio-style SMS delivery credentials.
#[derive(Debug, Deserialize, Clone)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    #[serde(default = "default_sms_base_url")]
    pub base_url: String,
}

fn default_sms_base_url() -> String {
    "https://api.twilio.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalendarConfig {
    #[serde(default = "default_calendar_base_url")]
    pub base_url: String,
    /// TTL for the per-client response cache. Zero disables caching.
    #[serde(default = "default_calendar_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: default_calendar_base_url(),
            cache_ttl_secs: default_calendar_cache_ttl_secs(),
        }
    }
}

fn default_calendar_base_url() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}
fn default_calendar_cache_ttl_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "smscal.db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatcherConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Shorter retry interval after a tick-level error.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Upper bound on a single notifier call.
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            notify_timeout_secs: default_notify_timeout_secs(),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    30
}
fn default_error_backoff_secs() -> u64 {
    5
}
fn default_notify_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemindersConfig {
    /// Default offset for new users, minutes before event start.
    #[serde(default = "default_reminder_minutes")]
    pub default_minutes: i64,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            default_minutes: default_reminder_minutes(),
        }
    }
}

fn default_reminder_minutes() -> i64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectionConfig {
    /// How long an offered slot list stays valid.
    #[serde(default = "default_selection_ttl_secs")]
    pub ttl_secs: i64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_selection_ttl_secs(),
        }
    }
}

fn default_selection_ttl_secs() -> i64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_http_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            bind: default_http_bind(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_http_bind() -> String {
    "127.0.0.1".to_string()
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
