//! Turns a free-text message into a structured intent.
//!
//! A deterministic regex pass first pulls out an explicit reminder directive
//! ("remind me 15 minutes") and strips it; the remaining text goes to the
//! pluggable extraction backend. The regex value always beats whatever the
//! backend infers — free-form extraction of reminder phrasing is unreliable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::CoreError;
use crate::traits::{ExtractionHints, TextExtractor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentAction {
    Schedule,
    Modify,
    Cancel,
    Query,
    Unknown,
}

/// Structured intent extracted from one message.
#[derive(Debug, Clone, Default)]
pub struct Intent {
    pub action: IntentAction,
    pub summary: Option<String>,
    pub location: Option<String>,
    /// Time expression for a new event, as the extractor emitted it.
    pub start_text: Option<String>,
    pub duration_minutes: Option<i64>,
    pub reminder_minutes: Option<i64>,
    /// Modify only: which existing event the user means.
    pub original_time_text: Option<String>,
    /// Modify only: where it should move.
    pub new_time_text: Option<String>,
}

impl Default for IntentAction {
    fn default() -> Self {
        IntentAction::Unknown
    }
}

pub struct IntentParser {
    extractor: Arc<dyn TextExtractor>,
}

impl IntentParser {
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Self {
        Self { extractor }
    }

    /// Parse one message. Extraction failures (backend error, timeout,
    /// unparsable payload) surface as `CoreError::Parse` — never a panic.
    pub async fn parse(
        &self,
        raw_text: &str,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> Result<Intent, CoreError> {
        let (directive_minutes, remaining) = extract_reminder_directive(raw_text);

        let hints = ExtractionHints {
            local_now: now.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string(),
            timezone: tz.name().to_string(),
        };

        let value = self
            .extractor
            .extract(&remaining, &hints)
            .await
            .map_err(|e| {
                warn!("Text extraction failed: {}", e);
                CoreError::Parse(format!("extraction failed: {}", e))
            })?;

        let mut intent = intent_from_value(&value)?;

        // Regex-extracted directive always takes precedence.
        if directive_minutes.is_some() {
            intent.reminder_minutes = directive_minutes;
        }

        Ok(intent)
    }
}

/// Pull an explicit "remind me N minutes|hours" directive out of the text.
/// Returns the offset in minutes and the text with the directive removed.
pub fn extract_reminder_directive(text: &str) -> (Option<i64>, String) {
    let re = match Regex::new(r"(?i)remind me (\d+)\s*(minutes?|mins?|hours?|hrs?)\b") {
        Ok(re) => re,
        Err(_) => return (None, text.to_string()),
    };

    let Some(caps) = re.captures(text) else {
        return (None, text.to_string());
    };

    let Ok(value) = caps[1].parse::<i64>() else {
        return (None, text.to_string());
    };
    let unit = caps[2].to_lowercase();
    let minutes = if unit.starts_with('h') { value * 60 } else { value };

    let whole = match caps.get(0) {
        Some(m) => m,
        None => return (None, text.to_string()),
    };
    let mut remaining = String::with_capacity(text.len());
    remaining.push_str(&text[..whole.start()]);
    remaining.push_str(&text[whole.end()..]);
    let remaining = remaining.split_whitespace().collect::<Vec<_>>().join(" ");

    (Some(minutes), remaining)
}

/// Validate the extractor's JSON into a typed intent. Unknown action strings
/// map to `Unknown`; a payload that isn't an object at all is a parse error.
fn intent_from_value(value: &Value) -> Result<Intent, CoreError> {
    if !value.is_object() {
        return Err(CoreError::Parse(format!(
            "extractor returned non-object payload: {}",
            value
        )));
    }

    let action = match value["action"].as_str().unwrap_or("unknown") {
        "schedule" => IntentAction::Schedule,
        "modify" | "reschedule" | "move" => IntentAction::Modify,
        "cancel" | "delete" => IntentAction::Cancel,
        "query" | "view" | "list" => IntentAction::Query,
        _ => IntentAction::Unknown,
    };

    let event = &value["event"];
    let modification = &value["modification"];

    Ok(Intent {
        action,
        summary: non_empty_str(&event["summary"]),
        location: non_empty_str(&event["location"]),
        start_text: non_empty_str(&event["start_time"]),
        duration_minutes: event["duration_minutes"].as_i64(),
        reminder_minutes: event["reminder_minutes"].as_i64(),
        original_time_text: non_empty_str(&modification["original_time"]),
        new_time_text: non_empty_str(&modification["new_time"]),
    })
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
