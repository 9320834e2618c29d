use std::fmt;

use chrono::{DateTime, Utc};

/// Classified engine error — tells the caller *why* an operation failed so it
/// can pick the right recovery strategy instead of uniform logging-and-swallow.
#[derive(Debug)]
pub enum CoreError {
    /// Message was unintelligible or ambiguous (includes extractor failures
    /// and DST-ambiguous local times). User gets a clarifying prompt.
    Parse(String),
    /// Resolved instant is not in the future relative to the reference clock.
    PastTime(DateTime<Utc>),
    /// Availability search exhausted the window without a free candidate.
    NoSlotAvailable,
    /// An external calendar mutation was needed but no credential is present.
    /// Triggers the local-fallback path; not necessarily surfaced as an error.
    AuthRequired,
    /// No event matched a modify/cancel target description.
    NotFound(String),
    /// The calendar or notifier collaborator failed or timed out.
    ExternalService(String),
    /// Another dispatcher instance already claimed the task. Never surfaced.
    TaskClaimConflict,
}

impl CoreError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ExternalService(_) | CoreError::TaskClaimConflict
        )
    }

    /// User-facing summary suitable for sending back over SMS.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Parse(_) => {
                "I couldn't understand those event details. Try something like \
                 'Schedule dentist tomorrow at 3pm'."
                    .to_string()
            }
            CoreError::PastTime(_) => {
                "That time has already passed. Please provide a future time.".to_string()
            }
            CoreError::NoSlotAvailable => {
                "No available slots found. Please try a different date range.".to_string()
            }
            CoreError::AuthRequired => {
                "Please connect your Google Calendar first — text 'connect' to get a link."
                    .to_string()
            }
            CoreError::NotFound(_) => {
                "I couldn't find that meeting. Please check the time and try again, \
                 e.g. 'Move my 3pm meeting to 4pm'."
                    .to_string()
            }
            CoreError::ExternalService(_) => {
                "The calendar service is having trouble right now. Your event was \
                 saved locally and will sync later."
                    .to_string()
            }
            CoreError::TaskClaimConflict => String::new(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Parse(msg) => write!(f, "parse error: {}", msg),
            CoreError::PastTime(t) => write!(f, "time {} is not in the future", t.to_rfc3339()),
            CoreError::NoSlotAvailable => write!(f, "no available slot in window"),
            CoreError::AuthRequired => write!(f, "external calendar credential required"),
            CoreError::NotFound(what) => write!(f, "no matching event: {}", what),
            CoreError::ExternalService(msg) => write!(f, "external service error: {}", msg),
            CoreError::TaskClaimConflict => write!(f, "task already claimed"),
        }
    }
}

impl std::error::Error for CoreError {}
