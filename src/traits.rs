use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user of the assistant, keyed by E.164 phone number.
///
/// Timezone is intentionally *not* stored — it is derived from the phone
/// country code at use time, so a number never carries a stale zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub phone: String,
    pub reminders_enabled: bool,
    pub default_reminder_minutes: i64,
    pub plan: String, // "free", "starter", "pro", "business"
    pub is_guest: bool,
    /// Opaque credential handle for the external calendar. None until the
    /// user connects an account.
    pub calendar_credential: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Local↔external mirroring state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Persisted locally only, no mirror attempted.
    Local,
    /// Persisted locally, external mirror pending (no credential, or the
    /// mirror call failed).
    NeedsSync,
    /// Mirrored to the external calendar; `external_id` is set.
    Synced,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Local => "local",
            SyncState::NeedsSync => "needs_sync",
            SyncState::Synced => "synced",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "synced" => SyncState::Synced,
            "needs_sync" => SyncState::NeedsSync,
            _ => SyncState::Local,
        }
    }
}

/// A persisted calendar event. Invariant: `start_at < end_at`, enforced by
/// the store on create and modify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub owner_phone: String,
    pub summary: String,
    pub location: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub reminder_minutes: Option<i64>,
    /// Monotonic false→true; set by the dispatcher after a successful send.
    pub reminder_sent: bool,
    pub sync_state: SyncState,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A not-yet-persisted event, produced by the coordinator from an intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub summary: String,
    pub location: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub reminder_minutes: Option<i64>,
}

/// Lifecycle of a scheduled task. Terminal states are never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => TaskStatus::Processing,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }
}

/// Typed task payload. Tagged so new task kinds can be added without
/// stringly-typed payload parsing; only reminders exist today.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Reminder {
        phone: String,
        event_summary: String,
        event_start: DateTime<Utc>,
        reminder_minutes: i64,
    },
}

/// A durable deferred unit of work (a reminder delivery).
///
/// `event_id` is a weak reference: the owning event may be deleted before
/// the task fires, and the dispatcher treats that as a normal completion.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: String,
    pub event_id: Option<String>,
    pub fire_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub payload: TaskPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ephemeral per-phone conversational state: a draft event plus the slots
/// that were offered for it. Consumed on reply, discarded on expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSelection {
    pub phone: String,
    pub draft: EventDraft,
    pub slots: Vec<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// A busy interval reported by the external calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Event body sent to the external calendar on insert/update.
#[derive(Debug, Clone)]
pub struct ExternalEventBody {
    pub summary: String,
    pub location: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub timezone: String,
}

/// Context passed to the text extractor alongside the raw message.
#[derive(Debug, Clone)]
pub struct ExtractionHints {
    /// Current time formatted in the user's local zone, e.g. "2026-08-07 14:05".
    pub local_now: String,
    /// IANA timezone name, e.g. "America/New_York".
    pub timezone: String,
}

/// Message delivery channel (SMS provider behind it).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, text: &str) -> anyhow::Result<()>;
}

/// Read side of the external calendar. Only called when a credential exists.
#[async_trait]
pub trait CalendarAvailability: Send + Sync {
    async fn list_busy(
        &self,
        credential: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<BusyInterval>>;
}

/// Write side of the external calendar.
#[async_trait]
pub trait CalendarMutator: Send + Sync {
    /// Returns the external event id.
    async fn insert(&self, credential: &str, body: &ExternalEventBody) -> anyhow::Result<String>;
    async fn update(
        &self,
        credential: &str,
        external_id: &str,
        body: &ExternalEventBody,
    ) -> anyhow::Result<()>;
    async fn delete(&self, credential: &str, external_id: &str) -> anyhow::Result<()>;
}

/// Structured-extraction backend behind the intent parser (NLP/LLM).
/// Returns JSON-shaped fields; the parser owns validation.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, text: &str, hints: &ExtractionHints) -> anyhow::Result<Value>;
}

/// Source of the current instant. Injected everywhere time policy matters so
/// tests can pin the clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
