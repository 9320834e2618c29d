//! Test infrastructure: mock collaborators and a fully wired harness.
//!
//! Provides a coordinator + dispatcher over a temp-file SQLite database with
//! a pinned manual clock, suitable for integration tests that exercise the
//! real scheduling and reminder paths end to end.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

use crate::availability::AvailabilityOracle;
use crate::coordinator::Coordinator;
use crate::dispatcher::TaskDispatcher;
use crate::intent::IntentParser;
use crate::reminder::ReminderScheduler;
use crate::store::{self, EventStore, ProfileStore, SelectionStore, TaskStore};
use crate::traits::{
    BusyInterval, CalendarAvailability, CalendarMutator, Clock, ExternalEventBody,
    ExtractionHints, Notifier, TextExtractor,
};

/// Phone used by most tests; +1 maps to America/New_York.
pub const TEST_PHONE: &str = "+15551234567";

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// A clock tests can pin and advance.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().expect("clock lock") = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Extraction backend returning scripted JSON payloads (FIFO). An empty
/// queue yields `{"action": "unknown"}`.
pub struct MockExtractor {
    responses: Mutex<VecDeque<Value>>,
    always_fail: AtomicBool,
    pub call_count: Mutex<usize>,
}

impl MockExtractor {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            always_fail: AtomicBool::new(false),
            call_count: Mutex::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.always_fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl TextExtractor for MockExtractor {
    async fn extract(&self, _text: &str, _hints: &ExtractionHints) -> anyhow::Result<Value> {
        *self.call_count.lock().expect("call count lock") += 1;
        if self.always_fail.load(Ordering::SeqCst) {
            anyhow::bail!("extraction backend down");
        }
        Ok(self
            .responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| json!({"action": "unknown"})))
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

/// Records delivery attempts; per-call outcomes can be scripted (FIFO,
/// default success), and an artificial delay can force timeouts.
pub struct MockNotifier {
    pub attempts: Mutex<Vec<(String, String)>>,
    outcomes: Mutex<VecDeque<bool>>,
    delay: Mutex<Option<StdDuration>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            outcomes: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn script_outcomes(&self, outcomes: Vec<bool>) {
        *self.outcomes.lock().expect("outcomes lock") = outcomes.into();
    }

    pub fn set_delay(&self, delay: Option<StdDuration>) {
        *self.delay.lock().expect("delay lock") = delay;
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().expect("attempts lock").len()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, to: &str, text: &str) -> anyhow::Result<()> {
        self.attempts
            .lock()
            .expect("attempts lock")
            .push((to.to_string(), text.to_string()));

        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let ok = self
            .outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or(true);
        if !ok {
            anyhow::bail!("notifier delivery failed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockCalendar
// ---------------------------------------------------------------------------

/// External calendar with scripted busy intervals and recordable mutations.
pub struct MockCalendar {
    pub busy: Mutex<Vec<BusyInterval>>,
    pub inserted: Mutex<Vec<ExternalEventBody>>,
    pub deleted: Mutex<Vec<String>>,
    fail_mutations: AtomicBool,
    next_id: Mutex<u64>,
}

impl MockCalendar {
    pub fn new() -> Self {
        Self {
            busy: Mutex::new(Vec::new()),
            inserted: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fail_mutations: AtomicBool::new(false),
            next_id: Mutex::new(0),
        }
    }

    pub fn set_busy(&self, busy: Vec<BusyInterval>) {
        *self.busy.lock().expect("busy lock") = busy;
    }

    pub fn set_fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CalendarAvailability for MockCalendar {
    async fn list_busy(
        &self,
        _credential: &str,
        _window_start: DateTime<Utc>,
        _window_end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<BusyInterval>> {
        Ok(self.busy.lock().expect("busy lock").clone())
    }
}

#[async_trait]
impl CalendarMutator for MockCalendar {
    async fn insert(&self, _credential: &str, body: &ExternalEventBody) -> anyhow::Result<String> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            anyhow::bail!("calendar backend down");
        }
        self.inserted.lock().expect("inserted lock").push(body.clone());
        let mut next_id = self.next_id.lock().expect("id lock");
        *next_id += 1;
        Ok(format!("ext-{}", next_id))
    }

    async fn update(
        &self,
        _credential: &str,
        _external_id: &str,
        _body: &ExternalEventBody,
    ) -> anyhow::Result<()> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            anyhow::bail!("calendar backend down");
        }
        Ok(())
    }

    async fn delete(&self, _credential: &str, external_id: &str) -> anyhow::Result<()> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            anyhow::bail!("calendar backend down");
        }
        self.deleted
            .lock()
            .expect("deleted lock")
            .push(external_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

/// Everything needed to drive the scheduling engine in tests.
pub struct TestHarness {
    pub coordinator: Coordinator,
    pub dispatcher: TaskDispatcher,
    pub profiles: ProfileStore,
    pub events: Arc<EventStore>,
    pub tasks: TaskStore,
    pub selections: SelectionStore,
    pub pool: sqlx::SqlitePool,
    pub clock: Arc<ManualClock>,
    pub extractor: Arc<MockExtractor>,
    pub notifier: Arc<MockNotifier>,
    pub calendar: Arc<MockCalendar>,
    /// Keep the temp file alive — DB is deleted when this drops.
    _db_file: tempfile::NamedTempFile,
}

/// Reference "now" for tests: 2026-08-07 10:00 EDT (14:00 UTC), a Friday.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 7, 14, 0, 0).unwrap()
}

/// Build a fully wired harness with scripted extractor responses.
///
/// Each call creates an isolated temp database, so tests run in parallel.
pub async fn setup(extractor_responses: Vec<Value>) -> anyhow::Result<TestHarness> {
    let db_file = tempfile::NamedTempFile::new()?;
    let db_path = db_file.path().to_str().expect("utf8 temp path").to_string();
    let pool = store::open_db(&db_path).await?;

    let clock = Arc::new(ManualClock::new(test_now()));
    let extractor = Arc::new(MockExtractor::new(extractor_responses));
    let notifier = Arc::new(MockNotifier::new());
    let calendar = Arc::new(MockCalendar::new());

    let profiles = ProfileStore::new(pool.clone());
    let tasks = TaskStore::new(pool.clone());
    let selections = SelectionStore::new(pool.clone());
    let scheduler = Arc::new(ReminderScheduler::new(
        tasks.clone(),
        clock.clone() as Arc<dyn Clock>,
    ));
    let events = Arc::new(EventStore::new(
        pool.clone(),
        scheduler,
        calendar.clone() as Arc<dyn CalendarMutator>,
        clock.clone() as Arc<dyn Clock>,
    ));

    let coordinator = Coordinator::new(
        profiles.clone(),
        events.clone(),
        selections.clone(),
        IntentParser::new(extractor.clone() as Arc<dyn TextExtractor>),
        AvailabilityOracle::new(calendar.clone() as Arc<dyn CalendarAvailability>),
        clock.clone() as Arc<dyn Clock>,
        60,  // default reminder minutes
        600, // selection ttl secs
    );

    let dispatcher = TaskDispatcher::new(
        tasks.clone(),
        events.clone(),
        profiles.clone(),
        notifier.clone() as Arc<dyn Notifier>,
        clock.clone() as Arc<dyn Clock>,
        StdDuration::from_secs(30),
        StdDuration::from_secs(5),
        StdDuration::from_millis(100), // short notify timeout for timeout tests
    );

    Ok(TestHarness {
        coordinator,
        dispatcher,
        profiles,
        events,
        tasks,
        selections,
        pool,
        clock,
        extractor,
        notifier,
        calendar,
        _db_file: db_file,
    })
}

impl TestHarness {
    /// First contact creates the profile and returns a welcome; most tests
    /// want to get past that.
    pub async fn register(&self) {
        let replies = self.coordinator.handle_message(TEST_PHONE, "hi").await;
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("Welcome"), "got: {}", replies[0]);
    }

    /// A scripted schedule payload for "tomorrow at 3pm local".
    pub fn schedule_payload(summary: &str) -> Value {
        json!({
            "action": "schedule",
            "event": {
                "summary": summary,
                "start_time": "2026-08-08 15:00:00",
            }
        })
    }
}
