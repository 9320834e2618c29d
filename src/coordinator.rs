//! Orchestrates one inbound message end to end: parse, resolve, check
//! availability, mutate the event store, arm the reminder.
//!
//! This is also the error boundary — every user-triggered failure is
//! translated into a single friendly outbound message here, never a crash.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use tracing::{error, info, warn};

use crate::availability::AvailabilityOracle;
use crate::error::CoreError;
use crate::intent::{Intent, IntentAction, IntentParser};
use crate::phone;
use crate::resolve;
use crate::store::{EventStore, NewEvent, ProfileStore, SelectionStore};
use crate::traits::{Clock, EventDraft, PendingSelection, ScheduledTask, UserProfile};

/// How many offered slots a selection holds.
const OFFERED_SLOTS: usize = 5;

pub struct Coordinator {
    profiles: ProfileStore,
    events: Arc<EventStore>,
    selections: SelectionStore,
    parser: IntentParser,
    oracle: AvailabilityOracle,
    clock: Arc<dyn Clock>,
    default_reminder_minutes: i64,
    selection_ttl: Duration,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        profiles: ProfileStore,
        events: Arc<EventStore>,
        selections: SelectionStore,
        parser: IntentParser,
        oracle: AvailabilityOracle,
        clock: Arc<dyn Clock>,
        default_reminder_minutes: i64,
        selection_ttl_secs: i64,
    ) -> Self {
        Self {
            profiles,
            events,
            selections,
            parser,
            oracle,
            clock,
            default_reminder_minutes,
            selection_ttl: Duration::seconds(selection_ttl_secs),
        }
    }

    /// The inbound contract: `(sender, text) -> outbound messages`.
    pub async fn handle_message(&self, sender: &str, text: &str) -> Vec<String> {
        let phone = phone::normalize(sender);
        match self.handle_inner(&phone, text).await {
            Ok(replies) => replies,
            Err(e) => {
                if let Some(core) = e.downcast_ref::<CoreError>() {
                    warn!(phone = %phone, "Handled core error: {}", core);
                    vec![core.user_message()]
                } else {
                    error!(phone = %phone, "Unhandled message error: {:#}", e);
                    vec![
                        "Oops! Something went wrong. Please try again or text 'help'."
                            .to_string(),
                    ]
                }
            }
        }
    }

    /// Record a freshly obtained calendar credential and push local events to
    /// the external calendar. Invoked by whatever completes the auth flow —
    /// the handshake itself lives outside this crate.
    pub async fn connect_calendar(
        &self,
        sender: &str,
        credential: &str,
    ) -> anyhow::Result<String> {
        let phone = phone::normalize(sender);
        let now = self.clock.now();
        self.profiles
            .set_calendar_credential(&phone, Some(credential), now)
            .await?;
        let profile = self
            .profiles
            .get(&phone)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no profile for {}", phone))?;
        let synced = self.events.sync_pending(&profile).await?;
        Ok(if synced > 0 {
            format!("Calendar connected. {} events synced!", synced)
        } else {
            "Calendar connected.".to_string()
        })
    }

    async fn handle_inner(&self, phone: &str, text: &str) -> anyhow::Result<Vec<String>> {
        let now = self.clock.now();
        let tz = phone::timezone_for(phone);

        let (profile, created) = self
            .profiles
            .get_or_create(phone, self.default_reminder_minutes, now)
            .await?;
        if created {
            info!(phone = %phone, "New user profile created");
            return Ok(vec![welcome_text()]);
        }

        let trimmed = text.trim();
        let lower = trimmed.to_lowercase();

        if lower == "help" || lower == "?" || lower == "info" {
            return Ok(vec![help_text()]);
        }
        if lower == "delete my account" {
            let deleted = self.profiles.delete(phone).await?;
            return Ok(vec![if deleted {
                "Your account and all events have been deleted.".to_string()
            } else {
                "No account found.".to_string()
            }]);
        }
        if let Some(reply) = self.try_reminder_settings(&profile, &lower, now).await? {
            return Ok(vec![reply]);
        }

        // Multi-turn slot selection: a live offer consumes digit replies and
        // free-text times before anything is sent to the extractor.
        if let Some(selection) = self.selections.get(phone, now).await? {
            if let Some(replies) = self
                .try_consume_selection(&profile, &selection, trimmed, tz, now)
                .await?
            {
                return Ok(replies);
            }
        }

        let intent = self.parser.parse(trimmed, tz, now).await?;
        match intent.action {
            IntentAction::Schedule => self.handle_schedule(&profile, intent, tz, now).await,
            IntentAction::Modify => self.handle_modify(&profile, intent, tz, now).await,
            IntentAction::Cancel => self.handle_cancel(&profile, intent, tz, now).await,
            IntentAction::Query => self.handle_query(&profile, tz, now).await,
            IntentAction::Unknown => Ok(vec![
                "I'm not sure how to help with that. Text 'help' to see what I can do!"
                    .to_string(),
            ]),
        }
    }

    /// Deterministic reminder-settings commands, handled without the
    /// extractor.
    async fn try_reminder_settings(
        &self,
        profile: &UserProfile,
        lower: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<String>> {
        if lower == "reminders off" || lower == "disable reminders" {
            self.profiles
                .set_reminders_enabled(&profile.phone, false, now)
                .await?;
            return Ok(Some("Event reminders have been turned off.".to_string()));
        }
        if lower == "reminders on" || lower == "enable reminders" {
            self.profiles
                .set_reminders_enabled(&profile.phone, true, now)
                .await?;
            return Ok(Some("Event reminders have been turned on.".to_string()));
        }

        if lower.contains("default reminder") {
            let re = Regex::new(r"(\d+)\s*(minutes?|mins?|hours?|hrs?)")?;
            let Some(caps) = re.captures(lower) else {
                return Ok(Some(
                    "Please specify a time, like 'set default reminder to 30 minutes'."
                        .to_string(),
                ));
            };
            let value: i64 = caps[1].parse()?;
            let minutes = if caps[2].starts_with('h') {
                value * 60
            } else {
                value
            };
            self.profiles
                .set_default_reminder_minutes(&profile.phone, minutes, now)
                .await?;
            return Ok(Some(format!(
                "Default reminder time set to {} before events.",
                lead_display(minutes)
            )));
        }

        Ok(None)
    }

    /// Try to interpret a reply as a slot pick for a live offer. Returns
    /// `None` when the message is unrelated, letting it fall through to the
    /// normal parse path.
    async fn try_consume_selection(
        &self,
        profile: &UserProfile,
        selection: &PendingSelection,
        text: &str,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Vec<String>>> {
        if let Ok(index) = text.parse::<usize>() {
            if (1..=selection.slots.len()).contains(&index) {
                let slot = selection.slots[index - 1];
                self.selections.delete(&profile.phone).await?;
                return Ok(Some(
                    self.finalize_draft(profile, &selection.draft, slot, tz).await?,
                ));
            }
            return Ok(Some(vec![format!(
                "Please reply with a number between 1 and {}, or a different time.",
                selection.slots.len()
            )]));
        }

        match resolve::resolve_start(text, tz, now) {
            Ok(slot) => {
                self.selections.delete(&profile.phone).await?;
                Ok(Some(
                    self.finalize_draft(profile, &selection.draft, slot, tz).await?,
                ))
            }
            Err(CoreError::PastTime(_)) => Ok(Some(vec![
                "That time has already passed. Please provide a future time.".to_string(),
            ])),
            // Not a time at all — treat as a fresh message.
            Err(_) => Ok(None),
        }
    }

    async fn handle_schedule(
        &self,
        profile: &UserProfile,
        intent: Intent,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<String>> {
        let draft = EventDraft {
            summary: intent.summary.unwrap_or_else(|| "Meeting".to_string()),
            location: intent.location,
            start_at: None,
            duration_minutes: intent
                .duration_minutes
                .unwrap_or(resolve::DEFAULT_DURATION_MINUTES),
            reminder_minutes: intent.reminder_minutes,
        };

        match intent.start_text {
            Some(text) => {
                let start = resolve::resolve_start(&text, tz, now)?;
                self.finalize_draft(profile, &draft, start, tz).await
            }
            None => self.offer_slots(profile, draft, tz, now).await,
        }
    }

    /// No time given: look a week ahead, offer the first few free slots, and
    /// park the draft until the user picks one.
    async fn offer_slots(
        &self,
        profile: &UserProfile,
        draft: EventDraft,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<String>> {
        let window_start = next_local_midnight(tz, now);
        let window_end = window_start + Duration::days(7);

        let slots = self
            .oracle
            .free_slots(
                profile.calendar_credential.as_deref(),
                tz,
                window_start,
                window_end,
                draft.duration_minutes,
            )
            .await?;
        if slots.is_empty() {
            return Err(CoreError::NoSlotAvailable.into());
        }

        let offered: Vec<DateTime<Utc>> = slots.into_iter().take(OFFERED_SLOTS).collect();
        self.selections
            .put(&PendingSelection {
                phone: profile.phone.clone(),
                draft,
                slots: offered.clone(),
                expires_at: now + self.selection_ttl,
            })
            .await?;

        let mut lines = vec!["No time specified. Here are some available slots:".to_string()];
        for (i, slot) in offered.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, fmt_day_and_time(*slot, tz)));
        }
        lines.push("Reply with the number of your preferred slot or a different time.".to_string());
        Ok(vec![lines.join("\n")])
    }

    /// Availability-check, persist, and confirm a fully resolved draft.
    async fn finalize_draft(
        &self,
        profile: &UserProfile,
        draft: &EventDraft,
        start: DateTime<Utc>,
        tz: Tz,
    ) -> anyhow::Result<Vec<String>> {
        let free = self
            .oracle
            .is_free(
                profile.calendar_credential.as_deref(),
                start,
                draft.duration_minutes,
            )
            .await?;
        if !free {
            return Ok(vec![format!(
                "The requested time ({}) is not available. Please choose a different time.",
                fmt_day_and_time(start, tz)
            )]);
        }

        let (event, task) = self
            .events
            .create(
                profile,
                NewEvent {
                    summary: draft.summary.clone(),
                    location: draft.location.clone(),
                    start_at: start,
                    end_at: start + Duration::minutes(draft.duration_minutes),
                    reminder_minutes: draft.reminder_minutes,
                },
            )
            .await?;

        let mut message = format!(
            "{} scheduled for {}.",
            event.summary,
            fmt_day_and_time(event.start_at, tz)
        );
        append_reminder_note(&mut message, &task);
        Ok(vec![message])
    }

    async fn handle_modify(
        &self,
        profile: &UserProfile,
        intent: Intent,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<String>> {
        let original_text = intent
            .original_time_text
            .clone()
            .or_else(|| intent.start_text.clone())
            .ok_or_else(|| {
                CoreError::Parse("modify intent without an original time".to_string())
            })?;
        let new_text = intent
            .new_time_text
            .clone()
            .ok_or_else(|| CoreError::Parse("modify intent without a new time".to_string()))?;

        let (window_start, window_end) = resolve::resolve_window(&original_text, tz, now)?;
        let event = self
            .events
            .find_near(
                &profile.phone,
                window_start,
                window_end,
                intent.summary.as_deref(),
            )
            .await?
            .ok_or(CoreError::NotFound(original_text))?;

        let new_start = resolve::resolve_start(&new_text, tz, now)?;
        let duration = event.end_at - event.start_at;
        let old_start = event.start_at;

        let (updated, task) = self
            .events
            .modify(&event, profile, new_start, new_start + duration)
            .await?;

        let mut message = format!(
            "{} moved from {} to {}.",
            updated.summary,
            fmt_time(old_start, tz),
            fmt_day_and_time(updated.start_at, tz)
        );
        append_reminder_note(&mut message, &task);
        Ok(vec![message])
    }

    async fn handle_cancel(
        &self,
        profile: &UserProfile,
        intent: Intent,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<String>> {
        let time_text = intent
            .start_text
            .clone()
            .or_else(|| intent.original_time_text.clone())
            .ok_or_else(|| {
                CoreError::Parse("cancel intent without a target time".to_string())
            })?;

        let (window_start, window_end) = resolve::resolve_window(&time_text, tz, now)?;
        let event = self
            .events
            .find_near(
                &profile.phone,
                window_start,
                window_end,
                intent.summary.as_deref(),
            )
            .await?
            .ok_or(CoreError::NotFound(time_text))?;

        self.events.cancel(&event, profile).await?;
        Ok(vec![format!(
            "{} at {} has been canceled.",
            event.summary,
            fmt_time(event.start_at, tz)
        )])
    }

    async fn handle_query(
        &self,
        profile: &UserProfile,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<String>> {
        let upcoming = self.events.list_upcoming(&profile.phone, now, 10).await?;
        if upcoming.is_empty() {
            return Ok(vec!["You have no upcoming events.".to_string()]);
        }

        let mut lines = vec!["Your upcoming events:".to_string()];
        for event in upcoming {
            lines.push(format!(
                "- {} — {}",
                event.summary,
                fmt_day_and_time(event.start_at, tz)
            ));
        }
        Ok(vec![lines.join("\n")])
    }
}

/// Midnight at the start of tomorrow in the user's zone, as UTC.
fn next_local_midnight(tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let mut date = local.date_naive();
    if let Some(next) = date.succ_opt() {
        date = next;
    }
    // Midnight is skipped by DST in a handful of zones; take the earliest
    // valid instant of the day.
    tz.from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

fn append_reminder_note(message: &mut String, task: &Option<ScheduledTask>) {
    if let Some(task) = task {
        let crate::traits::TaskPayload::Reminder {
            reminder_minutes, ..
        } = &task.payload;
        message.push_str(&format!(
            " You'll receive a reminder {} before.",
            lead_display(*reminder_minutes)
        ));
    }
}

fn lead_display(minutes: i64) -> String {
    if minutes >= 60 && minutes % 60 == 0 {
        let hours = minutes / 60;
        format!("{} hour{}", hours, if hours > 1 { "s" } else { "" })
    } else {
        format!("{} minutes", minutes)
    }
}

/// "Monday, August 10 at 9:00 AM"
fn fmt_day_and_time(instant: DateTime<Utc>, tz: Tz) -> String {
    let local = instant.with_timezone(&tz);
    format!(
        "{}, {} {} at {}",
        local.format("%A"),
        local.format("%B"),
        local.day(),
        fmt_time(instant, tz)
    )
}

/// "9:00 AM" without a leading zero.
fn fmt_time(instant: DateTime<Utc>, tz: Tz) -> String {
    let local = instant.with_timezone(&tz);
    let time = local.format("%I:%M %p").to_string();
    time.trim_start_matches('0').to_string()
}

fn welcome_text() -> String {
    "Welcome! You can start scheduling right away:\n\
     - 'Schedule meeting with John at 3pm'\n\
     - 'Book a call tomorrow at 10am'\n\
     - 'remind me 30 minutes' in any message sets a reminder\n\
     Text 'help' for the full list."
        .to_string()
}

fn help_text() -> String {
    "Quickstart guide:\n\
     - Schedule: 'Meet John tomorrow at 3pm'\n\
     - Modify: 'Move my 3pm meeting to 4pm'\n\
     - Cancel: 'Cancel my 3pm meeting'\n\
     - View: 'my events'\n\
     - Reminders: 'set default reminder to 30 minutes', 'reminders on/off'"
        .to_string()
}
