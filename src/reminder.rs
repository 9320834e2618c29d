//! Derives reminder tasks from events.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info};

use crate::store::TaskStore;
use crate::traits::{Clock, Event, ScheduledTask, TaskPayload, UserProfile};

pub struct ReminderScheduler {
    tasks: TaskStore,
    clock: Arc<dyn Clock>,
}

impl ReminderScheduler {
    pub fn new(tasks: TaskStore, clock: Arc<dyn Clock>) -> Self {
        Self { tasks, clock }
    }

    /// Create (or supersede) the reminder task for `event`.
    ///
    /// Returns `Ok(None)` without error when no reminder applies: reminders
    /// disabled for the owner, or the computed fire instant is already in
    /// the past. In both cases any previously pending task for the event is
    /// still moved out of pending — a schedule change must never leave a
    /// stale task armed.
    pub async fn schedule(
        &self,
        event: &Event,
        profile: &UserProfile,
    ) -> anyhow::Result<Option<ScheduledTask>> {
        let now = self.clock.now();

        if !profile.reminders_enabled {
            self.tasks.complete_pending_for_event(&event.id, now).await?;
            return Ok(None);
        }

        let minutes = event
            .reminder_minutes
            .unwrap_or(profile.default_reminder_minutes);
        let fire_at = event.start_at - Duration::minutes(minutes);

        if fire_at <= now {
            debug!(
                event_id = %event.id,
                fire_at = %fire_at.to_rfc3339(),
                "Reminder fire instant already past, skipping"
            );
            self.tasks.complete_pending_for_event(&event.id, now).await?;
            return Ok(None);
        }

        let payload = TaskPayload::Reminder {
            phone: profile.phone.clone(),
            event_summary: event.summary.clone(),
            event_start: event.start_at,
            reminder_minutes: minutes,
        };

        let task = self
            .tasks
            .replace_for_event(&event.id, fire_at, &payload, now)
            .await?;

        info!(
            event_id = %event.id,
            task_id = %task.id,
            fire_at = %fire_at.to_rfc3339(),
            "Scheduled reminder task"
        );
        Ok(Some(task))
    }
}
