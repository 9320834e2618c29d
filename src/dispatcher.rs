//! Background polling loop that claims and executes due reminder tasks.
//!
//! The loop is the only writer of task status. Claiming is a compare-and-swap
//! (`pending -> processing`), so multiple dispatcher instances can poll the
//! same database and each task still executes at most once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::CoreError;
use crate::phone;
use crate::store::{EventStore, ProfileStore, TaskStore};
use crate::traits::{Clock, Event, Notifier, ScheduledTask, TaskPayload};

pub struct TaskDispatcher {
    tasks: TaskStore,
    events: Arc<EventStore>,
    profiles: ProfileStore,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    /// Shorter retry interval used after a tick-level error.
    error_backoff: Duration,
    /// Upper bound on a single notifier call.
    notify_timeout: Duration,
}

impl TaskDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: TaskStore,
        events: Arc<EventStore>,
        profiles: ProfileStore,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
        error_backoff: Duration,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            tasks,
            events,
            profiles,
            notifier,
            clock,
            tick_interval,
            error_backoff,
            notify_timeout,
        }
    }

    /// Spawn the polling loop as a background task. A failed tick logs and
    /// retries after the backoff interval; the loop itself never terminates.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        info!(
            tick_secs = self.tick_interval.as_secs(),
            "Task dispatcher spawned"
        );
        tokio::spawn(async move {
            loop {
                let wait = match self.tick().await {
                    Ok(_) => self.tick_interval,
                    Err(e) => {
                        error!("Dispatcher tick error: {}", e);
                        self.error_backoff
                    }
                };
                tokio::time::sleep(wait).await;
            }
        })
    }

    /// One pass over the due tasks. Per-task failures are isolated — one bad
    /// task never blocks the rest of the batch. Returns how many tasks were
    /// claimed this tick.
    pub async fn tick(&self) -> anyhow::Result<usize> {
        let due = self.tasks.due(self.clock.now()).await?;
        if due.is_empty() {
            return Ok(0);
        }
        debug!(count = due.len(), "Due reminder tasks");

        let mut claimed = 0;
        for task in due {
            match self.tasks.claim(&task.id, self.clock.now()).await {
                Ok(()) => {}
                Err(CoreError::TaskClaimConflict) => {
                    // Another dispatcher instance owns it.
                    debug!(task_id = %task.id, "Task already claimed, skipping");
                    continue;
                }
                Err(e) => {
                    error!(task_id = %task.id, "Task claim failed: {}", e);
                    continue;
                }
            }
            claimed += 1;

            if let Err(e) = self.run_claimed(&task).await {
                error!(task_id = %task.id, "Reminder task errored: {}", e);
                if let Err(e) = self.tasks.mark_failed(&task.id, self.clock.now()).await {
                    error!(task_id = %task.id, "Could not mark task failed: {}", e);
                }
            }
        }

        Ok(claimed)
    }

    /// Execute one claimed task through to a terminal state.
    async fn run_claimed(&self, task: &ScheduledTask) -> anyhow::Result<()> {
        let TaskPayload::Reminder {
            phone,
            reminder_minutes,
            ..
        } = &task.payload;

        // Re-validate against current state: a cancelled or already-reminded
        // event leaves an orphaned task behind, and completing it without
        // side effects is the intended path, not an error.
        let event = match &task.event_id {
            Some(id) => self.events.get(id).await?,
            None => None,
        };
        let Some(event) = event else {
            info!(task_id = %task.id, "Event gone; completing task without side effects");
            return self.tasks.mark_completed(&task.id, self.clock.now()).await;
        };
        if event.reminder_sent {
            info!(task_id = %task.id, event_id = %event.id, "Reminder already sent; completing");
            return self.tasks.mark_completed(&task.id, self.clock.now()).await;
        }
        let enabled = self
            .profiles
            .get(&event.owner_phone)
            .await?
            .map(|p| p.reminders_enabled)
            .unwrap_or(false);
        if !enabled {
            info!(task_id = %task.id, "Reminders disabled for owner; completing");
            return self.tasks.mark_completed(&task.id, self.clock.now()).await;
        }

        let text = reminder_text(&event, *reminder_minutes);
        match tokio::time::timeout(self.notify_timeout, self.notifier.send(phone, &text)).await {
            Ok(Ok(())) => {
                self.events.mark_reminder_sent(&event.id).await?;
                self.tasks.mark_completed(&task.id, self.clock.now()).await?;
                info!(task_id = %task.id, event_id = %event.id, "Reminder delivered");
            }
            Ok(Err(e)) => {
                warn!(task_id = %task.id, "Reminder delivery failed: {}", e);
                self.tasks.mark_failed(&task.id, self.clock.now()).await?;
            }
            Err(_) => {
                warn!(
                    task_id = %task.id,
                    timeout_secs = self.notify_timeout.as_secs(),
                    "Reminder delivery timed out"
                );
                self.tasks.mark_failed(&task.id, self.clock.now()).await?;
            }
        }

        Ok(())
    }
}

fn reminder_text(event: &Event, reminder_minutes: i64) -> String {
    let tz = phone::timezone_for(&event.owner_phone);
    let local_start = event.start_at.with_timezone(&tz);
    let when = local_start.format("%I:%M %p").to_string();
    let when = when.trim_start_matches('0');

    let lead = if reminder_minutes >= 60 && reminder_minutes % 60 == 0 {
        let hours = reminder_minutes / 60;
        format!("{} hour{}", hours, if hours > 1 { "s" } else { "" })
    } else {
        format!("{} minutes", reminder_minutes)
    };

    format!(
        "Reminder: '{}' starts at {} (in {}).",
        event.summary, when, lead
    )
}
