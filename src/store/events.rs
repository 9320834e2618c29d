use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::phone;
use crate::reminder::ReminderScheduler;
use crate::store::ts_column;
use crate::traits::{
    CalendarMutator, Clock, Event, ExternalEventBody, ScheduledTask, SyncState, UserProfile,
};

/// Fields for a new event, already resolved to UTC instants.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub summary: String,
    pub location: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub reminder_minutes: Option<i64>,
}

/// Durable CRUD for events, local-first with best-effort external mirroring.
///
/// Local persistence is the durability guarantee: an external mirror failure
/// never fails the operation, it only downgrades the sync state.
pub struct EventStore {
    pool: SqlitePool,
    scheduler: Arc<ReminderScheduler>,
    mutator: Arc<dyn CalendarMutator>,
    clock: Arc<dyn Clock>,
}

impl EventStore {
    pub fn new(
        pool: SqlitePool,
        scheduler: Arc<ReminderScheduler>,
        mutator: Arc<dyn CalendarMutator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            scheduler,
            mutator,
            clock,
        }
    }

    /// Persist a new event and schedule its reminder.
    ///
    /// With a credential the external mirror is attempted inline; on failure
    /// the event stays local with `needs_sync` and is pushed later by
    /// [`EventStore::sync_pending`].
    pub async fn create(
        &self,
        profile: &UserProfile,
        new: NewEvent,
    ) -> anyhow::Result<(Event, Option<ScheduledTask>)> {
        anyhow::ensure!(
            new.start_at < new.end_at,
            "event start {} must precede end {}",
            new.start_at,
            new.end_at
        );

        let now = self.clock.now();
        let id = uuid::Uuid::new_v4().to_string();

        let (sync_state, external_id) = match &profile.calendar_credential {
            None => (SyncState::NeedsSync, None),
            Some(credential) => {
                let body = external_body(&profile.phone, &new.summary, &new.location, new.start_at, new.end_at);
                match self.mutator.insert(credential, &body).await {
                    Ok(ext_id) => (SyncState::Synced, Some(ext_id)),
                    Err(e) => {
                        warn!(owner = %profile.phone, "External calendar insert failed: {}", e);
                        (SyncState::NeedsSync, None)
                    }
                }
            }
        };

        let now_str = now.to_rfc3339();
        sqlx::query(
            "INSERT INTO events (id, owner_phone, summary, location, start_at, end_at,
                                 reminder_minutes, reminder_sent, sync_state, external_id,
                                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&profile.phone)
        .bind(&new.summary)
        .bind(&new.location)
        .bind(new.start_at.to_rfc3339())
        .bind(new.end_at.to_rfc3339())
        .bind(new.reminder_minutes)
        .bind(sync_state.as_str())
        .bind(&external_id)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&self.pool)
        .await?;

        let event = Event {
            id,
            owner_phone: profile.phone.clone(),
            summary: new.summary,
            location: new.location,
            start_at: new.start_at,
            end_at: new.end_at,
            reminder_minutes: new.reminder_minutes,
            reminder_sent: false,
            sync_state,
            external_id,
            created_at: now,
            updated_at: now,
        };

        let task = self.scheduler.schedule(&event, profile).await?;
        info!(event_id = %event.id, owner = %profile.phone, "Created event");
        Ok((event, task))
    }

    /// Move an event to new instants.
    ///
    /// Always runs reminder supersession: the old pending task is invalidated
    /// and a new one computed for the new start, so a reminder can never fire
    /// for a time the event no longer occupies.
    pub async fn modify(
        &self,
        event: &Event,
        profile: &UserProfile,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> anyhow::Result<(Event, Option<ScheduledTask>)> {
        anyhow::ensure!(
            new_start < new_end,
            "event start {} must precede end {}",
            new_start,
            new_end
        );

        let now = self.clock.now();
        let mut updated = event.clone();
        updated.start_at = new_start;
        updated.end_at = new_end;
        updated.updated_at = now;

        if updated.sync_state == SyncState::Synced {
            match (&profile.calendar_credential, &updated.external_id) {
                (Some(credential), Some(external_id)) => {
                    let body = external_body(
                        &profile.phone,
                        &updated.summary,
                        &updated.location,
                        new_start,
                        new_end,
                    );
                    if let Err(e) = self.mutator.update(credential, external_id, &body).await {
                        warn!(event_id = %event.id, "External calendar update failed: {}", e);
                        updated.sync_state = SyncState::NeedsSync;
                    }
                }
                _ => {
                    updated.sync_state = SyncState::NeedsSync;
                }
            }
        }

        sqlx::query(
            "UPDATE events SET start_at = ?, end_at = ?, sync_state = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(new_start.to_rfc3339())
        .bind(new_end.to_rfc3339())
        .bind(updated.sync_state.as_str())
        .bind(now.to_rfc3339())
        .bind(&event.id)
        .execute(&self.pool)
        .await?;

        let task = self.scheduler.schedule(&updated, profile).await?;
        info!(
            event_id = %event.id,
            new_start = %new_start.to_rfc3339(),
            "Modified event"
        );
        Ok((updated, task))
    }

    /// Delete an event and complete its pending reminder task in the same
    /// transaction, so a dispatcher tick can never observe the event gone
    /// while its task is still pending.
    pub async fn cancel(&self, event: &Event, profile: &UserProfile) -> anyhow::Result<()> {
        let now = self.clock.now();
        let now_str = now.to_rfc3339();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE tasks SET status = 'completed', updated_at = ?
             WHERE event_id = ? AND status = 'pending'",
        )
        .bind(&now_str)
        .bind(&event.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(&event.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        // Best-effort external cleanup after the local truth is committed.
        if event.sync_state == SyncState::Synced {
            if let (Some(credential), Some(external_id)) =
                (&profile.calendar_credential, &event.external_id)
            {
                if let Err(e) = self.mutator.delete(credential, external_id).await {
                    warn!(event_id = %event.id, "External calendar delete failed: {}", e);
                }
            }
        }

        info!(event_id = %event.id, owner = %profile.phone, "Cancelled event");
        Ok(())
    }

    /// Find the event closest to the center of `[window_start, window_end]`.
    ///
    /// Tie-breaking: an exact case-insensitive summary match (when a hint is
    /// supplied) beats a time-only match; among equals the smallest absolute
    /// time delta wins.
    pub async fn find_near(
        &self,
        owner_phone: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        summary_hint: Option<&str>,
    ) -> anyhow::Result<Option<Event>> {
        let rows = sqlx::query(
            "SELECT * FROM events
             WHERE owner_phone = ? AND start_at >= ? AND start_at <= ?
             ORDER BY start_at",
        )
        .bind(owner_phone)
        .bind(window_start.to_rfc3339())
        .bind(window_end.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let candidates: Vec<Event> = rows
            .iter()
            .map(row_to_event)
            .collect::<anyhow::Result<_>>()?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let center = window_start + (window_end - window_start) / 2;
        let by_summary: Vec<&Event> = match summary_hint {
            Some(hint) if !hint.trim().is_empty() => candidates
                .iter()
                .filter(|e| e.summary.eq_ignore_ascii_case(hint.trim()))
                .collect(),
            _ => Vec::new(),
        };
        let pool: Vec<&Event> = if by_summary.is_empty() {
            candidates.iter().collect()
        } else {
            by_summary
        };

        Ok(pool
            .into_iter()
            .min_by_key(|e| (e.start_at - center).num_seconds().abs())
            .cloned())
    }

    /// Upcoming events for an owner, soonest first.
    pub async fn list_upcoming(
        &self,
        owner_phone: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT * FROM events
             WHERE owner_phone = ? AND start_at > ?
             ORDER BY start_at LIMIT ?",
        )
        .bind(owner_phone)
        .bind(now.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    /// Push every not-yet-synced event to the external calendar. Called after
    /// a credential first becomes available. Returns how many synced.
    pub async fn sync_pending(&self, profile: &UserProfile) -> anyhow::Result<u64> {
        let Some(credential) = &profile.calendar_credential else {
            return Ok(0);
        };

        let rows = sqlx::query(
            "SELECT * FROM events
             WHERE owner_phone = ? AND sync_state != 'synced'
             ORDER BY start_at",
        )
        .bind(&profile.phone)
        .fetch_all(&self.pool)
        .await?;

        let mut synced = 0u64;
        for row in &rows {
            let event = row_to_event(row)?;
            let body = external_body(
                &profile.phone,
                &event.summary,
                &event.location,
                event.start_at,
                event.end_at,
            );
            match self.mutator.insert(credential, &body).await {
                Ok(external_id) => {
                    sqlx::query(
                        "UPDATE events SET sync_state = 'synced', external_id = ?, updated_at = ?
                         WHERE id = ?",
                    )
                    .bind(&external_id)
                    .bind(self.clock.now().to_rfc3339())
                    .bind(&event.id)
                    .execute(&self.pool)
                    .await?;
                    synced += 1;
                }
                Err(e) => {
                    warn!(event_id = %event.id, "Sync push failed: {}", e);
                }
            }
        }

        if synced > 0 {
            info!(owner = %profile.phone, synced, "Synced local events to external calendar");
        }
        Ok(synced)
    }

    pub async fn get(&self, event_id: &str) -> anyhow::Result<Option<Event>> {
        let row = sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_event).transpose()
    }

    /// Mark the reminder as delivered. Monotonic — never reset.
    pub async fn mark_reminder_sent(&self, event_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE events SET reminder_sent = 1, updated_at = ? WHERE id = ?")
            .bind(self.clock.now().to_rfc3339())
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn external_body(
    owner_phone: &str,
    summary: &str,
    location: &Option<String>,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> ExternalEventBody {
    ExternalEventBody {
        summary: summary.to_string(),
        location: location.clone(),
        start_at,
        end_at,
        timezone: phone::timezone_for(owner_phone).name().to_string(),
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Event> {
    let sync_state: String = row.try_get("sync_state")?;
    Ok(Event {
        id: row.try_get("id")?,
        owner_phone: row.try_get("owner_phone")?,
        summary: row.try_get("summary")?,
        location: row.try_get("location")?,
        start_at: ts_column(row, "start_at")?,
        end_at: ts_column(row, "end_at")?,
        reminder_minutes: row.try_get("reminder_minutes")?,
        reminder_sent: row.try_get::<i32, _>("reminder_sent")? != 0,
        sync_state: SyncState::parse(&sync_state),
        external_id: row.try_get("external_id")?,
        created_at: ts_column(row, "created_at")?,
        updated_at: ts_column(row, "updated_at")?,
    })
}
