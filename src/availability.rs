//! Derives free candidate slots from the external calendar's busy intervals.

use std::sync::Arc;

use chrono::{DateTime, Duration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::traits::{BusyInterval, CalendarAvailability};

/// Candidate start hours, local time. 12:00 is deliberately excluded to keep
/// lunch free.
pub const BUSINESS_HOURS: [u32; 7] = [9, 10, 11, 13, 14, 15, 16];

pub struct AvailabilityOracle {
    calendar: Arc<dyn CalendarAvailability>,
}

impl AvailabilityOracle {
    pub fn new(calendar: Arc<dyn CalendarAvailability>) -> Self {
        Self { calendar }
    }

    /// Chronological free start instants within the window.
    ///
    /// Without a credential the oracle degrades to "always available" — a
    /// documented policy (it permits local double-booking), not an oversight;
    /// see DESIGN.md.
    pub async fn free_slots(
        &self,
        credential: Option<&str>,
        tz: Tz,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        duration_minutes: i64,
    ) -> anyhow::Result<Vec<DateTime<Utc>>> {
        let candidates = candidate_slots(tz, window_start, window_end);

        let Some(credential) = credential else {
            return Ok(candidates);
        };

        let busy = self
            .calendar
            .list_busy(credential, window_start, window_end)
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|slot| !overlaps_any(*slot, duration_minutes, &busy))
            .collect())
    }

    /// Whether a single requested slot is free.
    pub async fn is_free(
        &self,
        credential: Option<&str>,
        slot: DateTime<Utc>,
        duration_minutes: i64,
    ) -> anyhow::Result<bool> {
        let Some(credential) = credential else {
            return Ok(true);
        };

        let busy = self
            .calendar
            .list_busy(credential, slot, slot + Duration::minutes(duration_minutes))
            .await?;
        Ok(!overlaps_any(slot, duration_minutes, &busy))
    }
}

fn overlaps_any(slot: DateTime<Utc>, duration_minutes: i64, busy: &[BusyInterval]) -> bool {
    let end = slot + Duration::minutes(duration_minutes);
    busy.iter().any(|b| slot < b.end && end > b.start)
}

/// Business-hour candidates for each local day the window touches, in UTC.
/// Local times invalidated by a DST gap are skipped.
fn candidate_slots(tz: Tz, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut out = Vec::new();
    let mut day = window_start.with_timezone(&tz).date_naive();
    let last_day = window_end.with_timezone(&tz).date_naive();

    while day <= last_day {
        for hour in BUSINESS_HOURS {
            let Some(time) = NaiveTime::from_hms_opt(hour, 0, 0) else {
                continue;
            };
            if let LocalResult::Single(local) = tz.from_local_datetime(&day.and_time(time)) {
                let instant = local.with_timezone(&Utc);
                if instant >= window_start && instant <= window_end {
                    out.push(instant);
                }
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    out
}
