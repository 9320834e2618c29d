//! Resolves time expressions against a user's timezone into UTC instants.
//!
//! The extractor hands back concrete local datetimes in a small set of
//! formats; on top of that a few deterministic relative shortcuts
//! ("tomorrow at 3pm", "in 30 minutes") are resolved against the reference
//! instant. Every result is timezone-aware — naive timestamps never leave
//! this module.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::error::CoreError;

/// Event length used when the message doesn't specify one.
pub const DEFAULT_DURATION_MINUTES: i64 = 60;

/// Half-width of the search window used when the user is identifying an
/// *existing* event approximately (modify/cancel targets).
const TARGET_WINDOW_MINUTES: i64 = 5;

/// Resolve a time expression for scheduling. Rejects instants at or before
/// `reference` with `PastTime`.
pub fn resolve_start(
    text: &str,
    tz: Tz,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, CoreError> {
    let instant = resolve_instant(text, tz, reference)?;
    if instant <= reference {
        return Err(CoreError::PastTime(instant));
    }
    Ok(instant)
}

/// Resolve a time expression identifying an existing event, returning a
/// ±5-minute search window instead of a single instant.
pub fn resolve_window(
    text: &str,
    tz: Tz,
    reference: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), CoreError> {
    let instant = resolve_instant(text, tz, reference)?;
    Ok((
        instant - Duration::minutes(TARGET_WINDOW_MINUTES),
        instant + Duration::minutes(TARGET_WINDOW_MINUTES),
    ))
}

/// Resolve a time expression to a UTC instant with no future-time policy.
pub fn resolve_instant(
    text: &str,
    tz: Tz,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, CoreError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CoreError::Parse("empty time expression".into()));
    }

    // Already offset-qualified — nothing to localize.
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }

    // "in 30 minutes" / "in 2h" — pure offset from the reference instant.
    if let Some(delta) = try_relative_offset(text) {
        return Ok(reference + delta);
    }

    let local_ref = reference.with_timezone(&tz);
    let naive = try_day_phrase(text, local_ref.date_naive())
        .or_else(|| try_absolute(text))
        .ok_or_else(|| CoreError::Parse(format!("unrecognized time expression '{}'", text)))?;

    localize(naive, tz)
}

fn localize(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>, CoreError> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(_, _) => Err(CoreError::Parse(format!(
            "ambiguous local time {} in {} (DST fold)",
            naive, tz
        ))),
        LocalResult::None => Err(CoreError::Parse(format!(
            "nonexistent local time {} in {} (DST gap)",
            naive, tz
        ))),
    }
}

/// "in Nm" / "in N minutes" / "in 2h" / "in 2 hours"
fn try_relative_offset(text: &str) -> Option<Duration> {
    let re = Regex::new(r"(?i)^in\s+(\d+)\s*(m|min|mins|minutes?|h|hrs?|hours?)$").ok()?;
    let caps = re.captures(text)?;
    let n: i64 = caps[1].parse().ok()?;
    let unit = caps[2].to_lowercase();
    if unit.starts_with('h') {
        Some(Duration::hours(n))
    } else {
        Some(Duration::minutes(n))
    }
}

/// "today at 3pm" / "tomorrow at 14:30" / "tomorrow 9am" / bare "3pm"
fn try_day_phrase(text: &str, today: chrono::NaiveDate) -> Option<NaiveDateTime> {
    let re = Regex::new(
        r"(?i)^(?:(today|tomorrow)\s+)?(?:at\s+)?(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$",
    )
    .ok()?;
    let caps = re.captures(text.trim())?;

    let date = match caps.get(1).map(|m| m.as_str().to_lowercase()) {
        Some(ref day) if day == "tomorrow" => today.succ_opt()?,
        _ => today,
    };

    let mut hour: u32 = caps[2].parse().ok()?;
    let minute: u32 = caps.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;
    match caps.get(4).map(|m| m.as_str().to_lowercase()) {
        Some(ref ampm) if ampm == "pm" && hour < 12 => hour += 12,
        Some(ref ampm) if ampm == "am" && hour == 12 => hour = 0,
        // A bare hour with no am/pm and no colon ("at 3") is too ambiguous
        // to guess; require either a meridiem or a minutes component.
        None if caps.get(3).is_none() => return None,
        _ => {}
    }

    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(date.and_time(time))
}

/// Concrete local datetimes as the extractor emits them.
fn try_absolute(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}
