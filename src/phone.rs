//! Phone-number normalization and timezone derivation.

use chrono_tz::Tz;

/// Normalize an inbound sender id to a rough E.164 shape: keep a leading
/// `+` and digits, drop separators. Numbers without a country prefix are
/// assumed US/Canada.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return trimmed.to_string();
    }
    if trimmed.starts_with('+') {
        format!("+{}", digits)
    } else if digits.len() == 10 {
        format!("+1{}", digits)
    } else {
        format!("+{}", digits)
    }
}

/// Derive a timezone from the phone country code.
///
/// US/Canada numbers default to Eastern Time; everything else falls back to
/// UTC until per-country mappings are added.
pub fn timezone_for(phone: &str) -> Tz {
    if phone.starts_with("+1") {
        chrono_tz::America::New_York
    } else {
        chrono_tz::UTC
    }
}
