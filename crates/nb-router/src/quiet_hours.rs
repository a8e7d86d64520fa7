//! Quiet-hours window evaluation, always resolved in the user's configured
//! timezone rather than process-local time (spec's explicit "Time" design
//! note).

use chrono::{Timelike, Utc};
use nb_common::QuietHours;
use tracing::warn;

/// Whether `now` (UTC) falls inside the user's quiet-hours window, evaluated
/// in their timezone. Tolerates a window that wraps past midnight (e.g.
/// 22:00-07:00). An unparseable timezone fails safe to "not in quiet hours"
/// rather than blocking delivery on a configuration typo.
pub fn in_quiet_hours(qh: &QuietHours) -> bool {
    let tz: chrono_tz::Tz = match qh.timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = %qh.timezone, "unrecognized quiet-hours timezone, treating as not in quiet hours");
            return false;
        }
    };

    let local_hour = Utc::now().with_timezone(&tz).hour() as u8;
    if qh.start_hour <= qh.end_hour {
        local_hour >= qh.start_hour && local_hour < qh.end_hour
    } else {
        local_hour >= qh.start_hour || local_hour < qh.end_hour
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qh(start: u8, end: u8) -> QuietHours {
        QuietHours { start_hour: start, end_hour: end, timezone: "UTC".to_string(), critical_bypass: true }
    }

    #[test]
    fn unparseable_timezone_fails_open() {
        let mut bad = qh(22, 7);
        bad.timezone = "Not/A_Zone".to_string();
        assert!(!in_quiet_hours(&bad));
    }
}
