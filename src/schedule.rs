// src/schedule.rs
//! Next evening publish slot.

use chrono::{DateTime, Duration, Local, LocalResult, NaiveTime, TimeZone, Utc};

/// Default slot: 18:00 local.
pub const DEFAULT_PUBLISH_HOUR: u32 = 18;

/// Next `hour:00` local strictly after `now`, as UTC.
///
/// Hours outside 0..=23 fall back to the default. On a DST gap the slot
/// moves to the first valid local time after it.
pub fn next_publish_slot(now: DateTime<Local>, hour: u32) -> DateTime<Utc> {
    let hour = if hour > 23 { DEFAULT_PUBLISH_HOUR } else { hour };
    let at = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);

    let mut date = now.date_naive();
    if now.time() >= at {
        date = date.succ_opt().unwrap_or(date);
    }
    let naive = date.and_time(at);
    let local = match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(first, _) => first,
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            Local
                .from_local_datetime(&shifted)
                .earliest()
                .unwrap_or(now + Duration::days(1))
        }
    };
    local.with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn local(h: u32, m: u32) -> DateTime<Local> {
        let d = chrono::NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        Local.from_local_datetime(&d.and_hms_opt(h, m, 0).unwrap()).earliest().unwrap()
    }

    #[test]
    fn same_day_before_slot() {
        let slot = next_publish_slot(local(9, 0), 18).with_timezone(&Local);
        assert_eq!(slot.date_naive(), local(9, 0).date_naive());
        assert_eq!(slot.hour(), 18);
    }

    #[test]
    fn next_day_at_or_after_slot() {
        for (h, m) in [(18, 0), (18, 30), (23, 59)] {
            let now = local(h, m);
            let slot = next_publish_slot(now, 18);
            assert!(slot > now.with_timezone(&Utc));
            assert_eq!(slot.with_timezone(&Local).date_naive(), now.date_naive().succ_opt().unwrap());
        }
    }

    #[test]
    fn bad_hour_uses_default() {
        let slot = next_publish_slot(local(9, 0), 99).with_timezone(&Local);
        assert_eq!(slot.hour(), DEFAULT_PUBLISH_HOUR);
    }
}
