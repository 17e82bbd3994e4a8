// src/clock.rs
//! Injectable wall clock. Quota days roll over at local midnight, so
//! everything date-keyed asks the clock instead of calling `Local::now()`.

use chrono::{DateTime, Local, NaiveDate, TimeZone};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Frozen clock for tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

impl FixedClock {
    /// Noon on the given local date.
    pub fn on(date: NaiveDate) -> Self {
        let naive = date.and_hms_opt(12, 0, 0).unwrap_or_default();
        let at = Local
            .from_local_datetime(&naive)
            .earliest()
            .unwrap_or_else(Local::now);
        Self(at)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// `YYYY-MM-DD`, the ledger's date key.
pub fn date_key(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_its_date() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let c = FixedClock::on(d);
        assert_eq!(c.today(), d);
        assert_eq!(date_key(c.today()), "2026-03-14");
    }
}
