//! Trading-session clock in exchange-local time

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike};

#[derive(Debug, Clone, Copy)]
pub struct SessionWindow {
    offset: FixedOffset,
    open: NaiveTime,
    close: NaiveTime,
}

impl SessionWindow {
    pub fn new(utc_offset_minutes: i32, open: NaiveTime, close: NaiveTime) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .with_context(|| format!("Invalid UTC offset {} minutes", utc_offset_minutes))?;
        Ok(Self { offset, open, close })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn local(&self, now_ms: i64) -> Option<DateTime<FixedOffset>> {
        self.offset.timestamp_millis_opt(now_ms).single()
    }

    /// Exchange-local calendar date
    pub fn session_date(&self, now_ms: i64) -> Option<NaiveDate> {
        self.local(now_ms).map(|t| t.date_naive())
    }

    /// True between open (inclusive) and close (exclusive), weekdays only
    pub fn is_open(&self, now_ms: i64) -> bool {
        let Some(local) = self.local(now_ms) else {
            return false;
        };
        if local.weekday().number_from_monday() > 5 {
            return false;
        }
        let t = local.time();
        t >= self.open && t < self.close
    }

    /// Session-local hour, used to pace the hourly summary
    pub fn local_hour(&self, now_ms: i64) -> Option<u32> {
        self.local(now_ms).map(|t| t.hour())
    }

    /// UTC millis of local midnight starting `date`
    pub fn day_start_ms(&self, date: NaiveDate) -> Option<i64> {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        self.offset
            .from_local_datetime(&midnight)
            .single()
            .map(|t| t.timestamp_millis())
    }

    /// Millis until the next session open, for idle logging
    pub fn until_open_ms(&self, now_ms: i64) -> Option<i64> {
        let local = self.local(now_ms)?;
        let mut date = local.date_naive();
        for _ in 0..8 {
            let open = self.offset.from_local_datetime(&date.and_time(self.open)).single()?;
            if open > local && self.is_open(open.timestamp_millis()) {
                return Some(open.timestamp_millis() - now_ms);
            }
            date += Duration::days(1);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-10-19 is a Monday; 10:00 IST
    const MON_10_00_IST: i64 = 1_792_384_200_000;
    const HOUR: i64 = 3_600_000;

    fn ist() -> SessionWindow {
        SessionWindow::new(
            330,
            NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn open_during_weekday_hours() {
        let w = ist();
        assert!(w.is_open(MON_10_00_IST));
        assert!(!w.is_open(MON_10_00_IST - HOUR));
        // 15:30 is closed
        assert!(!w.is_open(MON_10_00_IST + 5 * HOUR + HOUR / 2));
        assert!(w.is_open(MON_10_00_IST + 5 * HOUR));
    }

    #[test]
    fn closed_on_weekends() {
        let w = ist();
        let saturday = MON_10_00_IST - 2 * 24 * HOUR;
        assert!(!w.is_open(saturday));
    }

    #[test]
    fn session_date_uses_local_time() {
        let w = ist();
        // 23:00 UTC Sunday is already Monday in IST
        let sunday_2300_utc = MON_10_00_IST - 5 * HOUR - 30 * 60_000;
        assert_eq!(
            w.session_date(sunday_2300_utc),
            NaiveDate::from_ymd_opt(2026, 10, 19)
        );
        let start = w.day_start_ms(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()).unwrap();
        assert_eq!(start, MON_10_00_IST - 10 * HOUR);
    }

    #[test]
    fn next_open_skips_weekend() {
        let w = ist();
        let friday_16_00 = MON_10_00_IST - 3 * 24 * HOUR + 6 * HOUR;
        let wait = w.until_open_ms(friday_16_00).unwrap();
        assert_eq!(wait, 3 * 24 * HOUR - 6 * HOUR - 45 * 60_000);
    }
}
