// ⏰ Temporal Model - Two clocks, kept apart
//
// Every accepted change carries two times:
// 1. Effective time: the vessel-local date the reading/count applies to
//    (what the crew types in, may be back-dated but never in the future)
// 2. System time: the UTC instant the change was entered
//
// "Today" is always the vessel's local date, so the clock carries an offset.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CLOCK
// ============================================================================

pub trait Clock: Send + Sync {
    /// System time, stamped on audit records
    fn now_utc(&self) -> DateTime<Utc>;

    /// Vessel-local calendar date, used to reject future-dated entries
    fn today_local(&self) -> NaiveDate;
}

/// Wall clock shifted to the vessel's local offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        SystemClock { offset }
    }

    /// Out-of-range offsets (beyond ±24h) fall back to UTC.
    pub fn from_offset_minutes(minutes: i32) -> Self {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        SystemClock { offset }
    }

    pub fn utc() -> Self {
        Self::from_offset_minutes(0)
    }

    /// Vessel-local date at a given UTC instant.
    pub fn today_at(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::utc()
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today_local(&self) -> NaiveDate {
        self.today_at(Utc::now())
    }
}

/// Frozen clock for tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub now: DateTime<Utc>,
    pub today: NaiveDate,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        FixedClock {
            now,
            today: now.date_naive(),
        }
    }

    pub fn on(today: NaiveDate) -> Self {
        let now = today
            .and_hms_opt(12, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);
        FixedClock { now, today }
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.now
    }

    fn today_local(&self) -> NaiveDate {
        self.today
    }
}

// ============================================================================
// DATE RANGE (history queries)
// ============================================================================

/// Inclusive range over effective dates. Open ends match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn all() -> Self {
        DateRange::default()
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        DateRange {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock_on_date() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let clock = FixedClock::on(day);

        assert_eq!(clock.today_local(), day);
        assert_eq!(clock.now_utc().date_naive(), day);
    }

    #[test]
    fn test_offset_out_of_range_falls_back_to_utc() {
        let clock = SystemClock::from_offset_minutes(48 * 60);
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 23, 30, 0).unwrap();

        assert_eq!(clock.today_at(now), NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
    }

    #[test]
    fn test_vessel_today_follows_offset() {
        let d = |day| NaiveDate::from_ymd_opt(2025, 1, day).unwrap();

        // 23:30 UTC is already tomorrow for a vessel at UTC+9
        let late = Utc.with_ymd_and_hms(2025, 1, 10, 23, 30, 0).unwrap();
        assert_eq!(SystemClock::from_offset_minutes(9 * 60).today_at(late), d(11));
        assert_eq!(SystemClock::utc().today_at(late), d(10));

        // 02:00 UTC is still yesterday at UTC-4
        let early = Utc.with_ymd_and_hms(2025, 1, 10, 2, 0, 0).unwrap();
        assert_eq!(SystemClock::from_offset_minutes(-240).today_at(early), d(9));

        // Half-hour offsets (UTC+5:30) at 18:29 / 18:30 UTC
        let ist = SystemClock::from_offset_minutes(330);
        assert_eq!(ist.today_at(Utc.with_ymd_and_hms(2025, 1, 10, 18, 29, 0).unwrap()), d(10));
        assert_eq!(ist.today_at(Utc.with_ymd_and_hms(2025, 1, 10, 18, 30, 0).unwrap()), d(11));
    }

    #[test]
    fn test_today_local_matches_today_at_now() {
        let clock = SystemClock::from_offset_minutes(-240);
        let before = clock.today_at(Utc::now());
        let today = clock.today_local();
        let after = clock.today_at(Utc::now());

        assert!(today == before || today == after);
    }

    #[test]
    fn test_date_range_contains() {
        let d = |day| NaiveDate::from_ymd_opt(2025, 1, day).unwrap();
        let range = DateRange::between(d(5), d(10));

        assert!(range.contains(d(5)));
        assert!(range.contains(d(10)));
        assert!(!range.contains(d(4)));
        assert!(!range.contains(d(11)));

        assert!(DateRange::all().contains(d(1)));
        assert!(DateRange::all().is_unbounded());

        let open_end = DateRange {
            from: Some(d(7)),
            to: None,
        };
        assert!(open_end.contains(d(31)));
        assert!(!open_end.contains(d(6)));
    }
}
