//! Virtual clock for the simulation
//!
//! Slots advance one minute at a time inside the daily working window
//! [00:01, 23:59). A slot at or past 23:59 rolls to 00:01 the next day;
//! a slot before 00:01 moves to 00:01 the same day.

use chrono::{Duration, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use wastetrack_types::{Error, Result, TIMESLOT_FORMAT};

const WORK_DAY_START_SECS: u32 = 60;
const WORK_DAY_END_SECS: u32 = 23 * 3600 + 59 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeSlot {
    slot: NaiveDateTime,
}

impl TimeSlot {
    pub fn new(slot: NaiveDateTime) -> Self {
        Self { slot }
    }

    /// Parse `YYYY-MM-DDTHH:MM:SS`
    pub fn parse(value: &str) -> Result<Self> {
        NaiveDateTime::parse_from_str(value.trim(), TIMESLOT_FORMAT)
            .map(Self::new)
            .map_err(|e| Error::InvalidInput(format!("invalid time slot '{value}': {e}")))
    }

    pub fn current(&self) -> NaiveDateTime {
        self.slot
    }

    /// Whether `t` lies inside the working window
    pub fn in_work_day(t: NaiveDateTime) -> bool {
        let secs = t.time().num_seconds_from_midnight();
        (WORK_DAY_START_SECS..WORK_DAY_END_SECS).contains(&secs)
    }

    fn work_day_start(t: NaiveDateTime) -> NaiveDateTime {
        t.date().and_time(NaiveTime::default()) + Duration::seconds(i64::from(WORK_DAY_START_SECS))
    }

    pub fn increment(&mut self) {
        let secs = self.slot.time().num_seconds_from_midnight();
        self.slot = if secs < WORK_DAY_START_SECS {
            Self::work_day_start(self.slot)
        } else if secs < WORK_DAY_END_SECS {
            self.slot + Duration::minutes(1)
        } else {
            Self::work_day_start(self.slot) + Duration::days(1)
        };
    }

    /// Slot as epoch milliseconds, reading the naive time as UTC
    pub fn timestamp_ms(&self) -> i64 {
        Utc.from_utc_datetime(&self.slot).timestamp_millis()
    }

    /// Slot in the `timeslot` attribute format
    pub fn to_iso(&self) -> String {
        self.slot.format(TIMESLOT_FORMAT).to_string()
    }

    /// Number of ticks a backfill from `begin` to `end` performs
    pub fn count_ticks(begin: NaiveDateTime, end: NaiveDateTime) -> u64 {
        let stop = end - Duration::minutes(1);
        let mut slot = TimeSlot::new(begin);
        let mut ticks = 0;
        while slot.current() < stop {
            slot.increment();
            ticks += 1;
        }
        ticks
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_iso())
    }
}
