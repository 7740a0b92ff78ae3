// Global recording schedule
//
// One character per hour of a 7-day week (168 total), Sunday 00:00 first.
// 'C' = continuous recording, 'M' = motion-triggered, 'N' = off.
// Refreshed from global_settings; anything malformed falls back to
// continuous so a bad config row never silently stops recording.

use chrono::{DateTime, Datelike, Timelike, Utc};
use rusqlite::Connection;

use crate::constants::{SCHEDULE_CONTINUOUS, SCHEDULE_LEN, SCHEDULE_PARAM};
use crate::db::schema;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    Continuous,
    Motion,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    slots: Vec<char>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            slots: vec![SCHEDULE_CONTINUOUS; SCHEDULE_LEN],
        }
    }
}

impl Schedule {
    /// Parse a schedule string. Wrong length or empty input yields the
    /// continuous default.
    pub fn parse(s: &str) -> Self {
        if s.len() != SCHEDULE_LEN {
            return Self::default();
        }
        Self {
            slots: s.chars().collect(),
        }
    }

    /// Load the global schedule from the settings table, defaulting to
    /// continuous when the parameter is absent.
    pub fn load(conn: &Connection) -> Result<Self> {
        match schema::get_global(conn, SCHEDULE_PARAM)? {
            Some(value) => Ok(Self::parse(&value)),
            None => Ok(Self::default()),
        }
    }

    /// Mode for the hour slot containing the given instant.
    pub fn mode_at(&self, t: DateTime<Utc>) -> ScheduleMode {
        let day = t.weekday().num_days_from_sunday() as usize;
        let slot = day * 24 + t.hour() as usize;
        match self.slots.get(slot) {
            Some('M') => ScheduleMode::Motion,
            Some('N') => ScheduleMode::Off,
            _ => ScheduleMode::Continuous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_is_continuous() {
        let sched = Schedule::default();
        let t = Utc.with_ymd_and_hms(2026, 3, 4, 15, 0, 0).unwrap();
        assert_eq!(sched.mode_at(t), ScheduleMode::Continuous);
    }

    #[test]
    fn test_wrong_length_falls_back_to_continuous() {
        assert_eq!(Schedule::parse("MMM"), Schedule::default());
        assert_eq!(Schedule::parse(""), Schedule::default());
    }

    #[test]
    fn test_slot_lookup() {
        // Motion everywhere except Sunday 00:00, which is off
        let mut s: Vec<char> = vec!['M'; SCHEDULE_LEN];
        s[0] = 'N';
        let sched = Schedule::parse(&s.iter().collect::<String>());

        // 2026-03-01 is a Sunday
        let sunday_midnight = Utc.with_ymd_and_hms(2026, 3, 1, 0, 30, 0).unwrap();
        assert_eq!(sched.mode_at(sunday_midnight), ScheduleMode::Off);

        let monday_noon = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        assert_eq!(sched.mode_at(monday_noon), ScheduleMode::Motion);
    }
}
