// Copyright 2025 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A set of excluded time ranges that filters a trigger's fire-times.
/// Calendars are stored as opaque payloads through the injected
/// serializer; the store only evaluates inclusion when computing fire
/// times. All evaluation is in UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Calendar {
    /// Excludes the same set of (month, day) dates every year.
    Annual {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        excluded_days: Vec<(u32, u32)>,
    },
    /// Excludes whole weekdays, 0 = Monday.
    Weekly {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        excluded_days: Vec<u32>,
    },
    /// Excludes specific dates.
    Holiday {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        excluded_dates: Vec<NaiveDate>,
    },
    /// Excludes the same window every day, in seconds from midnight,
    /// both ends inclusive.
    Daily {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        range_start: u32,
        range_end: u32,
    },
}

impl Calendar {
    pub fn description(&self) -> Option<&str> {
        match self {
            Calendar::Annual { description, .. }
            | Calendar::Weekly { description, .. }
            | Calendar::Holiday { description, .. }
            | Calendar::Daily { description, .. } => description.as_deref(),
        }
    }

    pub fn is_time_included(&self, time_ms: i64) -> bool {
        let Some(dt) = DateTime::<Utc>::from_timestamp_millis(time_ms) else {
            return false;
        };
        match self {
            Calendar::Annual { excluded_days, .. } => {
                !excluded_days.contains(&(dt.month(), dt.day()))
            }
            Calendar::Weekly { excluded_days, .. } => {
                !excluded_days.contains(&dt.weekday().num_days_from_monday())
            }
            Calendar::Holiday { excluded_dates, .. } => !excluded_dates.contains(&dt.date_naive()),
            Calendar::Daily {
                range_start,
                range_end,
                ..
            } => {
                let tod = dt.num_seconds_from_midnight();
                tod < *range_start || tod > *range_end
            }
        }
    }

    /// The first included instant strictly after `time_ms`. Day-granular
    /// calendars advance midnight by midnight; the daily window jumps
    /// straight past its end. Gives up after five years of exclusions and
    /// returns whatever instant the scan reached.
    pub fn next_included_time(&self, time_ms: i64) -> i64 {
        let mut t = time_ms + 1;
        for _ in 0..(366 * 5) {
            if self.is_time_included(t) {
                return t;
            }
            t = match self {
                Calendar::Daily { range_end, .. } => {
                    let day_start = t - t.rem_euclid(86_400_000);
                    let past_window = day_start + (*range_end as i64 + 1) * 1_000;
                    if past_window > t {
                        past_window
                    } else {
                        day_start + 86_400_000
                    }
                }
                _ => t - t.rem_euclid(86_400_000) + 86_400_000,
            };
        }
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2021-01-01T00:00:00Z, a Friday
    const JAN1: i64 = 1_609_459_200_000;
    const DAY: i64 = 86_400_000;
    const HOUR: i64 = 3_600_000;

    #[test]
    fn test_weekly_excludes_weekend() {
        let cal = Calendar::Weekly {
            description: Some("business days".to_string()),
            excluded_days: vec![5, 6],
        };
        assert!(cal.is_time_included(JAN1)); // Friday
        assert!(!cal.is_time_included(JAN1 + DAY)); // Saturday
        assert!(!cal.is_time_included(JAN1 + 2 * DAY)); // Sunday
        assert!(cal.is_time_included(JAN1 + 3 * DAY)); // Monday
        // from Saturday morning the next included instant is Monday
        let next = cal.next_included_time(JAN1 + DAY + 10 * HOUR);
        assert_eq!(next, JAN1 + 3 * DAY);
    }

    #[test]
    fn test_annual_excludes_new_year() {
        let cal = Calendar::Annual {
            description: None,
            excluded_days: vec![(1, 1)],
        };
        assert!(!cal.is_time_included(JAN1 + HOUR));
        assert!(cal.is_time_included(JAN1 + DAY));
        // excluded again the following year
        assert!(!cal.is_time_included(JAN1 + 365 * DAY));
    }

    #[test]
    fn test_holiday_excludes_dates() {
        let cal = Calendar::Holiday {
            description: None,
            excluded_dates: vec![NaiveDate::from_ymd_opt(2021, 1, 6).unwrap()],
        };
        assert!(cal.is_time_included(JAN1));
        assert!(!cal.is_time_included(JAN1 + 5 * DAY));
        assert_eq!(cal.next_included_time(JAN1 + 5 * DAY), JAN1 + 6 * DAY);
    }

    #[test]
    fn test_daily_window() {
        // exclude 22:00:00..=05:59:59
        let night = Calendar::Daily {
            description: None,
            range_start: 22 * 3600,
            range_end: 6 * 3600 - 1,
        };
        // the window wraps nothing: start > end means nothing matches
        assert!(night.is_time_included(JAN1 + 23 * HOUR));

        let cal = Calendar::Daily {
            description: None,
            range_start: 0,
            range_end: 6 * 3600 - 1,
        };
        assert!(!cal.is_time_included(JAN1));
        assert!(!cal.is_time_included(JAN1 + 5 * HOUR));
        assert!(cal.is_time_included(JAN1 + 6 * HOUR));
        assert_eq!(cal.next_included_time(JAN1 + HOUR), JAN1 + 6 * HOUR);
    }

    #[test]
    fn test_next_included_is_strictly_later() {
        let cal = Calendar::Weekly {
            description: None,
            excluded_days: vec![],
        };
        let t = JAN1 + 12 * HOUR;
        assert_eq!(cal.next_included_time(t), t + 1);
    }

    #[test]
    fn test_serde_roundtrip() {
        let cal = Calendar::Holiday {
            description: Some("bank holidays".to_string()),
            excluded_dates: vec![
                NaiveDate::from_ymd_opt(2021, 12, 24).unwrap(),
                NaiveDate::from_ymd_opt(2021, 12, 25).unwrap(),
            ],
        };
        let raw = serde_json::to_vec(&cal).unwrap();
        let parsed: Calendar = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, cal);
    }
}
