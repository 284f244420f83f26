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

use std::{collections::HashMap, str::FromStr};

use chrono::{DateTime, Datelike, Days, Months, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FiredTrigger, JobKey, RECOVERING_JOBS_GROUP, TriggerKey, calendar::Calendar};
use crate::errors::{Error, Result};

/// Leave a misfired trigger's fire time untouched.
pub const MISFIRE_INSTRUCTION_IGNORE_POLICY: i32 = -1;
/// Pick a policy from the schedule type.
pub const MISFIRE_INSTRUCTION_SMART_POLICY: i32 = 0;
/// Fire immediately once, then continue the normal sequence.
pub const MISFIRE_INSTRUCTION_FIRE_ONCE_NOW: i32 = 1;
/// Skip the missed fires and wait for the next valid instant.
pub const MISFIRE_INSTRUCTION_NEXT_VALID: i32 = 2;

/// Repeat forever (simple schedules).
pub const REPEAT_INDEFINITELY: i32 = -1;

pub const DEFAULT_PRIORITY: i32 = 5;

/// Excluded-instant scans give up after this many calendar hops.
const MAX_CALENDAR_HOPS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    /// Fixed span in ms, `None` for the variable-length units.
    pub fn millis(&self) -> Option<i64> {
        match self {
            IntervalUnit::Millisecond => Some(1),
            IntervalUnit::Second => Some(1_000),
            IntervalUnit::Minute => Some(60_000),
            IntervalUnit::Hour => Some(3_600_000),
            IntervalUnit::Day => Some(86_400_000),
            IntervalUnit::Week => Some(604_800_000),
            IntervalUnit::Month | IntervalUnit::Year => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Millisecond => "millisecond",
            IntervalUnit::Second => "second",
            IntervalUnit::Minute => "minute",
            IntervalUnit::Hour => "hour",
            IntervalUnit::Day => "day",
            IntervalUnit::Week => "week",
            IntervalUnit::Month => "month",
            IntervalUnit::Year => "year",
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "millisecond" => Ok(IntervalUnit::Millisecond),
            "second" => Ok(IntervalUnit::Second),
            "minute" => Ok(IntervalUnit::Minute),
            "hour" => Ok(IntervalUnit::Hour),
            "day" => Ok(IntervalUnit::Day),
            "week" => Ok(IntervalUnit::Week),
            "month" => Ok(IntervalUnit::Month),
            "year" => Ok(IntervalUnit::Year),
            _ => Err(Error::Decode(format!("unknown interval unit: {s}"))),
        }
    }
}

/// The type-specific part of a trigger. Fire-time arithmetic is entirely
/// determined by the variant plus the trigger's start/end window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSchedule {
    Cron {
        expression: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_zone: Option<String>,
    },
    Simple {
        /// ms between fires; 0 means one-shot.
        repeat_interval: i64,
        /// Repeats after the first fire; -1 repeats forever.
        repeat_count: i32,
        #[serde(default)]
        times_triggered: i32,
    },
    CalendarInterval {
        interval: i64,
        unit: IntervalUnit,
    },
    DailyTimeInterval {
        /// Seconds from midnight, UTC.
        start_time_of_day: u32,
        end_time_of_day: u32,
        interval: i64,
        unit: IntervalUnit,
        /// Days the window is open, 0 = Monday. Empty means every day.
        #[serde(default)]
        days_of_week: Vec<u32>,
    },
}

impl TriggerSchedule {
    pub fn cron(expression: &str) -> Self {
        TriggerSchedule::Cron {
            expression: expression.to_string(),
            time_zone: None,
        }
    }

    pub fn simple(repeat_interval: i64, repeat_count: i32) -> Self {
        TriggerSchedule::Simple {
            repeat_interval,
            repeat_count,
            times_triggered: 0,
        }
    }

    pub fn one_shot() -> Self {
        Self::simple(0, 0)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TriggerSchedule::Cron { .. } => "cron",
            TriggerSchedule::Simple { .. } => "simple",
            TriggerSchedule::CalendarInterval { .. } => "calendar_interval",
            TriggerSchedule::DailyTimeInterval { .. } => "daily_time_interval",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_name: Option<String>,
    pub priority: i32,
    pub misfire_instruction: i32,
    /// ms since epoch; no fire happens before this.
    pub start_time: i64,
    /// ms since epoch; no fire happens after this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_fire_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_fire_time: Option<i64>,
    pub schedule: TriggerSchedule,
}

impl Trigger {
    pub fn new(key: TriggerKey, job_key: JobKey, schedule: TriggerSchedule) -> Self {
        Self {
            key,
            job_key,
            description: None,
            calendar_name: None,
            priority: DEFAULT_PRIORITY,
            misfire_instruction: MISFIRE_INSTRUCTION_SMART_POLICY,
            start_time: Utc::now().timestamp_millis(),
            end_time: None,
            next_fire_time: None,
            prev_fire_time: None,
            schedule,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_calendar(mut self, calendar_name: &str) -> Self {
        self.calendar_name = Some(calendar_name.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: i32) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_end_time(mut self, end_time: i64) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_next_fire_time(mut self, next_fire_time: i64) -> Self {
        self.next_fire_time = Some(next_fire_time);
        self
    }

    /// Synthetic trigger enqueued when orphan recovery finds a fired
    /// trigger whose job requested recovery: a one-shot firing
    /// immediately, carrying over the orphan's priority.
    pub fn recovery(orphan: &FiredTrigger, seq: u64, now: i64) -> Self {
        Self {
            key: TriggerKey::new(
                &format!("recover_{}_{seq}", orphan.instance_id),
                RECOVERING_JOBS_GROUP,
            ),
            job_key: orphan.job_key.clone(),
            description: Some(format!(
                "recovery for {} (scheduled at {})",
                orphan.trigger_key,
                orphan.sched_time.unwrap_or(orphan.fired_at)
            )),
            calendar_name: None,
            priority: orphan.priority,
            misfire_instruction: MISFIRE_INSTRUCTION_IGNORE_POLICY,
            start_time: now,
            end_time: None,
            next_fire_time: Some(now),
            prev_fire_time: None,
            schedule: TriggerSchedule::one_shot(),
        }
    }

    /// Reject triggers the store could never fire correctly. Called once
    /// at store time so fire-time arithmetic can stay infallible.
    pub fn validate(&self) -> Result<()> {
        match &self.schedule {
            TriggerSchedule::Cron {
                expression,
                time_zone,
            } => {
                cron::Schedule::from_str(expression).map_err(|e| {
                    Error::ConstraintViolation(format!(
                        "trigger {} has an invalid cron expression {expression:?}: {e}",
                        self.key
                    ))
                })?;
                if let Some(tz) = time_zone {
                    chrono_tz::Tz::from_str(tz).map_err(|_| {
                        Error::ConstraintViolation(format!(
                            "trigger {} has an unknown time zone {tz:?}",
                            self.key
                        ))
                    })?;
                }
            }
            TriggerSchedule::Simple {
                repeat_interval,
                repeat_count,
                ..
            } => {
                if *repeat_count != 0 && *repeat_interval <= 0 {
                    return Err(Error::ConstraintViolation(format!(
                        "trigger {} repeats but has no repeat interval",
                        self.key
                    )));
                }
            }
            TriggerSchedule::CalendarInterval { interval, .. } => {
                if *interval <= 0 {
                    return Err(Error::ConstraintViolation(format!(
                        "trigger {} has a non-positive calendar interval",
                        self.key
                    )));
                }
            }
            TriggerSchedule::DailyTimeInterval {
                start_time_of_day,
                end_time_of_day,
                interval,
                unit,
                days_of_week,
            } => {
                if *interval <= 0 || unit.millis().is_none_or(|ms| ms > 3_600_000) {
                    return Err(Error::ConstraintViolation(format!(
                        "trigger {} daily interval must be a positive number of \
                         milliseconds to hours",
                        self.key
                    )));
                }
                if start_time_of_day > end_time_of_day || *end_time_of_day >= 86_400 {
                    return Err(Error::ConstraintViolation(format!(
                        "trigger {} has an invalid daily time window",
                        self.key
                    )));
                }
                if days_of_week.iter().any(|d| *d > 6) {
                    return Err(Error::ConstraintViolation(format!(
                        "trigger {} names a day of week outside 0..=6",
                        self.key
                    )));
                }
            }
        }
        Ok(())
    }

    /// First fire instant strictly after `after` that the schedule
    /// produces and the calendar does not exclude, or `None` when the
    /// sequence is exhausted (repeat count spent, past `end_time`, or no
    /// included instant within the scan horizon).
    pub fn fire_time_after(&self, after: i64, calendar: Option<&Calendar>) -> Option<i64> {
        let mut t = self.schedule_fire_time_after(after)?;
        if let Some(cal) = calendar {
            let mut hops = 0;
            while !cal.is_time_included(t) {
                hops += 1;
                if hops > MAX_CALENDAR_HOPS {
                    return None;
                }
                let included = cal.next_included_time(t);
                t = self.schedule_fire_time_after(included - 1)?;
            }
        }
        match self.end_time {
            Some(end) if t > end => None,
            _ => Some(t),
        }
    }

    /// Advance past one fire: previous takes the fire just consumed, next
    /// becomes the following instant.
    pub fn triggered(&mut self, calendar: Option<&Calendar>) {
        self.prev_fire_time = self.next_fire_time;
        self.next_fire_time = match self.next_fire_time {
            Some(fired) => self.fire_time_after(fired, calendar),
            None => None,
        };
        if let TriggerSchedule::Simple {
            times_triggered, ..
        } = &mut self.schedule
        {
            *times_triggered += 1;
        }
    }

    /// Recompute the next fire time of a misfired trigger. Never moves it
    /// backward: the result is `now` or later, or `None` when the
    /// schedule has no remaining instant (the caller completes the
    /// trigger).
    pub fn update_after_misfire(&mut self, calendar: Option<&Calendar>, now: i64) {
        let next = match self.misfire_instruction {
            MISFIRE_INSTRUCTION_IGNORE_POLICY => return,
            MISFIRE_INSTRUCTION_FIRE_ONCE_NOW => Some(now),
            MISFIRE_INSTRUCTION_NEXT_VALID => self.fire_time_after(now, calendar),
            // smart policy and anything unrecognized
            _ => match &self.schedule {
                TriggerSchedule::Simple { repeat_count, .. }
                    if *repeat_count == REPEAT_INDEFINITELY =>
                {
                    self.fire_time_after(now, calendar)
                }
                TriggerSchedule::Simple { .. } | TriggerSchedule::Cron { .. } => Some(now),
                TriggerSchedule::CalendarInterval { .. }
                | TriggerSchedule::DailyTimeInterval { .. } => self.fire_time_after(now, calendar),
            },
        };
        self.next_fire_time = match (next, self.end_time) {
            (Some(t), Some(end)) if t > end => None,
            (next, _) => next,
        };
    }

    /// Re-anchor against a replaced calendar: the next fire moves to the
    /// first instant the new calendar includes, never backward.
    pub fn update_with_new_calendar(&mut self, calendar: &Calendar, misfire_threshold: i64) {
        let Some(next) = self.next_fire_time else {
            return;
        };
        let now = Utc::now().timestamp_millis();
        if calendar.is_time_included(next) {
            return;
        }
        self.next_fire_time = self.fire_time_after(next - 1, Some(calendar));
        if let Some(t) = self.next_fire_time
            && t < now
            && now - t > misfire_threshold
        {
            self.next_fire_time = self.fire_time_after(now, Some(calendar));
        }
    }

    /// Next raw schedule instant strictly after `after`, at or past
    /// `start_time`, end time not yet applied.
    fn schedule_fire_time_after(&self, after: i64) -> Option<i64> {
        match &self.schedule {
            TriggerSchedule::Simple {
                repeat_interval,
                repeat_count,
                ..
            } => {
                if after < self.start_time {
                    return Some(self.start_time);
                }
                if *repeat_interval <= 0 {
                    return None;
                }
                let n = (after - self.start_time) / repeat_interval + 1;
                if *repeat_count != REPEAT_INDEFINITELY && n > *repeat_count as i64 {
                    return None;
                }
                Some(self.start_time + n * repeat_interval)
            }
            TriggerSchedule::Cron {
                expression,
                time_zone,
            } => {
                let schedule = cron::Schedule::from_str(expression).ok()?;
                let after = after.max(self.start_time - 1);
                let after_dt = DateTime::<Utc>::from_timestamp_millis(after)?;
                match time_zone {
                    Some(tz) => {
                        let tz = chrono_tz::Tz::from_str(tz).ok()?;
                        schedule
                            .after(&after_dt.with_timezone(&tz))
                            .next()
                            .map(|dt| dt.timestamp_millis())
                    }
                    None => schedule
                        .after(&after_dt)
                        .next()
                        .map(|dt| dt.timestamp_millis()),
                }
            }
            TriggerSchedule::CalendarInterval { interval, unit } => {
                if after < self.start_time {
                    return Some(self.start_time);
                }
                if let Some(unit_ms) = unit.millis() {
                    let span = unit_ms.checked_mul(*interval)?;
                    let n = (after - self.start_time) / span + 1;
                    Some(self.start_time + n * span)
                } else {
                    self.month_based_fire_time_after(after, *interval, *unit)
                }
            }
            TriggerSchedule::DailyTimeInterval {
                start_time_of_day,
                end_time_of_day,
                interval,
                unit,
                days_of_week,
            } => self.daily_fire_time_after(
                after,
                *start_time_of_day,
                *end_time_of_day,
                unit.millis()? * interval,
                days_of_week,
            ),
        }
    }

    fn month_based_fire_time_after(
        &self,
        after: i64,
        interval: i64,
        unit: IntervalUnit,
    ) -> Option<i64> {
        let start = DateTime::<Utc>::from_timestamp_millis(self.start_time)?;
        let months_per_step = match unit {
            IntervalUnit::Year => interval.checked_mul(12)?,
            _ => interval,
        };
        let at_step = |n: i64| -> Option<i64> {
            let months = u32::try_from(n.checked_mul(months_per_step)?).ok()?;
            Some(start.checked_add_months(Months::new(months))?.timestamp_millis())
        };
        // start near the answer, then settle on the smallest step past
        // `after`
        let approx_step_ms = months_per_step * 28 * 86_400_000;
        let mut n = ((after - self.start_time) / approx_step_ms).max(0);
        while n > 0 && at_step(n)? > after {
            n -= 1;
        }
        while at_step(n)? <= after {
            n += 1;
        }
        at_step(n)
    }

    fn daily_fire_time_after(
        &self,
        after: i64,
        start_tod: u32,
        end_tod: u32,
        step_ms: i64,
        days_of_week: &[u32],
    ) -> Option<i64> {
        let lower = (after + 1).max(self.start_time);
        let first_day = DateTime::<Utc>::from_timestamp_millis(lower)?.date_naive();
        let window_start_tod = NaiveTime::from_num_seconds_from_midnight_opt(start_tod, 0)?;
        let window_end_tod = NaiveTime::from_num_seconds_from_midnight_opt(end_tod, 0)?;
        // eight days is enough to hit any allowed weekday
        for day_offset in 0..8u64 {
            let date = first_day.checked_add_days(Days::new(day_offset))?;
            if !days_of_week.is_empty()
                && !days_of_week.contains(&date.weekday().num_days_from_monday())
            {
                continue;
            }
            let window_start = date.and_time(window_start_tod).and_utc().timestamp_millis();
            let window_end = date.and_time(window_end_tod).and_utc().timestamp_millis();
            if lower > window_end {
                continue;
            }
            let candidate = if lower <= window_start {
                window_start
            } else {
                let diff = (lower - window_start) as u64;
                let steps = diff.div_ceil(step_ms as u64) as i64;
                window_start + steps * step_ms
            };
            if candidate <= window_end {
                return Some(candidate);
            }
        }
        None
    }

    /// Flatten into the field/value pairs of the trigger hash: common
    /// fields plus the type-specific ones of the schedule variant.
    pub fn to_hash(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("job_name".to_string(), self.job_key.name.clone()),
            ("job_group".to_string(), self.job_key.group.clone()),
            ("priority".to_string(), self.priority.to_string()),
            (
                "misfire_instruction".to_string(),
                self.misfire_instruction.to_string(),
            ),
            ("start_time".to_string(), self.start_time.to_string()),
            (
                "trigger_type".to_string(),
                self.schedule.type_name().to_string(),
            ),
        ];
        if let Some(v) = &self.description {
            fields.push(("description".to_string(), v.clone()));
        }
        if let Some(v) = &self.calendar_name {
            fields.push(("calendar_name".to_string(), v.clone()));
        }
        if let Some(v) = self.end_time {
            fields.push(("end_time".to_string(), v.to_string()));
        }
        if let Some(v) = self.next_fire_time {
            fields.push(("next_fire_time".to_string(), v.to_string()));
        }
        if let Some(v) = self.prev_fire_time {
            fields.push(("prev_fire_time".to_string(), v.to_string()));
        }
        match &self.schedule {
            TriggerSchedule::Cron {
                expression,
                time_zone,
            } => {
                fields.push(("cron_expression".to_string(), expression.clone()));
                if let Some(tz) = time_zone {
                    fields.push(("time_zone".to_string(), tz.clone()));
                }
            }
            TriggerSchedule::Simple {
                repeat_interval,
                repeat_count,
                times_triggered,
            } => {
                fields.push(("repeat_interval".to_string(), repeat_interval.to_string()));
                fields.push(("repeat_count".to_string(), repeat_count.to_string()));
                fields.push(("times_triggered".to_string(), times_triggered.to_string()));
            }
            TriggerSchedule::CalendarInterval { interval, unit } => {
                fields.push(("interval".to_string(), interval.to_string()));
                fields.push(("interval_unit".to_string(), unit.as_str().to_string()));
            }
            TriggerSchedule::DailyTimeInterval {
                start_time_of_day,
                end_time_of_day,
                interval,
                unit,
                days_of_week,
            } => {
                fields.push((
                    "start_time_of_day".to_string(),
                    start_time_of_day.to_string(),
                ));
                fields.push(("end_time_of_day".to_string(), end_time_of_day.to_string()));
                fields.push(("interval".to_string(), interval.to_string()));
                fields.push(("interval_unit".to_string(), unit.as_str().to_string()));
                fields.push((
                    "days_of_week".to_string(),
                    days_of_week
                        .iter()
                        .map(|d| d.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                ));
            }
        }
        fields
    }

    /// Rebuild from a trigger hash read back from Redis.
    pub fn from_hash(key: TriggerKey, hash: &HashMap<String, String>) -> Result<Self> {
        let job_name = require(&key, hash, "job_name")?;
        let job_group = require(&key, hash, "job_group")?;
        let trigger_type = require(&key, hash, "trigger_type")?;
        let schedule = match trigger_type.as_str() {
            "cron" => TriggerSchedule::Cron {
                expression: require(&key, hash, "cron_expression")?,
                time_zone: hash.get("time_zone").cloned(),
            },
            "simple" => TriggerSchedule::Simple {
                repeat_interval: parse(&key, hash, "repeat_interval")?,
                repeat_count: parse(&key, hash, "repeat_count")?,
                times_triggered: parse_or(&key, hash, "times_triggered", 0)?,
            },
            "calendar_interval" => TriggerSchedule::CalendarInterval {
                interval: parse(&key, hash, "interval")?,
                unit: require(&key, hash, "interval_unit")?.parse()?,
            },
            "daily_time_interval" => TriggerSchedule::DailyTimeInterval {
                start_time_of_day: parse(&key, hash, "start_time_of_day")?,
                end_time_of_day: parse(&key, hash, "end_time_of_day")?,
                interval: parse(&key, hash, "interval")?,
                unit: require(&key, hash, "interval_unit")?.parse()?,
                days_of_week: parse_days(&key, hash.get("days_of_week"))?,
            },
            other => {
                return Err(Error::Decode(format!(
                    "trigger {key} has unknown trigger_type: {other}"
                )));
            }
        };
        Ok(Self {
            job_key: JobKey::new(&job_name, &job_group),
            description: hash.get("description").cloned(),
            calendar_name: hash.get("calendar_name").cloned(),
            priority: parse_or(&key, hash, "priority", DEFAULT_PRIORITY)?,
            misfire_instruction: parse_or(
                &key,
                hash,
                "misfire_instruction",
                MISFIRE_INSTRUCTION_SMART_POLICY,
            )?,
            start_time: parse(&key, hash, "start_time")?,
            end_time: parse_opt(&key, hash, "end_time")?,
            next_fire_time: parse_opt(&key, hash, "next_fire_time")?,
            prev_fire_time: parse_opt(&key, hash, "prev_fire_time")?,
            schedule,
            key,
        })
    }
}

fn require(key: &TriggerKey, hash: &HashMap<String, String>, field: &str) -> Result<String> {
    hash.get(field)
        .cloned()
        .ok_or_else(|| Error::Decode(format!("trigger {key} hash has no {field} field")))
}

fn parse<T: FromStr>(key: &TriggerKey, hash: &HashMap<String, String>, field: &str) -> Result<T> {
    require(key, hash, field)?
        .parse::<T>()
        .map_err(|_| Error::Decode(format!("trigger {key} field {field} is not a number")))
}

fn parse_or<T: FromStr>(
    key: &TriggerKey,
    hash: &HashMap<String, String>,
    field: &str,
    default: T,
) -> Result<T> {
    match hash.get(field) {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|_| Error::Decode(format!("trigger {key} field {field} is not a number"))),
    }
}

fn parse_opt<T: FromStr>(
    key: &TriggerKey,
    hash: &HashMap<String, String>,
    field: &str,
) -> Result<Option<T>> {
    match hash.get(field) {
        None => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Decode(format!("trigger {key} field {field} is not a number"))),
    }
}

fn parse_days(key: &TriggerKey, raw: Option<&String>) -> Result<Vec<u32>> {
    match raw {
        None => Ok(Vec::new()),
        Some(v) if v.is_empty() => Ok(Vec::new()),
        Some(v) => v
            .split(',')
            .map(|d| {
                d.parse::<u32>().map_err(|_| {
                    Error::Decode(format!("trigger {key} field days_of_week is malformed: {v}"))
                })
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::calendar::Calendar;

    const HOUR: i64 = 3_600_000;

    fn simple_trigger(start: i64, interval: i64, count: i32) -> Trigger {
        Trigger::new(
            TriggerKey::new("t", "g"),
            JobKey::new("j", "g"),
            TriggerSchedule::simple(interval, count),
        )
        .with_start_time(start)
    }

    #[test]
    fn test_simple_fire_sequence() {
        let t = simple_trigger(10_000, 1_000, 3);
        assert_eq!(t.fire_time_after(0, None), Some(10_000));
        assert_eq!(t.fire_time_after(10_000, None), Some(11_000));
        assert_eq!(t.fire_time_after(11_500, None), Some(12_000));
        assert_eq!(t.fire_time_after(12_999, None), Some(13_000));
        // three repeats after the first fire, then done
        assert_eq!(t.fire_time_after(13_000, None), None);
    }

    #[test]
    fn test_simple_one_shot() {
        let t = simple_trigger(10_000, 0, 0);
        assert_eq!(t.fire_time_after(0, None), Some(10_000));
        assert_eq!(t.fire_time_after(10_000, None), None);
    }

    #[test]
    fn test_simple_indefinite_respects_end_time() {
        let t = simple_trigger(0, 1_000, REPEAT_INDEFINITELY).with_end_time(5_000);
        assert_eq!(t.fire_time_after(4_500, None), Some(5_000));
        assert_eq!(t.fire_time_after(5_000, None), None);
    }

    #[test]
    fn test_cron_fire_time() {
        // top of every hour
        let t = Trigger::new(
            TriggerKey::new("t", "g"),
            JobKey::new("j", "g"),
            TriggerSchedule::cron("0 0 * * * *"),
        )
        .with_start_time(0);
        // 2021-01-01T10:30:00Z
        let after = 1_609_497_000_000;
        let next = t.fire_time_after(after, None).unwrap();
        assert_eq!(next, 1_609_498_800_000); // 11:00:00Z
        // firing exactly on the hour yields the next hour
        assert_eq!(t.fire_time_after(next, None), Some(next + HOUR));
    }

    #[test]
    fn test_cron_respects_start_time() {
        let start = 1_609_498_800_000; // 2021-01-01T11:00:00Z
        let t = Trigger::new(
            TriggerKey::new("t", "g"),
            JobKey::new("j", "g"),
            TriggerSchedule::cron("0 0 * * * *"),
        )
        .with_start_time(start);
        // asking far before the start still lands on the start instant
        assert_eq!(t.fire_time_after(0, None), Some(start));
    }

    #[test]
    fn test_calendar_interval_months() {
        // 2021-01-15T00:00:00Z, every 2 months
        let start = 1_610_668_800_000;
        let t = Trigger::new(
            TriggerKey::new("t", "g"),
            JobKey::new("j", "g"),
            TriggerSchedule::CalendarInterval {
                interval: 2,
                unit: IntervalUnit::Month,
            },
        )
        .with_start_time(start);
        let next = t.fire_time_after(start, None).unwrap();
        let dt = DateTime::<Utc>::from_timestamp_millis(next).unwrap();
        assert_eq!(dt.to_rfc3339(), "2021-03-15T00:00:00+00:00");
    }

    #[test]
    fn test_daily_interval_window() {
        // every 30 minutes between 09:00 and 17:00 UTC, weekdays only
        let t = Trigger::new(
            TriggerKey::new("t", "g"),
            JobKey::new("j", "g"),
            TriggerSchedule::DailyTimeInterval {
                start_time_of_day: 9 * 3600,
                end_time_of_day: 17 * 3600,
                interval: 30,
                unit: IntervalUnit::Minute,
                days_of_week: vec![0, 1, 2, 3, 4],
            },
        )
        .with_start_time(0);
        // 2021-01-01 was a Friday; 18:00 is past the window, so the next
        // fire is Monday 09:00
        let friday_evening = 1_609_524_000_000; // 2021-01-01T18:00:00Z
        let next = t.fire_time_after(friday_evening, None).unwrap();
        let dt = DateTime::<Utc>::from_timestamp_millis(next).unwrap();
        assert_eq!(dt.to_rfc3339(), "2021-01-04T09:00:00+00:00");
        // mid-window fires align to the half hour
        let monday_0910 = next + 10 * 60_000;
        let dt = DateTime::<Utc>::from_timestamp_millis(
            t.fire_time_after(monday_0910, None).unwrap(),
        )
        .unwrap();
        assert_eq!(dt.to_rfc3339(), "2021-01-04T09:30:00+00:00");
    }

    #[test]
    fn test_triggered_advances_and_counts() {
        let mut t = simple_trigger(10_000, 1_000, REPEAT_INDEFINITELY);
        t.next_fire_time = Some(10_000);
        t.triggered(None);
        assert_eq!(t.prev_fire_time, Some(10_000));
        assert_eq!(t.next_fire_time, Some(11_000));
        match &t.schedule {
            TriggerSchedule::Simple {
                times_triggered, ..
            } => assert_eq!(*times_triggered, 1),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_misfire_never_moves_backward() {
        let now = 50_000;
        for instruction in [
            MISFIRE_INSTRUCTION_SMART_POLICY,
            MISFIRE_INSTRUCTION_FIRE_ONCE_NOW,
            MISFIRE_INSTRUCTION_NEXT_VALID,
        ] {
            let mut t = simple_trigger(10_000, 1_000, REPEAT_INDEFINITELY)
                .with_misfire_instruction(instruction);
            t.next_fire_time = Some(10_000);
            t.update_after_misfire(None, now);
            assert!(
                t.next_fire_time.unwrap() >= now,
                "instruction {instruction} moved the trigger backward"
            );
        }
    }

    #[test]
    fn test_misfire_ignore_policy_leaves_fire_time() {
        let mut t = simple_trigger(10_000, 1_000, REPEAT_INDEFINITELY)
            .with_misfire_instruction(MISFIRE_INSTRUCTION_IGNORE_POLICY);
        t.next_fire_time = Some(10_000);
        t.update_after_misfire(None, 50_000);
        assert_eq!(t.next_fire_time, Some(10_000));
    }

    #[test]
    fn test_misfire_exhausted_schedule_clears_fire_time() {
        let mut t =
            simple_trigger(10_000, 0, 0).with_misfire_instruction(MISFIRE_INSTRUCTION_NEXT_VALID);
        t.next_fire_time = Some(10_000);
        t.update_after_misfire(None, 50_000);
        assert_eq!(t.next_fire_time, None);
    }

    #[test]
    fn test_calendar_excludes_fire_times() {
        // hourly trigger, calendar blocking everything before noon UTC
        let t = Trigger::new(
            TriggerKey::new("t", "g"),
            JobKey::new("j", "g"),
            TriggerSchedule::cron("0 0 * * * *"),
        )
        .with_start_time(0);
        let cal = Calendar::Daily {
            description: None,
            range_start: 0,
            range_end: 12 * 3600,
        };
        // 2021-01-01T01:30:00Z; hours 02..12 are excluded
        let after = 1_609_464_600_000;
        let next = t.fire_time_after(after, Some(&cal)).unwrap();
        let dt = DateTime::<Utc>::from_timestamp_millis(next).unwrap();
        assert_eq!(dt.to_rfc3339(), "2021-01-01T13:00:00+00:00");
    }

    #[test]
    fn test_hash_roundtrip_all_schedule_types() {
        let schedules = vec![
            TriggerSchedule::Cron {
                expression: "0 0 12 * * *".to_string(),
                time_zone: Some("Europe/Stockholm".to_string()),
            },
            TriggerSchedule::simple(60_000, 10),
            TriggerSchedule::CalendarInterval {
                interval: 3,
                unit: IntervalUnit::Week,
            },
            TriggerSchedule::DailyTimeInterval {
                start_time_of_day: 8 * 3600,
                end_time_of_day: 18 * 3600,
                interval: 15,
                unit: IntervalUnit::Minute,
                days_of_week: vec![0, 2, 4],
            },
        ];
        for schedule in schedules {
            let trigger = Trigger::new(
                TriggerKey::new("t1", "reports"),
                JobKey::new("j1", "reports"),
                schedule,
            )
            .with_description("weekly report")
            .with_calendar("business-days")
            .with_priority(7)
            .with_start_time(1_700_000_000_000)
            .with_end_time(1_800_000_000_000)
            .with_next_fire_time(1_700_000_060_000);
            let hash: HashMap<String, String> = trigger.to_hash().into_iter().collect();
            let parsed = Trigger::from_hash(trigger.key.clone(), &hash).unwrap();
            assert_eq!(parsed, trigger);
        }
    }

    #[test]
    fn test_from_hash_rejects_unknown_type() {
        let mut hash = HashMap::new();
        hash.insert("job_name".to_string(), "j".to_string());
        hash.insert("job_group".to_string(), "g".to_string());
        hash.insert("trigger_type".to_string(), "quantum".to_string());
        hash.insert("start_time".to_string(), "0".to_string());
        let err = Trigger::from_hash(TriggerKey::new("t", "g"), &hash).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_validate_rejects_bad_cron() {
        let t = Trigger::new(
            TriggerKey::new("t", "g"),
            JobKey::new("j", "g"),
            TriggerSchedule::cron("not a cron line"),
        );
        assert!(matches!(
            t.validate(),
            Err(Error::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_recovery_trigger_shape() {
        let orphan = FiredTrigger {
            trigger_key: TriggerKey::new("t1", "g"),
            job_key: JobKey::new("j1", "g"),
            instance_id: "sched-b".to_string(),
            fired_at: 1_000,
            sched_time: Some(900),
            priority: 9,
            state: crate::meta::TriggerState::Executing,
            requests_recovery: true,
            disallow_concurrent: false,
        };
        let t = Trigger::recovery(&orphan, 42, 2_000);
        assert_eq!(t.key.group, RECOVERING_JOBS_GROUP);
        assert_eq!(t.key.name, "recover_sched-b_42");
        assert_eq!(t.job_key, orphan.job_key);
        assert_eq!(t.priority, 9);
        assert_eq!(t.next_fire_time, Some(2_000));
        assert_eq!(t.fire_time_after(2_000, None), None);
    }
}
