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

use serde::{Deserialize, Serialize};

pub mod calendar;
pub mod job;
pub mod trigger;

pub use calendar::Calendar;
pub use job::{JobDataMap, JobDetail};
pub use trigger::{Trigger, TriggerSchedule};

/// Group every job or trigger lands in when none is given.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Group that synthetic recovery triggers are created in.
pub const RECOVERING_JOBS_GROUP: &str = "RECOVERING_JOBS";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub group: String,
    pub name: String,
}

impl JobKey {
    pub fn new(name: &str, group: &str) -> Self {
        Self {
            name: name.to_string(),
            group: group.to_string(),
        }
    }

    pub fn with_default_group(name: &str) -> Self {
        Self::new(name, DEFAULT_GROUP)
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub group: String,
    pub name: String,
}

impl TriggerKey {
    pub fn new(name: &str, group: &str) -> Self {
        Self {
            name: name.to_string(),
            group: group.to_string(),
        }
    }

    pub fn with_default_group(name: &str) -> Self {
        Self::new(name, DEFAULT_GROUP)
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// The lifecycle states of a stored trigger. Each state is backed by its
/// own sorted set, scored by next fire time; a trigger is a member of
/// exactly one of them at any point between operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    #[default]
    Waiting,
    Paused,
    Acquired,
    Executing,
    Completed,
    Blocked,
    PausedBlocked,
    Error,
}

impl TriggerState {
    pub const ALL: [TriggerState; 8] = [
        TriggerState::Waiting,
        TriggerState::Paused,
        TriggerState::Acquired,
        TriggerState::Executing,
        TriggerState::Completed,
        TriggerState::Blocked,
        TriggerState::PausedBlocked,
        TriggerState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerState::Waiting => "waiting",
            TriggerState::Paused => "paused",
            TriggerState::Acquired => "acquired",
            TriggerState::Executing => "executing",
            TriggerState::Completed => "completed",
            TriggerState::Blocked => "blocked",
            TriggerState::PausedBlocked => "paused_blocked",
            TriggerState::Error => "error",
        }
    }
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Predicate over a group name, used by the bulk key-listing and
/// pause/resume operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum GroupMatcher {
    Equals(String),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    Everything,
}

impl GroupMatcher {
    pub fn matches(&self, group: &str) -> bool {
        match self {
            GroupMatcher::Equals(v) => group == v,
            GroupMatcher::StartsWith(v) => group.starts_with(v.as_str()),
            GroupMatcher::EndsWith(v) => group.ends_with(v.as_str()),
            GroupMatcher::Contains(v) => group.contains(v.as_str()),
            GroupMatcher::Everything => true,
        }
    }

    /// The exact group this matcher names, when it is an equality match.
    /// Equality matchers apply to the named group even if it has no
    /// members yet.
    pub fn exact_group(&self) -> Option<&str> {
        match self {
            GroupMatcher::Equals(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Instruction the scheduler hands back when a job execution finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletedInstruction {
    NoInstruction,
    DeleteTrigger,
    SetTriggerComplete,
    SetTriggerError,
    SetAllJobTriggersComplete,
    SetAllJobTriggersError,
}

/// Transient record of a trigger held by a scheduler instance in the
/// acquired or executing state. The record carries everything orphan
/// recovery needs so a crashed instance's triggers can be recovered
/// without reading the job hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredTrigger {
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    pub instance_id: String,
    /// Acquisition timestamp in ms since epoch; the orphan threshold is
    /// measured from here.
    pub fired_at: i64,
    /// Snapshot of the trigger's next fire time at acquisition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sched_time: Option<i64>,
    pub priority: i32,
    pub state: TriggerState,
    #[serde(default)]
    pub requests_recovery: bool,
    #[serde(default)]
    pub disallow_concurrent: bool,
}

/// What `triggers_fired` returns per trigger: the updated trigger, a
/// snapshot of its job, the resolved calendar and the scheduled time of
/// the fire that just happened.
#[derive(Debug, Clone)]
pub struct TriggerFiredResult {
    pub trigger: Trigger,
    pub job: JobDetail,
    pub calendar: Option<Calendar>,
    /// The fire time this result corresponds to.
    pub fire_time: i64,
    pub next_fire_time: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = JobKey::new("cleanup", "maintenance");
        assert_eq!(key.to_string(), "maintenance.cleanup");
        let key = TriggerKey::with_default_group("hourly");
        assert_eq!(key.to_string(), "DEFAULT.hourly");
    }

    #[test]
    fn test_key_ordering_is_group_then_name() {
        let mut keys = vec![
            TriggerKey::new("b", "g2"),
            TriggerKey::new("a", "g2"),
            TriggerKey::new("z", "g1"),
        ];
        keys.sort();
        assert_eq!(keys[0], TriggerKey::new("z", "g1"));
        assert_eq!(keys[1], TriggerKey::new("a", "g2"));
    }

    #[test]
    fn test_group_matcher() {
        assert!(GroupMatcher::Equals("jobs".into()).matches("jobs"));
        assert!(!GroupMatcher::Equals("jobs".into()).matches("jobs2"));
        assert!(GroupMatcher::StartsWith("bill".into()).matches("billing"));
        assert!(GroupMatcher::EndsWith("ing".into()).matches("billing"));
        assert!(GroupMatcher::Contains("ll".into()).matches("billing"));
        assert!(GroupMatcher::Everything.matches("anything at all"));
        assert_eq!(
            GroupMatcher::Equals("jobs".into()).exact_group(),
            Some("jobs")
        );
        assert_eq!(GroupMatcher::Everything.exact_group(), None);
    }

    #[test]
    fn test_trigger_state_names_are_distinct() {
        let mut names = TriggerState::ALL
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), TriggerState::ALL.len());
    }

    #[test]
    fn test_fired_trigger_roundtrip() {
        let fired = FiredTrigger {
            trigger_key: TriggerKey::new("t1", "g"),
            job_key: JobKey::new("j1", "g"),
            instance_id: "sched-a".to_string(),
            fired_at: 1_700_000_000_000,
            sched_time: Some(1_700_000_001_000),
            priority: 5,
            state: TriggerState::Acquired,
            requests_recovery: true,
            disallow_concurrent: false,
        };
        let raw = serde_json::to_vec(&fired).unwrap();
        let parsed: FiredTrigger = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, fired);
    }
}
