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

use crate::{
    config::JobStoreConfig,
    errors::{Error, Result},
    meta::{JobKey, TriggerKey, TriggerState},
};

/// Derives every Redis key the store touches from a prefix and a
/// delimiter. Pure: the same identities always produce the same keys, so
/// any two processes configured alike address the same cluster state.
///
/// The delimiter must not occur inside names, groups or calendar names;
/// [`KeySchema::validate_name`] enforces that at store time.
#[derive(Debug, Clone)]
pub struct KeySchema {
    prefix: String,
    delimiter: String,
}

impl KeySchema {
    pub fn new(config: &JobStoreConfig) -> Self {
        Self {
            prefix: config.key_prefix.clone(),
            delimiter: config.key_delimiter.clone(),
        }
    }

    fn join(&self, parts: &[&str]) -> String {
        let mut out = self.prefix.clone();
        for part in parts {
            out.push_str(&self.delimiter);
            out.push_str(part);
        }
        out
    }

    /// Reject identities that would corrupt the key encoding.
    pub fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::ConstraintViolation(
                "names and groups must be non-empty".to_string(),
            ));
        }
        if name.contains(&self.delimiter) {
            return Err(Error::ConstraintViolation(format!(
                "name {name:?} contains the key delimiter {:?}",
                self.delimiter
            )));
        }
        Ok(())
    }

    // ---- hashes and strings ----

    pub fn job_hash_key(&self, key: &JobKey) -> String {
        self.join(&["job", &key.group, &key.name])
    }

    pub fn job_data_map_key(&self, key: &JobKey) -> String {
        self.join(&["job_data_map", &key.group, &key.name])
    }

    pub fn trigger_hash_key(&self, key: &TriggerKey) -> String {
        self.join(&["trigger", &key.group, &key.name])
    }

    pub fn calendar_key(&self, name: &str) -> String {
        self.join(&["calendar", name])
    }

    // ---- per-group and global sets ----

    pub fn job_group_key(&self, group: &str) -> String {
        self.join(&["job_group", group])
    }

    pub fn trigger_group_key(&self, group: &str) -> String {
        self.join(&["trigger_group", group])
    }

    pub fn jobs_key(&self) -> String {
        self.join(&["jobs"])
    }

    pub fn triggers_key(&self) -> String {
        self.join(&["triggers"])
    }

    pub fn job_groups_key(&self) -> String {
        self.join(&["job_groups"])
    }

    pub fn trigger_groups_key(&self) -> String {
        self.join(&["trigger_groups"])
    }

    pub fn calendars_key(&self) -> String {
        self.join(&["calendars"])
    }

    pub fn paused_job_groups_key(&self) -> String {
        self.join(&["paused_job_groups"])
    }

    pub fn paused_trigger_groups_key(&self) -> String {
        self.join(&["paused_trigger_groups"])
    }

    pub fn blocked_jobs_key(&self) -> String {
        self.join(&["blocked_jobs"])
    }

    pub fn job_triggers_key(&self, key: &JobKey) -> String {
        self.join(&["job_triggers", &key.group, &key.name])
    }

    pub fn calendar_triggers_key(&self, name: &str) -> String {
        self.join(&["calendar_triggers", name])
    }

    // ---- state and lock ----

    pub fn trigger_state_key(&self, state: TriggerState) -> String {
        self.join(&["trigger_state", state.as_str()])
    }

    pub fn fired_triggers_key(&self) -> String {
        self.join(&["fired_triggers"])
    }

    pub fn instance_fired_key(&self, instance_id: &str) -> String {
        self.join(&["fired_triggers", instance_id])
    }

    pub fn lock_key(&self) -> String {
        self.join(&["lock"])
    }

    /// Every key the store may create, as a `SCAN` pattern.
    pub fn all_keys_pattern(&self) -> String {
        format!("{}{}*", self.prefix, self.delimiter)
    }

    // ---- member encodings ----

    pub fn encode_job_key(&self, key: &JobKey) -> String {
        format!("{}{}{}", key.group, self.delimiter, key.name)
    }

    pub fn encode_trigger_key(&self, key: &TriggerKey) -> String {
        format!("{}{}{}", key.group, self.delimiter, key.name)
    }

    pub fn parse_job_key(&self, raw: &str) -> Result<JobKey> {
        let (group, name) = self.split_member(raw)?;
        Ok(JobKey::new(name, group))
    }

    pub fn parse_trigger_key(&self, raw: &str) -> Result<TriggerKey> {
        let (group, name) = self.split_member(raw)?;
        Ok(TriggerKey::new(name, group))
    }

    fn split_member<'a>(&self, raw: &'a str) -> Result<(&'a str, &'a str)> {
        let parts: Vec<&str> = raw.split(&self.delimiter).collect();
        match parts.as_slice() {
            [group, name] if !group.is_empty() && !name.is_empty() => Ok((group, name)),
            _ => Err(Error::Decode(format!(
                "malformed key member: {raw:?} (expected group{}name)",
                self.delimiter
            ))),
        }
    }

    /// Member id of a fired-trigger record.
    pub fn fired_trigger_id(&self, key: &TriggerKey, instance_id: &str, fired_at: i64) -> String {
        format!(
            "{}|{instance_id}|{fired_at}",
            self.encode_trigger_key(key)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> KeySchema {
        KeySchema::new(&JobStoreConfig::default())
    }

    #[test]
    fn test_key_shapes() {
        let s = schema();
        let jk = JobKey::new("cleanup", "maintenance");
        let tk = TriggerKey::new("nightly", "maintenance");
        assert_eq!(s.job_hash_key(&jk), "quartz:job:maintenance:cleanup");
        assert_eq!(
            s.job_data_map_key(&jk),
            "quartz:job_data_map:maintenance:cleanup"
        );
        assert_eq!(s.trigger_hash_key(&tk), "quartz:trigger:maintenance:nightly");
        assert_eq!(s.calendar_key("holidays"), "quartz:calendar:holidays");
        assert_eq!(s.job_group_key("maintenance"), "quartz:job_group:maintenance");
        assert_eq!(s.jobs_key(), "quartz:jobs");
        assert_eq!(s.blocked_jobs_key(), "quartz:blocked_jobs");
        assert_eq!(
            s.job_triggers_key(&jk),
            "quartz:job_triggers:maintenance:cleanup"
        );
        assert_eq!(
            s.calendar_triggers_key("holidays"),
            "quartz:calendar_triggers:holidays"
        );
        assert_eq!(
            s.trigger_state_key(TriggerState::Waiting),
            "quartz:trigger_state:waiting"
        );
        assert_eq!(s.fired_triggers_key(), "quartz:fired_triggers");
        assert_eq!(
            s.instance_fired_key("sched-a"),
            "quartz:fired_triggers:sched-a"
        );
        assert_eq!(s.lock_key(), "quartz:lock");
        assert_eq!(s.all_keys_pattern(), "quartz:*");
    }

    #[test]
    fn test_member_roundtrip() {
        let s = schema();
        let tk = TriggerKey::new("nightly", "maintenance");
        let member = s.encode_trigger_key(&tk);
        assert_eq!(member, "maintenance:nightly");
        assert_eq!(s.parse_trigger_key(&member).unwrap(), tk);

        let jk = JobKey::new("cleanup", "maintenance");
        assert_eq!(s.parse_job_key(&s.encode_job_key(&jk)).unwrap(), jk);
    }

    #[test]
    fn test_custom_prefix_and_delimiter() {
        let cfg = JobStoreConfig::default()
            .with_key_prefix("sched")
            .with_key_delimiter("/");
        let s = KeySchema::new(&cfg);
        assert_eq!(
            s.trigger_hash_key(&TriggerKey::new("t", "g")),
            "sched/trigger/g/t"
        );
        assert_eq!(s.parse_job_key("g/j").unwrap(), JobKey::new("j", "g"));
    }

    #[test]
    fn test_malformed_members_rejected() {
        let s = schema();
        assert!(matches!(s.parse_job_key("nodelim"), Err(Error::Decode(_))));
        assert!(matches!(s.parse_job_key("a:b:c"), Err(Error::Decode(_))));
        assert!(matches!(s.parse_job_key(":name"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_validate_name() {
        let s = schema();
        assert!(s.validate_name("cleanup").is_ok());
        assert!(matches!(
            s.validate_name("clean:up"),
            Err(Error::ConstraintViolation(_))
        ));
        assert!(matches!(
            s.validate_name(""),
            Err(Error::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_fired_trigger_id() {
        let s = schema();
        let id = s.fired_trigger_id(&TriggerKey::new("t1", "g"), "sched-a", 1_700_000_000_000);
        assert_eq!(id, "g:t1|sched-a|1700000000000");
    }
}
