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

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use redis::aio::ConnectionManager;

use crate::{
    config::JobStoreConfig,
    errors::{Error, Result},
    jobstore::SchedulerSignaler,
    meta::{Calendar, GroupMatcher, JobDetail, JobKey, Trigger, TriggerKey, TriggerState},
    schema::KeySchema,
    serializer::Serializer,
};

mod exec;
mod pause;

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Score used in the state sorted sets for triggers with no next fire
/// time (terminal triggers awaiting removal).
const NO_FIRE_SCORE: i64 = -1;

/// The storage core: every CRUD operation, state transition, acquisition
/// and recovery step, straight against Redis. Stateless between calls
/// apart from the shared connection multiplexer; callers (the facade)
/// hold the distributed mutex around each call.
pub struct Storage {
    conn: ConnectionManager,
    schema: KeySchema,
    serializer: Arc<dyn Serializer>,
    signaler: Arc<dyn SchedulerSignaler>,
    config: JobStoreConfig,
}

impl Storage {
    pub fn new(
        conn: ConnectionManager,
        config: JobStoreConfig,
        serializer: Arc<dyn Serializer>,
        signaler: Arc<dyn SchedulerSignaler>,
    ) -> Self {
        Self {
            conn,
            schema: KeySchema::new(&config),
            serializer,
            signaler,
            config,
        }
    }

    pub fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    // ---- small shared primitives ----

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        Ok(redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await?)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn();
        Ok(redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?)
    }

    async fn scard(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn();
        Ok(redis::cmd("SCARD").arg(key).query_async(&mut conn).await?)
    }

    pub(crate) async fn load_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        let hash = self.hgetall(&self.schema.job_hash_key(key)).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        let mut job = JobDetail::from_hash(key.clone(), &hash)?;
        job.data = self.hgetall(&self.schema.job_data_map_key(key)).await?;
        Ok(Some(job))
    }

    pub(crate) async fn load_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>> {
        let hash = self.hgetall(&self.schema.trigger_hash_key(key)).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        Ok(Some(Trigger::from_hash(key.clone(), &hash)?))
    }

    /// The one state set the trigger is currently a member of.
    pub(crate) async fn find_trigger_state(
        &self,
        key: &TriggerKey,
    ) -> Result<Option<TriggerState>> {
        let member = self.schema.encode_trigger_key(key);
        let mut conn = self.conn();
        for state in TriggerState::ALL {
            let score: Option<f64> = redis::cmd("ZSCORE")
                .arg(self.schema.trigger_state_key(state))
                .arg(&member)
                .query_async(&mut conn)
                .await?;
            if score.is_some() {
                return Ok(Some(state));
            }
        }
        Ok(None)
    }

    /// Place the trigger in exactly one state set, removing it from every
    /// other.
    pub(crate) async fn set_trigger_state(
        &self,
        key: &TriggerKey,
        state: TriggerState,
        score: Option<i64>,
    ) -> Result<()> {
        let member = self.schema.encode_trigger_key(key);
        let score = score.unwrap_or(NO_FIRE_SCORE);
        let mut pipe = redis::pipe();
        for other in TriggerState::ALL {
            if other == state {
                pipe.cmd("ZADD")
                    .arg(self.schema.trigger_state_key(other))
                    .arg(score)
                    .arg(&member)
                    .ignore();
            } else {
                pipe.cmd("ZREM")
                    .arg(self.schema.trigger_state_key(other))
                    .arg(&member)
                    .ignore();
            }
        }
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    pub(crate) async fn remove_from_all_state_sets(&self, key: &TriggerKey) -> Result<()> {
        let member = self.schema.encode_trigger_key(key);
        let mut pipe = redis::pipe();
        for state in TriggerState::ALL {
            pipe.cmd("ZREM")
                .arg(self.schema.trigger_state_key(state))
                .arg(&member)
                .ignore();
        }
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    // ---- jobs ----

    pub async fn store_job(&self, job: &JobDetail, replace: bool) -> Result<()> {
        self.schema.validate_name(&job.key.group)?;
        self.schema.validate_name(&job.key.name)?;
        let hash_key = self.schema.job_hash_key(&job.key);
        if !replace && self.exists(&hash_key).await? {
            return Err(Error::ObjectAlreadyExists(job.key.to_string()));
        }
        let data_key = self.schema.job_data_map_key(&job.key);
        let mut pipe = redis::pipe();
        pipe.cmd("DEL").arg(&hash_key).ignore();
        pipe.cmd("HSET").arg(&hash_key).arg(job.to_hash()).ignore();
        pipe.cmd("DEL").arg(&data_key).ignore();
        if !job.data.is_empty() {
            let entries: Vec<(String, String)> = job
                .data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            pipe.cmd("HSET").arg(&data_key).arg(entries).ignore();
        }
        pipe.cmd("SADD")
            .arg(self.schema.jobs_key())
            .arg(self.schema.encode_job_key(&job.key))
            .ignore();
        pipe.cmd("SADD")
            .arg(self.schema.job_groups_key())
            .arg(&job.key.group)
            .ignore();
        pipe.cmd("SADD")
            .arg(self.schema.job_group_key(&job.key.group))
            .arg(&job.key.name)
            .ignore();
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        self.load_job(key).await
    }

    /// Remove the job and every trigger pointing at it. Returns whether
    /// the job existed.
    pub async fn remove_job(&self, key: &JobKey) -> Result<bool> {
        let hash_key = self.schema.job_hash_key(key);
        let existed = self.exists(&hash_key).await?;
        for member in self.smembers(&self.schema.job_triggers_key(key)).await? {
            let trigger_key = self.schema.parse_trigger_key(&member)?;
            self.remove_trigger_core(&trigger_key, false).await?;
        }
        let member = self.schema.encode_job_key(key);
        let mut pipe = redis::pipe();
        pipe.cmd("DEL").arg(&hash_key).ignore();
        pipe.cmd("DEL")
            .arg(self.schema.job_data_map_key(key))
            .ignore();
        pipe.cmd("DEL")
            .arg(self.schema.job_triggers_key(key))
            .ignore();
        pipe.cmd("SREM").arg(self.schema.jobs_key()).arg(&member).ignore();
        pipe.cmd("SREM")
            .arg(self.schema.job_group_key(&key.group))
            .arg(&key.name)
            .ignore();
        pipe.cmd("SREM")
            .arg(self.schema.blocked_jobs_key())
            .arg(&member)
            .ignore();
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        if self.scard(&self.schema.job_group_key(&key.group)).await? == 0 {
            let mut conn = self.conn();
            let _: () = redis::cmd("SREM")
                .arg(self.schema.job_groups_key())
                .arg(&key.group)
                .query_async(&mut conn)
                .await?;
        }
        Ok(existed)
    }

    // ---- triggers ----

    pub async fn store_trigger(&self, trigger: &Trigger, replace: bool) -> Result<()> {
        self.schema.validate_name(&trigger.key.group)?;
        self.schema.validate_name(&trigger.key.name)?;
        trigger.validate()?;
        let hash_key = self.schema.trigger_hash_key(&trigger.key);
        let old_hash = self.hgetall(&hash_key).await?;
        if !replace && !old_hash.is_empty() {
            return Err(Error::ObjectAlreadyExists(trigger.key.to_string()));
        }
        if self.load_job(&trigger.job_key).await?.is_none() {
            return Err(Error::ObjectNotFound(format!(
                "trigger {} references missing job {}",
                trigger.key, trigger.job_key
            )));
        }
        let calendar = match &trigger.calendar_name {
            Some(name) => match self.retrieve_calendar(name).await? {
                Some(cal) => Some(cal),
                None => {
                    return Err(Error::ObjectNotFound(format!(
                        "trigger {} references missing calendar {name}",
                        trigger.key
                    )));
                }
            },
            None => None,
        };

        let mut trigger = trigger.clone();
        if trigger.next_fire_time.is_none() {
            // first-time store without a precomputed fire time
            trigger.next_fire_time =
                trigger.fire_time_after(now_millis() - 1, calendar.as_ref());
        }

        let member = self.schema.encode_trigger_key(&trigger.key);
        let mut pipe = redis::pipe();
        pipe.cmd("DEL").arg(&hash_key).ignore();
        pipe.cmd("HSET").arg(&hash_key).arg(trigger.to_hash()).ignore();
        pipe.cmd("SADD")
            .arg(self.schema.triggers_key())
            .arg(&member)
            .ignore();
        pipe.cmd("SADD")
            .arg(self.schema.trigger_groups_key())
            .arg(&trigger.key.group)
            .ignore();
        pipe.cmd("SADD")
            .arg(self.schema.trigger_group_key(&trigger.key.group))
            .arg(&trigger.key.name)
            .ignore();
        pipe.cmd("SADD")
            .arg(self.schema.job_triggers_key(&trigger.job_key))
            .arg(&member)
            .ignore();
        if let Some(name) = &trigger.calendar_name {
            pipe.cmd("SADD")
                .arg(self.schema.calendar_triggers_key(name))
                .arg(&member)
                .ignore();
        }
        // a replace may have moved the trigger to another job or calendar
        if let Some(old_cal) = old_hash.get("calendar_name")
            && Some(old_cal) != trigger.calendar_name.as_ref()
        {
            pipe.cmd("SREM")
                .arg(self.schema.calendar_triggers_key(old_cal))
                .arg(&member)
                .ignore();
        }
        if let (Some(old_name), Some(old_group)) =
            (old_hash.get("job_name"), old_hash.get("job_group"))
        {
            let old_job = JobKey::new(old_name, old_group);
            if old_job != trigger.job_key {
                pipe.cmd("SREM")
                    .arg(self.schema.job_triggers_key(&old_job))
                    .arg(&member)
                    .ignore();
            }
        }
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;

        // triggers landing in a paused group start out paused
        let paused = self
            .sismember(
                &self.schema.paused_trigger_groups_key(),
                &trigger.key.group,
            )
            .await?
            || self
                .sismember(&self.schema.paused_job_groups_key(), &trigger.job_key.group)
                .await?;
        let blocked = self
            .sismember(
                &self.schema.blocked_jobs_key(),
                &self.schema.encode_job_key(&trigger.job_key),
            )
            .await?;
        let state = match (paused, blocked) {
            (true, true) => TriggerState::PausedBlocked,
            (true, false) => TriggerState::Paused,
            (false, true) => TriggerState::Blocked,
            (false, false) => TriggerState::Waiting,
        };
        self.set_trigger_state(&trigger.key, state, trigger.next_fire_time)
            .await
    }

    pub async fn retrieve_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>> {
        self.load_trigger(key).await
    }

    pub async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool> {
        self.remove_trigger_core(key, true).await
    }

    /// Remove one trigger from the hash, every index and every state set.
    /// With `remove_orphaned_job`, a non-durable job losing its last
    /// trigger goes too.
    async fn remove_trigger_core(
        &self,
        key: &TriggerKey,
        remove_orphaned_job: bool,
    ) -> Result<bool> {
        let hash = self.hgetall(&self.schema.trigger_hash_key(key)).await?;
        if hash.is_empty() {
            return Ok(false);
        }
        // raw field reads: removal must work even when the hash no longer
        // decodes
        let job_key = match (hash.get("job_name"), hash.get("job_group")) {
            (Some(name), Some(group)) => Some(JobKey::new(name, group)),
            _ => None,
        };
        let member = self.schema.encode_trigger_key(key);
        let mut pipe = redis::pipe();
        pipe.cmd("DEL")
            .arg(self.schema.trigger_hash_key(key))
            .ignore();
        pipe.cmd("SREM")
            .arg(self.schema.triggers_key())
            .arg(&member)
            .ignore();
        pipe.cmd("SREM")
            .arg(self.schema.trigger_group_key(&key.group))
            .arg(&key.name)
            .ignore();
        if let Some(job_key) = &job_key {
            pipe.cmd("SREM")
                .arg(self.schema.job_triggers_key(job_key))
                .arg(&member)
                .ignore();
        }
        if let Some(calendar) = hash.get("calendar_name") {
            pipe.cmd("SREM")
                .arg(self.schema.calendar_triggers_key(calendar))
                .arg(&member)
                .ignore();
        }
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        self.remove_from_all_state_sets(key).await?;

        if self.scard(&self.schema.trigger_group_key(&key.group)).await? == 0 {
            let mut conn = self.conn();
            let _: () = redis::cmd("SREM")
                .arg(self.schema.trigger_groups_key())
                .arg(&key.group)
                .query_async(&mut conn)
                .await?;
        }

        if remove_orphaned_job
            && let Some(job_key) = job_key
            && self.scard(&self.schema.job_triggers_key(&job_key)).await? == 0
            && let Some(job) = self.load_job(&job_key).await?
            && !job.durable
        {
            Box::pin(self.remove_job(&job_key)).await?;
        }
        Ok(true)
    }

    /// Swap a trigger for a new one against the same job, keeping the
    /// job even when non-durable. Returns whether the old trigger
    /// existed.
    pub async fn replace_trigger(&self, key: &TriggerKey, new_trigger: &Trigger) -> Result<bool> {
        let Some(old) = self.load_trigger(key).await? else {
            return Ok(false);
        };
        if old.job_key != new_trigger.job_key {
            return Err(Error::ConstraintViolation(format!(
                "new trigger {} must reference job {}, not {}",
                new_trigger.key, old.job_key, new_trigger.job_key
            )));
        }
        self.remove_trigger_core(key, false).await?;
        self.store_trigger(new_trigger, false).await?;
        Ok(true)
    }

    pub async fn triggers_for_job(&self, key: &JobKey) -> Result<Vec<Trigger>> {
        let mut triggers = Vec::new();
        for member in self.smembers(&self.schema.job_triggers_key(key)).await? {
            let trigger_key = self.schema.parse_trigger_key(&member)?;
            if let Some(trigger) = self.load_trigger(&trigger_key).await? {
                triggers.push(trigger);
            }
        }
        triggers.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(triggers)
    }

    // ---- calendars ----

    pub async fn store_calendar(
        &self,
        name: &str,
        calendar: &Calendar,
        replace: bool,
        update_triggers: bool,
    ) -> Result<()> {
        self.schema.validate_name(name)?;
        let key = self.schema.calendar_key(name);
        let existed = self.exists(&key).await?;
        if existed && !replace {
            return Err(Error::ObjectAlreadyExists(format!("calendar {name}")));
        }
        let payload = self.serializer.encode_calendar(calendar)?;
        let mut conn = self.conn();
        let _: () = redis::pipe()
            .cmd("SET")
            .arg(&key)
            .arg(payload.as_ref())
            .ignore()
            .cmd("SADD")
            .arg(self.schema.calendars_key())
            .arg(name)
            .ignore()
            .query_async(&mut conn)
            .await?;

        if existed && update_triggers {
            // re-anchor every referencing trigger on the new calendar
            for member in self
                .smembers(&self.schema.calendar_triggers_key(name))
                .await?
            {
                let trigger_key = self.schema.parse_trigger_key(&member)?;
                let Some(mut trigger) = self.load_trigger(&trigger_key).await? else {
                    continue;
                };
                trigger.update_with_new_calendar(calendar, self.config.misfire_threshold_ms());
                self.update_trigger_hash(&trigger).await?;
                if let Some(state) = self.find_trigger_state(&trigger_key).await? {
                    self.set_trigger_state(&trigger_key, state, trigger.next_fire_time)
                        .await?;
                }
            }
        }
        Ok(())
    }

    pub async fn retrieve_calendar(&self, name: &str) -> Result<Option<Calendar>> {
        let mut conn = self.conn();
        let raw: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.schema.calendar_key(name))
            .query_async(&mut conn)
            .await?;
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(self.serializer.decode_calendar(&raw)?)),
        }
    }

    /// Returns whether the calendar existed. Removing a calendar that is
    /// still referenced by any trigger is a constraint violation.
    pub async fn remove_calendar(&self, name: &str) -> Result<bool> {
        if self.scard(&self.schema.calendar_triggers_key(name)).await? > 0 {
            return Err(Error::ConstraintViolation(format!(
                "calendar {name} is still referenced by triggers"
            )));
        }
        let key = self.schema.calendar_key(name);
        let existed = self.exists(&key).await?;
        let mut conn = self.conn();
        let _: () = redis::pipe()
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .cmd("DEL")
            .arg(self.schema.calendar_triggers_key(name))
            .ignore()
            .cmd("SREM")
            .arg(self.schema.calendars_key())
            .arg(name)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(existed)
    }

    /// Rewrite a trigger hash in place (indices untouched).
    pub(crate) async fn update_trigger_hash(&self, trigger: &Trigger) -> Result<()> {
        let hash_key = self.schema.trigger_hash_key(&trigger.key);
        let mut conn = self.conn();
        let _: () = redis::pipe()
            .cmd("DEL")
            .arg(&hash_key)
            .ignore()
            .cmd("HSET")
            .arg(&hash_key)
            .arg(trigger.to_hash())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    // ---- existence, counts, enumeration ----

    pub async fn job_exists(&self, key: &JobKey) -> Result<bool> {
        self.exists(&self.schema.job_hash_key(key)).await
    }

    pub async fn trigger_exists(&self, key: &TriggerKey) -> Result<bool> {
        self.exists(&self.schema.trigger_hash_key(key)).await
    }

    pub async fn calendar_exists(&self, name: &str) -> Result<bool> {
        self.exists(&self.schema.calendar_key(name)).await
    }

    pub async fn number_of_jobs(&self) -> Result<usize> {
        self.scard(&self.schema.jobs_key()).await
    }

    pub async fn number_of_triggers(&self) -> Result<usize> {
        self.scard(&self.schema.triggers_key()).await
    }

    pub async fn number_of_calendars(&self) -> Result<usize> {
        self.scard(&self.schema.calendars_key()).await
    }

    pub async fn job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>> {
        let mut keys = Vec::new();
        for group in self.matching_groups(&self.schema.job_groups_key(), matcher).await? {
            for name in self.smembers(&self.schema.job_group_key(&group)).await? {
                keys.push(JobKey::new(&name, &group));
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub async fn trigger_keys(&self, matcher: &GroupMatcher) -> Result<Vec<TriggerKey>> {
        let mut keys = Vec::new();
        for group in self
            .matching_groups(&self.schema.trigger_groups_key(), matcher)
            .await?
        {
            for name in self.smembers(&self.schema.trigger_group_key(&group)).await? {
                keys.push(TriggerKey::new(&name, &group));
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub(crate) async fn matching_groups(
        &self,
        groups_key: &str,
        matcher: &GroupMatcher,
    ) -> Result<Vec<String>> {
        let mut groups: Vec<String> = self
            .smembers(groups_key)
            .await?
            .into_iter()
            .filter(|g| matcher.matches(g))
            .collect();
        groups.sort();
        Ok(groups)
    }

    pub async fn job_group_names(&self) -> Result<Vec<String>> {
        let mut groups = self.smembers(&self.schema.job_groups_key()).await?;
        groups.sort();
        Ok(groups)
    }

    pub async fn trigger_group_names(&self) -> Result<Vec<String>> {
        let mut groups = self.smembers(&self.schema.trigger_groups_key()).await?;
        groups.sort();
        Ok(groups)
    }

    pub async fn calendar_names(&self) -> Result<Vec<String>> {
        let mut names = self.smembers(&self.schema.calendars_key()).await?;
        names.sort();
        Ok(names)
    }

    pub async fn get_trigger_state(&self, key: &TriggerKey) -> Result<Option<TriggerState>> {
        self.find_trigger_state(key).await
    }

    /// Move a trigger out of the error state, back to waiting (or paused
    /// when its group is). No-op when the trigger is not in error or its
    /// record is gone.
    pub async fn reset_trigger_from_error_state(&self, key: &TriggerKey) -> Result<()> {
        if self.find_trigger_state(key).await? != Some(TriggerState::Error) {
            return Ok(());
        }
        let Some(trigger) = self.load_trigger(key).await? else {
            self.remove_from_all_state_sets(key).await?;
            return Ok(());
        };
        let paused = self
            .sismember(&self.schema.paused_trigger_groups_key(), &key.group)
            .await?;
        let state = if paused {
            TriggerState::Paused
        } else {
            TriggerState::Waiting
        };
        self.set_trigger_state(key, state, trigger.next_fire_time)
            .await?;
        self.signaler.signal_scheduling_change(trigger.next_fire_time).await;
        Ok(())
    }

    /// Drop every key under the configured prefix. Cursor scan, not
    /// FLUSHDB: the database may be shared with other tenants.
    pub async fn clear_all_scheduling_data(&self) -> Result<()> {
        let pattern = self.schema.all_keys_pattern();
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let _: () = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(())
    }
}
