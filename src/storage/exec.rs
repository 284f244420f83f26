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

use std::sync::atomic::{AtomicU64, Ordering};

use super::{Storage, now_millis};
use crate::{
    errors::{Error, Result},
    meta::{
        CompletedInstruction, FiredTrigger, JobDetail, JobKey, Trigger, TriggerFiredResult,
        TriggerKey, TriggerState,
        trigger::MISFIRE_INSTRUCTION_IGNORE_POLICY,
    },
};

static RECOVERY_SEQ: AtomicU64 = AtomicU64::new(0);

impl Storage {
    /// Reserve up to `max_count` due triggers for this instance.
    ///
    /// Steps:
    /// - recover triggers orphaned by dead instances
    /// - collect waiting triggers with next fire time up to
    ///   `max(no_later_than, now + time_window)`
    /// - quarantine undecodable ones, skip jobs blocked by a concurrent
    ///   execution, settle misfires
    /// - move the rest from waiting to acquired and record a fired-trigger
    ///   entry per acquisition
    ///
    /// Results are ordered by (next fire time, priority desc, key).
    pub async fn acquire_next_triggers(
        &self,
        no_later_than: i64,
        max_count: usize,
        time_window: i64,
    ) -> Result<Vec<Trigger>> {
        self.recover_orphaned_triggers().await?;

        let now = now_millis();
        let max_ts = no_later_than.max(now + time_window);
        let waiting_key = self.schema().trigger_state_key(TriggerState::Waiting);
        let mut conn = self.conn();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&waiting_key)
            .arg(0)
            .arg(max_ts)
            .query_async(&mut conn)
            .await?;

        let mut candidates = Vec::with_capacity(members.len());
        for member in members {
            let trigger_key = match self.schema().parse_trigger_key(&member) {
                Ok(key) => key,
                Err(e) => {
                    log::error!("[JOBSTORE] dropping malformed waiting entry {member}: {e}");
                    let _: () = redis::cmd("ZREM")
                        .arg(&waiting_key)
                        .arg(&member)
                        .query_async(&mut conn)
                        .await?;
                    continue;
                }
            };
            match self.load_trigger(&trigger_key).await {
                Ok(Some(trigger)) => candidates.push(trigger),
                Ok(None) => {
                    // index entry outlived its hash
                    let _: () = redis::cmd("ZREM")
                        .arg(&waiting_key)
                        .arg(&member)
                        .query_async(&mut conn)
                        .await?;
                }
                Err(Error::Decode(e)) => {
                    log::error!(
                        "[JOBSTORE] trigger {trigger_key} no longer decodes, moving to error \
                         state: {e}"
                    );
                    self.set_trigger_state(&trigger_key, TriggerState::Error, None)
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }
        sort_for_acquisition(&mut candidates);

        let blocked_key = self.schema().blocked_jobs_key();
        let mut acquired = Vec::new();
        // one trigger per disallow-concurrent job per batch
        let mut batch_concurrent_jobs = std::collections::HashSet::new();
        for mut trigger in candidates {
            if acquired.len() >= max_count {
                break;
            }
            let job_member = self.schema().encode_job_key(&trigger.job_key);
            let is_blocked: bool = redis::cmd("SISMEMBER")
                .arg(&blocked_key)
                .arg(&job_member)
                .query_async(&mut conn)
                .await?;
            if is_blocked {
                continue;
            }
            if self.apply_misfire(&mut trigger).await? {
                self.update_trigger_hash(&trigger).await?;
                match trigger.next_fire_time {
                    None => {
                        self.set_trigger_state(&trigger.key, TriggerState::Completed, None)
                            .await?;
                        continue;
                    }
                    Some(next) => {
                        self.set_trigger_state(&trigger.key, TriggerState::Waiting, Some(next))
                            .await?;
                        if next > max_ts {
                            continue;
                        }
                    }
                }
            }
            let Some(next) = trigger.next_fire_time else {
                self.set_trigger_state(&trigger.key, TriggerState::Completed, None)
                    .await?;
                continue;
            };
            let job = match self.load_job(&trigger.job_key).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    log::error!(
                        "[JOBSTORE] trigger {} references missing job {}, moving to error state",
                        trigger.key,
                        trigger.job_key
                    );
                    self.set_trigger_state(&trigger.key, TriggerState::Error, Some(next))
                        .await?;
                    continue;
                }
                Err(Error::Decode(e)) => {
                    log::error!(
                        "[JOBSTORE] job {} of trigger {} no longer decodes, moving trigger to \
                         error state: {e}",
                        trigger.job_key,
                        trigger.key
                    );
                    self.set_trigger_state(&trigger.key, TriggerState::Error, Some(next))
                        .await?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if job.disallow_concurrent && !batch_concurrent_jobs.insert(job.key.clone()) {
                continue;
            }
            self.set_trigger_state(&trigger.key, TriggerState::Acquired, Some(next))
                .await?;
            self.insert_fired_record(&trigger, &job, now).await?;
            log::debug!("[JOBSTORE] acquired trigger {} for {}", trigger.key, next);
            acquired.push(trigger);
        }
        sort_for_acquisition(&mut acquired);
        Ok(acquired)
    }

    /// Hand back an acquired-but-unfired trigger.
    pub async fn release_acquired_trigger(&self, trigger: &Trigger) -> Result<()> {
        if self.find_trigger_state(&trigger.key).await? != Some(TriggerState::Acquired) {
            return Ok(());
        }
        let Some(stored) = self.load_trigger(&trigger.key).await? else {
            self.remove_from_all_state_sets(&trigger.key).await?;
            return Ok(());
        };
        self.set_trigger_state(&trigger.key, TriggerState::Waiting, stored.next_fire_time)
            .await?;
        self.remove_fired_records(&trigger.key).await
    }

    /// Tell the store the given acquired triggers are now firing. A
    /// trigger that was removed, rescheduled or lost its calendar since
    /// acquisition contributes no result.
    pub async fn triggers_fired(&self, triggers: &[Trigger]) -> Result<Vec<TriggerFiredResult>> {
        let mut results = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            if self.find_trigger_state(&trigger.key).await? != Some(TriggerState::Acquired) {
                continue;
            }
            let Some(mut stored) = self.load_trigger(&trigger.key).await? else {
                continue;
            };
            let calendar = match &stored.calendar_name {
                Some(name) => match self.retrieve_calendar(name).await? {
                    Some(cal) => Some(cal),
                    None => {
                        log::warn!(
                            "[JOBSTORE] trigger {} fired but calendar {name} is gone, skipping",
                            stored.key
                        );
                        continue;
                    }
                },
                None => None,
            };
            let Some(job) = self.load_job(&stored.job_key).await? else {
                continue;
            };
            if job.disallow_concurrent {
                // a sibling acquired earlier is already executing
                let mut conn = self.conn();
                let already_blocked: bool = redis::cmd("SISMEMBER")
                    .arg(self.schema().blocked_jobs_key())
                    .arg(self.schema().encode_job_key(&job.key))
                    .query_async(&mut conn)
                    .await?;
                if already_blocked {
                    self.set_trigger_state(
                        &stored.key,
                        TriggerState::Blocked,
                        stored.next_fire_time,
                    )
                    .await?;
                    self.remove_fired_records(&stored.key).await?;
                    continue;
                }
            }

            let fire_time = stored.next_fire_time.unwrap_or_else(now_millis);
            stored.triggered(calendar.as_ref());
            self.update_trigger_hash(&stored).await?;
            self.set_trigger_state(&stored.key, TriggerState::Executing, stored.next_fire_time)
                .await?;
            self.mark_fired_records_executing(&stored.key).await?;

            if job.disallow_concurrent {
                let mut conn = self.conn();
                let _: () = redis::cmd("SADD")
                    .arg(self.schema().blocked_jobs_key())
                    .arg(self.schema().encode_job_key(&job.key))
                    .query_async(&mut conn)
                    .await?;
                self.block_job_siblings(&job.key, &stored.key).await?;
            }

            results.push(TriggerFiredResult {
                next_fire_time: stored.next_fire_time,
                trigger: stored,
                job,
                calendar,
                fire_time,
            });
        }
        Ok(results)
    }

    /// Settle a finished execution according to the scheduler's
    /// instruction, release the concurrency block and persist mutated job
    /// data where the job asks for it.
    pub async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job_detail: &JobDetail,
        instruction: CompletedInstruction,
    ) -> Result<()> {
        self.remove_fired_records(&trigger.key).await?;

        if job_detail.persist_data_after_execution && self.job_exists(&job_detail.key).await? {
            let data_key = self.schema().job_data_map_key(&job_detail.key);
            let mut pipe = redis::pipe();
            pipe.cmd("DEL").arg(&data_key).ignore();
            if !job_detail.data.is_empty() {
                let entries: Vec<(String, String)> = job_detail
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                pipe.cmd("HSET").arg(&data_key).arg(entries).ignore();
            }
            let mut conn = self.conn();
            let _: () = pipe.query_async(&mut conn).await?;
        }

        if job_detail.disallow_concurrent {
            let mut conn = self.conn();
            let _: () = redis::cmd("SREM")
                .arg(self.schema().blocked_jobs_key())
                .arg(self.schema().encode_job_key(&job_detail.key))
                .query_async(&mut conn)
                .await?;
            self.unblock_job_siblings(&job_detail.key).await?;
        }

        match instruction {
            CompletedInstruction::NoInstruction => {
                if let Some(stored) = self.load_trigger(&trigger.key).await? {
                    match stored.next_fire_time {
                        None => {
                            self.set_trigger_state(&stored.key, TriggerState::Completed, None)
                                .await?;
                            self.signaler
                                .notify_scheduler_listeners_finalized(&stored)
                                .await;
                        }
                        Some(next) => {
                            let paused = self
                                .is_trigger_group_paused(&stored.key.group)
                                .await?;
                            let state = if paused {
                                TriggerState::Paused
                            } else {
                                TriggerState::Waiting
                            };
                            self.set_trigger_state(&stored.key, state, Some(next)).await?;
                        }
                    }
                }
            }
            CompletedInstruction::DeleteTrigger => {
                // a reschedule between fire and completion wins over the
                // delete
                if let Some(stored) = self.load_trigger(&trigger.key).await?
                    && stored.next_fire_time == trigger.next_fire_time
                {
                    self.remove_trigger(&trigger.key).await?;
                }
            }
            CompletedInstruction::SetTriggerComplete => {
                self.set_trigger_state(&trigger.key, TriggerState::Completed, None)
                    .await?;
                self.signaler
                    .notify_scheduler_listeners_finalized(trigger)
                    .await;
            }
            CompletedInstruction::SetTriggerError => {
                log::warn!(
                    "[JOBSTORE] trigger {} moved to error state on completion",
                    trigger.key
                );
                self.set_trigger_state(&trigger.key, TriggerState::Error, trigger.next_fire_time)
                    .await?;
            }
            CompletedInstruction::SetAllJobTriggersComplete => {
                for sibling in self.triggers_for_job(&job_detail.key).await? {
                    self.set_trigger_state(&sibling.key, TriggerState::Completed, None)
                        .await?;
                    self.signaler
                        .notify_scheduler_listeners_finalized(&sibling)
                        .await;
                }
            }
            CompletedInstruction::SetAllJobTriggersError => {
                log::warn!(
                    "[JOBSTORE] all triggers of job {} moved to error state on completion",
                    job_detail.key
                );
                for sibling in self.triggers_for_job(&job_detail.key).await? {
                    self.set_trigger_state(
                        &sibling.key,
                        TriggerState::Error,
                        sibling.next_fire_time,
                    )
                    .await?;
                }
            }
        }
        self.signaler.signal_scheduling_change(None).await;
        Ok(())
    }

    /// Settle a misfired trigger per its policy. Returns whether the
    /// trigger changed. A trigger is misfired when its next fire time
    /// plus the misfire threshold lies in the past.
    pub(crate) async fn apply_misfire(&self, trigger: &mut Trigger) -> Result<bool> {
        let now = now_millis();
        let Some(next) = trigger.next_fire_time else {
            return Ok(false);
        };
        if next + self.config.misfire_threshold_ms() >= now {
            return Ok(false);
        }
        if trigger.misfire_instruction == MISFIRE_INSTRUCTION_IGNORE_POLICY {
            // fire all missed instants as fast as they can be acquired
            return Ok(false);
        }
        let calendar = match &trigger.calendar_name {
            Some(name) => self.retrieve_calendar(name).await?,
            None => None,
        };
        self.signaler.notify_trigger_listeners_misfired(trigger).await;
        trigger.update_after_misfire(calendar.as_ref(), now);
        if trigger.next_fire_time.is_none() {
            self.signaler
                .notify_scheduler_listeners_finalized(trigger)
                .await;
        }
        Ok(trigger.next_fire_time != Some(next))
    }

    /// Return triggers stranded in acquired/executing by an instance that
    /// stopped reporting. Runs at the top of every acquisition cycle.
    pub(crate) async fn recover_orphaned_triggers(&self) -> Result<()> {
        let now = now_millis();
        let timeout = self.config.trigger_lock_timeout_ms();
        let fired_key = self.schema().fired_triggers_key();
        let mut conn = self.conn();
        let entries: std::collections::HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&fired_key)
            .query_async(&mut conn)
            .await?;

        let mut recovered = 0usize;
        for (id, raw) in entries {
            let fired = match self.serializer.decode_fired_trigger(raw.as_bytes()) {
                Ok(fired) => fired,
                Err(e) => {
                    log::error!("[JOBSTORE] dropping undecodable fired record {id}: {e}");
                    let _: () = redis::cmd("HDEL")
                        .arg(&fired_key)
                        .arg(&id)
                        .query_async(&mut conn)
                        .await?;
                    continue;
                }
            };
            if fired.fired_at + timeout >= now {
                continue;
            }
            let _: () = redis::pipe()
                .cmd("HDEL")
                .arg(&fired_key)
                .arg(&id)
                .ignore()
                .cmd("SREM")
                .arg(self.schema().instance_fired_key(&fired.instance_id))
                .arg(&id)
                .ignore()
                .query_async(&mut conn)
                .await?;

            if fired.disallow_concurrent {
                let _: () = redis::cmd("SREM")
                    .arg(self.schema().blocked_jobs_key())
                    .arg(self.schema().encode_job_key(&fired.job_key))
                    .query_async(&mut conn)
                    .await?;
                self.unblock_job_siblings(&fired.job_key).await?;
            }

            if let Some(trigger) = self.load_trigger(&fired.trigger_key).await?
                && matches!(
                    self.find_trigger_state(&fired.trigger_key).await?,
                    Some(TriggerState::Acquired) | Some(TriggerState::Executing)
                )
            {
                let state = if self.is_trigger_group_paused(&fired.trigger_key.group).await? {
                    TriggerState::Paused
                } else {
                    TriggerState::Waiting
                };
                self.set_trigger_state(&fired.trigger_key, state, trigger.next_fire_time)
                    .await?;
            }

            if fired.requests_recovery {
                if self.job_exists(&fired.job_key).await? {
                    let seq = RECOVERY_SEQ.fetch_add(1, Ordering::Relaxed);
                    let recovery = Trigger::recovery(&fired, seq, now);
                    self.store_trigger(&recovery, true).await?;
                } else {
                    log::warn!(
                        "[JOBSTORE] job {} of orphaned trigger {} is gone, cannot re-fire",
                        fired.job_key,
                        fired.trigger_key
                    );
                }
            }
            log::warn!(
                "[JOBSTORE] recovered trigger {} orphaned by instance {}",
                fired.trigger_key,
                fired.instance_id
            );
            recovered += 1;
        }
        if recovered > 0 {
            self.signaler.signal_scheduling_change(None).await;
        }
        Ok(())
    }

    // ---- fired-trigger records ----

    async fn insert_fired_record(
        &self,
        trigger: &Trigger,
        job: &JobDetail,
        fired_at: i64,
    ) -> Result<()> {
        let fired = FiredTrigger {
            trigger_key: trigger.key.clone(),
            job_key: trigger.job_key.clone(),
            instance_id: self.instance_id().to_string(),
            fired_at,
            sched_time: trigger.next_fire_time,
            priority: trigger.priority,
            state: TriggerState::Acquired,
            requests_recovery: job.requests_recovery,
            disallow_concurrent: job.disallow_concurrent,
        };
        let id = self
            .schema()
            .fired_trigger_id(&trigger.key, self.instance_id(), fired_at);
        let payload = self.serializer.encode_fired_trigger(&fired)?;
        let mut conn = self.conn();
        let _: () = redis::pipe()
            .cmd("HSET")
            .arg(self.schema().fired_triggers_key())
            .arg(&id)
            .arg(payload.as_ref())
            .ignore()
            .cmd("SADD")
            .arg(self.schema().instance_fired_key(self.instance_id()))
            .arg(&id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn fired_record_ids(&self, key: &TriggerKey) -> Result<Vec<String>> {
        let prefix = format!("{}|", self.schema().encode_trigger_key(key));
        let mut conn = self.conn();
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.schema().instance_fired_key(self.instance_id()))
            .query_async(&mut conn)
            .await?;
        Ok(ids.into_iter().filter(|id| id.starts_with(&prefix)).collect())
    }

    async fn mark_fired_records_executing(&self, key: &TriggerKey) -> Result<()> {
        let fired_key = self.schema().fired_triggers_key();
        let mut conn = self.conn();
        for id in self.fired_record_ids(key).await? {
            let raw: Option<String> = redis::cmd("HGET")
                .arg(&fired_key)
                .arg(&id)
                .query_async(&mut conn)
                .await?;
            let Some(raw) = raw else { continue };
            let mut fired = self.serializer.decode_fired_trigger(raw.as_bytes())?;
            fired.state = TriggerState::Executing;
            let payload = self.serializer.encode_fired_trigger(&fired)?;
            let _: () = redis::cmd("HSET")
                .arg(&fired_key)
                .arg(&id)
                .arg(payload.as_ref())
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn remove_fired_records(&self, key: &TriggerKey) -> Result<()> {
        let ids = self.fired_record_ids(key).await?;
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let _: () = redis::pipe()
            .cmd("HDEL")
            .arg(self.schema().fired_triggers_key())
            .arg(&ids)
            .ignore()
            .cmd("SREM")
            .arg(self.schema().instance_fired_key(self.instance_id()))
            .arg(&ids)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    // ---- concurrency blocking ----

    /// Park the job's other non-executing triggers while one of them
    /// runs.
    async fn block_job_siblings(&self, job_key: &JobKey, firing: &TriggerKey) -> Result<()> {
        for member in self
            .smembers(&self.schema().job_triggers_key(job_key))
            .await?
        {
            let sibling = self.schema().parse_trigger_key(&member)?;
            if &sibling == firing {
                continue;
            }
            let Some(trigger) = self.load_trigger(&sibling).await? else {
                continue;
            };
            match self.find_trigger_state(&sibling).await? {
                Some(TriggerState::Waiting) => {
                    self.set_trigger_state(
                        &sibling,
                        TriggerState::Blocked,
                        trigger.next_fire_time,
                    )
                    .await?;
                }
                Some(TriggerState::Paused) => {
                    self.set_trigger_state(
                        &sibling,
                        TriggerState::PausedBlocked,
                        trigger.next_fire_time,
                    )
                    .await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Undo [`Self::block_job_siblings`] once the running execution is
    /// done, settling misfires the block may have caused.
    pub(crate) async fn unblock_job_siblings(&self, job_key: &JobKey) -> Result<()> {
        for member in self
            .smembers(&self.schema().job_triggers_key(job_key))
            .await?
        {
            let sibling = self.schema().parse_trigger_key(&member)?;
            match self.find_trigger_state(&sibling).await? {
                Some(TriggerState::Blocked) => {
                    let Some(mut trigger) = self.load_trigger(&sibling).await? else {
                        self.remove_from_all_state_sets(&sibling).await?;
                        continue;
                    };
                    if self.apply_misfire(&mut trigger).await? {
                        self.update_trigger_hash(&trigger).await?;
                    }
                    match trigger.next_fire_time {
                        None => {
                            self.set_trigger_state(&sibling, TriggerState::Completed, None)
                                .await?;
                        }
                        Some(next) => {
                            self.set_trigger_state(&sibling, TriggerState::Waiting, Some(next))
                                .await?;
                        }
                    }
                }
                Some(TriggerState::PausedBlocked) => {
                    let next = self
                        .load_trigger(&sibling)
                        .await?
                        .and_then(|t| t.next_fire_time);
                    self.set_trigger_state(&sibling, TriggerState::Paused, next)
                        .await?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn sort_for_acquisition(triggers: &mut [Trigger]) {
    triggers.sort_by(|a, b| {
        a.next_fire_time
            .unwrap_or(i64::MAX)
            .cmp(&b.next_fire_time.unwrap_or(i64::MAX))
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.key.cmp(&b.key))
    });
}
