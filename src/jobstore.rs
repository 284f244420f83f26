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

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::{
    config::JobStoreConfig,
    dist_lock::Locker,
    errors::{Error, Result},
    meta::{
        Calendar, CompletedInstruction, GroupMatcher, JobDetail, JobKey, Trigger,
        TriggerFiredResult, TriggerKey, TriggerState,
    },
    serializer::{JsonSerializer, Serializer},
    storage::Storage,
};

/// Callback surface the host scheduler hands the store. Every callback is
/// invoked while the distributed store mutex is held: implementations
/// must return quickly and must not call back into the store.
#[async_trait]
pub trait SchedulerSignaler: Send + Sync + 'static {
    /// Something changed the earliest fire time worth waking up for.
    async fn signal_scheduling_change(&self, candidate_next_fire_time: Option<i64>);
    async fn notify_trigger_listeners_misfired(&self, trigger: &Trigger);
    async fn notify_scheduler_listeners_finalized(&self, trigger: &Trigger);
}

/// For hosts that poll instead of listening.
pub struct NoopSignaler;

#[async_trait]
impl SchedulerSignaler for NoopSignaler {
    async fn signal_scheduling_change(&self, _candidate_next_fire_time: Option<i64>) {}
    async fn notify_trigger_listeners_misfired(&self, _trigger: &Trigger) {}
    async fn notify_scheduler_listeners_finalized(&self, _trigger: &Trigger) {}
}

/// The SPI a scheduler engine drives the store through.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    fn supports_persistence(&self) -> bool {
        true
    }

    fn clustered(&self) -> bool {
        true
    }

    /// Advisory estimate in ms the engine uses for acquisition pacing.
    fn estimated_time_to_release_and_acquire_trigger(&self) -> i64 {
        100
    }

    async fn scheduler_started(&self) -> Result<()>;
    async fn scheduler_paused(&self);
    async fn scheduler_resumed(&self);
    async fn shutdown(&self);

    async fn store_job(&self, job: &JobDetail, replace: bool) -> Result<()>;
    async fn store_trigger(&self, trigger: &Trigger, replace: bool) -> Result<()>;
    async fn store_job_and_trigger(&self, job: &JobDetail, trigger: &Trigger) -> Result<()>;
    async fn store_jobs_and_triggers(
        &self,
        batch: &[(JobDetail, Vec<Trigger>)],
        replace: bool,
    ) -> Result<()>;
    async fn remove_job(&self, key: &JobKey) -> Result<bool>;
    async fn remove_jobs(&self, keys: &[JobKey]) -> Result<bool>;
    async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool>;
    async fn remove_triggers(&self, keys: &[TriggerKey]) -> Result<bool>;
    async fn replace_trigger(&self, key: &TriggerKey, new_trigger: &Trigger) -> Result<bool>;
    async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>>;
    async fn retrieve_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>>;

    async fn job_exists(&self, key: &JobKey) -> Result<bool>;
    async fn trigger_exists(&self, key: &TriggerKey) -> Result<bool>;
    async fn calendar_exists(&self, name: &str) -> Result<bool>;

    async fn store_calendar(
        &self,
        name: &str,
        calendar: &Calendar,
        replace: bool,
        update_triggers: bool,
    ) -> Result<()>;
    async fn remove_calendar(&self, name: &str) -> Result<bool>;
    async fn retrieve_calendar(&self, name: &str) -> Result<Option<Calendar>>;

    async fn clear_all_scheduling_data(&self) -> Result<()>;

    async fn get_number_of_jobs(&self) -> Result<usize>;
    async fn get_number_of_triggers(&self) -> Result<usize>;
    async fn get_number_of_calendars(&self) -> Result<usize>;
    async fn get_job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>>;
    async fn get_trigger_keys(&self, matcher: &GroupMatcher) -> Result<Vec<TriggerKey>>;
    async fn get_job_group_names(&self) -> Result<Vec<String>>;
    async fn get_trigger_group_names(&self) -> Result<Vec<String>>;
    async fn get_calendar_names(&self) -> Result<Vec<String>>;
    async fn get_triggers_for_job(&self, key: &JobKey) -> Result<Vec<Trigger>>;
    async fn get_trigger_state(&self, key: &TriggerKey) -> Result<Option<TriggerState>>;
    async fn reset_trigger_from_error_state(&self, key: &TriggerKey) -> Result<()>;

    async fn pause_trigger(&self, key: &TriggerKey) -> Result<()>;
    async fn pause_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>>;
    async fn pause_job(&self, key: &JobKey) -> Result<()>;
    async fn pause_jobs(&self, matcher: &GroupMatcher) -> Result<Vec<String>>;
    async fn resume_trigger(&self, key: &TriggerKey) -> Result<()>;
    async fn resume_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>>;
    async fn resume_job(&self, key: &JobKey) -> Result<()>;
    async fn resume_jobs(&self, matcher: &GroupMatcher) -> Result<Vec<String>>;
    async fn get_paused_trigger_groups(&self) -> Result<Vec<String>>;
    async fn is_job_group_paused(&self, group: &str) -> Result<bool>;
    async fn is_trigger_group_paused(&self, group: &str) -> Result<bool>;
    async fn pause_all(&self) -> Result<()>;
    async fn resume_all(&self) -> Result<()>;

    async fn acquire_next_triggers(
        &self,
        no_later_than: i64,
        max_count: usize,
        time_window: i64,
    ) -> Result<Vec<Trigger>>;
    async fn release_acquired_trigger(&self, trigger: &Trigger) -> Result<()>;
    async fn triggers_fired(&self, triggers: &[Trigger]) -> Result<Vec<TriggerFiredResult>>;
    async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job_detail: &JobDetail,
        instruction: CompletedInstruction,
    ) -> Result<()>;
}

/// The Redis-backed [`JobStore`]: a thin translation layer that takes the
/// distributed mutex, delegates to [`Storage`] and maps failures into the
/// store error taxonomy. `ObjectAlreadyExists` passes through untouched;
/// everything else is logged and re-raised as a persistence error.
pub struct RedisJobStore {
    storage: Storage,
    config: JobStoreConfig,
    paused: AtomicBool,
}

impl RedisJobStore {
    /// Open a connection multiplexer against the configured Redis and
    /// build the store around it, with the default JSON serializer.
    pub async fn connect(
        config: JobStoreConfig,
        signaler: Arc<dyn SchedulerSignaler>,
    ) -> Result<Self> {
        Self::connect_with_serializer(config, Arc::new(JsonSerializer), signaler).await
    }

    pub async fn connect_with_serializer(
        config: JobStoreConfig,
        serializer: Arc<dyn Serializer>,
        signaler: Arc<dyn SchedulerSignaler>,
    ) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn, config, serializer, signaler))
    }

    /// Build the store on an existing multiplexer (shared with the rest
    /// of the host process).
    pub fn new(
        conn: ConnectionManager,
        config: JobStoreConfig,
        serializer: Arc<dyn Serializer>,
        signaler: Arc<dyn SchedulerSignaler>,
    ) -> Self {
        let storage = Storage::new(conn, config.clone(), serializer, signaler);
        Self {
            storage,
            config,
            paused: AtomicBool::new(false),
        }
    }

    /// Whether the host scheduler told us it is paused. In-process state
    /// only, never persisted.
    pub fn is_scheduler_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Run one storage operation under the cluster-wide mutex. The lock
    /// is released on every exit path; a release that finds its token
    /// expired is logged and swallowed.
    async fn with_lock<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let mut locker = Locker::new(
            self.storage.conn(),
            self.storage.schema().lock_key(),
            &self.config.instance_id,
            self.config.redis_lock_timeout_ms(),
        );
        if let Err(e) = locker.lock().await {
            log::error!("[JOBSTORE] {op} could not take the store lock: {e}");
            return Err(Error::Persistence(Box::new(e)));
        }
        let ret = fut.await;
        if let Err(e) = locker.unlock().await {
            log::warn!("[JOBSTORE] {op} failed to release the store lock: {e}");
        }
        match ret {
            Ok(value) => Ok(value),
            Err(e @ Error::ObjectAlreadyExists(_)) => Err(e),
            Err(e) => {
                log::error!("[JOBSTORE] {op} error: {e}");
                Err(Error::Persistence(Box::new(e)))
            }
        }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn scheduler_started(&self) -> Result<()> {
        log::info!(
            "[JOBSTORE] scheduler started, instance {}",
            self.config.instance_id
        );
        Ok(())
    }

    async fn scheduler_paused(&self) {
        self.paused.store(true, Ordering::Relaxed);
        log::info!(
            "[JOBSTORE] scheduler paused, instance {}",
            self.config.instance_id
        );
    }

    async fn scheduler_resumed(&self) {
        self.paused.store(false, Ordering::Relaxed);
        log::info!(
            "[JOBSTORE] scheduler resumed, instance {}",
            self.config.instance_id
        );
    }

    async fn shutdown(&self) {
        log::info!(
            "[JOBSTORE] shutting down, instance {}",
            self.config.instance_id
        );
    }

    async fn store_job(&self, job: &JobDetail, replace: bool) -> Result<()> {
        self.with_lock("store_job", self.storage.store_job(job, replace))
            .await
    }

    async fn store_trigger(&self, trigger: &Trigger, replace: bool) -> Result<()> {
        self.with_lock("store_trigger", self.storage.store_trigger(trigger, replace))
            .await
    }

    async fn store_job_and_trigger(&self, job: &JobDetail, trigger: &Trigger) -> Result<()> {
        self.with_lock("store_job_and_trigger", async {
            self.storage.store_job(job, false).await?;
            self.storage.store_trigger(trigger, false).await
        })
        .await
    }

    async fn store_jobs_and_triggers(
        &self,
        batch: &[(JobDetail, Vec<Trigger>)],
        replace: bool,
    ) -> Result<()> {
        self.with_lock("store_jobs_and_triggers", async {
            if !replace {
                // reject the whole batch before touching anything
                for (job, triggers) in batch {
                    if self.storage.job_exists(&job.key).await? {
                        return Err(Error::ObjectAlreadyExists(job.key.to_string()));
                    }
                    for trigger in triggers {
                        if self.storage.trigger_exists(&trigger.key).await? {
                            return Err(Error::ObjectAlreadyExists(trigger.key.to_string()));
                        }
                    }
                }
            }
            for (job, triggers) in batch {
                self.storage.store_job(job, replace).await?;
                for trigger in triggers {
                    self.storage.store_trigger(trigger, replace).await?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn remove_job(&self, key: &JobKey) -> Result<bool> {
        self.with_lock("remove_job", self.storage.remove_job(key))
            .await
    }

    async fn remove_jobs(&self, keys: &[JobKey]) -> Result<bool> {
        self.with_lock("remove_jobs", async {
            let mut all = true;
            for key in keys {
                all &= self.storage.remove_job(key).await?;
            }
            Ok(all)
        })
        .await
    }

    async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool> {
        self.with_lock("remove_trigger", self.storage.remove_trigger(key))
            .await
    }

    async fn remove_triggers(&self, keys: &[TriggerKey]) -> Result<bool> {
        self.with_lock("remove_triggers", async {
            let mut all = true;
            for key in keys {
                all &= self.storage.remove_trigger(key).await?;
            }
            Ok(all)
        })
        .await
    }

    async fn replace_trigger(&self, key: &TriggerKey, new_trigger: &Trigger) -> Result<bool> {
        self.with_lock("replace_trigger", self.storage.replace_trigger(key, new_trigger))
            .await
    }

    async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        self.with_lock("retrieve_job", self.storage.retrieve_job(key))
            .await
    }

    async fn retrieve_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>> {
        self.with_lock("retrieve_trigger", self.storage.retrieve_trigger(key))
            .await
    }

    async fn job_exists(&self, key: &JobKey) -> Result<bool> {
        self.with_lock("job_exists", self.storage.job_exists(key))
            .await
    }

    async fn trigger_exists(&self, key: &TriggerKey) -> Result<bool> {
        self.with_lock("trigger_exists", self.storage.trigger_exists(key))
            .await
    }

    async fn calendar_exists(&self, name: &str) -> Result<bool> {
        self.with_lock("calendar_exists", self.storage.calendar_exists(name))
            .await
    }

    async fn store_calendar(
        &self,
        name: &str,
        calendar: &Calendar,
        replace: bool,
        update_triggers: bool,
    ) -> Result<()> {
        self.with_lock(
            "store_calendar",
            self.storage
                .store_calendar(name, calendar, replace, update_triggers),
        )
        .await
    }

    async fn remove_calendar(&self, name: &str) -> Result<bool> {
        self.with_lock("remove_calendar", self.storage.remove_calendar(name))
            .await
    }

    async fn retrieve_calendar(&self, name: &str) -> Result<Option<Calendar>> {
        self.with_lock("retrieve_calendar", self.storage.retrieve_calendar(name))
            .await
    }

    async fn clear_all_scheduling_data(&self) -> Result<()> {
        self.with_lock(
            "clear_all_scheduling_data",
            self.storage.clear_all_scheduling_data(),
        )
        .await
    }

    async fn get_number_of_jobs(&self) -> Result<usize> {
        self.with_lock("get_number_of_jobs", self.storage.number_of_jobs())
            .await
    }

    async fn get_number_of_triggers(&self) -> Result<usize> {
        self.with_lock("get_number_of_triggers", self.storage.number_of_triggers())
            .await
    }

    async fn get_number_of_calendars(&self) -> Result<usize> {
        self.with_lock("get_number_of_calendars", self.storage.number_of_calendars())
            .await
    }

    async fn get_job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>> {
        self.with_lock("get_job_keys", self.storage.job_keys(matcher))
            .await
    }

    async fn get_trigger_keys(&self, matcher: &GroupMatcher) -> Result<Vec<TriggerKey>> {
        self.with_lock("get_trigger_keys", self.storage.trigger_keys(matcher))
            .await
    }

    async fn get_job_group_names(&self) -> Result<Vec<String>> {
        self.with_lock("get_job_group_names", self.storage.job_group_names())
            .await
    }

    async fn get_trigger_group_names(&self) -> Result<Vec<String>> {
        self.with_lock("get_trigger_group_names", self.storage.trigger_group_names())
            .await
    }

    async fn get_calendar_names(&self) -> Result<Vec<String>> {
        self.with_lock("get_calendar_names", self.storage.calendar_names())
            .await
    }

    async fn get_triggers_for_job(&self, key: &JobKey) -> Result<Vec<Trigger>> {
        self.with_lock("get_triggers_for_job", self.storage.triggers_for_job(key))
            .await
    }

    async fn get_trigger_state(&self, key: &TriggerKey) -> Result<Option<TriggerState>> {
        self.with_lock("get_trigger_state", self.storage.get_trigger_state(key))
            .await
    }

    async fn reset_trigger_from_error_state(&self, key: &TriggerKey) -> Result<()> {
        self.with_lock(
            "reset_trigger_from_error_state",
            self.storage.reset_trigger_from_error_state(key),
        )
        .await
    }

    async fn pause_trigger(&self, key: &TriggerKey) -> Result<()> {
        self.with_lock("pause_trigger", self.storage.pause_trigger(key))
            .await
    }

    async fn pause_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        self.with_lock("pause_triggers", self.storage.pause_triggers(matcher))
            .await
    }

    async fn pause_job(&self, key: &JobKey) -> Result<()> {
        self.with_lock("pause_job", self.storage.pause_job(key)).await
    }

    async fn pause_jobs(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        self.with_lock("pause_jobs", self.storage.pause_jobs(matcher))
            .await
    }

    async fn resume_trigger(&self, key: &TriggerKey) -> Result<()> {
        self.with_lock("resume_trigger", self.storage.resume_trigger(key))
            .await
    }

    async fn resume_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        self.with_lock("resume_triggers", self.storage.resume_triggers(matcher))
            .await
    }

    async fn resume_job(&self, key: &JobKey) -> Result<()> {
        self.with_lock("resume_job", self.storage.resume_job(key))
            .await
    }

    async fn resume_jobs(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        self.with_lock("resume_jobs", self.storage.resume_jobs(matcher))
            .await
    }

    async fn get_paused_trigger_groups(&self) -> Result<Vec<String>> {
        self.with_lock(
            "get_paused_trigger_groups",
            self.storage.paused_trigger_groups(),
        )
        .await
    }

    async fn is_job_group_paused(&self, group: &str) -> Result<bool> {
        self.with_lock("is_job_group_paused", self.storage.is_job_group_paused(group))
            .await
    }

    async fn is_trigger_group_paused(&self, group: &str) -> Result<bool> {
        self.with_lock(
            "is_trigger_group_paused",
            self.storage.is_trigger_group_paused(group),
        )
        .await
    }

    async fn pause_all(&self) -> Result<()> {
        self.with_lock("pause_all", self.storage.pause_all()).await
    }

    async fn resume_all(&self) -> Result<()> {
        self.with_lock("resume_all", self.storage.resume_all()).await
    }

    async fn acquire_next_triggers(
        &self,
        no_later_than: i64,
        max_count: usize,
        time_window: i64,
    ) -> Result<Vec<Trigger>> {
        self.with_lock(
            "acquire_next_triggers",
            self.storage
                .acquire_next_triggers(no_later_than, max_count, time_window),
        )
        .await
    }

    async fn release_acquired_trigger(&self, trigger: &Trigger) -> Result<()> {
        self.with_lock(
            "release_acquired_trigger",
            self.storage.release_acquired_trigger(trigger),
        )
        .await
    }

    async fn triggers_fired(&self, triggers: &[Trigger]) -> Result<Vec<TriggerFiredResult>> {
        self.with_lock("triggers_fired", self.storage.triggers_fired(triggers))
            .await
    }

    async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job_detail: &JobDetail,
        instruction: CompletedInstruction,
    ) -> Result<()> {
        self.with_lock(
            "triggered_job_complete",
            self.storage
                .triggered_job_complete(trigger, job_detail, instruction),
        )
        .await
    }
}
