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

use super::Storage;
use crate::{
    errors::Result,
    meta::{GroupMatcher, JobKey, TriggerKey, TriggerState},
};

impl Storage {
    /// Waiting/acquired triggers go to paused, blocked ones to
    /// paused-and-blocked. Terminal states are left alone.
    pub async fn pause_trigger(&self, key: &TriggerKey) -> Result<()> {
        let Some(trigger) = self.load_trigger(key).await? else {
            return Ok(());
        };
        match self.find_trigger_state(key).await? {
            Some(TriggerState::Waiting) | Some(TriggerState::Acquired) => {
                self.set_trigger_state(key, TriggerState::Paused, trigger.next_fire_time)
                    .await?;
            }
            Some(TriggerState::Blocked) => {
                self.set_trigger_state(key, TriggerState::PausedBlocked, trigger.next_fire_time)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Pause every trigger in the matching groups and remember the
    /// groups, so triggers stored into them later start out paused.
    /// Returns the affected group names.
    pub async fn pause_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let groups = self
            .groups_for_matcher(&self.schema().trigger_groups_key(), matcher)
            .await?;
        let mut conn = self.conn();
        for group in &groups {
            let _: () = redis::cmd("SADD")
                .arg(self.schema().paused_trigger_groups_key())
                .arg(group)
                .query_async(&mut conn)
                .await?;
            for name in self.smembers(&self.schema().trigger_group_key(group)).await? {
                self.pause_trigger(&TriggerKey::new(&name, group)).await?;
            }
        }
        Ok(groups)
    }

    pub async fn pause_job(&self, key: &JobKey) -> Result<()> {
        for trigger in self.triggers_for_job(key).await? {
            self.pause_trigger(&trigger.key).await?;
        }
        Ok(())
    }

    /// Pause every job in the matching groups and remember the groups.
    /// Returns the affected group names.
    pub async fn pause_jobs(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let groups = self
            .groups_for_matcher(&self.schema().job_groups_key(), matcher)
            .await?;
        let mut conn = self.conn();
        for group in &groups {
            let _: () = redis::cmd("SADD")
                .arg(self.schema().paused_job_groups_key())
                .arg(group)
                .query_async(&mut conn)
                .await?;
            for name in self.smembers(&self.schema().job_group_key(group)).await? {
                self.pause_job(&JobKey::new(&name, group)).await?;
            }
        }
        Ok(groups)
    }

    /// Resume one trigger, settling any misfire accumulated while it was
    /// paused.
    pub async fn resume_trigger(&self, key: &TriggerKey) -> Result<()> {
        let state = self.find_trigger_state(key).await?;
        if !matches!(
            state,
            Some(TriggerState::Paused) | Some(TriggerState::PausedBlocked)
        ) {
            return Ok(());
        }
        let Some(mut trigger) = self.load_trigger(key).await? else {
            self.remove_from_all_state_sets(key).await?;
            return Ok(());
        };
        if self.apply_misfire(&mut trigger).await? {
            self.update_trigger_hash(&trigger).await?;
        }
        let Some(next) = trigger.next_fire_time else {
            self.set_trigger_state(key, TriggerState::Completed, None).await?;
            return Ok(());
        };
        let blocked = state == Some(TriggerState::PausedBlocked)
            || self
                .sismember(
                    &self.schema().blocked_jobs_key(),
                    &self.schema().encode_job_key(&trigger.job_key),
                )
                .await?;
        let target = if blocked {
            TriggerState::Blocked
        } else {
            TriggerState::Waiting
        };
        self.set_trigger_state(key, target, Some(next)).await?;
        self.signaler.signal_scheduling_change(Some(next)).await;
        Ok(())
    }

    /// Resume every trigger in the matching groups and forget the groups'
    /// paused flag. Returns the affected group names.
    pub async fn resume_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let groups = self
            .groups_for_matcher(&self.schema().trigger_groups_key(), matcher)
            .await?;
        let mut conn = self.conn();
        for group in &groups {
            let _: () = redis::cmd("SREM")
                .arg(self.schema().paused_trigger_groups_key())
                .arg(group)
                .query_async(&mut conn)
                .await?;
            for name in self.smembers(&self.schema().trigger_group_key(group)).await? {
                self.resume_trigger(&TriggerKey::new(&name, group)).await?;
            }
        }
        Ok(groups)
    }

    pub async fn resume_job(&self, key: &JobKey) -> Result<()> {
        for trigger in self.triggers_for_job(key).await? {
            self.resume_trigger(&trigger.key).await?;
        }
        Ok(())
    }

    /// Resume every job in the matching groups and forget the groups'
    /// paused flag. Returns the affected group names.
    pub async fn resume_jobs(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let groups = self
            .groups_for_matcher(&self.schema().job_groups_key(), matcher)
            .await?;
        let mut conn = self.conn();
        for group in &groups {
            let _: () = redis::cmd("SREM")
                .arg(self.schema().paused_job_groups_key())
                .arg(group)
                .query_async(&mut conn)
                .await?;
            for name in self.smembers(&self.schema().job_group_key(group)).await? {
                self.resume_job(&JobKey::new(&name, group)).await?;
            }
        }
        Ok(groups)
    }

    pub async fn pause_all(&self) -> Result<()> {
        for group in self.trigger_group_names().await? {
            self.pause_triggers(&GroupMatcher::Equals(group)).await?;
        }
        Ok(())
    }

    pub async fn resume_all(&self) -> Result<()> {
        for group in self.trigger_group_names().await? {
            self.resume_triggers(&GroupMatcher::Equals(group)).await?;
        }
        // clear stragglers whose triggers are all gone
        let mut conn = self.conn();
        let _: () = redis::cmd("DEL")
            .arg(self.schema().paused_trigger_groups_key())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn paused_trigger_groups(&self) -> Result<Vec<String>> {
        let mut groups = self
            .smembers(&self.schema().paused_trigger_groups_key())
            .await?;
        groups.sort();
        Ok(groups)
    }

    pub async fn is_trigger_group_paused(&self, group: &str) -> Result<bool> {
        self.sismember(&self.schema().paused_trigger_groups_key(), group)
            .await
    }

    pub async fn is_job_group_paused(&self, group: &str) -> Result<bool> {
        self.sismember(&self.schema().paused_job_groups_key(), group)
            .await
    }

    /// Groups a matcher applies to: the named group for an equality
    /// matcher (pausing a group works before it has members), the
    /// filtered registry for everything else.
    async fn groups_for_matcher(
        &self,
        groups_key: &str,
        matcher: &GroupMatcher,
    ) -> Result<Vec<String>> {
        match matcher.exact_group() {
            Some(group) => Ok(vec![group.to_string()]),
            None => self.matching_groups(groups_key, matcher).await,
        }
    }
}
