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

use std::time::Duration;

/// Configuration for a [`RedisJobStore`](crate::jobstore::RedisJobStore).
///
/// Two schedulers sharing `key_prefix` (and the same Redis database) share
/// a cluster: the key set derived from the prefix is the wire-visible
/// contract between them.
#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    /// Prepended to every Redis key.
    pub key_prefix: String,
    /// Separator inside keys. Must not occur in job, trigger, group or
    /// calendar names; violations are rejected at store time.
    pub key_delimiter: String,
    /// Owner token embedded in fired-trigger records and the mutex value.
    pub instance_id: String,
    /// Redis connection string: endpoint, credentials and database index
    /// are all passed through to the client.
    pub url: String,
    /// How long an acquired trigger may sit in a fired-trigger record
    /// before orphan recovery returns it to the waiting set.
    pub trigger_lock_timeout: Duration,
    /// TTL of the distributed mutex key. A lock held past this is forfeit.
    pub redis_lock_timeout: Duration,
    /// A trigger whose next fire time is older than this is a misfire.
    pub misfire_threshold: Duration,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::from("quartz"),
            key_delimiter: String::from(":"),
            instance_id: String::from("default"),
            url: String::from("redis://127.0.0.1:6379/"),
            trigger_lock_timeout: Duration::from_secs(300),
            redis_lock_timeout: Duration::from_secs(5),
            misfire_threshold: Duration::from_secs(60),
        }
    }
}

impl JobStoreConfig {
    pub fn new(url: &str, instance_id: &str) -> Self {
        Self {
            url: url.to_string(),
            instance_id: instance_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: &str) -> Self {
        self.key_prefix = key_prefix.to_string();
        self
    }

    pub fn with_key_delimiter(mut self, key_delimiter: &str) -> Self {
        self.key_delimiter = key_delimiter.to_string();
        self
    }

    pub fn with_trigger_lock_timeout(mut self, timeout: Duration) -> Self {
        self.trigger_lock_timeout = timeout;
        self
    }

    pub fn with_redis_lock_timeout(mut self, timeout: Duration) -> Self {
        self.redis_lock_timeout = timeout;
        self
    }

    pub fn with_misfire_threshold(mut self, threshold: Duration) -> Self {
        self.misfire_threshold = threshold;
        self
    }

    pub fn trigger_lock_timeout_ms(&self) -> i64 {
        self.trigger_lock_timeout.as_millis() as i64
    }

    pub fn redis_lock_timeout_ms(&self) -> u64 {
        self.redis_lock_timeout.as_millis() as u64
    }

    pub fn misfire_threshold_ms(&self) -> i64 {
        self.misfire_threshold.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = JobStoreConfig::default();
        assert_eq!(cfg.key_prefix, "quartz");
        assert_eq!(cfg.key_delimiter, ":");
        assert_eq!(cfg.trigger_lock_timeout_ms(), 300_000);
        assert_eq!(cfg.redis_lock_timeout_ms(), 5_000);
        assert_eq!(cfg.misfire_threshold_ms(), 60_000);
    }

    #[test]
    fn test_builder_setters() {
        let cfg = JobStoreConfig::new("redis://redis-0:6379/2", "sched-a")
            .with_key_prefix("sched")
            .with_key_delimiter("|")
            .with_misfire_threshold(Duration::from_secs(5));
        assert_eq!(cfg.url, "redis://redis-0:6379/2");
        assert_eq!(cfg.instance_id, "sched-a");
        assert_eq!(cfg.key_prefix, "sched");
        assert_eq!(cfg.key_delimiter, "|");
        assert_eq!(cfg.misfire_threshold_ms(), 5_000);
    }
}
