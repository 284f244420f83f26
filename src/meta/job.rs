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

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::JobKey;
use crate::errors::{Error, Result};

/// Job parameters, persisted as its own hash next to the job. Values are
/// opaque strings to the store.
pub type JobDataMap = HashMap<String, String>;

/// The stored description of an executable unit. The job class identifier
/// and the data map are opaque; the store only interprets the flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    /// Identifier the host scheduler resolves to executable code.
    pub job_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A durable job persists with no triggers left; a non-durable one is
    /// removed together with its last trigger.
    #[serde(default)]
    pub durable: bool,
    /// Re-fire this job if the instance executing it crashes.
    #[serde(default)]
    pub requests_recovery: bool,
    /// Forbid overlapping executions of this job across the cluster.
    #[serde(default)]
    pub disallow_concurrent: bool,
    /// Write the possibly mutated data map back after each execution.
    #[serde(default)]
    pub persist_data_after_execution: bool,
    #[serde(default)]
    pub data: JobDataMap,
}

impl JobDetail {
    pub fn new(key: JobKey, job_class: &str) -> Self {
        Self {
            key,
            job_class: job_class.to_string(),
            description: None,
            durable: false,
            requests_recovery: false,
            disallow_concurrent: false,
            persist_data_after_execution: false,
            data: JobDataMap::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_durability(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_requests_recovery(mut self, requests_recovery: bool) -> Self {
        self.requests_recovery = requests_recovery;
        self
    }

    pub fn with_disallow_concurrent(mut self, disallow_concurrent: bool) -> Self {
        self.disallow_concurrent = disallow_concurrent;
        self
    }

    pub fn with_persist_data_after_execution(mut self, persist: bool) -> Self {
        self.persist_data_after_execution = persist;
        self
    }

    pub fn with_data(mut self, data: JobDataMap) -> Self {
        self.data = data;
        self
    }

    /// Flatten into the field/value pairs of the job hash. The data map is
    /// not part of it, it lives in its own hash.
    pub fn to_hash(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("job_class".to_string(), self.job_class.clone()),
            ("durable".to_string(), self.durable.to_string()),
            (
                "requests_recovery".to_string(),
                self.requests_recovery.to_string(),
            ),
            (
                "disallow_concurrent".to_string(),
                self.disallow_concurrent.to_string(),
            ),
            (
                "persist_data_after_execution".to_string(),
                self.persist_data_after_execution.to_string(),
            ),
        ];
        if let Some(desc) = &self.description {
            fields.push(("description".to_string(), desc.clone()));
        }
        fields
    }

    /// Rebuild from a job hash read back from Redis.
    pub fn from_hash(key: JobKey, hash: &HashMap<String, String>) -> Result<Self> {
        let job_class = hash
            .get("job_class")
            .cloned()
            .ok_or_else(|| Error::Decode(format!("job {key} hash has no job_class field")))?;
        Ok(Self {
            job_class,
            description: hash.get("description").cloned(),
            durable: parse_flag(&key, hash, "durable")?,
            requests_recovery: parse_flag(&key, hash, "requests_recovery")?,
            disallow_concurrent: parse_flag(&key, hash, "disallow_concurrent")?,
            persist_data_after_execution: parse_flag(&key, hash, "persist_data_after_execution")?,
            data: JobDataMap::new(),
            key,
        })
    }
}

fn parse_flag(key: &JobKey, hash: &HashMap<String, String>, field: &str) -> Result<bool> {
    match hash.get(field) {
        None => Ok(false),
        Some(v) => v
            .parse::<bool>()
            .map_err(|_| Error::Decode(format!("job {key} field {field} is not a bool: {v}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_roundtrip() {
        let job = JobDetail::new(JobKey::new("cleanup", "maintenance"), "jobs.CleanupJob")
            .with_description("nightly temp file sweep")
            .with_durability(true)
            .with_requests_recovery(true)
            .with_disallow_concurrent(true);
        let hash: HashMap<String, String> = job.to_hash().into_iter().collect();
        let parsed = JobDetail::from_hash(job.key.clone(), &hash).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn test_missing_flags_default_to_false() {
        let mut hash = HashMap::new();
        hash.insert("job_class".to_string(), "jobs.NoopJob".to_string());
        let job = JobDetail::from_hash(JobKey::with_default_group("noop"), &hash).unwrap();
        assert!(!job.durable);
        assert!(!job.requests_recovery);
        assert!(!job.disallow_concurrent);
        assert!(!job.persist_data_after_execution);
        assert!(job.description.is_none());
    }

    #[test]
    fn test_missing_class_is_decode_error() {
        let hash = HashMap::new();
        let err = JobDetail::from_hash(JobKey::with_default_group("broken"), &hash).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_corrupt_flag_is_decode_error() {
        let mut hash = HashMap::new();
        hash.insert("job_class".to_string(), "jobs.NoopJob".to_string());
        hash.insert("durable".to_string(), "yes".to_string());
        let err = JobDetail::from_hash(JobKey::with_default_group("broken"), &hash).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
