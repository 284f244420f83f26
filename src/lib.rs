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

pub mod config;
pub mod dist_lock;
pub mod errors;
pub mod jobstore;
pub mod meta;
pub mod schema;
pub mod serializer;
pub mod storage;

pub use config::JobStoreConfig;
pub use errors::{Error, Result};
pub use jobstore::{JobStore, NoopSignaler, RedisJobStore, SchedulerSignaler};
pub use meta::{
    Calendar, CompletedInstruction, FiredTrigger, GroupMatcher, JobDataMap, JobDetail, JobKey,
    Trigger, TriggerFiredResult, TriggerKey, TriggerSchedule, TriggerState,
};
pub use serializer::{JsonSerializer, Serializer};
