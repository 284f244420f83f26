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

use once_cell::sync::Lazy;
use rand::Rng;
use redis::{Script, aio::ConnectionManager};

use crate::errors::Result;

static LOCK_SEQ: AtomicU64 = AtomicU64::new(0);

// delete only when the value is still our token
static UNLOCK_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#,
    )
});

const BACKOFF_MIN_MS: u64 = 10;
const BACKOFF_MAX_MS: u64 = 50;

/// The coarse distributed mutex serializing every store operation across
/// the cluster: one Redis key, set-if-absent with a TTL, value = a token
/// unique to this acquisition. Not reentrant and not fair; waiters spin
/// with bounded backoff until the key frees up or its TTL lapses.
pub struct Locker {
    conn: ConnectionManager,
    key: String,
    token: String,
    ttl_ms: u64,
    locked: bool,
}

impl Locker {
    pub fn new(conn: ConnectionManager, key: String, instance_id: &str, ttl_ms: u64) -> Self {
        let token = format!(
            "{instance_id}:{}",
            LOCK_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            conn,
            key,
            token,
            ttl_ms,
            locked: false,
        }
    }

    /// Block until the lock is ours. Retries forever; callers bound the
    /// wait with their own cancellation (dropping the future leaves the
    /// key to expire via its TTL).
    pub async fn lock(&mut self) -> Result<()> {
        let mut backoff = BACKOFF_MIN_MS;
        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&self.key)
                .arg(&self.token)
                .arg("NX")
                .arg("PX")
                .arg(self.ttl_ms)
                .query_async(&mut self.conn)
                .await?;
            if acquired.is_some() {
                self.locked = true;
                return Ok(());
            }
            let jitter = rand::rng().random_range(0..BACKOFF_MIN_MS);
            tokio::time::sleep(tokio::time::Duration::from_millis(backoff + jitter)).await;
            backoff = (backoff * 2).min(BACKOFF_MAX_MS);
        }
    }

    /// Release the lock if it is still ours. A token mismatch means the
    /// TTL lapsed and someone else holds the key now; that forfeit is
    /// logged, never raised.
    pub async fn unlock(&mut self) -> Result<()> {
        if !self.locked {
            return Ok(());
        }
        self.locked = false;
        let deleted: i64 = UNLOCK_SCRIPT
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut self.conn)
            .await?;
        if deleted == 0 {
            log::warn!(
                "[JOBSTORE] lock {} expired before release, token {} forfeited",
                self.key,
                self.token
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_per_acquisition() {
        let a = format!("sched-a:{}", LOCK_SEQ.fetch_add(1, Ordering::Relaxed));
        let b = format!("sched-a:{}", LOCK_SEQ.fetch_add(1, Ordering::Relaxed));
        assert_ne!(a, b);
    }
}
