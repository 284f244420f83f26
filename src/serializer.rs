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

use bytes::Bytes;

use crate::{
    errors::{Error, Result},
    meta::{Calendar, FiredTrigger},
};

/// Byte-level codec for the payloads the store persists as opaque blobs:
/// calendars and fired-trigger records. Jobs and triggers are flat hashes
/// (the wire-visible schema) and do not route through here.
///
/// `decode(encode(x))` must reconstruct an equal value. Implementations
/// must reject unrecognized input with [`Error::Decode`] so corrupt
/// entries can be surfaced and quarantined rather than silently skipped.
pub trait Serializer: Send + Sync + 'static {
    fn encode_calendar(&self, calendar: &Calendar) -> Result<Bytes>;
    fn decode_calendar(&self, raw: &[u8]) -> Result<Calendar>;
    fn encode_fired_trigger(&self, fired: &FiredTrigger) -> Result<Bytes>;
    fn decode_fired_trigger(&self, raw: &[u8]) -> Result<FiredTrigger>;
}

/// The default codec: plain JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode_calendar(&self, calendar: &Calendar) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(calendar)?))
    }

    fn decode_calendar(&self, raw: &[u8]) -> Result<Calendar> {
        serde_json::from_slice(raw)
            .map_err(|e| Error::Decode(format!("calendar payload is not valid JSON: {e}")))
    }

    fn encode_fired_trigger(&self, fired: &FiredTrigger) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(fired)?))
    }

    fn decode_fired_trigger(&self, raw: &[u8]) -> Result<FiredTrigger> {
        serde_json::from_slice(raw)
            .map_err(|e| Error::Decode(format!("fired trigger record is not valid JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{JobKey, TriggerKey, TriggerState};

    #[test]
    fn test_calendar_roundtrip() {
        let serializer = JsonSerializer;
        let cal = Calendar::Weekly {
            description: Some("weekdays only".to_string()),
            excluded_days: vec![5, 6],
        };
        let raw = serializer.encode_calendar(&cal).unwrap();
        assert_eq!(serializer.decode_calendar(&raw).unwrap(), cal);
    }

    #[test]
    fn test_fired_trigger_roundtrip() {
        let serializer = JsonSerializer;
        let fired = FiredTrigger {
            trigger_key: TriggerKey::new("t1", "g"),
            job_key: JobKey::new("j1", "g"),
            instance_id: "sched-a".to_string(),
            fired_at: 1_700_000_000_000,
            sched_time: None,
            priority: 5,
            state: TriggerState::Executing,
            requests_recovery: false,
            disallow_concurrent: true,
        };
        let raw = serializer.encode_fired_trigger(&fired).unwrap();
        assert_eq!(serializer.decode_fired_trigger(&raw).unwrap(), fired);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let serializer = JsonSerializer;
        let err = serializer.decode_calendar(b"\x00\x01not json").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        let err = serializer.decode_fired_trigger(b"{}").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
