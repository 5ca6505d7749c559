//! Append-only attendance log.
//!
//! The recorder never deduplicates: suppressing duplicate events is the
//! detection coordinator's job (cooldown gating). Events are kept newest
//! first, which is the display order of the attendance feed.

use crate::types::{AttendanceEvent, AttendanceStatus};
use chrono::{DateTime, Utc};

/// In-memory attendance event log, newest first.
#[derive(Default)]
pub struct AttendanceRecorder {
    events: Vec<AttendanceEvent>,
    seq: u64,
}

impl AttendanceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a recorder from persisted events (already newest first).
    pub fn from_events(events: Vec<AttendanceEvent>) -> Self {
        let seq = events.len() as u64;
        Self { events, seq }
    }

    /// Append one attendance event stamped with the current time.
    ///
    /// Always succeeds and always creates a new event. Event ids are
    /// monotonic-ish: epoch milliseconds plus a per-recorder sequence, so
    /// two events in the same millisecond still get distinct ids.
    pub fn record(
        &mut self,
        identity_id: &str,
        display_name: &str,
        status: AttendanceStatus,
    ) -> AttendanceEvent {
        let occurred_at = Utc::now();
        self.seq += 1;
        let event = AttendanceEvent {
            id: format!("{}-{}-{}", occurred_at.timestamp_millis(), self.seq, identity_id),
            identity_id: identity_id.to_string(),
            display_name: display_name.to_string(),
            occurred_at,
            status,
        };
        tracing::info!(
            event = %event.id,
            identity = identity_id,
            status = status.as_str(),
            "attendance recorded"
        );
        self.events.insert(0, event.clone());
        event
    }

    /// All events, newest first.
    pub fn all(&self) -> &[AttendanceEvent] {
        &self.events
    }

    /// Events for one identity, in an order consistent with insertion.
    pub fn query_by_identity(&self, identity_id: &str) -> Vec<AttendanceEvent> {
        self.events
            .iter()
            .filter(|e| e.identity_id == identity_id)
            .cloned()
            .collect()
    }

    /// Events with `occurred_at` within the inclusive bounds. Either bound
    /// may be absent. Callers that need recency order sort explicitly.
    pub fn query_by_range(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<AttendanceEvent> {
        self.events
            .iter()
            .filter(|e| {
                from.map_or(true, |from| e.occurred_at >= from)
                    && to.map_or(true, |to| e.occurred_at <= to)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event_at(id: &str, identity: &str, ts: DateTime<Utc>) -> AttendanceEvent {
        AttendanceEvent {
            id: id.to_string(),
            identity_id: identity.to_string(),
            display_name: identity.to_uppercase(),
            occurred_at: ts,
            status: AttendanceStatus::Present,
        }
    }

    #[test]
    fn test_record_newest_first() {
        let mut recorder = AttendanceRecorder::new();
        let first = recorder.record("a", "Ann", AttendanceStatus::Present);
        let second = recorder.record("b", "Ben", AttendanceStatus::Present);
        assert_eq!(recorder.all()[0].id, second.id);
        assert_eq!(recorder.all()[1].id, first.id);
    }

    #[test]
    fn test_rapid_records_get_distinct_ids() {
        let mut recorder = AttendanceRecorder::new();
        let a = recorder.record("a", "Ann", AttendanceStatus::Present);
        let b = recorder.record("a", "Ann", AttendanceStatus::Present);
        let c = recorder.record("a", "Ann", AttendanceStatus::Present);
        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_no_dedup_same_identity() {
        // Deduplication is the coordinator's responsibility, never ours.
        let mut recorder = AttendanceRecorder::new();
        recorder.record("a", "Ann", AttendanceStatus::Present);
        recorder.record("a", "Ann", AttendanceStatus::Present);
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn test_query_by_identity_filters() {
        let mut recorder = AttendanceRecorder::new();
        recorder.record("a", "Ann", AttendanceStatus::Present);
        recorder.record("b", "Ben", AttendanceStatus::Present);
        recorder.record("a", "Ann", AttendanceStatus::Absent);

        let events = recorder.query_by_identity("a");
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.identity_id == "a"));
    }

    #[test]
    fn test_query_by_range_inclusive_bounds() {
        let t = |h: u32| Utc.with_ymd_and_hms(2026, 3, 10, h, 0, 0).unwrap();
        let recorder = AttendanceRecorder::from_events(vec![
            event_at("3", "c", t(12)),
            event_at("2", "b", t(10)),
            event_at("1", "a", t(8)),
        ]);

        // Bounds are inclusive on both ends.
        let mid = recorder.query_by_range(Some(t(10)), Some(t(10)));
        assert_eq!(mid.len(), 1);
        assert_eq!(mid[0].id, "2");

        let from_only = recorder.query_by_range(Some(t(10)), None);
        assert_eq!(from_only.len(), 2);

        let to_only = recorder.query_by_range(None, Some(t(10)));
        assert_eq!(to_only.len(), 2);

        let unbounded = recorder.query_by_range(None, None);
        assert_eq!(unbounded.len(), 3);
    }

    #[test]
    fn test_from_events_continues_sequence() {
        let t = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
        let mut recorder = AttendanceRecorder::from_events(vec![event_at("old", "a", t)]);
        let new = recorder.record("a", "Ann", AttendanceStatus::Present);
        assert_eq!(recorder.len(), 2);
        assert_ne!(new.id, "old");
        assert_eq!(recorder.all()[0].id, new.id);
    }
}
