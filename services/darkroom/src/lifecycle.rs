//! Event lifecycle state machine.
//!
//! `evaluate` is a pure function of a handful of instants. It is meant to be
//! called on demand or from a scheduler tick; nothing here holds state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    NotStarted,
    Active,
    Ended,
    Revealed,
    Expired,
}

impl EventState {
    /// Capture is only permitted while the upload window is open
    pub fn can_capture(&self) -> bool {
        matches!(self, EventState::Active)
    }

    /// The gallery is only visible after the reveal and before expiry
    pub fn can_view_gallery(&self) -> bool {
        matches!(self, EventState::Revealed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::NotStarted => "not_started",
            EventState::Active => "active",
            EventState::Ended => "ended",
            EventState::Revealed => "revealed",
            EventState::Expired => "expired",
        }
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed event schedules
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Upload window starts at {start} but ends at {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// The instants that drive an event's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSchedule {
    pub upload_start: Option<DateTime<Utc>>,
    pub upload_end: Option<DateTime<Utc>>,
    pub reveal_time: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
}

impl EventSchedule {
    /// Check the schedule is well formed.
    ///
    /// The reveal and expiry may sit anywhere relative to the upload window;
    /// only an inverted window is rejected.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if let (Some(start), Some(end)) = (self.upload_start, self.upload_end) {
            if start > end {
                return Err(ScheduleError::InvalidWindow { start, end });
            }
        }

        Ok(())
    }

    /// State at `now`
    pub fn state_at(&self, now: DateTime<Utc>) -> EventState {
        evaluate(
            now,
            self.upload_start,
            self.upload_end,
            self.reveal_time,
            self.expiry_date,
        )
    }

    /// Guest-facing state: a malformed schedule reads as `NotStarted`
    pub fn guest_state_at(&self, now: DateTime<Utc>) -> EventState {
        match self.validate() {
            Ok(()) => self.state_at(now),
            Err(_) => EventState::NotStarted,
        }
    }

    /// Earliest boundary strictly after `now`, if any
    pub fn next_transition(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_transition(self, now)
    }
}

/// Decide the lifecycle state. First match wins:
/// expiry, reveal, upload end, upload start, otherwise not started.
pub fn evaluate(
    now: DateTime<Utc>,
    upload_start: Option<DateTime<Utc>>,
    upload_end: Option<DateTime<Utc>>,
    reveal_time: DateTime<Utc>,
    expiry_date: Option<DateTime<Utc>>,
) -> EventState {
    if expiry_date.is_some_and(|expiry| now >= expiry) {
        return EventState::Expired;
    }

    if now >= reveal_time {
        return EventState::Revealed;
    }

    if upload_end.is_some_and(|end| now >= end) {
        return EventState::Ended;
    }

    if upload_start.is_some_and(|start| now >= start) {
        return EventState::Active;
    }

    EventState::NotStarted
}

/// Earliest schedule instant strictly after `now` at which the evaluated
/// state changes. Boundaries that cannot change the outcome (an upload end
/// after the reveal, say) are skipped.
pub fn next_transition(schedule: &EventSchedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let current = schedule.state_at(now);

    [
        schedule.upload_start,
        schedule.upload_end,
        Some(schedule.reveal_time),
        schedule.expiry_date,
    ]
    .into_iter()
    .flatten()
    .filter(|instant| *instant > now)
    .filter(|instant| schedule.state_at(*instant) != current)
    .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn scenario_schedule() -> EventSchedule {
        EventSchedule {
            upload_start: Some(ts("2025-01-15T18:00:00Z")),
            upload_end: Some(ts("2025-01-16T06:00:00Z")),
            reveal_time: ts("2025-01-17T12:00:00Z"),
            expiry_date: None,
        }
    }

    #[test]
    fn test_scenario_active() {
        let state = scenario_schedule().state_at(ts("2025-01-15T19:00:00Z"));
        assert_eq!(state, EventState::Active);
        assert!(state.can_capture());
    }

    #[test]
    fn test_scenario_ended() {
        assert_eq!(
            scenario_schedule().state_at(ts("2025-01-16T07:00:00Z")),
            EventState::Ended
        );
    }

    #[test]
    fn test_scenario_revealed() {
        let state = scenario_schedule().state_at(ts("2025-01-17T13:00:00Z"));
        assert_eq!(state, EventState::Revealed);
        assert!(state.can_view_gallery());
    }

    #[test]
    fn test_scenario_expired_overrides_reveal() {
        let schedule = EventSchedule {
            expiry_date: Some(ts("2025-01-20T00:00:00Z")),
            ..scenario_schedule()
        };
        assert_eq!(
            schedule.state_at(ts("2025-01-21T00:00:00Z")),
            EventState::Expired
        );
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let schedule = scenario_schedule();
        assert_eq!(
            schedule.state_at(ts("2025-01-15T18:00:00Z")),
            EventState::Active
        );
        assert_eq!(
            schedule.state_at(ts("2025-01-16T06:00:00Z")),
            EventState::Ended
        );
        assert_eq!(
            schedule.state_at(ts("2025-01-17T12:00:00Z")),
            EventState::Revealed
        );
    }

    #[test]
    fn test_reveal_during_upload_window() {
        // Revealing early wins over the still-open window
        let schedule = EventSchedule {
            reveal_time: ts("2025-01-15T20:00:00Z"),
            ..scenario_schedule()
        };
        assert_eq!(
            schedule.state_at(ts("2025-01-15T21:00:00Z")),
            EventState::Revealed
        );
    }

    #[test]
    fn test_open_ended_window() {
        let schedule = EventSchedule {
            upload_start: None,
            upload_end: None,
            reveal_time: ts("2025-01-17T12:00:00Z"),
            expiry_date: None,
        };
        assert_eq!(
            schedule.state_at(ts("2025-01-16T00:00:00Z")),
            EventState::NotStarted
        );
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let schedule = EventSchedule {
            upload_start: Some(ts("2025-01-16T06:00:00Z")),
            upload_end: Some(ts("2025-01-15T18:00:00Z")),
            ..scenario_schedule()
        };

        assert!(matches!(
            schedule.validate(),
            Err(ScheduleError::InvalidWindow { .. })
        ));
        // The inverted window still evaluates without panicking, and guests
        // see the conservative state.
        let now = ts("2025-01-15T20:00:00Z");
        assert_eq!(schedule.state_at(now), EventState::Ended);
        assert_eq!(schedule.guest_state_at(now), EventState::NotStarted);
    }

    #[test]
    fn test_validate_accepts_early_expiry() {
        // Expiring before the reveal acts as a kill switch
        let schedule = EventSchedule {
            expiry_date: Some(ts("2025-01-17T00:00:00Z")),
            ..scenario_schedule()
        };
        assert!(schedule.validate().is_ok());
        assert_eq!(
            schedule.state_at(ts("2025-01-17T13:00:00Z")),
            EventState::Expired
        );
    }

    #[test]
    fn test_next_transition() {
        let schedule = EventSchedule {
            expiry_date: Some(ts("2025-01-20T00:00:00Z")),
            ..scenario_schedule()
        };

        assert_eq!(
            schedule.next_transition(ts("2025-01-15T12:00:00Z")),
            Some(ts("2025-01-15T18:00:00Z"))
        );
        assert_eq!(
            schedule.next_transition(ts("2025-01-15T19:00:00Z")),
            Some(ts("2025-01-16T06:00:00Z"))
        );
        assert_eq!(
            schedule.next_transition(ts("2025-01-16T07:00:00Z")),
            Some(ts("2025-01-17T12:00:00Z"))
        );
        assert_eq!(
            schedule.next_transition(ts("2025-01-18T00:00:00Z")),
            Some(ts("2025-01-20T00:00:00Z"))
        );
        assert_eq!(schedule.next_transition(ts("2025-01-21T00:00:00Z")), None);
    }

    #[test]
    fn test_next_transition_skips_shadowed_boundaries() {
        // Upload end after the reveal never changes the state
        let schedule = EventSchedule {
            upload_start: Some(ts("2025-01-15T18:00:00Z")),
            upload_end: Some(ts("2025-01-18T00:00:00Z")),
            reveal_time: ts("2025-01-17T12:00:00Z"),
            expiry_date: None,
        };
        assert_eq!(schedule.next_transition(ts("2025-01-17T13:00:00Z")), None);
    }

    fn instant() -> impl Strategy<Value = DateTime<Utc>> {
        (1_600_000_000i64..1_900_000_000i64).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
    }

    proptest! {
        #[test]
        fn prop_state_is_total(
            now in instant(),
            start in proptest::option::of(instant()),
            end in proptest::option::of(instant()),
            reveal in instant(),
            expiry in proptest::option::of(instant()),
        ) {
            let state = evaluate(now, start, end, reveal, expiry);
            let expected = if expiry.is_some_and(|e| now >= e) {
                EventState::Expired
            } else if now >= reveal {
                EventState::Revealed
            } else if end.is_some_and(|e| now >= e) {
                EventState::Ended
            } else if start.is_some_and(|s| now >= s) {
                EventState::Active
            } else {
                EventState::NotStarted
            };
            prop_assert_eq!(state, expected);
            prop_assert!(!(state.can_capture() && state.can_view_gallery()));
        }

        #[test]
        fn prop_expiry_dominates_reveal(
            now in instant(),
            start in proptest::option::of(instant()),
            end in proptest::option::of(instant()),
            reveal_back in 0i64..10_000_000,
            expiry_back in 0i64..10_000_000,
        ) {
            let reveal = now - chrono::Duration::seconds(reveal_back);
            let expiry = now - chrono::Duration::seconds(expiry_back);
            prop_assert_eq!(
                evaluate(now, start, end, reveal, Some(expiry)),
                EventState::Expired
            );
        }
    }
}
