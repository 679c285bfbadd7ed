//! Lifecycle state machine for match status transitions.
//!
//! The table is the single authority on which edges exist; services compute
//! the next status here and rely on the store's conditional write to make the
//! transition stick exactly once under concurrent observers.

use thiserror::Error;

use crate::dao::models::MatchStatus;

/// Events that can advance a match through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Both teams reached capacity after a join.
    TeamsFilled,
    /// Explicit settlement call while playing.
    Settled,
    /// The configured playing duration elapsed.
    Expired,
    /// A member cancelled the match before play started.
    Cancelled,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Status the match was in when the invalid event was received.
    pub from: MatchStatus,
    /// The event that cannot be applied from this status.
    pub event: LifecycleEvent,
}

/// Compute the status after applying an event, if the transition is valid.
///
/// `Finished` and `Cancelled` are absorbing; no event leads out of them, and
/// nothing ever returns to `Matching`.
pub fn next_status(
    from: MatchStatus,
    event: LifecycleEvent,
) -> Result<MatchStatus, InvalidTransition> {
    let next = match (from, event) {
        (MatchStatus::Matching, LifecycleEvent::TeamsFilled) => MatchStatus::Playing,
        (MatchStatus::Matching, LifecycleEvent::Cancelled) => MatchStatus::Cancelled,
        (MatchStatus::Playing, LifecycleEvent::Settled) => MatchStatus::Finished,
        (MatchStatus::Playing, LifecycleEvent::Expired) => MatchStatus::Finished,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_matching_playing_finished() {
        let playing = next_status(MatchStatus::Matching, LifecycleEvent::TeamsFilled).unwrap();
        assert_eq!(playing, MatchStatus::Playing);

        let finished = next_status(playing, LifecycleEvent::Expired).unwrap();
        assert_eq!(finished, MatchStatus::Finished);
    }

    #[test]
    fn settlement_also_finishes_a_playing_match() {
        assert_eq!(
            next_status(MatchStatus::Playing, LifecycleEvent::Settled).unwrap(),
            MatchStatus::Finished
        );
    }

    #[test]
    fn cancel_only_escapes_from_matching() {
        assert_eq!(
            next_status(MatchStatus::Matching, LifecycleEvent::Cancelled).unwrap(),
            MatchStatus::Cancelled
        );

        let err = next_status(MatchStatus::Playing, LifecycleEvent::Cancelled).unwrap_err();
        assert_eq!(err.from, MatchStatus::Playing);
    }

    #[test]
    fn terminal_statuses_are_absorbing() {
        for terminal in [MatchStatus::Finished, MatchStatus::Cancelled] {
            for event in [
                LifecycleEvent::TeamsFilled,
                LifecycleEvent::Settled,
                LifecycleEvent::Expired,
                LifecycleEvent::Cancelled,
            ] {
                assert!(
                    next_status(terminal, event).is_err(),
                    "{terminal:?} must absorb {event:?}"
                );
            }
        }
    }

    #[test]
    fn nothing_returns_to_matching() {
        for from in [
            MatchStatus::Matching,
            MatchStatus::Playing,
            MatchStatus::Finished,
            MatchStatus::Cancelled,
        ] {
            for event in [
                LifecycleEvent::TeamsFilled,
                LifecycleEvent::Settled,
                LifecycleEvent::Expired,
                LifecycleEvent::Cancelled,
            ] {
                if let Ok(next) = next_status(from, event) {
                    assert_ne!(next, MatchStatus::Matching);
                }
            }
        }
    }
}
