use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// SSE-specific sub-state carved out from [`crate::state::AppState`].
///
/// Hubs are keyed so projections stay isolated: events for one match can
/// never leak into another match's stream.
pub struct SseState {
    capacity: usize,
    matches: DashMap<Uuid, broadcast::Sender<ServerEvent>>,
    waiting: DashMap<String, broadcast::Sender<ServerEvent>>,
}

impl SseState {
    /// Build the SSE sub-tree with a per-hub channel capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            matches: DashMap::new(),
            waiting: DashMap::new(),
        }
    }

    /// Register a subscriber for a single match's event stream.
    pub fn subscribe_match(&self, match_id: Uuid) -> broadcast::Receiver<ServerEvent> {
        self.matches
            .entry(match_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Register a subscriber for the waiting list of a match type.
    pub fn subscribe_waiting(&self, match_type: &str) -> broadcast::Receiver<ServerEvent> {
        self.waiting
            .entry(match_type.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send an event to the watchers of one match, ignoring delivery errors.
    pub fn broadcast_match(&self, match_id: Uuid, event: ServerEvent) {
        if let Some(sender) = self.matches.get(&match_id) {
            let _ = sender.send(event);
        }
    }

    /// Send an event to the watchers of a waiting list, ignoring delivery errors.
    pub fn broadcast_waiting(&self, match_type: &str, event: ServerEvent) {
        if let Some(sender) = self.waiting.get(match_type) {
            let _ = sender.send(event);
        }
    }

    /// Drop hubs nobody listens to anymore; called when a match is removed.
    pub fn prune_match(&self, match_id: Uuid) {
        self.matches
            .remove_if(&match_id, |_, sender| sender.receiver_count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_hubs_are_isolated() {
        let sse = SseState::new(8);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = sse.subscribe_match(a);
        let mut rx_b = sse.subscribe_match(b);

        sse.broadcast_match(
            a,
            ServerEvent {
                event: None,
                data: "for-a".into(),
            },
        );

        assert_eq!(rx_a.try_recv().unwrap().data, "for-a");
        assert!(rx_b.try_recv().is_err(), "b must not see a's events");
    }

    #[test]
    fn broadcast_without_subscribers_is_a_no_op() {
        let sse = SseState::new(8);
        sse.broadcast_waiting(
            "2v2",
            ServerEvent {
                event: None,
                data: "ignored".into(),
            },
        );
    }
}
