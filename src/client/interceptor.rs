//! Single-flight gate for token refresh.
//!
//! Many requests can observe an expired access token at once; only the first
//! may call the refresh endpoint. Everyone else parks a continuation and is
//! resumed, in registration order, with the outcome of that one call.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// `Some(token)` when the shared refresh succeeded, `None` when it failed
/// and the follower must give up.
pub(crate) type RefreshOutcome = Option<String>;

#[derive(Default)]
struct GateState {
    in_flight: bool,
    subscribers: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

pub(crate) enum Ticket {
    /// Caller must perform the refresh and then call [`RefreshGate::resolve`].
    Leader,
    /// Caller waits for the leader's outcome.
    Follower(oneshot::Receiver<RefreshOutcome>),
}

/// Process-wide refresh serialization. The mutex is only ever held for
/// pointer-sized bookkeeping, never across an await.
#[derive(Default)]
pub(crate) struct RefreshGate {
    state: Mutex<GateState>,
}

impl RefreshGate {
    /// Join the current refresh cycle, starting one if none is running.
    pub(crate) fn join(&self) -> Ticket {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.in_flight {
            let (tx, rx) = oneshot::channel();
            state.subscribers.push_back(tx);
            Ticket::Follower(rx)
        } else {
            state.in_flight = true;
            Ticket::Leader
        }
    }

    /// End the cycle, resuming every parked follower in FIFO order.
    pub(crate) fn resolve(&self, outcome: &RefreshOutcome) {
        let subscribers = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state.in_flight = false;
            std::mem::take(&mut state.subscribers)
        };
        for subscriber in subscribers {
            // A follower that dropped its receiver stopped caring; fine.
            let _ = subscriber.send(outcome.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_joiner_leads_rest_follow() {
        let gate = RefreshGate::default();
        assert!(matches!(gate.join(), Ticket::Leader));
        assert!(matches!(gate.join(), Ticket::Follower(_)));
        assert!(matches!(gate.join(), Ticket::Follower(_)));
    }

    #[tokio::test]
    async fn followers_resume_with_leader_outcome() {
        let gate = RefreshGate::default();
        let Ticket::Leader = gate.join() else {
            panic!("expected leadership");
        };
        let Ticket::Follower(first) = gate.join() else {
            panic!("expected follower");
        };
        let Ticket::Follower(second) = gate.join() else {
            panic!("expected follower");
        };

        gate.resolve(&Some("fresh-token".to_string()));

        assert_eq!(first.await.unwrap().as_deref(), Some("fresh-token"));
        assert_eq!(second.await.unwrap().as_deref(), Some("fresh-token"));
    }

    #[tokio::test]
    async fn failure_resumes_followers_with_none() {
        let gate = RefreshGate::default();
        let Ticket::Leader = gate.join() else {
            panic!("expected leadership");
        };
        let Ticket::Follower(follower) = gate.join() else {
            panic!("expected follower");
        };

        gate.resolve(&None);
        assert!(follower.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gate_reopens_after_resolution() {
        let gate = RefreshGate::default();
        let Ticket::Leader = gate.join() else {
            panic!("expected leadership");
        };
        gate.resolve(&Some("token".to_string()));
        assert!(matches!(gate.join(), Ticket::Leader));
    }
}
