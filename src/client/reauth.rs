//! Suspend-and-resume bookkeeping for step-up authentication.
//!
//! When the server answers a sensitive operation with "re-enter your
//! password", that one operation is parked here together with its caller's
//! continuations. After a successful password round-trip the operation is
//! replayed with its original arguments and the outcome routed to whichever
//! continuations were registered, so the caller never learns that a
//! reauthentication happened in between.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::ClientError;

/// The sensitive operations that can be suspended and replayed. A closed set:
/// adding a new reauth-gated call means adding a variant here, and the
/// compiler finds every match that needs updating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOp {
    ChangePassword {
        current_password: String,
        new_password: String,
    },
    ChangeEmail {
        email: String,
    },
    DeleteAccount,
    CheckReauth,
}

/// Caller continuations for a parked operation.
pub struct ResumeHandlers {
    pub on_success: Box<dyn FnOnce(Value) + Send>,
    pub on_error: Box<dyn FnOnce(ClientError) + Send>,
}

pub(crate) struct PendingOp {
    pub(crate) op: RetryOp,
    pub(crate) handlers: ResumeHandlers,
}

/// Password-prompt UI state. The prompt is persistent: a wrong password
/// keeps it open, only success or an explicit cancel closes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    Closed,
    Prompting { callback_id: Uuid },
}

fn relaxed<T>(guard: Result<T, std::sync::PoisonError<T>>) -> T {
    guard.unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Owns the pending-operation map and the prompt state machine.
#[derive(Default)]
pub struct ReauthCoordinator {
    pending: Mutex<HashMap<Uuid, PendingOp>>,
    prompt: Mutex<Option<Uuid>>,
}

impl ReauthCoordinator {
    /// Park an operation the server challenged and open the prompt for it.
    /// Returns the callback id the prompt is now bound to.
    pub(crate) fn challenge(&self, op: RetryOp, handlers: ResumeHandlers) -> Uuid {
        let callback_id = Uuid::new_v4();
        relaxed(self.pending.lock()).insert(callback_id, PendingOp { op, handlers });
        *relaxed(self.prompt.lock()) = Some(callback_id);
        callback_id
    }

    /// Claim the operation bound to the prompt, closing the prompt.
    ///
    /// `None` means there is nothing to resume: a manual dismissal raced the
    /// resolution. Callers treat that as a no-op, not an error.
    pub(crate) fn resolve(&self) -> Option<PendingOp> {
        let callback_id = relaxed(self.prompt.lock()).take()?;
        relaxed(self.pending.lock()).remove(&callback_id)
    }

    /// User gave up: evict the parked operation so it cannot leak. Its
    /// continuations are dropped unresolved.
    pub fn cancel(&self) {
        if let Some(callback_id) = relaxed(self.prompt.lock()).take() {
            relaxed(self.pending.lock()).remove(&callback_id);
        }
    }

    #[must_use]
    pub fn prompt_state(&self) -> PromptState {
        relaxed(self.prompt.lock()).map_or(PromptState::Closed, |callback_id| {
            PromptState::Prompting { callback_id }
        })
    }

    /// Wrong password: the prompt stays bound to the same operation.
    pub(crate) fn is_prompting(&self) -> bool {
        relaxed(self.prompt.lock()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn noop_handlers() -> ResumeHandlers {
        ResumeHandlers {
            on_success: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
        }
    }

    #[test]
    fn challenge_opens_prompt_bound_to_op() {
        let coordinator = ReauthCoordinator::default();
        assert_eq!(coordinator.prompt_state(), PromptState::Closed);

        let id = coordinator.challenge(RetryOp::DeleteAccount, noop_handlers());
        assert_eq!(
            coordinator.prompt_state(),
            PromptState::Prompting { callback_id: id }
        );
    }

    #[test]
    fn resolve_returns_parked_op_and_closes_prompt() {
        let coordinator = ReauthCoordinator::default();
        coordinator.challenge(
            RetryOp::ChangeEmail {
                email: "new@example.com".to_string(),
            },
            noop_handlers(),
        );

        let pending = coordinator.resolve().expect("op should be parked");
        assert_eq!(
            pending.op,
            RetryOp::ChangeEmail {
                email: "new@example.com".to_string()
            }
        );
        assert_eq!(coordinator.prompt_state(), PromptState::Closed);
    }

    #[test]
    fn resolve_without_challenge_is_nothing_to_resume() {
        let coordinator = ReauthCoordinator::default();
        assert!(coordinator.resolve().is_none());
    }

    #[test]
    fn cancel_evicts_without_running_continuations() {
        let fired = Arc::new(AtomicBool::new(false));
        let on_success_fired = Arc::clone(&fired);
        let on_error_fired = Arc::clone(&fired);

        let coordinator = ReauthCoordinator::default();
        coordinator.challenge(
            RetryOp::CheckReauth,
            ResumeHandlers {
                on_success: Box::new(move |_| on_success_fired.store(true, Ordering::SeqCst)),
                on_error: Box::new(move |_| on_error_fired.store(true, Ordering::SeqCst)),
            },
        );

        coordinator.cancel();
        assert_eq!(coordinator.prompt_state(), PromptState::Closed);
        assert!(coordinator.resolve().is_none());
        assert!(!fired.load(Ordering::SeqCst));
    }
}
