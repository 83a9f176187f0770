//! Single-flight refresh coordination.
//!
//! ## State Diagram
//!
//! ```text
//!            first 401
//!   Idle ────────────────► Refreshing ◄──── later 401s join the waiter queue
//!    ▲                      │      │
//!    │  refresh succeeded   │      │ refresh failed
//!    └──────────────────────┘      ▼
//!    ▲                           Failed ── 401 ──► rejected immediately
//!    │ reset (sign-in)             │
//!    └─────────────────────────────┘
//! ```
//!
//! At most one refresh is outstanding. Every caller that observes a 401 while
//! it runs waits on the same outcome; the outcome is delivered to every waiter
//! exactly once.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Result of one refresh operation, shared by all of its waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { access_token: String },
    Failed { reason: String },
}

/// Externally visible refresh state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPhase {
    Idle,
    Refreshing,
    Failed,
}

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
    Failed,
}

impl RefreshState {
    fn phase(&self) -> RefreshPhase {
        match self {
            RefreshState::Idle => RefreshPhase::Idle,
            RefreshState::Refreshing { .. } => RefreshPhase::Refreshing,
            RefreshState::Failed => RefreshPhase::Failed,
        }
    }
}

/// What a caller that observed a 401 should do next.
#[derive(Debug)]
pub(crate) enum RefreshTicket {
    /// The caller opened a new refresh and must start it; its own outcome
    /// arrives on the receiver like everyone else's.
    Leader(oneshot::Receiver<RefreshOutcome>),
    /// A refresh is already running; wait for its outcome.
    Follower(oneshot::Receiver<RefreshOutcome>),
    /// The session already failed; do not refresh.
    Rejected,
}

/// Tagged state machine with an explicit waiter queue.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    started: AtomicU64,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            started: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current phase.
    pub fn phase(&self) -> RefreshPhase {
        self.state().phase()
    }

    /// Number of refresh operations started since creation.
    pub fn refreshes_started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Register interest in a refresh.
    ///
    /// `fresh_credentials` says whether a new refresh token was stored since
    /// the last failure; only then may a `Failed` coordinator start again.
    pub(crate) fn join(&self, fresh_credentials: bool) -> RefreshTicket {
        let mut state = self.state();
        let (tx, rx) = oneshot::channel();

        if let RefreshState::Refreshing { waiters } = &mut *state {
            waiters.push(tx);
            debug!(waiting = waiters.len(), "Joined in-flight refresh");
            return RefreshTicket::Follower(rx);
        }

        if matches!(*state, RefreshState::Failed) && !fresh_credentials {
            return RefreshTicket::Rejected;
        }

        *state = RefreshState::Refreshing { waiters: vec![tx] };
        self.started.fetch_add(1, Ordering::SeqCst);
        debug!("Opened new refresh");
        RefreshTicket::Leader(rx)
    }

    /// Finish the in-flight refresh and wake every waiter.
    ///
    /// Returns how many waiters were notified.
    pub(crate) fn complete(&self, outcome: RefreshOutcome) -> usize {
        let next = match outcome {
            RefreshOutcome::Refreshed { .. } => RefreshState::Idle,
            RefreshOutcome::Failed { .. } => RefreshState::Failed,
        };

        let previous = std::mem::replace(&mut *self.state(), next);
        let waiters = match previous {
            RefreshState::Refreshing { waiters } => waiters,
            other => {
                warn!(phase = ?other.phase(), "Refresh completed while none was in flight");
                Vec::new()
            }
        };

        let notified = waiters.len();
        for waiter in waiters {
            // A waiter whose caller was dropped has nobody left to tell.
            let _ = waiter.send(outcome.clone());
        }
        notified
    }

    /// Leave `Failed` after new credentials were established.
    ///
    /// An in-flight refresh is left alone.
    pub fn reset(&self) {
        let mut state = self.state();
        if matches!(*state, RefreshState::Failed) {
            *state = RefreshState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refreshed(token: &str) -> RefreshOutcome {
        RefreshOutcome::Refreshed {
            access_token: token.to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_caller_leads_and_others_follow() {
        let coordinator = RefreshCoordinator::new();

        let leader = coordinator.join(false);
        let follower = coordinator.join(false);
        assert!(matches!(leader, RefreshTicket::Leader(_)));
        assert!(matches!(follower, RefreshTicket::Follower(_)));
        assert_eq!(coordinator.phase(), RefreshPhase::Refreshing);
        assert_eq!(coordinator.refreshes_started(), 1);

        assert_eq!(coordinator.complete(refreshed("new")), 2);
        assert_eq!(coordinator.phase(), RefreshPhase::Idle);

        for ticket in [leader, follower] {
            let rx = match ticket {
                RefreshTicket::Leader(rx) | RefreshTicket::Follower(rx) => rx,
                RefreshTicket::Rejected => panic!("unexpected rejection"),
            };
            assert_eq!(rx.await.unwrap(), refreshed("new"));
        }
    }

    #[tokio::test]
    async fn test_failure_is_sticky_until_fresh_credentials() {
        let coordinator = RefreshCoordinator::new();

        let RefreshTicket::Leader(rx) = coordinator.join(false) else {
            panic!("expected leader");
        };
        coordinator.complete(RefreshOutcome::Failed {
            reason: "boom".to_string(),
        });
        assert!(matches!(rx.await.unwrap(), RefreshOutcome::Failed { .. }));
        assert_eq!(coordinator.phase(), RefreshPhase::Failed);

        assert!(matches!(coordinator.join(false), RefreshTicket::Rejected));
        assert!(matches!(coordinator.join(true), RefreshTicket::Leader(_)));
        assert_eq!(coordinator.refreshes_started(), 2);
    }

    #[test]
    fn test_reset_only_leaves_failed() {
        let coordinator = RefreshCoordinator::new();

        let _ticket = coordinator.join(false);
        coordinator.reset();
        assert_eq!(coordinator.phase(), RefreshPhase::Refreshing);

        coordinator.complete(RefreshOutcome::Failed {
            reason: "x".to_string(),
        });
        coordinator.reset();
        assert_eq!(coordinator.phase(), RefreshPhase::Idle);
    }

    #[test]
    fn test_dropped_waiter_does_not_block_completion() {
        let coordinator = RefreshCoordinator::new();

        drop(coordinator.join(false));
        let _kept = coordinator.join(false);

        assert_eq!(coordinator.complete(refreshed("t")), 2);
        assert_eq!(coordinator.phase(), RefreshPhase::Idle);
    }

    #[test]
    fn test_complete_without_refresh_is_harmless() {
        let coordinator = RefreshCoordinator::new();
        assert_eq!(coordinator.complete(refreshed("t")), 0);
        assert_eq!(coordinator.phase(), RefreshPhase::Idle);
    }
}
