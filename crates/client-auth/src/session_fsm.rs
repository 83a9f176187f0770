//! Session lifecycle state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │   Hydrating     │ (initial)
//! └───┬─────────┬───┘
//!     │         │ NoSession / HydrationFailed / SignedOut
//!     │         ▼
//!     │   ┌─────────────────┐
//!     │   │   Anonymous     │ ◄──────────────┐
//!     │   └────────┬────────┘                │
//!     │            │ SignedIn                │ SignedOut / SessionExpired
//!     │ ProfileLoaded / SignedIn             │
//!     ▼            ▼                         │
//! ┌─────────────────────────────────┐        │
//! │         Authenticated           │ ───────┘
//! └─────────────────────────────────┘
//!   ▲ SignedIn / ProfileUpdated  │
//!   └────────────────────────────┘
//! ```
//!
//! The machine mirrors the in-memory session state. Whether a session exists
//! is still read from the credential store at the moment it is asked.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Hydrating)

    Hydrating => {
        ProfileLoaded => Authenticated,
        NoSession => Anonymous,
        HydrationFailed => Anonymous,
        SignedIn => Authenticated,
        SignedOut => Anonymous
    },
    Anonymous => {
        SignedIn => Authenticated,
        SignedOut => Anonymous
    },
    Authenticated => {
        SignedIn => Authenticated,
        ProfileUpdated => Authenticated,
        SignedOut => Anonymous,
        SessionExpired => Anonymous
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session phase for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Stored credentials have not been checked yet.
    Hydrating,
    /// No user is signed in.
    Anonymous,
    /// A user is signed in and their profile is loaded.
    Authenticated,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Hydrating => "hydrating",
            SessionPhase::Anonymous => "anonymous",
            SessionPhase::Authenticated => "authenticated",
        }
    }
}

impl From<&SessionMachineState> for SessionPhase {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Hydrating => SessionPhase::Hydrating,
            SessionMachineState::Anonymous => SessionPhase::Anonymous,
            SessionMachineState::Authenticated => SessionPhase::Authenticated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_hydrating() {
        let machine = SessionMachine::new();
        assert_eq!(SessionPhase::from(machine.state()), SessionPhase::Hydrating);
    }

    #[test]
    fn test_hydration_paths() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::ProfileLoaded).unwrap();
        assert_eq!(machine.state(), &SessionMachineState::Authenticated);

        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::HydrationFailed).unwrap();
        assert_eq!(machine.state(), &SessionMachineState::Anonymous);
    }

    #[test]
    fn test_sign_in_then_expire() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::NoSession).unwrap();
        machine.consume(&SessionMachineInput::SignedIn).unwrap();
        machine.consume(&SessionMachineInput::ProfileUpdated).unwrap();
        machine.consume(&SessionMachineInput::SessionExpired).unwrap();
        assert_eq!(machine.state(), &SessionMachineState::Anonymous);
    }

    #[test]
    fn test_sign_out_is_idempotent() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::SignedOut).unwrap();
        machine.consume(&SessionMachineInput::SignedOut).unwrap();
        assert_eq!(machine.state(), &SessionMachineState::Anonymous);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = SessionMachine::new();
        assert!(machine.consume(&SessionMachineInput::SessionExpired).is_err());
        assert!(machine.consume(&SessionMachineInput::ProfileUpdated).is_err());

        machine.consume(&SessionMachineInput::NoSession).unwrap();
        assert!(machine.consume(&SessionMachineInput::ProfileLoaded).is_err());
        assert!(machine.consume(&SessionMachineInput::SessionExpired).is_err());
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&SessionPhase::Authenticated).unwrap();
        assert_eq!(json, "\"authenticated\"");
    }
}
