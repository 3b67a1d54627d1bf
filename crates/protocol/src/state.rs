//! Handshake state machines for both sides of a session
//!
//! State transitions:
//! ```text
//! Host:  IDLE → AWAITING_LOAD → OFFERING → ESTABLISHED
//!          ↓          ↓             ↓
//!          └──────────┴─────────────┴──────→ FAILED
//!
//! Child: IDLE → LISTENING → ESTABLISHED
//!                   ↓
//!                   └──────→ TIMED_OUT
//! ```

use crate::error::{HandshakeError, Result};

/// Host-side handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostState {
    /// Nothing embedded yet
    #[default]
    Idle,

    /// Child embedded, waiting for load or the fallback delay
    AwaitingLoad,

    /// Sending offers and waiting for an offer-ack
    Offering,

    /// Offer-ack received from the embedded counterpart
    Established,

    /// Handshake gave up; all resources released
    Failed,
}

impl HostState {
    /// Validates a state transition
    pub fn can_transition_to(&self, next: HostState) -> bool {
        use HostState::*;

        match (self, next) {
            (Idle, AwaitingLoad) => true,
            (Idle, Failed) => true, // embedding failed

            (AwaitingLoad, Offering) => true,
            (AwaitingLoad, Failed) => true,

            (Offering, Established) => true,
            (Offering, Failed) => true, // timeout or protocol violation

            (a, b) if a == &b => true,

            _ => false,
        }
    }

    /// Attempts to transition to a new state
    pub fn transition_to(&mut self, next: HostState) -> Result<()> {
        if self.can_transition_to(next) {
            tracing::trace!(from = %self, to = %next, "Host handshake transition");
            *self = next;
            Ok(())
        } else {
            Err(HandshakeError::InvalidHostTransition { from: *self, to: next })
        }
    }

    #[inline]
    pub fn is_established(&self) -> bool {
        matches!(self, HostState::Established)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, HostState::Established | HostState::Failed)
    }
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostState::Idle => write!(f, "Idle"),
            HostState::AwaitingLoad => write!(f, "AwaitingLoad"),
            HostState::Offering => write!(f, "Offering"),
            HostState::Established => write!(f, "Established"),
            HostState::Failed => write!(f, "Failed"),
        }
    }
}

/// Child-side handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildState {
    #[default]
    Idle,

    /// Interception filter and handshake listener installed
    Listening,

    /// Offer received and acknowledged
    Established,

    /// No qualifying offer arrived in time
    TimedOut,
}

impl ChildState {
    /// Validates a state transition
    pub fn can_transition_to(&self, next: ChildState) -> bool {
        use ChildState::*;

        match (self, next) {
            (Idle, Listening) => true,
            (Listening, Established) => true,
            (Listening, TimedOut) => true,
            (a, b) if a == &b => true,
            _ => false,
        }
    }

    /// Attempts to transition to a new state
    pub fn transition_to(&mut self, next: ChildState) -> Result<()> {
        if self.can_transition_to(next) {
            tracing::trace!(from = %self, to = %next, "Child handshake transition");
            *self = next;
            Ok(())
        } else {
            Err(HandshakeError::InvalidChildTransition { from: *self, to: next })
        }
    }

    #[inline]
    pub fn is_established(&self) -> bool {
        matches!(self, ChildState::Established)
    }
}

impl std::fmt::Display for ChildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildState::Idle => write!(f, "Idle"),
            ChildState::Listening => write!(f, "Listening"),
            ChildState::Established => write!(f, "Established"),
            ChildState::TimedOut => write!(f, "TimedOut"),
        }
    }
}
