use crate::channel::EndpointId;
use crate::message::MessageKind;
use crate::state::{ChildState, HostState};
use thiserror::Error;

/// Reasons the wire validator refuses an inbound message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Message carries no payload")]
    Absent,

    #[error("Payload is not a structured record")]
    NotRecord,

    #[error("Payload has no recognized kind")]
    UnknownKind,

    #[error("Protocol tag mismatch: {0:?}")]
    TagMismatch(Option<String>),

    #[error("Origin mismatch: expected {expected}, got {actual}")]
    OriginMismatch { expected: String, actual: String },

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Failures that end a handshake on either side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("No offer-ack received after {attempts} offers")]
    Timeout { attempts: u32 },

    #[error("No offer received within {waited_ms}ms")]
    ChildTimeout { waited_ms: u64 },

    #[error("Handshake protocol violation: expected offer-ack, got {kind}")]
    ProtocolViolation { kind: MessageKind },

    #[error("Failed to embed child context: {0}")]
    Embed(String),

    #[error("Failed to encode handshake message: {0}")]
    Encode(String),

    #[error("Invalid tuning: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Invalid host state transition: {from} -> {to}")]
    InvalidHostTransition { from: HostState, to: HostState },

    #[error("Invalid child state transition: {from} -> {to}")]
    InvalidChildTransition { from: ChildState, to: ChildState },
}

/// Synchronous failure when constructing a child session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("A child session already exists for endpoint {0}")]
    DuplicateSession(EndpointId),
}

/// Failures surfaced by an established session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session closed")]
    Closed,

    #[error("No reply for {property} within {waited_ms}ms")]
    Timeout { property: String, waited_ms: u64 },

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to parse tuning: {0}")]
    Parse(String),

    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, HandshakeError>;
