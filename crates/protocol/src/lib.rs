//! # Parley Protocol
//!
//! Shared building blocks for parley host and child sessions.
//!
//! This crate provides:
//! - `ProtocolMessage`: the wire format exchanged on the channel
//! - `validate` / `SessionFilter`: the gate every inbound delivery passes
//! - `Channel` / `Endpoint`: the in-process, broadcast-style message channel
//! - `Frame` / `Embedder`: the embedding container the host consumes
//! - `SessionRegistry` / `ConstructionGuard`: owned session stores
//! - `HostState` / `ChildState`: handshake state machines
//! - `Tuning`: handshake, replay and sweep constants
//! - Error types for every failure the core can surface
//!
//! ## Example
//!
//! ```
//! use parley_protocol::{validate, Channel, OriginFilter, ProtocolMessage, ANY_ORIGIN};
//! use serde_json::json;
//!
//! let channel = Channel::new();
//! let host = channel.create_context("https://host.example", None);
//! let child = channel.create_context("https://child.example", Some(host.id()));
//! let mut inbox = child.listen();
//!
//! host.post(child.id(), ANY_ORIGIN, &ProtocolMessage::invoke("resize", json!(300))).unwrap();
//!
//! let delivery = inbox.try_recv().unwrap();
//! let message = validate(&delivery, OriginFilter::Exact("https://host.example")).unwrap();
//! assert_eq!(message.property.as_deref(), Some("resize"));
//! ```

pub mod channel;
pub mod config;
pub mod correlation;
pub mod error;
pub mod frame;
pub mod message;
pub mod registry;
pub mod state;
pub mod validator;

pub use channel::{CaptureGuard, Channel, Delivery, Disposition, Endpoint, EndpointId, Listener, ANY_ORIGIN};
pub use config::Tuning;
pub use correlation::next_correlation_id;
pub use error::{ConfigError, ConstructionError, HandshakeError, Rejection, Result, SessionError};
pub use frame::{origin_of, Embedded, Embedder, Frame, FrameSpec};
pub use message::{EventEnvelope, MessageKind, ProtocolMessage, PROTOCOL_TAG};
pub use registry::{ConstructionGuard, GuardToken, SessionInfo, SessionRegistry};
pub use state::{ChildState, HostState};
pub use validator::{validate, OriginFilter, SessionFilter};
