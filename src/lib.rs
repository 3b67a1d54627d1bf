//! # Parley
//!
//! Trusted, exclusive sessions between a host context and the child
//! context it embeds, over a channel that broadcasts every message to
//! every listener:
//! - Handshake with retried offers on the host and a single acknowledgment
//!   on the child
//! - Origin and identity gate on every inbound message
//! - Session registry with eviction and a periodic sweep
//! - Pre-handshake queue on the child with deduplication and replay
//! - `call` / `get` / `on` on the host, `emit` and a served model on the child
//!
//! ## Components
//!
//! - `parley-protocol`: wire format, validator, channel, registry and shared types
//! - `parley-host`: embedding and the host handshake and session
//! - `parley-child`: the child handshake, queue, model and session
//!
//! ## Example
//!
//! See `demos/handshake_demo.rs` for a host and child talking in one process.

pub use parley_child as child;
pub use parley_host as host;
pub use parley_protocol as protocol;
