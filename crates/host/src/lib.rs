//! # Parley Host
//!
//! Host side of a parley session: embeds a child context, drives the
//! handshake and hands back a [`HostSession`] with `call`, `get`, `on` and
//! `destroy`.
//!
//! ## Example
//!
//! ```no_run
//! use parley_host::{connect, frame::memory::MemoryEmbedder, HostOptions};
//! use parley_protocol::{Channel, SessionRegistry};
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let channel = Channel::new();
//!     let host = channel.create_context("https://host.example", None);
//!     let registry = SessionRegistry::new();
//!     let embedder = MemoryEmbedder::new(&host);
//!
//!     let options = HostOptions::new("https://child.example/widget")
//!         .with_model_entry("greet", json!("hello"));
//!
//!     let session = connect(&host, &embedder, &registry, options).await.unwrap();
//!     session.call("doWork", json!("payload")).unwrap();
//!     let height = session.get("height").await.unwrap();
//!     println!("child height: {height}");
//!     session.destroy();
//! }
//! ```

pub mod frame;
mod handshake;
mod session;

pub use session::HostSession;

use handshake::HostHandshake;
use parley_protocol::{Embedder, Endpoint, FrameSpec, HandshakeError, SessionRegistry, Tuning};
use serde_json::{Map, Value};

/// Everything the host needs to embed a child and offer it a session
#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    /// Location the child is loaded from; also determines its origin
    pub target_location: String,

    pub container: Option<String>,

    pub visual_classes: Vec<String>,

    pub title: Option<String>,

    pub accessibility_label: Option<String>,

    pub name: Option<String>,

    /// Data sent to the child in the offer and merged into its model
    pub shared_model: Map<String, Value>,

    pub tuning: Tuning,
}

impl HostOptions {
    pub fn new(target_location: impl Into<String>) -> Self {
        Self {
            target_location: target_location.into(),
            ..Default::default()
        }
    }

    pub fn with_shared_model(mut self, shared_model: Map<String, Value>) -> Self {
        self.shared_model = shared_model;
        self
    }

    pub fn with_model_entry(mut self, name: impl Into<String>, value: Value) -> Self {
        self.shared_model.insert(name.into(), value);
        self
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Presentation handed to the embedder
    pub fn frame_spec(&self) -> FrameSpec {
        FrameSpec {
            target_location: self.target_location.clone(),
            container: self.container.clone(),
            visual_classes: self.visual_classes.clone(),
            title: self.title.clone(),
            accessibility_label: self.accessibility_label.clone(),
            name: self.name.clone(),
        }
    }
}

/// Embeds a child and establishes a session with it
///
/// Resolves once the child acknowledged an offer. On failure the embedded
/// container is removed and no registry entry is left behind.
pub async fn connect<E: Embedder>(
    host: &Endpoint,
    embedder: &E,
    registry: &SessionRegistry,
    options: HostOptions,
) -> Result<HostSession, HandshakeError> {
    let spec = options.frame_spec();
    tracing::info!(location = %spec.target_location, name = ?spec.name, "Starting host handshake");

    HostHandshake::new(host.clone(), registry.clone(), options.tuning, options.shared_model)
        .run(embedder, &spec)
        .await
}
