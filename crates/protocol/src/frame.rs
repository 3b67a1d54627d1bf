//! Embedding container abstraction
//!
//! The core never creates or styles the container holding a child context;
//! it consumes one through the [`Frame`] trait and asks an [`Embedder`] to
//! produce it. This keeps the handshake and session code independent of
//! whatever actually hosts the child (an in-process test harness, a
//! webview, a sandboxed worker...).
//!
//! # Example: implementing a custom embedder
//!
//! ```no_run
//! use async_trait::async_trait;
//! use parley_protocol::frame::{Embedded, Embedder, Frame, FrameSpec};
//! use parley_protocol::EndpointId;
//! use std::sync::Arc;
//!
//! struct StaticFrame(EndpointId);
//!
//! #[async_trait]
//! impl Frame for StaticFrame {
//!     fn content(&self) -> Option<EndpointId> { Some(self.0) }
//!     async fn loaded(&self) {}
//!     fn is_attached(&self) -> Option<bool> { None }
//!     fn remove(&self) {}
//! }
//!
//! struct StaticEmbedder(EndpointId);
//!
//! impl Embedder for StaticEmbedder {
//!     type Error = std::io::Error;
//!
//!     fn embed(&self, _spec: &FrameSpec) -> Result<Embedded, Self::Error> {
//!         Ok(Embedded {
//!             frame: Arc::new(StaticFrame(self.0)),
//!             target_origin: "https://child.example".to_string(),
//!         })
//!     }
//! }
//! ```

use crate::channel::EndpointId;
use async_trait::async_trait;
use std::sync::Arc;

/// Handle to the container embedding a child context
#[async_trait]
pub trait Frame: Send + Sync + 'static {
    /// Identity of the embedded context, if it exists yet
    ///
    /// Re-read on every handshake attempt: the content may appear some time
    /// after the container itself.
    fn content(&self) -> Option<EndpointId>;

    /// Resolves once the container signals that its content loaded
    ///
    /// May never resolve; callers race it against a fallback delay.
    async fn loaded(&self);

    /// Whether the container is still attached
    ///
    /// `None` means liveness cannot be probed, which the registry sweep
    /// treats as detached.
    fn is_attached(&self) -> Option<bool>;

    /// Removes the container and tears down its content
    fn remove(&self);
}

/// Presentation of the container to create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSpec {
    /// Location the child context is loaded from
    pub target_location: String,

    /// Where the container is attached in the host
    pub container: Option<String>,

    pub visual_classes: Vec<String>,

    pub title: Option<String>,

    pub accessibility_label: Option<String>,

    pub name: Option<String>,
}

/// Result of embedding a child
pub struct Embedded {
    pub frame: Arc<dyn Frame>,

    /// Origin the child is expected to run at; offers are posted to it
    pub target_origin: String,
}

impl std::fmt::Debug for Embedded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedded")
            .field("content", &self.frame.content())
            .field("target_origin", &self.target_origin)
            .finish()
    }
}

/// Creates containers for child contexts
pub trait Embedder: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn embed(&self, spec: &FrameSpec) -> Result<Embedded, Self::Error>;
}

/// Serialized origin of a location, e.g. `https://a.test:8443` for
/// `https://a.test:8443/app?x=1`
///
/// Locations without a tuple origin (such as `data:` URLs) yield `"null"`.
pub fn origin_of(location: &str) -> Result<String, url::ParseError> {
    let url = url::Url::parse(location)?;
    Ok(url.origin().ascii_serialization())
}
