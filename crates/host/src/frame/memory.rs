//! In-memory embedder for tests and single-process applications
//!
//! Instead of creating a real container, this embedder adds a child context
//! to the host's [`Channel`] and hands it to an optional hook, which is where
//! the embedding application (or a test) starts the child side.

use async_trait::async_trait;
use parley_protocol::{origin_of, Channel, Embedded, Embedder, Endpoint, EndpointId, Frame, FrameSpec};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

type EmbedHook = Arc<dyn Fn(Endpoint, Arc<MemoryFrame>) + Send + Sync>;

/// Embedder creating child contexts on the host's channel
///
/// # Example
///
/// ```
/// use parley_host::frame::memory::MemoryEmbedder;
/// use parley_protocol::{Channel, Embedder, FrameSpec};
///
/// let channel = Channel::new();
/// let host = channel.create_context("https://host.example", None);
///
/// let embedder = MemoryEmbedder::new(&host);
/// let embedded = embedder
///     .embed(&FrameSpec {
///         target_location: "https://child.example/app".to_string(),
///         ..Default::default()
///     })
///     .unwrap();
///
/// assert_eq!(embedded.target_origin, "https://child.example");
/// assert!(embedded.frame.content().is_some());
/// ```
#[derive(Clone)]
pub struct MemoryEmbedder {
    host: Endpoint,
    hook: Option<EmbedHook>,
    defer_content: bool,
}

impl MemoryEmbedder {
    pub fn new(host: &Endpoint) -> Self {
        Self {
            host: host.clone(),
            hook: None,
            defer_content: false,
        }
    }

    /// Calls `hook` with every child context this embedder creates
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Endpoint, Arc<MemoryFrame>) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Hides frame content until [`MemoryFrame::reveal`] is called
    pub fn defer_content(mut self, defer: bool) -> Self {
        self.defer_content = defer;
        self
    }
}

impl Embedder for MemoryEmbedder {
    type Error = MemoryEmbedError;

    fn embed(&self, spec: &FrameSpec) -> Result<Embedded, Self::Error> {
        let origin = origin_of(&spec.target_location)
            .map_err(|e| MemoryEmbedError::InvalidLocation(format!("{}: {}", spec.target_location, e)))?;

        let child = self
            .host
            .channel()
            .create_context(origin.clone(), Some(self.host.id()));

        let frame = Arc::new(MemoryFrame::new(
            self.host.channel().clone(),
            child.id(),
            spec.clone(),
            !self.defer_content,
        ));

        tracing::debug!(
            child = %child.id(),
            origin = %origin,
            name = ?spec.name,
            "Embedded child context"
        );

        if let Some(hook) = &self.hook {
            hook(child, Arc::clone(&frame));
        }

        Ok(Embedded {
            frame,
            target_origin: origin,
        })
    }
}

/// Container created by [`MemoryEmbedder`]
pub struct MemoryFrame {
    channel: Channel,
    child: EndpointId,
    spec: FrameSpec,
    revealed: AtomicBool,
    attached: AtomicBool,
    loaded: watch::Sender<bool>,
    removals: AtomicU32,
}

impl MemoryFrame {
    fn new(channel: Channel, child: EndpointId, spec: FrameSpec, revealed: bool) -> Self {
        let (loaded, _) = watch::channel(false);
        Self {
            channel,
            child,
            spec,
            revealed: AtomicBool::new(revealed),
            attached: AtomicBool::new(true),
            loaded,
            removals: AtomicU32::new(0),
        }
    }

    /// Identity of the child context, whether or not it is visible yet
    #[inline]
    pub fn child(&self) -> EndpointId {
        self.child
    }

    #[inline]
    pub fn spec(&self) -> &FrameSpec {
        &self.spec
    }

    /// Makes deferred content visible through [`Frame::content`]
    pub fn reveal(&self) {
        self.revealed.store(true, Ordering::SeqCst);
    }

    /// Signals that the content finished loading
    pub fn mark_loaded(&self) {
        self.loaded.send_replace(true);
    }

    /// Detaches the container without going through [`Frame::remove`],
    /// as when the embedding page drops it on its own
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
        self.channel.remove_context(self.child);
    }

    /// Number of times [`Frame::remove`] was called
    pub fn removal_count(&self) -> u32 {
        self.removals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Frame for MemoryFrame {
    fn content(&self) -> Option<EndpointId> {
        let visible = self.revealed.load(Ordering::SeqCst) && self.attached.load(Ordering::SeqCst);
        (visible && self.channel.contains(self.child)).then_some(self.child)
    }

    async fn loaded(&self) {
        let mut rx = self.loaded.subscribe();
        // Only fails if the sender is gone, which cannot happen while &self lives
        let _ = rx.wait_for(|loaded| *loaded).await;
    }

    fn is_attached(&self) -> Option<bool> {
        Some(self.attached.load(Ordering::SeqCst))
    }

    fn remove(&self) {
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.attached.store(false, Ordering::SeqCst);
        self.channel.remove_context(self.child);
    }
}

/// Memory embedder errors
#[derive(Debug, thiserror::Error)]
pub enum MemoryEmbedError {
    #[error("Invalid target location: {0}")]
    InvalidLocation(String),
}
