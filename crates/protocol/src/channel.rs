//! In-process message channel between execution contexts
//!
//! A [`Channel`] holds a set of contexts. Each context has an identity, an
//! origin and optionally a parent. Posting a message targets one context;
//! every listener on that context then sees it, tagged with the sender's
//! identity and origin. Nothing stops a context from receiving traffic
//! meant for another session living on it, so consumers filter by
//! identity and origin themselves.
//!
//! Listeners come in two modes:
//! - capturing filters run first, synchronously, and may suppress delivery
//! - ordinary listeners each receive a copy of every delivery that was not
//!   suppressed
//!
//! # Example
//!
//! ```
//! use parley_protocol::channel::{Channel, ANY_ORIGIN};
//! use parley_protocol::ProtocolMessage;
//!
//! let channel = Channel::new();
//! let host = channel.create_context("https://host.example", None);
//! let child = channel.create_context("https://child.example", Some(host.id()));
//!
//! let mut listener = child.listen();
//! host.post(child.id(), ANY_ORIGIN, &ProtocolMessage::offer_ack()).unwrap();
//!
//! let delivery = listener.try_recv().unwrap();
//! assert_eq!(delivery.source, host.id());
//! assert_eq!(delivery.origin, "https://host.example");
//! ```

use crate::message::ProtocolMessage;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// Opaque identity of one context on the channel
pub type EndpointId = uuid::Uuid;

/// Target origin that matches any receiving context
pub const ANY_ORIGIN: &str = "*";

/// A message as seen by a listener
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Identity of the posting context
    pub source: EndpointId,

    /// Origin of the posting context
    pub origin: String,

    /// Raw posted record (`None` when nothing was posted)
    pub data: Option<Value>,
}

/// Verdict of a capturing filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Let the delivery continue to later filters and ordinary listeners
    Deliver,

    /// Stop the delivery here
    Suppress,
}

type CaptureFilter = Box<dyn Fn(&Delivery) -> Disposition + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    capturing: Vec<(u64, CaptureFilter)>,
    ordinary: Vec<(u64, mpsc::UnboundedSender<Delivery>)>,
}

struct Context {
    id: EndpointId,
    origin: String,
    parent: Option<EndpointId>,
    listeners: Mutex<Listeners>,
}

impl Context {
    fn dispatch(&self, delivery: Delivery) {
        let listeners = self.listeners.lock();

        for (_, filter) in &listeners.capturing {
            if filter(&delivery) == Disposition::Suppress {
                tracing::trace!(target_ctx = %self.id, source = %delivery.source, "Delivery suppressed by filter");
                return;
            }
        }

        for (_, tx) in &listeners.ordinary {
            let _ = tx.send(delivery.clone());
        }
    }
}

/// Set of contexts that can post to each other
#[derive(Clone, Default)]
pub struct Channel {
    contexts: Arc<Mutex<HashMap<EndpointId, Arc<Context>>>>,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new context with a fresh identity
    pub fn create_context(&self, origin: impl Into<String>, parent: Option<EndpointId>) -> Endpoint {
        let context = Arc::new(Context {
            id: EndpointId::new_v4(),
            origin: origin.into(),
            parent,
            listeners: Mutex::new(Listeners::default()),
        });

        self.contexts.lock().insert(context.id, Arc::clone(&context));

        Endpoint {
            channel: self.clone(),
            context,
        }
    }

    /// Returns a handle to an existing context
    pub fn endpoint(&self, id: EndpointId) -> Option<Endpoint> {
        let context = self.contexts.lock().get(&id).cloned()?;
        Some(Endpoint {
            channel: self.clone(),
            context,
        })
    }

    /// Returns true if the context is still part of the channel
    pub fn contains(&self, id: EndpointId) -> bool {
        self.contexts.lock().contains_key(&id)
    }

    /// Tears a context down; later posts to it are dropped
    pub fn remove_context(&self, id: EndpointId) -> bool {
        self.contexts.lock().remove(&id).is_some()
    }

    fn deliver(&self, target: EndpointId, target_origin: &str, delivery: Delivery) -> bool {
        // Never dispatch while holding the context map
        let context = self.contexts.lock().get(&target).cloned();

        let Some(context) = context else {
            tracing::trace!(target_ctx = %target, "Post to unknown context dropped");
            return false;
        };

        if target_origin != ANY_ORIGIN && target_origin != context.origin {
            tracing::trace!(
                target_ctx = %target,
                expected = %target_origin,
                actual = %context.origin,
                "Post dropped: target origin mismatch"
            );
            return false;
        }

        context.dispatch(delivery);
        true
    }
}

/// One context's handle on the channel
#[derive(Clone)]
pub struct Endpoint {
    channel: Channel,
    context: Arc<Context>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.context.id)
            .field("origin", &self.context.origin)
            .field("parent", &self.context.parent)
            .finish()
    }
}

impl Endpoint {
    #[inline]
    pub fn id(&self) -> EndpointId {
        self.context.id
    }

    #[inline]
    pub fn origin(&self) -> &str {
        &self.context.origin
    }

    /// Identity of the context that embedded this one, if any
    #[inline]
    pub fn parent(&self) -> Option<EndpointId> {
        self.context.parent
    }

    #[inline]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Posts a protocol message to `target`
    ///
    /// Returns `Ok(false)` when the target is gone or its origin does not
    /// match `target_origin`; the message is then silently dropped.
    pub fn post(
        &self,
        target: EndpointId,
        target_origin: &str,
        message: &ProtocolMessage,
    ) -> serde_json::Result<bool> {
        let data = message.to_value()?;
        Ok(self.post_raw(target, target_origin, Some(data)))
    }

    /// Posts an arbitrary record, protocol message or not
    pub fn post_raw(&self, target: EndpointId, target_origin: &str, data: Option<Value>) -> bool {
        let delivery = Delivery {
            source: self.context.id,
            origin: self.context.origin.clone(),
            data,
        };
        self.channel.deliver(target, target_origin, delivery)
    }

    /// Dispatches a delivery on this context again, through filters and listeners
    pub fn redeliver(&self, delivery: Delivery) {
        self.context.dispatch(delivery);
    }

    /// Registers an ordinary listener on this context
    pub fn listen(&self) -> Listener {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.context.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.ordinary.push((id, tx));

        Listener {
            id,
            rx,
            context: Arc::downgrade(&self.context),
        }
    }

    /// Installs a capturing filter on this context
    ///
    /// The filter runs synchronously inside every post to this context and
    /// must not post on the channel itself.
    pub fn capture<F>(&self, filter: F) -> CaptureGuard
    where
        F: Fn(&Delivery) -> Disposition + Send + Sync + 'static,
    {
        let mut listeners = self.context.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.capturing.push((id, Box::new(filter)));

        CaptureGuard {
            id,
            context: Arc::downgrade(&self.context),
        }
    }

    /// Number of ordinary listeners currently attached
    pub fn listener_count(&self) -> usize {
        self.context.listeners.lock().ordinary.len()
    }
}

/// Receiving half of an ordinary listener; detaches on drop
pub struct Listener {
    id: u64,
    rx: mpsc::UnboundedReceiver<Delivery>,
    context: Weak<Context>,
}

impl Listener {
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(context) = self.context.upgrade() {
            context.listeners.lock().ordinary.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Keeps a capturing filter installed; removes it on drop
pub struct CaptureGuard {
    id: u64,
    context: Weak<Context>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if let Some(context) = self.context.upgrade() {
            context.listeners.lock().capturing.retain(|(id, _)| *id != self.id);
        }
    }
}
