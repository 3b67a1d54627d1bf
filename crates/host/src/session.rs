//! Host-side API of an established session

use parking_lot::Mutex;
use parley_protocol::{
    next_correlation_id, Endpoint, EndpointId, Frame, Listener, MessageKind, ProtocolMessage,
    SessionError, SessionFilter, SessionInfo, SessionRegistry,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle to an established session with one child
///
/// Cloning shares the session. [`destroy`](Self::destroy) ends it for every
/// clone.
#[derive(Clone)]
pub struct HostSession {
    inner: Arc<Inner>,
}

struct Inner {
    host: Endpoint,
    filter: SessionFilter,
    frame: Arc<dyn Frame>,
    registry: SessionRegistry,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl HostSession {
    /// Starts dispatching `inbox` for a freshly established session
    pub(crate) fn start(
        host: Endpoint,
        counterpart: EndpointId,
        origin: String,
        frame: Arc<dyn Frame>,
        registry: SessionRegistry,
        inbox: Listener,
    ) -> Self {
        let inner = Arc::new(Inner {
            host,
            filter: SessionFilter::new(counterpart, origin),
            frame,
            registry,
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            dispatcher: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });

        let handle = tokio::spawn(dispatch(Arc::downgrade(&inner), inbox));
        *inner.dispatcher.lock() = Some(handle);

        Self { inner }
    }

    /// Identity of the child context
    #[inline]
    pub fn counterpart(&self) -> EndpointId {
        self.inner.filter.counterpart()
    }

    /// Origin the child proved during the handshake
    #[inline]
    pub fn child_origin(&self) -> &str {
        self.inner.filter.origin()
    }

    /// True once destroyed, or once a newer session for the same child
    /// replaced this one in the registry
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst) || self.inner.evicted()
    }

    /// Invokes a child model method; no reply is expected
    pub fn call(&self, name: impl Into<String>, payload: Value) -> Result<(), SessionError> {
        self.send(&ProtocolMessage::invoke(name, payload))
    }

    /// Requests the value of a child model entry
    ///
    /// Waits until the matching reply arrives, with no upper bound. Resolves
    /// to `Value::Null` when the child has no such entry.
    pub async fn get(&self, name: impl Into<String>) -> Result<Value, SessionError> {
        let (_, rx) = self.request(name.into())?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Like [`get`](Self::get), but gives up after `timeout`
    pub async fn get_with_timeout(
        &self,
        name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let property = name.into();
        let (id, rx) = self.request(property.clone())?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(reply) => reply.map_err(|_| SessionError::Closed),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                tracing::warn!(%property, correlation_id = id, "Value request timed out");
                Err(SessionError::Timeout {
                    property,
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Registers `handler` for events named `event`
    ///
    /// Handlers for the same name run in registration order.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .lock()
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Ends the session and removes the embedded child
    ///
    /// Outstanding [`get`](Self::get) calls fail with [`SessionError::Closed`].
    /// Calling it again is a no-op.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let counterpart = self.counterpart();
        let evicted = self.inner.evicted();

        if let Some(handle) = self.inner.dispatcher.lock().take() {
            handle.abort();
        }
        self.inner.pending.lock().clear();

        // An evicted session's container is already gone and the entry belongs to its successor
        if !evicted {
            self.inner.registry.unregister(counterpart);
            self.inner.frame.remove();
        }

        tracing::info!(counterpart = %counterpart, evicted, "Host session destroyed");
    }

    fn request(&self, property: String) -> Result<(u64, oneshot::Receiver<Value>), SessionError> {
        let id = next_correlation_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        if let Err(e) = self.send(&ProtocolMessage::value_request(property, id)) {
            self.inner.pending.lock().remove(&id);
            return Err(e);
        }

        Ok((id, rx))
    }

    fn send(&self, message: &ProtocolMessage) -> Result<(), SessionError> {
        if self.is_destroyed() {
            return Err(SessionError::Closed);
        }

        tracing::debug!(kind = %message.kind, property = ?message.property, "Sending to child");

        self.inner
            .host
            .post(self.counterpart(), self.child_origin(), message)
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        Ok(())
    }
}

impl Inner {
    /// Whether the registry now holds a different container for the counterpart
    fn evicted(&self) -> bool {
        match self.registry.lookup(self.filter.counterpart()) {
            Some(SessionInfo { frame: Some(frame), .. }) => {
                Arc::as_ptr(&frame) as *const () != Arc::as_ptr(&self.frame) as *const ()
            }
            Some(SessionInfo { frame: None, .. }) => true,
            None => false,
        }
    }
}

async fn dispatch(session: Weak<Inner>, mut inbox: Listener) {
    while let Some(delivery) = inbox.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };

        if inner.evicted() {
            tracing::debug!(counterpart = %inner.filter.counterpart(), "Session replaced, stopping dispatch");
            inner.destroyed.store(true, Ordering::SeqCst);
            inner.pending.lock().clear();
            break;
        }

        let Some(message) = inner.filter.accept(&delivery) else {
            continue;
        };

        match message.kind {
            MessageKind::Event => {
                let Some(envelope) = message.event_envelope else {
                    continue;
                };
                // Run handlers outside the lock so they may register more
                let handlers = inner.handlers.lock().get(&envelope.name).cloned().unwrap_or_default();
                tracing::debug!(event = %envelope.name, handlers = handlers.len(), "Event from child");
                for handler in handlers {
                    handler(&envelope.data);
                }
            }
            MessageKind::ValueReply => {
                let Some(id) = message.correlation_id else {
                    continue;
                };
                match inner.pending.lock().remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(message.payload.unwrap_or(Value::Null));
                    }
                    None => tracing::trace!(correlation_id = id, "Reply for unknown request"),
                }
            }
            kind => tracing::trace!(%kind, "Ignoring message kind on host session"),
        }
    }
}
