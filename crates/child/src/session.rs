//! Child-side API of an established session

use crate::model::Model;
use parking_lot::Mutex;
use parley_protocol::{
    Delivery, Endpoint, EndpointId, GuardToken, Listener, MessageKind, ProtocolMessage, SessionError,
    SessionFilter, SessionRegistry,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

/// Handle to an established session with the parent
///
/// Cloning shares the session. The endpoint's construction guard is held
/// until [`close`](Self::close) is called or the last clone is dropped.
#[derive(Clone)]
pub struct ChildSession {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Endpoint,
    filter: SessionFilter,
    model: Model,
    registry: SessionRegistry,
    token: Mutex<Option<GuardToken>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
        // close() already removed the entry; the guard token is still held here
        if !*self.closed.get_mut() {
            self.registry.unregister(self.filter.counterpart());
            tracing::debug!(parent = %self.filter.counterpart(), "Child session dropped without close");
        }
    }
}

impl ChildSession {
    pub(crate) fn start(
        endpoint: Endpoint,
        parent: EndpointId,
        parent_origin: String,
        model: Model,
        registry: SessionRegistry,
        token: GuardToken,
        inbox: Listener,
    ) -> Self {
        let inner = Arc::new(Inner {
            endpoint,
            filter: SessionFilter::new(parent, parent_origin),
            model,
            registry,
            token: Mutex::new(Some(token)),
            dispatcher: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let handle = tokio::spawn(dispatch(Arc::downgrade(&inner), inbox));
        *inner.dispatcher.lock() = Some(handle);

        Self { inner }
    }

    /// Identity of the parent context
    #[inline]
    pub fn counterpart(&self) -> EndpointId {
        self.inner.filter.counterpart()
    }

    /// Origin the parent's offer came from
    #[inline]
    pub fn parent_origin(&self) -> &str {
        self.inner.filter.origin()
    }

    /// Local model, including the entries merged from the host
    #[inline]
    pub fn model(&self) -> &Model {
        &self.inner.model
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Sends an event to the parent
    pub fn emit(&self, name: impl Into<String>, data: Value) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let name = name.into();
        tracing::debug!(event = %name, "Emitting to parent");
        let message = ProtocolMessage::event(name, data);

        self.inner
            .endpoint
            .post(self.counterpart(), self.parent_origin(), &message)
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        Ok(())
    }

    /// Stops serving the parent and releases the construction guard
    ///
    /// Calling it again is a no-op.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.registry.unregister(self.counterpart());
        if let Some(handle) = self.inner.dispatcher.lock().take() {
            handle.abort();
        }
        self.inner.token.lock().take();

        tracing::info!(parent = %self.counterpart(), "Child session closed");
    }
}

async fn dispatch(session: Weak<Inner>, mut inbox: Listener) {
    while let Some(delivery) = inbox.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };

        let Some(message) = inner.filter.accept(&delivery) else {
            continue;
        };

        match message.kind {
            MessageKind::Invoke => {
                let Some(name) = message.property else {
                    continue;
                };
                let payload = message.payload.unwrap_or(Value::Null);
                match inner.model.invoke(&name, payload) {
                    Some(call) => {
                        tracing::debug!(method = %name, "Invoking model method");
                        tokio::spawn(call);
                    }
                    None => tracing::trace!(method = %name, "No callable model entry"),
                }
            }
            MessageKind::ValueRequest => {
                let (Some(name), Some(id)) = (message.property, message.correlation_id) else {
                    continue;
                };
                tokio::spawn(reply(inner.endpoint.clone(), inner.model.clone(), delivery, name, id));
            }
            kind => tracing::trace!(%kind, "Ignoring message kind on child session"),
        }
    }
}

/// Resolves a value request and answers the sender at its origin
async fn reply(endpoint: Endpoint, model: Model, request: Delivery, name: String, id: u64) {
    let value = model.resolve(&name).await;
    tracing::debug!(property = %name, correlation_id = id, found = value.is_some(), "Replying to value request");

    let message = ProtocolMessage::value_reply(name, value, id);
    if let Err(e) = endpoint.post(request.source, &request.origin, &message) {
        tracing::warn!(error = %e, correlation_id = id, "Failed to encode value reply");
    }
}
