//! Pre-handshake queue
//!
//! A capturing filter on the child context. Until the session is
//! established it holds back invoke and value-request messages from the
//! parent, collapsing duplicates, so nothing handles them before the model
//! merge. Afterwards the buffered deliveries are redelivered on the context
//! and go through the same session filter as live traffic.

use parking_lot::Mutex;
use parley_protocol::{
    validate, CaptureGuard, Delivery, Disposition, Endpoint, EndpointId, MessageKind, OriginFilter,
};
use std::collections::HashSet;
use std::sync::Arc;

type DedupKey = (MessageKind, Option<String>, Option<u64>);

#[derive(Default)]
struct Buffer {
    established: bool,
    seen: HashSet<DedupKey>,
    entries: Vec<Delivery>,
}

/// Buffer of deliveries held back until the handshake completes
#[derive(Clone, Default)]
pub struct PreHandshakeQueue {
    buffer: Arc<Mutex<Buffer>>,
}

impl PreHandshakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the capturing filter on `endpoint`
    ///
    /// Only traffic from `parent` is intercepted. The filter stays until the
    /// returned guard is dropped.
    pub fn install(&self, endpoint: &Endpoint, parent: Option<EndpointId>) -> CaptureGuard {
        let queue = self.clone();
        endpoint.capture(move |delivery| queue.intercept(delivery, parent))
    }

    /// Decides whether `delivery` continues to ordinary listeners
    pub fn intercept(&self, delivery: &Delivery, parent: Option<EndpointId>) -> Disposition {
        let mut buffer = self.buffer.lock();
        if buffer.established || parent != Some(delivery.source) {
            return Disposition::Deliver;
        }

        let Ok(message) = validate(delivery, OriginFilter::Any) else {
            return Disposition::Deliver;
        };

        if !matches!(message.kind, MessageKind::Invoke | MessageKind::ValueRequest) {
            return Disposition::Deliver;
        }

        if buffer.seen.insert(message.dedup_key()) {
            tracing::debug!(
                kind = %message.kind,
                property = ?message.property,
                queued = buffer.entries.len() + 1,
                "Queued message received before handshake"
            );
            buffer.entries.push(delivery.clone());
        } else {
            tracing::trace!(kind = %message.kind, property = ?message.property, "Dropped duplicate queued message");
        }

        Disposition::Suppress
    }

    /// Stops intercepting; later deliveries pass straight through
    pub fn mark_established(&self) {
        self.buffer.lock().established = true;
    }

    pub fn is_established(&self) -> bool {
        self.buffer.lock().established
    }

    /// Takes every buffered delivery in arrival order and clears the buffer
    pub fn drain(&self) -> Vec<Delivery> {
        let mut buffer = self.buffer.lock();
        buffer.seen.clear();
        std::mem::take(&mut buffer.entries)
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
