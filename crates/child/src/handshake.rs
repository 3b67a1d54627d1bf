//! Child-side handshake: wait for the parent's offer, acknowledge it once

use crate::model::Model;
use crate::queue::PreHandshakeQueue;
use crate::session::ChildSession;
use parley_protocol::{
    validate, CaptureGuard, ChildState, ConstructionError, ConstructionGuard, Delivery, Endpoint,
    GuardToken, HandshakeError, Listener, MessageKind, OriginFilter, ProtocolMessage, SessionInfo,
    SessionRegistry, Tuning,
};
use serde_json::{Map, Value};
use tokio::time::{sleep, sleep_until, Instant};

pub(crate) struct ChildHandshake {
    endpoint: Endpoint,
    model: Model,
    registry: SessionRegistry,
    tuning: Tuning,
    deadline: Instant,
    state: ChildState,
    token: GuardToken,
    queue: PreHandshakeQueue,
    capture: CaptureGuard,
    inbox: Listener,
}

impl ChildHandshake {
    /// Takes the endpoint's construction guard and starts listening
    ///
    /// Everything here happens before the caller regains control, so no
    /// message posted afterwards can slip past both the queue and the
    /// handshake listener. The timeout runs from here, not from the first
    /// poll of [`run`](Self::run).
    pub(crate) fn begin(
        endpoint: &Endpoint,
        registry: &SessionRegistry,
        guard: &ConstructionGuard,
        model: Model,
        tuning: Tuning,
    ) -> Result<Self, ConstructionError> {
        let token = guard.try_acquire(endpoint.id())?;
        let deadline = Instant::now() + tuning.handshake_timeout();

        let queue = PreHandshakeQueue::new();
        let capture = queue.install(endpoint, endpoint.parent());
        let inbox = endpoint.listen();

        let mut state = ChildState::Idle;
        // Idle -> Listening is always valid
        let _ = state.transition_to(ChildState::Listening);

        tracing::debug!(endpoint = %endpoint.id(), parent = ?endpoint.parent(), "Child listening for offer");

        Ok(Self {
            endpoint: endpoint.clone(),
            model,
            registry: registry.clone(),
            tuning,
            deadline,
            state,
            token,
            queue,
            capture,
            inbox,
        })
    }

    pub(crate) async fn run(mut self) -> Result<ChildSession, HandshakeError> {
        let deadline = self.deadline;

        let outcome = tokio::select! {
            // An offer still queued once the deadline has passed is too late
            biased;

            _ = sleep_until(deadline) => None,
            offer = self.await_offer() => offer,
        };
        match outcome {
            Some((offer, shared_model)) => self.establish(offer, shared_model),
            None => {
                self.state.transition_to(ChildState::TimedOut)?;
                tracing::warn!(
                    endpoint = %self.endpoint.id(),
                    waited_ms = self.tuning.handshake_timeout_ms,
                    "No handshake offer from parent"
                );
                // Dropping self removes the filter and listener and frees the guard
                Err(HandshakeError::ChildTimeout {
                    waited_ms: self.tuning.handshake_timeout_ms,
                })
            }
        }
    }

    /// Waits for the first offer whose sender is the parent context
    async fn await_offer(&mut self) -> Option<(Delivery, Map<String, Value>)> {
        // A top-level context has no parent and can only time out
        let Some(parent) = self.endpoint.parent() else {
            return std::future::pending().await;
        };

        while let Some(delivery) = self.inbox.recv().await {
            if delivery.source != parent {
                tracing::trace!(source = %delivery.source, "Ignoring delivery from non-parent during handshake");
                continue;
            }

            match validate(&delivery, OriginFilter::Any) {
                Ok(message) if message.kind == MessageKind::Offer => {
                    return Some((delivery, message.shared_model.unwrap_or_default()));
                }
                Ok(message) => tracing::trace!(kind = %message.kind, "Ignoring non-offer during handshake"),
                Err(rejection) => tracing::trace!(%rejection, "Ignoring non-protocol delivery during handshake"),
            }
        }
        None
    }

    fn establish(
        mut self,
        offer: Delivery,
        shared_model: Map<String, Value>,
    ) -> Result<ChildSession, HandshakeError> {
        let ack = ProtocolMessage::offer_ack();
        self.endpoint
            .post(offer.source, &offer.origin, &ack)
            .map_err(|e| HandshakeError::Encode(e.to_string()))?;

        self.model.merge(shared_model);
        self.state.transition_to(ChildState::Established)?;

        let Self {
            endpoint,
            model,
            registry,
            tuning,
            token,
            queue,
            capture,
            inbox,
            ..
        } = self;

        // The session listener must exist before the filter goes away
        let session = ChildSession::start(
            endpoint.clone(),
            offer.source,
            offer.origin.clone(),
            model,
            registry.clone(),
            token,
            inbox,
        );
        queue.mark_established();
        drop(capture);

        registry.register(offer.source, SessionInfo::new(offer.origin.clone(), None));

        tracing::info!(
            endpoint = %endpoint.id(),
            parent = %offer.source,
            origin = %offer.origin,
            queued = queue.len(),
            "Child handshake established"
        );

        tokio::spawn(replay(endpoint, queue, tuning));

        Ok(session)
    }
}

/// Redelivers queued messages once the session had a chance to settle
async fn replay(endpoint: Endpoint, queue: PreHandshakeQueue, tuning: Tuning) {
    sleep(tuning.replay_delay()).await;

    let queued = queue.drain();
    if queued.is_empty() {
        return;
    }

    tracing::debug!(count = queued.len(), "Replaying queued messages");
    for delivery in queued {
        endpoint.redeliver(delivery);
    }
}
