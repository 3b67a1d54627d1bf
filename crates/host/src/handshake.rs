//! Host-side handshake: embed the child, offer until acknowledged

use crate::session::HostSession;
use parley_protocol::{
    validate, Delivery, Embedder, Endpoint, EndpointId, Frame, FrameSpec, HandshakeError, HostState,
    Listener, MessageKind, OriginFilter, ProtocolMessage, SessionInfo, SessionRegistry, Tuning,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::time::{interval_at, sleep, Instant};

/// Outcome of inspecting one inbound delivery while offering
enum Reply {
    /// Not for us; keep waiting
    Ignored,
    /// Valid offer-ack from the embedded child at this origin
    Acknowledged(EndpointId, String),
    /// The child answered with something other than an offer-ack
    Violation(MessageKind),
}

pub(crate) struct HostHandshake {
    host: Endpoint,
    registry: SessionRegistry,
    tuning: Tuning,
    shared_model: Map<String, Value>,
    state: HostState,
}

impl HostHandshake {
    pub(crate) fn new(
        host: Endpoint,
        registry: SessionRegistry,
        tuning: Tuning,
        shared_model: Map<String, Value>,
    ) -> Self {
        Self {
            host,
            registry,
            tuning,
            shared_model,
            state: HostState::Idle,
        }
    }

    pub(crate) async fn run<E: Embedder>(
        mut self,
        embedder: &E,
        spec: &FrameSpec,
    ) -> Result<HostSession, HandshakeError> {
        if let Err(e) = self.tuning.validate() {
            self.state.transition_to(HostState::Failed)?;
            return Err(e.into());
        }

        let embedded = match embedder.embed(spec) {
            Ok(embedded) => embedded,
            Err(e) => {
                self.state.transition_to(HostState::Failed)?;
                return Err(HandshakeError::Embed(e.to_string()));
            }
        };
        self.state.transition_to(HostState::AwaitingLoad)?;

        let frame = embedded.frame;
        let target_origin = embedded.target_origin;

        // Listen before the first offer so no early ack is missed
        let mut inbox = self.host.listen();

        tokio::select! {
            _ = frame.loaded() => tracing::debug!("Child signalled load"),
            _ = sleep(self.tuning.load_fallback()) => {
                tracing::debug!(waited_ms = self.tuning.load_fallback_ms, "No load signal, offering anyway");
            }
        }
        self.state.transition_to(HostState::Offering)?;

        match self.offer_until_acknowledged(&frame, &target_origin, &mut inbox).await {
            Ok((counterpart, origin)) => {
                self.state.transition_to(HostState::Established)?;

                // Evicts any prior session for this counterpart and removes its container
                if let Some(prior) = self
                    .registry
                    .register(counterpart, SessionInfo::new(origin.clone(), Some(Arc::clone(&frame))))
                {
                    tracing::info!(counterpart = %counterpart, origin = %prior.origin, "Replaced prior session");
                }

                tracing::info!(counterpart = %counterpart, origin = %origin, "Host handshake established");

                Ok(HostSession::start(self.host, counterpart, origin, frame, self.registry, inbox))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Host handshake failed");
                self.fail(frame.as_ref())?;
                Err(e)
            }
        }
    }

    async fn offer_until_acknowledged(
        &self,
        frame: &Arc<dyn Frame>,
        target_origin: &str,
        inbox: &mut Listener,
    ) -> Result<(EndpointId, String), HandshakeError> {
        let offer = ProtocolMessage::offer(self.shared_model.clone())
            .to_value()
            .map_err(|e| HandshakeError::Encode(e.to_string()))?;

        let max_attempts = self.tuning.max_handshake_attempts;
        let period = self.tuning.retry_interval();

        let mut attempts = 1;
        self.send_offer(frame.as_ref(), target_origin, &offer, attempts);

        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                // A reply and the final tick landing together must favour the reply
                biased;

                delivery = inbox.recv() => {
                    let Some(delivery) = delivery else {
                        return Err(HandshakeError::Timeout { attempts });
                    };
                    match self.inspect(&delivery, frame.as_ref()) {
                        Reply::Ignored => {}
                        Reply::Acknowledged(counterpart, origin) => return Ok((counterpart, origin)),
                        Reply::Violation(kind) => return Err(HandshakeError::ProtocolViolation { kind }),
                    }
                }

                _ = ticker.tick() => {
                    // One extra interval after the last offer lets a late ack land
                    if attempts >= max_attempts {
                        return Err(HandshakeError::Timeout { attempts });
                    }
                    attempts += 1;
                    self.send_offer(frame.as_ref(), target_origin, &offer, attempts);
                }
            }
        }
    }

    fn send_offer(&self, frame: &dyn Frame, target_origin: &str, offer: &Value, attempt: u32) {
        // The child context may not exist yet; the attempt still counts
        let Some(target) = frame.content() else {
            tracing::debug!(attempt, "Child content not available yet, skipping offer");
            return;
        };

        tracing::debug!(attempt, child = %target, "Sending handshake offer");
        self.host.post_raw(target, target_origin, Some(offer.clone()));
    }

    fn inspect(&self, delivery: &Delivery, frame: &dyn Frame) -> Reply {
        // The child origin is unknown until it answers
        let message = match validate(delivery, OriginFilter::Any) {
            Ok(message) => message,
            Err(rejection) => {
                tracing::trace!(%rejection, "Ignoring non-protocol delivery during handshake");
                return Reply::Ignored;
            }
        };

        if frame.content() != Some(delivery.source) {
            tracing::trace!(source = %delivery.source, "Ignoring delivery from foreign context during handshake");
            return Reply::Ignored;
        }

        if message.kind == MessageKind::OfferAck {
            Reply::Acknowledged(delivery.source, delivery.origin.clone())
        } else {
            Reply::Violation(message.kind)
        }
    }

    fn fail(&mut self, frame: &dyn Frame) -> Result<(), HandshakeError> {
        self.state.transition_to(HostState::Failed)?;

        if let Some(counterpart) = frame.content() {
            self.registry.unregister(counterpart);
        }
        frame.remove();
        Ok(())
    }
}
