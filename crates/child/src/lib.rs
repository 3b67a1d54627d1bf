//! # Parley Child
//!
//! Child side of a parley session: waits for the embedding parent's offer,
//! acknowledges it and serves the parent's `call` and `get` traffic from a
//! local [`Model`]. Requests that arrive before the handshake are held back
//! and replayed once the session is live.
//!
//! ## Example
//!
//! ```no_run
//! use parley_child::{connect, ChildOptions, Model};
//! use parley_protocol::{Channel, ConstructionGuard, SessionRegistry};
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let channel = Channel::new();
//!     let parent = channel.create_context("https://host.example", None);
//!     let endpoint = channel.create_context("https://child.example", Some(parent.id()));
//!
//!     let model = Model::new()
//!         .with_data("height", json!(480))
//!         .with_fn("resize", |size| size);
//!
//!     let pending = connect(
//!         &endpoint,
//!         &SessionRegistry::new(),
//!         &ConstructionGuard::new(),
//!         ChildOptions::new(model),
//!     )
//!     .unwrap();
//!
//!     let session = pending.await.unwrap();
//!     session.emit("ready", json!(true)).unwrap();
//! }
//! ```

mod handshake;
pub mod model;
pub mod queue;
mod session;

pub use model::{Model, ModelEntry};
pub use queue::PreHandshakeQueue;
pub use session::ChildSession;

use futures::future::{BoxFuture, FutureExt};
use handshake::ChildHandshake;
use parley_protocol::{ConstructionError, ConstructionGuard, Endpoint, HandshakeError, SessionRegistry, Tuning};

/// Model and timing for one child session
#[derive(Clone, Default)]
pub struct ChildOptions {
    /// Local entries served to the parent; the offer's shared model is merged in
    pub model: Model,

    pub tuning: Tuning,
}

impl ChildOptions {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            tuning: Tuning::default(),
        }
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }
}

/// Starts listening for the parent's offer on `endpoint`
///
/// Fails synchronously if a handshake or session already holds `guard` for
/// this endpoint. Otherwise the interception filter and the handshake
/// listener are installed before this returns, and the returned future
/// resolves once the offer is acknowledged or the handshake times out.
///
/// Each child context should use its own `registry`: entries are keyed by
/// the parent's identity.
pub fn connect(
    endpoint: &Endpoint,
    registry: &SessionRegistry,
    guard: &ConstructionGuard,
    options: ChildOptions,
) -> Result<BoxFuture<'static, Result<ChildSession, HandshakeError>>, ConstructionError> {
    let handshake = ChildHandshake::begin(endpoint, registry, guard, options.model, options.tuning)?;
    Ok(handshake.run().boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::{
        validate, Channel, Delivery, Listener, MessageKind, OriginFilter, ProtocolMessage, ANY_ORIGIN,
    };
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        channel: Channel,
        host: Endpoint,
        child: Endpoint,
        registry: SessionRegistry,
        guard: ConstructionGuard,
    }

    fn setup() -> Fixture {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();

        let channel = Channel::new();
        let host = channel.create_context("https://host.test", None);
        let child = channel.create_context("https://child.test", Some(host.id()));
        Fixture {
            channel,
            host,
            child,
            registry: SessionRegistry::new(),
            guard: ConstructionGuard::new(),
        }
    }

    fn offer(fixture: &Fixture, shared: Map<String, Value>) {
        fixture
            .host
            .post(fixture.child.id(), ANY_ORIGIN, &ProtocolMessage::offer(shared))
            .unwrap();
    }

    fn next_message(inbox: &mut Listener) -> Option<(Delivery, ProtocolMessage)> {
        let delivery = inbox.try_recv()?;
        let message = validate(&delivery, OriginFilter::Any).ok()?;
        Some((delivery, message))
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledges_offer_and_merges_model() {
        let fixture = setup();
        let mut host_inbox = fixture.host.listen();

        let model = Model::new().with_data("greet", json!("local"));
        let pending = connect(&fixture.child, &fixture.registry, &fixture.guard, ChildOptions::new(model)).unwrap();

        let mut shared = Map::new();
        shared.insert("greet".to_string(), json!("hello"));
        offer(&fixture, shared);

        let session = pending.await.unwrap();
        assert_eq!(session.counterpart(), fixture.host.id());
        assert_eq!(session.parent_origin(), "https://host.test");
        assert_eq!(session.model().snapshot().get("greet"), Some(&json!("hello")));

        let (delivery, message) = next_message(&mut host_inbox).unwrap();
        assert_eq!(message.kind, MessageKind::OfferAck);
        assert_eq!(delivery.source, fixture.child.id());

        let entry = fixture.registry.lookup(fixture.host.id()).unwrap();
        assert_eq!(entry.origin, "https://host.test");
        assert!(entry.frame.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_construction_fails_synchronously() {
        let fixture = setup();
        let options = ChildOptions::default();

        let _pending = connect(&fixture.child, &fixture.registry, &fixture.guard, options.clone()).unwrap();
        let second = connect(&fixture.child, &fixture.registry, &fixture.guard, options);

        assert_eq!(
            second.err(),
            Some(ConstructionError::DuplicateSession(fixture.child.id()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_guard_and_listeners() {
        let fixture = setup();
        let before = fixture.child.listener_count();

        let pending = connect(&fixture.child, &fixture.registry, &fixture.guard, ChildOptions::default()).unwrap();
        assert!(fixture.guard.is_held(fixture.child.id()));

        let started = tokio::time::Instant::now();
        let result = pending.await;

        assert_eq!(result.err(), Some(HandshakeError::ChildTimeout { waited_ms: 10_000 }));
        assert_eq!(started.elapsed(), Duration::from_millis(10_000));
        assert!(!fixture.guard.is_held(fixture.child.id()));
        assert_eq!(fixture.child.listener_count(), before);

        // A retry is permitted afterwards
        assert!(connect(&fixture.child, &fixture.registry, &fixture.guard, ChildOptions::default()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_from_construction_not_first_poll() {
        let fixture = setup();
        let before = fixture.child.listener_count();
        let mut host_inbox = fixture.host.listen();

        let pending = connect(&fixture.child, &fixture.registry, &fixture.guard, ChildOptions::default()).unwrap();

        tokio::time::sleep(Duration::from_millis(11_000)).await;
        offer(&fixture, Map::new());
        let result = pending.await;

        assert_eq!(result.err(), Some(HandshakeError::ChildTimeout { waited_ms: 10_000 }));
        assert!(next_message(&mut host_inbox).is_none());
        assert!(fixture.registry.is_empty());
        assert!(!fixture.guard.is_held(fixture.child.id()));
        assert_eq!(fixture.child.listener_count(), before);
        assert!(connect(&fixture.child, &fixture.registry, &fixture.guard, ChildOptions::default()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sibling_offer_is_ignored() {
        let fixture = setup();
        let sibling = fixture.channel.create_context("https://host.test", None);
        let mut sibling_inbox = sibling.listen();

        let pending = connect(&fixture.child, &fixture.registry, &fixture.guard, ChildOptions::default()).unwrap();
        sibling
            .post(fixture.child.id(), ANY_ORIGIN, &ProtocolMessage::offer(Map::new()))
            .unwrap();
        offer(&fixture, Map::new());

        let session = pending.await.unwrap();
        assert_eq!(session.counterpart(), fixture.host.id());
        assert!(sibling_inbox.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_serves_invoke_and_value_requests() {
        let fixture = setup();
        let mut host_inbox = fixture.host.listen();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let model = Model::new()
            .with_data("height", json!(480))
            .with_data("title", json!("Widget"))
            .with_fn("doWork", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Value::Null
            });

        let pending = connect(&fixture.child, &fixture.registry, &fixture.guard, ChildOptions::new(model)).unwrap();
        offer(&fixture, Map::new());
        let _session = pending.await.unwrap();
        let _ack = next_message(&mut host_inbox).unwrap();

        let child = fixture.child.id();
        fixture.host.post(child, "https://child.test", &ProtocolMessage::invoke("doWork", json!("payload"))).unwrap();
        fixture.host.post(child, "https://child.test", &ProtocolMessage::invoke("title", json!(1))).unwrap();
        fixture.host.post(child, "https://child.test", &ProtocolMessage::value_request("height", 41)).unwrap();
        fixture.host.post(child, "https://child.test", &ProtocolMessage::value_request("missing", 42)).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (_, found) = next_message(&mut host_inbox).unwrap();
        assert_eq!(found.kind, MessageKind::ValueReply);
        assert_eq!(found.correlation_id, Some(41));
        assert_eq!(found.payload, Some(json!(480)));

        let (_, missing) = next_message(&mut host_inbox).unwrap();
        assert_eq!(missing.correlation_id, Some(42));
        assert_eq!(missing.payload, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_requests_replay_once_after_handshake() {
        let fixture = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let model = Model::new().with_fn("doWork", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Value::Null
        });

        let pending = connect(&fixture.child, &fixture.registry, &fixture.guard, ChildOptions::new(model)).unwrap();
        for _ in 0..2 {
            fixture
                .host
                .post(fixture.child.id(), ANY_ORIGIN, &ProtocolMessage::invoke("doWork", json!("payload")))
                .unwrap();
        }
        offer(&fixture, Map::new());

        let _session = pending.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_and_close() {
        let fixture = setup();
        let mut host_inbox = fixture.host.listen();

        let pending = connect(&fixture.child, &fixture.registry, &fixture.guard, ChildOptions::default()).unwrap();
        offer(&fixture, Map::new());
        let session = pending.await.unwrap();
        let _ack = next_message(&mut host_inbox).unwrap();

        session.emit("resized", json!({ "height": 300 })).unwrap();
        let (_, event) = next_message(&mut host_inbox).unwrap();
        let envelope = event.event_envelope.unwrap();
        assert_eq!(envelope.name, "resized");
        assert_eq!(envelope.data, json!({ "height": 300 }));

        session.close();
        assert!(session.is_closed());
        assert!(!fixture.guard.is_held(fixture.child.id()));
        assert!(fixture.registry.is_empty());
        assert_eq!(session.emit("late", Value::Null), Err(parley_protocol::SessionError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_session_without_close_clears_registry() {
        let fixture = setup();

        let pending = connect(&fixture.child, &fixture.registry, &fixture.guard, ChildOptions::default()).unwrap();
        offer(&fixture, Map::new());
        let session = pending.await.unwrap();
        let copy = session.clone();
        assert!(fixture.registry.lookup(fixture.host.id()).is_some());

        drop(session);
        assert!(fixture.registry.lookup(fixture.host.id()).is_some());

        drop(copy);
        tokio::task::yield_now().await;
        assert!(fixture.registry.is_empty());
        assert!(!fixture.guard.is_held(fixture.child.id()));
    }
}
