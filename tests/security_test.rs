use parking_lot::Mutex;
use parley::child::{self, ChildOptions, ChildSession};
use parley::host::{self, frame::memory::MemoryEmbedder, HostOptions, HostSession};
use parley::protocol::{
    validate, Channel, ConstructionGuard, Endpoint, MessageKind, OriginFilter, ProtocolMessage,
    SessionRegistry, ANY_ORIGIN,
};
use proptest::prelude::*;
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Host session bound to a scripted child that only ever acknowledges offers
async fn establish(channel: &Channel) -> (HostSession, Endpoint) {
    let host = channel.create_context("https://host.test", None);
    let children = Arc::new(Mutex::new(Vec::new()));

    let embedder = {
        let children = Arc::clone(&children);
        MemoryEmbedder::new(&host).with_hook(move |endpoint, frame| {
            let mut inbox = endpoint.listen();
            let responder = endpoint.clone();
            tokio::spawn(async move {
                while let Some(delivery) = inbox.recv().await {
                    let Ok(message) = validate(&delivery, OriginFilter::Any) else {
                        continue;
                    };
                    if message.kind == MessageKind::Offer {
                        let ack = ProtocolMessage::offer_ack();
                        responder.post(delivery.source, &delivery.origin, &ack).unwrap();
                    }
                }
            });
            frame.mark_loaded();
            children.lock().push(endpoint);
        })
    };

    let session = host::connect(&host, &embedder, &SessionRegistry::new(), HostOptions::new("https://child.test"))
        .await
        .unwrap();
    let child = children.lock()[0].clone();
    (session, child)
}

fn hostile_message() -> impl Strategy<Value = ProtocolMessage> {
    prop_oneof![
        "[a-z]{1,6}".prop_map(|name| ProtocolMessage::event(name, json!("spoofed"))),
        Just(ProtocolMessage::event("resized", json!("spoofed"))),
        (1u64..10_000).prop_map(|id| ProtocolMessage::value_reply("value", Some(json!("spoofed")), id)),
        Just(ProtocolMessage::offer_ack()),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_foreign_senders_change_nothing(
        origin in "https://[a-z]{1,10}\\.(test|example)",
        messages in proptest::collection::vec(hostile_message(), 1..8),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        let (fired, resolved) = runtime.block_on(async move {
            let channel = Channel::new();
            let (session, _child) = establish(&channel).await;

            let fired = Arc::new(Mutex::new(0usize));
            let counter = Arc::clone(&fired);
            session.on("resized", move |_| *counter.lock() += 1);

            let pending = {
                let session = session.clone();
                tokio::spawn(async move { session.get("value").await })
            };
            sleep(Duration::from_millis(1)).await;

            // Same origin as the child is still a different identity
            let attackers = [
                channel.create_context(origin, None),
                channel.create_context("https://child.test", None),
            ];
            for attacker in &attackers {
                for message in &messages {
                    attacker.post(session.counterpart(), ANY_ORIGIN, message).unwrap();
                    attacker.post(session_host(&channel, &session), ANY_ORIGIN, message).unwrap();
                }
            }
            sleep(Duration::from_millis(1)).await;

            let fired = *fired.lock();
            (fired, pending.is_finished())
        });

        prop_assert_eq!(fired, 0);
        prop_assert!(!resolved);
    }
}

/// The host's identity is not exposed on the session; find it on the channel
fn session_host(channel: &Channel, session: &HostSession) -> parley::protocol::EndpointId {
    channel
        .endpoint(session.counterpart())
        .and_then(|child| child.parent())
        .expect("child context has a parent")
}

#[tokio::test(start_paused = true)]
async fn test_sibling_offer_cannot_hijack_child() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();

    let channel = Channel::new();
    let parent = channel.create_context("https://host.test", None);
    let sibling = channel.create_context("https://host.test", Some(parent.id()));
    let endpoint = channel.create_context("https://child.test", Some(parent.id()));
    let mut sibling_inbox = sibling.listen();
    let registry = SessionRegistry::new();

    let pending = child::connect(&endpoint, &registry, &ConstructionGuard::new(), ChildOptions::default()).unwrap();

    let mut hijack = Map::new();
    hijack.insert("greet".to_string(), json!("hijacked"));
    sibling
        .post(endpoint.id(), ANY_ORIGIN, &ProtocolMessage::offer(hijack))
        .unwrap();

    let mut genuine = Map::new();
    genuine.insert("greet".to_string(), json!("hello"));
    parent
        .post(endpoint.id(), ANY_ORIGIN, &ProtocolMessage::offer(genuine))
        .unwrap();

    let session = pending.await.unwrap();
    assert_eq!(session.counterpart(), parent.id());
    assert_eq!(session.model().snapshot().get("greet"), Some(&json!("hello")));
    assert!(sibling_inbox.try_recv().is_none());
    assert!(registry.lookup(sibling.id()).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sessions_on_one_host_stay_separate() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();

    let channel = Channel::new();
    let host = channel.create_context("https://host.test", None);
    let registry = SessionRegistry::new();
    let guard = ConstructionGuard::new();
    let children = Arc::new(Mutex::new(Vec::new()));

    let embedder = {
        let children = Arc::clone(&children);
        MemoryEmbedder::new(&host).with_hook(move |endpoint, frame| {
            let pending = child::connect(&endpoint, &SessionRegistry::new(), &guard, ChildOptions::default())
                .expect("fresh endpoint");
            let children = Arc::clone(&children);
            tokio::spawn(async move {
                if let Ok(session) = pending.await {
                    children.lock().push((endpoint, session));
                }
            });
            frame.mark_loaded();
        })
    };

    let first = host::connect(&host, &embedder, &registry, HostOptions::new("https://a.test")).await.unwrap();
    let second = host::connect(&host, &embedder, &registry, HostOptions::new("https://b.test")).await.unwrap();
    sleep(Duration::from_millis(1)).await;
    assert_eq!(registry.len(), 2);

    let seen = Arc::new(Mutex::new(Vec::new()));
    for session in [&first, &second] {
        let seen = Arc::clone(&seen);
        let counterpart = session.counterpart();
        session.on("ping", move |data| seen.lock().push((counterpart, data.clone())));
    }

    // Each child announces its own identity; only its own host session may hear it
    let child_sessions: Vec<(Endpoint, ChildSession)> = children.lock().clone();
    assert_eq!(child_sessions.len(), 2);
    for (endpoint, child_session) in &child_sessions {
        child_session.emit("ping", json!(endpoint.id().to_string())).unwrap();
    }
    sleep(Duration::from_millis(1)).await;

    let mut seen = seen.lock().clone();
    seen.sort_by_key(|(counterpart, _)| *counterpart);
    assert_eq!(seen.len(), 2);
    for (counterpart, data) in seen {
        assert_eq!(data, json!(counterpart.to_string()));
    }
}
