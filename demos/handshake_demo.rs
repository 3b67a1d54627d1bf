//! Host and Child Handshake Demo
//!
//! This example demonstrates:
//! - Embedding a child context and establishing a session
//! - Sharing host data with the child through the offer
//! - Calling child methods and reading child values
//! - Child events reaching host handlers
//! - Tearing the session down
//!
//! Run with: `cargo run --example handshake_demo`

use parley::child::{self, ChildOptions, Model};
use parley::host::{self, frame::memory::MemoryEmbedder, HostOptions};
use parley::protocol::{Channel, ConstructionGuard, SessionRegistry};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("🚀 Parley Handshake Demo");
    println!("========================\n");

    let channel = Channel::new();
    let host_endpoint = channel.create_context("https://host.example", None);
    let registry = SessionRegistry::new();
    let guard = ConstructionGuard::new();

    // The child side starts as soon as its context exists
    let embedder = MemoryEmbedder::new(&host_endpoint).with_hook(move |endpoint, frame| {
        let model = Model::new()
            .with_data("height", json!(480))
            .with_fn("resize", |size| {
                println!("   child: resize to {}", size);
                Value::Null
            })
            .with_method("status", |_| async {
                sleep(Duration::from_millis(20)).await;
                json!("ready")
            });

        match child::connect(&endpoint, &SessionRegistry::new(), &guard, ChildOptions::new(model)) {
            Ok(pending) => {
                tokio::spawn(async move {
                    match pending.await {
                        Ok(session) => {
                            println!(
                                "   child: connected to {} (greet = {:?})",
                                session.parent_origin(),
                                session.model().snapshot().get("greet")
                            );
                            sleep(Duration::from_millis(100)).await;
                            let _ = session.emit("resized", json!({ "height": 300 }));
                        }
                        Err(e) => eprintln!("   child: handshake failed: {}", e),
                    }
                });
            }
            Err(e) => eprintln!("   child: {}", e),
        }
        frame.mark_loaded();
    });

    println!("📡 Embedding https://child.example/widget");

    let options = HostOptions::new("https://child.example/widget")
        .with_name("widget")
        .with_model_entry("greet", json!("hello"));

    let session = match host::connect(&host_endpoint, &embedder, &registry, options).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("❌ Handshake failed: {}", e);
            return;
        }
    };

    println!("✅ Session established with {}\n", session.child_origin());

    session.on("resized", |data| println!("📨 Event from child: resized {}", data));

    if let Err(e) = session.call("resize", json!(300)) {
        eprintln!("❌ Call failed: {}", e);
    }

    for property in ["height", "status", "missing"] {
        match session.get_with_timeout(property, Duration::from_secs(1)).await {
            Ok(value) => println!("📊 {} = {}", property, value),
            Err(e) => eprintln!("❌ get({}) failed: {}", property, e),
        }
    }

    sleep(Duration::from_millis(200)).await;

    println!("\n👋 Destroying session");
    session.destroy();
    println!("   registry entries left: {}", registry.len());
}
