//! Two-node demonstration of the reliable chunked UDP transport.
//!
//! cluster-net has no CLI/environment surface of its own; this binary exists
//! only to exercise it end to end on loopback, the way a reader would
//! otherwise have to reach for two separate processes to see.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cluster_net::{ClusterConfig, ClusterIdentity, ClusterMessage, ClusterTransport, MessageSink, NodeStatus};

/// Collects every message a transport's Receiver thread hands it, for the
/// driving thread to inspect, indexed by arrival order.
struct Inbox {
    received: Mutex<Vec<(ClusterIdentity, ClusterMessage)>>,
}

impl Inbox {
    fn new() -> Arc<Self> {
        Arc::new(Self { received: Mutex::new(Vec::new()) })
    }

    fn len(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    fn at(&self, index: usize) -> Option<(ClusterIdentity, ClusterMessage)> {
        self.received.lock().unwrap().get(index).cloned()
    }
}

impl MessageSink for Inbox {
    fn on_message(&self, source: ClusterIdentity, message: ClusterMessage) {
        println!("  <- from {source:?}: {message:?}");
        self.received.lock().unwrap().push((source, message));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cluster-net - reliable chunked UDP transport demo");
    println!("==================================================");

    let loopback: Vec<IpAddr> = vec!["127.0.0.1".parse()?];

    let inbox_a = Inbox::new();
    let node_a = ClusterTransport::start(
        ClusterConfig::new("demo-app", "demo-group")?
            .with_bind_interfaces(loopback.clone())?
            .with_message_sink(inbox_a.clone()),
    )?;

    let inbox_b = Inbox::new();
    let node_b = ClusterTransport::start(
        ClusterConfig::new("demo-app", "demo-group")?
            .with_bind_interfaces(loopback)?
            .with_message_sink(inbox_b.clone()),
    )?;

    println!("node A: {:?}", node_a.cluster_id());
    println!("node B: {:?}", node_b.cluster_id());

    println!("\nA broadcasts a status request...");
    node_a.broadcast(&ClusterMessage::StatusRequest { request_id: 1 })?;

    // Both nodes share one loopback address in this single-process demo, so
    // their broadcast-receive sockets both listen on the same wildcard port;
    // which one the kernel actually hands a given loopback datagram to isn't
    // specified (ordinary unicast delivery semantics, since 127.0.0.1 carries
    // no real broadcast flag), so poll both inboxes rather than assuming B
    // is the one that observes it — it may even loop back to A itself.
    let (responder_name, responder_inbox, responder_transport, request_source) =
        wait_for_either(&inbox_a, &node_a, &inbox_b, &node_b, Duration::from_secs(2))
            .ok_or("neither node observed the broadcast status request")?;

    println!("\n{responder_name} replies to the requester directly (unicast, now that its address is known)...");
    let reply_watermark = responder_inbox.len();
    responder_transport.send(
        request_source,
        &ClusterMessage::StatusResponse {
            request_id: 1,
            status: NodeStatus { app_name: "demo-app".into(), group_name: "demo-group".into(), actor_count: 0 },
        },
    )?;

    // If the broadcast looped back to its own sender, the "requester" and
    // "responder" are the same node; wait for an entry past the one already
    // recorded above rather than re-observing the original request.
    wait_for_new(responder_inbox, reply_watermark, Duration::from_secs(2))
        .ok_or("requester never received the reply")?;

    println!("\nRound trip complete. Pending sends: A={}, B={}", node_a.pending_sends(), node_b.pending_sends());

    node_a.shutdown();
    node_b.shutdown();
    Ok(())
}

/// Poll both inboxes for the first to observe a `StatusRequest`, returning
/// which node saw it (by name), that node's inbox and transport handle, and
/// the cluster id the request came from.
fn wait_for_either<'a>(
    inbox_a: &'a Arc<Inbox>,
    node_a: &'a ClusterTransport,
    inbox_b: &'a Arc<Inbox>,
    node_b: &'a ClusterTransport,
    timeout: Duration,
) -> Option<(&'static str, &'a Arc<Inbox>, &'a ClusterTransport, ClusterIdentity)> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Some((source, ClusterMessage::StatusRequest { .. })) = inbox_a.at(0) {
            return Some(("A", inbox_a, node_a, source));
        }
        if let Some((source, ClusterMessage::StatusRequest { .. })) = inbox_b.at(0) {
            return Some(("B", inbox_b, node_b, source));
        }
        if std::time::Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Wait for an inbox entry to appear at or past `watermark`.
fn wait_for_new(inbox: &Inbox, watermark: usize, timeout: Duration) -> Option<(ClusterIdentity, ClusterMessage)> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Some(entry) = inbox.at(watermark) {
            return Some(entry);
        }
        if std::time::Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
