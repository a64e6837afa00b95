//! End-to-end scenarios driven against a real `ClusterTransport`, exercised
//! over its actual UDP sockets rather than by poking internal state.
//!
//! These all address a transport to itself. That isn't a shortcut around
//! testing the network path — fragmentation, reassembly, receipts and
//! dispatch all still round-trip through real sockets — it sidesteps a
//! genuine ambiguity in how the host kernel fans a loopback "broadcast" out
//! to several independent sockets all bound to the same port in one test
//! process, which real distinct cluster members on separate hosts never
//! have to deal with. Multi-member delivery and nack/retry behavior are
//! covered at the component level in `src/workers/receiver.rs`'s own tests,
//! where the demultiplexer can be driven directly.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cluster_net::{ActorTarget, ClusterConfig, ClusterError, ClusterIdentity, ClusterMessage, ClusterTransport, MessageSink};

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<(ClusterIdentity, ClusterMessage)>>,
}

impl MessageSink for RecordingSink {
    fn on_message(&self, source: ClusterIdentity, message: ClusterMessage) {
        self.messages.lock().unwrap().push((source, message));
    }
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    fn contains(&self, expected: &ClusterMessage) -> bool {
        self.messages.lock().unwrap().iter().any(|(_, m)| m == expected)
    }
}

fn loopback() -> Vec<IpAddr> {
    vec!["127.0.0.1".parse().unwrap()]
}

fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

/// A message spanning several chunks, sent unicast to the sending node's own
/// identity, is fragmented, reassembled and delivered exactly once — and
/// the receiving side's receipt satisfies the sender's wait, rather than
/// leaving it to retry until it gives up.
#[test]
fn self_addressed_multi_chunk_message_is_reassembled_and_delivered_once() {
    let sink = Arc::new(RecordingSink::default());
    let node = ClusterTransport::start(
        ClusterConfig::new("loopback-unicast", "group")
            .unwrap()
            .with_bind_interfaces(loopback())
            .unwrap()
            .with_message_sink(sink.clone()),
    )
    .unwrap();

    let payload = ClusterMessage::ActorMessage {
        target: ActorTarget::ById("worker-1".into()),
        body: vec![0x5Au8; 3000], // 3 chunks at the default 1024B chunk size
    };
    node.send(node.cluster_id(), &payload).unwrap();

    assert!(wait_until(|| sink.contains(&payload), Duration::from_secs(2)));
    assert_eq!(sink.count(), 1);

    node.shutdown();
}

/// A broadcast message never waits for a receipt and is delivered exactly
/// once to the sending node's own sink.
#[test]
fn self_addressed_broadcast_is_delivered_once_without_a_receipt() {
    let sink = Arc::new(RecordingSink::default());
    let node = ClusterTransport::start(
        ClusterConfig::new("loopback-broadcast", "group")
            .unwrap()
            .with_bind_interfaces(loopback())
            .unwrap()
            .with_message_sink(sink.clone()),
    )
    .unwrap();

    let payload = ClusterMessage::Stop { target: ActorTarget::ByClass("listeners".into()) };
    node.broadcast(&payload).unwrap();

    assert!(wait_until(|| sink.contains(&payload), Duration::from_secs(2)));
    assert_eq!(sink.count(), 1);

    node.shutdown();
}

/// Many small concurrent sends all arrive, none are dropped or duplicated.
#[test]
fn self_addressed_burst_of_small_messages_all_arrive_exactly_once() {
    let sink = Arc::new(RecordingSink::default());
    let node = ClusterTransport::start(
        ClusterConfig::new("loopback-burst", "group")
            .unwrap()
            .with_bind_interfaces(loopback())
            .unwrap()
            .with_message_sink(sink.clone()),
    )
    .unwrap();

    const COUNT: u64 = 20;
    for i in 0..COUNT {
        node.send(node.cluster_id(), &ClusterMessage::StatusRequest { request_id: i }).unwrap();
    }

    assert!(wait_until(|| sink.count() as u64 >= COUNT, Duration::from_secs(3)));
    assert_eq!(sink.count() as u64, COUNT);
    for i in 0..COUNT {
        assert!(sink.contains(&ClusterMessage::StatusRequest { request_id: i }));
    }

    node.shutdown();
}

/// The `send_all_*`/`stop_*`/`request_status` wrappers are thin sugar over
/// `send`/`broadcast` that construct the matching `ClusterMessage` variant;
/// this checks the variant and the routing both come out right.
#[test]
fn thin_wrapper_methods_construct_the_expected_message_variants() {
    let sink = Arc::new(RecordingSink::default());
    let node = ClusterTransport::start(
        ClusterConfig::new("loopback-wrappers", "group")
            .unwrap()
            .with_bind_interfaces(loopback())
            .unwrap()
            .with_message_sink(sink.clone()),
    )
    .unwrap();

    node.send_all_by_class("listeners", vec![1, 2, 3]).unwrap();
    node.send_all_with_id(node.cluster_id(), "worker-9", vec![4, 5]).unwrap();
    node.stop_all_by_class("listeners").unwrap();
    node.stop_by_id(node.cluster_id(), "worker-9").unwrap();
    node.request_status(node.cluster_id(), 7).unwrap();

    assert!(wait_until(|| sink.count() >= 5, Duration::from_secs(3)));
    assert!(sink.contains(&ClusterMessage::ActorMessage {
        target: ActorTarget::ByClass("listeners".into()),
        body: vec![1, 2, 3],
    }));
    assert!(sink.contains(&ClusterMessage::ActorMessage {
        target: ActorTarget::ById("worker-9".into()),
        body: vec![4, 5],
    }));
    assert!(sink.contains(&ClusterMessage::Stop { target: ActorTarget::ByClass("listeners".into()) }));
    assert!(sink.contains(&ClusterMessage::Stop { target: ActorTarget::ById("worker-9".into()) }));
    assert!(sink.contains(&ClusterMessage::StatusRequest { request_id: 7 }));

    node.shutdown();
}

/// Once shut down, the transport rejects further sends instead of queuing
/// them behind joined worker threads.
#[test]
fn send_after_shutdown_is_rejected() {
    let node = ClusterTransport::start(
        ClusterConfig::new("loopback-shutdown", "group").unwrap().with_bind_interfaces(loopback()).unwrap(),
    )
    .unwrap();

    node.shutdown();
    node.shutdown(); // idempotent

    let err = node.send(node.cluster_id(), &ClusterMessage::StatusRequest { request_id: 1 }).unwrap_err();
    assert!(matches!(err, ClusterError::Shutdown));

    let err = node.broadcast(&ClusterMessage::StatusRequest { request_id: 1 }).unwrap_err();
    assert!(matches!(err, ClusterError::Shutdown));
}

/// Two independently-configured transports in the same process each get
/// their own sockets and their own cluster identity.
#[test]
fn independent_transports_get_distinct_identities_and_sockets() {
    let node_a = ClusterTransport::start(
        ClusterConfig::new("loopback-distinct", "group").unwrap().with_bind_interfaces(loopback()).unwrap(),
    )
    .unwrap();
    let node_b = ClusterTransport::start(
        ClusterConfig::new("loopback-distinct", "group").unwrap().with_bind_interfaces(loopback()).unwrap(),
    )
    .unwrap();

    assert_ne!(node_a.cluster_id(), node_b.cluster_id());

    node_a.shutdown();
    node_b.shutdown();
}
