//! Public entry point: `ClusterConfig` and `ClusterTransport`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};

use crate::address_map::AddressMap;
use crate::constants::SENDING_CHUNK_SIZE;
use crate::error::{ClusterError, Result};
use crate::identity::{ClusterIdentity, Uuid};
use crate::message::{ActorRegistry, ActorTarget, ClusterMessage, MessageSink};
use crate::receiving::ReceivingMessage;
use crate::sending::SendingMessage;
use crate::sockets::{self, SocketTable};
use crate::waiting_queue::WaitingQueue;
use crate::wire::Frame;
use crate::workers;

/// Configuration for a `ClusterTransport`, built the same way a
/// `RingBufferConfig` is built: each setter validates eagerly and the whole
/// thing fails fast at construction, never mid-flight.
pub struct ClusterConfig {
    pub(crate) app_name: String,
    pub(crate) group_name: String,
    pub(crate) chunk_size: u16,
    pub(crate) actor_registry: Option<Arc<dyn ActorRegistry>>,
    pub(crate) message_sink: Option<Arc<dyn MessageSink>>,
    pub(crate) bind_interfaces: Option<Vec<IpAddr>>,
}

impl ClusterConfig {
    /// Start a new config for the given application and group name. Both
    /// must be non-empty; the pair identifies this transport in the
    /// process-wide registry.
    pub fn new(app_name: impl Into<String>, group_name: impl Into<String>) -> Result<Self> {
        let app_name = app_name.into();
        let group_name = group_name.into();
        if app_name.is_empty() {
            return Err(ClusterError::config("app_name must not be empty"));
        }
        if group_name.is_empty() {
            return Err(ClusterError::config("group_name must not be empty"));
        }
        Ok(Self {
            app_name,
            group_name,
            chunk_size: SENDING_CHUNK_SIZE,
            actor_registry: None,
            message_sink: None,
            bind_interfaces: None,
        })
    }

    /// Override the chunk size messages are fragmented into. Must leave
    /// room for the frame header within a single UDP datagram.
    pub fn with_chunk_size(mut self, chunk_size: u16) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ClusterError::config("chunk_size must be nonzero"));
        }
        if (chunk_size as usize + crate::wire::HEADER_LEN) > crate::constants::MAX_UDP_PACKET {
            return Err(ClusterError::config("chunk_size too large for a single datagram"));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    /// Attach the actor registry reassembled messages are dispatched into.
    pub fn with_actor_registry(mut self, registry: Arc<dyn ActorRegistry>) -> Self {
        self.actor_registry = Some(registry);
        self
    }

    /// Attach a sink that observes every reassembled message.
    pub fn with_message_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.message_sink = Some(sink);
        self
    }

    /// Restrict discovery to exactly these interface addresses instead of
    /// every non-loopback IPv4 interface, and bypass the process-wide
    /// memoized socket table. Intended for test environments that need
    /// several independent `ClusterTransport` instances in one process
    /// (e.g. multiple loopback addresses standing in for cluster members);
    /// real deployments should leave this unset.
    pub fn with_bind_interfaces(mut self, interfaces: Vec<IpAddr>) -> Result<Self> {
        if interfaces.is_empty() {
            return Err(ClusterError::config("bind_interfaces must not be empty if set"));
        }
        self.bind_interfaces = Some(interfaces);
        Ok(self)
    }
}

/// State shared by every worker thread. Not exposed outside the crate; the
/// public surface is `ClusterTransport`.
pub(crate) struct TransportContext {
    pub cluster_id: ClusterIdentity,
    pub app_name: String,
    pub group_name: String,
    pub socket_table: Arc<SocketTable>,
    pub address_map: AddressMap,
    pub sending: RwLock<HashMap<Uuid, Arc<SendingMessage>>>,
    pub receiving: RwLock<HashMap<Uuid, Arc<ReceivingMessage>>>,
    pub sent_waiting_queue: WaitingQueue<Uuid>,
    pub received_waiting_queue: WaitingQueue<Uuid>,
    pub actor_registry: Option<Arc<dyn ActorRegistry>>,
    pub message_sink: Option<Arc<dyn MessageSink>>,
    pub running: AtomicBool,
    pub chunk_size: u16,
}

impl TransportContext {
    /// The local socket that can reach `addr`, if any local interface
    /// shares its subnet. `None` means this process has no route to `addr`
    /// at all (spec §4.1 `socketForTarget`/`destinationFor`: "if none
    /// matches, return nil" — never a guess at a default interface).
    fn outbound_socket(&self, addr: &SocketAddr) -> Option<Arc<UdpSocket>> {
        match addr {
            SocketAddr::V4(v4) => {
                self.socket_table.socket_for_target(*v4.ip()).map(|iface| iface.unicast.clone())
            }
            SocketAddr::V6(_) => None,
        }
    }

    /// Resolve both a known address and a locally-reachable socket for
    /// `identity` — the full §4.1 `destinationFor` contract: `None` unless
    /// an address has been observed for `identity` *and* a local interface
    /// shares its subnet.
    pub(crate) fn resolve_route(&self, identity: ClusterIdentity) -> Option<(SocketAddr, Arc<UdpSocket>)> {
        let addr = self.address_map.preferred_address(&identity)?;
        let socket = self.outbound_socket(&addr)?;
        Some((addr, socket))
    }

    /// Send one frame directly to `addr`, dropping it (with a log) if no
    /// local interface can reach that address.
    pub fn send_frame(&self, frame: &Frame, addr: SocketAddr) {
        match self.outbound_socket(&addr) {
            Some(socket) => {
                let bytes = frame.encode();
                if let Err(error) = socket.send_to(&bytes, addr) {
                    tracing::warn!(%error, %addr, "failed to send frame");
                }
            }
            None => tracing::warn!(%addr, "no local interface can reach this address, dropping frame"),
        }
    }

    /// Send one frame to every interface's broadcast address, each one sent
    /// out on the socket it owns directly rather than re-resolved through
    /// `socket_for_target`.
    pub fn broadcast_frame(&self, frame: &Frame) {
        let bytes = frame.encode();
        for (iface, addr) in self.socket_table.interfaces.iter().zip(self.socket_table.broadcast_destinations()) {
            if let Err(error) = iface.unicast.send_to(&bytes, addr) {
                tracing::warn!(%error, %addr, "failed to send broadcast frame");
            }
        }
    }

    /// Send a frame to the best known route for a message's destination,
    /// falling back to a cluster-wide broadcast when no route is known yet
    /// — either no address has been observed for `destination`, or none of
    /// this process's interfaces share a subnet with the address that was
    /// observed (spec §4.3: "if `destinationFor(destId)` returns an
    /// address, unicast ...; otherwise broadcast").
    pub fn route_frame(&self, destination: Option<ClusterIdentity>, frame: &Frame) {
        match destination.and_then(|id| self.resolve_route(id)) {
            Some((addr, _socket)) => self.send_frame(frame, addr),
            None => self.broadcast_frame(frame),
        }
    }
}

pub(crate) struct SendJob {
    pub destination: Option<ClusterIdentity>,
    pub payload: Vec<u8>,
}

/// A running reliable chunked-UDP transport for one cluster member.
pub struct ClusterTransport {
    ctx: Arc<TransportContext>,
    inbox: Sender<SendJob>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterTransport {
    /// Discover local sockets, generate this member's identity, and start
    /// all six worker threads.
    pub fn start(config: ClusterConfig) -> Result<Self> {
        let socket_table = sockets::discover_sockets(config.bind_interfaces.as_deref())?;
        let cluster_id = ClusterIdentity::generate();

        let ctx = Arc::new(TransportContext {
            cluster_id,
            app_name: config.app_name,
            group_name: config.group_name,
            socket_table,
            address_map: AddressMap::new(),
            sending: RwLock::new(HashMap::new()),
            receiving: RwLock::new(HashMap::new()),
            sent_waiting_queue: WaitingQueue::new(),
            received_waiting_queue: WaitingQueue::new(),
            actor_registry: config.actor_registry,
            message_sink: config.message_sink,
            running: AtomicBool::new(true),
            chunk_size: config.chunk_size,
        });

        let (tx, rx) = channel::unbounded();
        let mut threads = Vec::new();

        threads.push(workers::sender::spawn(ctx.clone(), rx));
        threads.push(workers::sent_waiting::spawn(ctx.clone()));
        threads.push(workers::sent_cleaner::spawn(ctx.clone()));
        threads.push(workers::received_waiting::spawn(ctx.clone()));
        threads.push(workers::received_cleaner::spawn(ctx.clone()));
        for iface in &ctx.socket_table.interfaces {
            threads.push(workers::receiver::spawn(ctx.clone(), iface.unicast.clone()));
            threads.push(workers::receiver::spawn(ctx.clone(), iface.broadcast_recv.clone()));
        }

        tracing::info!(
            app_name = %ctx.app_name,
            group_name = %ctx.group_name,
            interfaces = ctx.socket_table.interfaces.len(),
            "cluster transport started"
        );

        Ok(Self { ctx, inbox: tx, threads: Mutex::new(threads) })
    }

    /// This member's identity, generated fresh at `start`.
    pub fn cluster_id(&self) -> ClusterIdentity {
        self.ctx.cluster_id
    }

    /// Application name this transport was configured with.
    pub fn app_name(&self) -> &str {
        &self.ctx.app_name
    }

    /// Group name this transport was configured with.
    pub fn group_name(&self) -> &str {
        &self.ctx.group_name
    }

    /// Number of messages currently being sent (not yet fully acknowledged
    /// or retained past acknowledgement).
    pub fn pending_sends(&self) -> usize {
        self.ctx.sending.read().len()
    }

    /// Number of messages currently being reassembled or retained after
    /// reassembly.
    pub fn pending_receives(&self) -> usize {
        self.ctx.receiving.read().len()
    }

    /// Send `message` to a specific cluster member.
    pub fn send(&self, destination: ClusterIdentity, message: &ClusterMessage) -> Result<()> {
        self.enqueue(Some(destination), message)
    }

    /// Send `message` to every member of the cluster.
    pub fn broadcast(&self, message: &ClusterMessage) -> Result<()> {
        self.enqueue(None, message)
    }

    /// Deliver `body` to every actor registered under `class_name` on every
    /// cluster member. Thin wrapper around [`Self::broadcast`].
    pub fn send_all_by_class(&self, class_name: impl Into<String>, body: Vec<u8>) -> Result<()> {
        self.broadcast(&ClusterMessage::ActorMessage {
            target: ActorTarget::ByClass(class_name.into()),
            body,
        })
    }

    /// Deliver `body` to the single actor registered under `actor_id` on
    /// `destination`. Thin wrapper around [`Self::send`].
    pub fn send_all_with_id(
        &self,
        destination: ClusterIdentity,
        actor_id: impl Into<String>,
        body: Vec<u8>,
    ) -> Result<()> {
        self.send(
            destination,
            &ClusterMessage::ActorMessage { target: ActorTarget::ById(actor_id.into()), body },
        )
    }

    /// Ask every actor registered under `class_name`, cluster-wide, to stop.
    pub fn stop_all_by_class(&self, class_name: impl Into<String>) -> Result<()> {
        self.broadcast(&ClusterMessage::Stop { target: ActorTarget::ByClass(class_name.into()) })
    }

    /// Ask the single actor registered under `actor_id` on `destination` to
    /// stop.
    pub fn stop_by_id(&self, destination: ClusterIdentity, actor_id: impl Into<String>) -> Result<()> {
        self.send(destination, &ClusterMessage::Stop { target: ActorTarget::ById(actor_id.into()) })
    }

    /// Ask `destination` for a status snapshot, correlated by `request_id`.
    pub fn request_status(&self, destination: ClusterIdentity, request_id: u64) -> Result<()> {
        self.send(destination, &ClusterMessage::StatusRequest { request_id })
    }

    fn enqueue(&self, destination: Option<ClusterIdentity>, message: &ClusterMessage) -> Result<()> {
        if !self.ctx.running.load(Ordering::Acquire) {
            return Err(ClusterError::Shutdown);
        }
        let payload = message.encode()?;
        self.inbox
            .send(SendJob { destination, payload })
            .map_err(|_| ClusterError::Shutdown)
    }

    /// Stop accepting new sends and join every worker thread. Idempotent.
    pub fn shutdown(&self) {
        if self.ctx.running.swap(false, Ordering::AcqRel) {
            tracing::info!(app_name = %self.ctx.app_name, group_name = %self.ctx.group_name, "shutting down cluster transport");
        }
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ClusterTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_empty_names() {
        assert!(ClusterConfig::new("", "group").is_err());
        assert!(ClusterConfig::new("app", "").is_err());
    }

    #[test]
    fn config_rejects_chunk_size_that_overflows_a_datagram() {
        let config = ClusterConfig::new("app", "group").unwrap();
        assert!(config.with_chunk_size(u16::MAX).is_err());
    }

    #[test]
    fn config_accepts_a_reasonable_chunk_size() {
        let config = ClusterConfig::new("app", "group").unwrap().with_chunk_size(2048);
        assert!(config.is_ok());
    }
}
