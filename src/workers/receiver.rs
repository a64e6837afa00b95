//! Receiver: the demultiplexer. One thread per bound socket (each interface
//! contributes a unicast and a broadcast-receive socket); parses inbound
//! datagrams and dispatches by frame type into the send- and receive-side
//! state machines.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::constants::{MAX_UDP_PACKET, RECV_BUFFER_SIZE, WAITING_FOR_ALL_CHUNKS_TIMEOUT};
use crate::identity::Uuid;
use crate::receiving::ReceivingMessage;
use crate::transport::TransportContext;
use crate::wire::{Frame, FrameHeader};

pub(crate) fn spawn(ctx: Arc<TransportContext>, socket: Arc<UdpSocket>) -> JoinHandle<()> {
    let local_addr = socket.local_addr().ok();
    thread::Builder::new()
        .name("cluster-receiver".into())
        .spawn(move || run(ctx, socket, local_addr))
        .expect("failed to spawn receiver thread")
}

fn run(ctx: Arc<TransportContext>, socket: Arc<UdpSocket>, local_addr: Option<SocketAddr>) {
    let _span = tracing::info_span!("receiver", socket = ?local_addr).entered();
    tracing::debug!("receiver worker started");

    let mut buf = vec![0u8; RECV_BUFFER_SIZE.max(MAX_UDP_PACKET)];
    while ctx.running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => handle_datagram(&ctx, &socket, &buf[..n], from),
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
            Err(e) => {
                if ctx.running.load(Ordering::Acquire) {
                    tracing::warn!(error = %e, "receiver socket error");
                }
                continue;
            }
        }
    }

    tracing::debug!("receiver worker stopped");
}

fn handle_datagram(ctx: &Arc<TransportContext>, socket: &Arc<UdpSocket>, bytes: &[u8], from: SocketAddr) {
    let frame = match Frame::decode(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, %from, "dropping malformed datagram");
            return;
        }
    };

    match frame {
        Frame::Chunk { header, index, payload } => on_chunk(ctx, socket, header, index, payload, from),
        Frame::ReceiptRequest { header } => on_receipt_request(ctx, socket, header, from),
        Frame::NoLongerExists { header } => on_no_longer_exists(ctx, header, from),
        Frame::Receipt { header, error_code } => on_receipt(ctx, socket, header, error_code, from),
        Frame::ChunksNeeded { header, indices } => on_chunks_needed(ctx, socket, header, &indices, from),
        Frame::ChunkRangesNeeded { header, ranges } => on_ranges_needed(ctx, socket, header, &ranges, from),
    }
}

fn addressed_to_us(ctx: &TransportContext, header: &FrameHeader) -> bool {
    match header.destination {
        None => true,
        Some(dest) => dest == ctx.cluster_id,
    }
}

fn get_or_create_receiving(ctx: &Arc<TransportContext>, header: FrameHeader) -> Arc<ReceivingMessage> {
    if let Some(existing) = ctx.receiving.read().get(&header.uuid) {
        return existing.clone();
    }
    let mut receiving = ctx.receiving.write();
    receiving
        .entry(header.uuid)
        .or_insert_with(|| {
            let message = Arc::new(ReceivingMessage::new(header.uuid, Some(header.uuid.cluster_id), header));
            let handle = ctx
                .received_waiting_queue
                .insert(Instant::now() + WAITING_FOR_ALL_CHUNKS_TIMEOUT, header.uuid);
            message.set_chunk_wait_handle(handle);
            message
        })
        .clone()
}

fn on_chunk(
    ctx: &Arc<TransportContext>,
    socket: &Arc<UdpSocket>,
    header: FrameHeader,
    index: u32,
    payload: Vec<u8>,
    from: SocketAddr,
) {
    ctx.address_map.observe(header.uuid.cluster_id, from);
    if !addressed_to_us(ctx, &header) {
        return;
    }

    let message = get_or_create_receiving(ctx, header);
    if message.add_chunk(index, payload) {
        process_message_once(ctx, socket, &message, header, from);
    }
}

fn on_receipt_request(ctx: &Arc<TransportContext>, socket: &Arc<UdpSocket>, header: FrameHeader, from: SocketAddr) {
    ctx.address_map.observe(header.uuid.cluster_id, from);
    if header.destination != Some(ctx.cluster_id) {
        return;
    }

    let message = get_or_create_receiving(ctx, header);
    if message.is_complete() {
        let frame = Frame::Receipt { header, error_code: 0 };
        send_via(socket, &frame, from);
    } else {
        let missing = message.missing_indices();
        for window in crate::wire::missing_index_windows(&missing) {
            let frame = Frame::ChunksNeeded { header, indices: window.to_vec() };
            send_via(socket, &frame, from);
        }
    }
}

fn on_no_longer_exists(ctx: &Arc<TransportContext>, header: FrameHeader, from: SocketAddr) {
    ctx.address_map.observe(header.uuid.cluster_id, from);
    tracing::debug!(uuid = ?header.uuid, %from, "peer no longer recognizes this message");
}

fn on_receipt(ctx: &Arc<TransportContext>, socket: &Arc<UdpSocket>, header: FrameHeader, error_code: u16, from: SocketAddr) {
    match ctx.sending.read().get(&header.uuid).cloned() {
        Some(message) => {
            if message.record_receipt() {
                tracing::debug!(uuid = ?header.uuid, error_code, "receipt received");
            }
        }
        None => reply_no_longer_exists(socket, header, from),
    }
}

fn on_chunks_needed(ctx: &Arc<TransportContext>, socket: &Arc<UdpSocket>, header: FrameHeader, indices: &[u32], from: SocketAddr) {
    match ctx.sending.read().get(&header.uuid).cloned() {
        Some(message) => {
            for frame in message.frames_for_indices(indices) {
                send_via(socket, &frame, from);
            }
        }
        None => reply_no_longer_exists(socket, header, from),
    }
}

fn on_ranges_needed(ctx: &Arc<TransportContext>, socket: &Arc<UdpSocket>, header: FrameHeader, ranges: &[(u32, u32)], from: SocketAddr) {
    match ctx.sending.read().get(&header.uuid).cloned() {
        Some(message) => {
            for frame in message.frames_for_ranges(ranges) {
                send_via(socket, &frame, from);
            }
        }
        None => reply_no_longer_exists(socket, header, from),
    }
}

fn reply_no_longer_exists(socket: &Arc<UdpSocket>, header: FrameHeader, from: SocketAddr) {
    let frame = Frame::NoLongerExists { header };
    send_via(socket, &frame, from);
}

fn process_message_once(
    ctx: &Arc<TransportContext>,
    socket: &Arc<UdpSocket>,
    message: &Arc<ReceivingMessage>,
    header: FrameHeader,
    from: SocketAddr,
) {
    if !message.mark_processed() {
        return;
    }

    let Some(bytes) = message.assemble() else {
        tracing::warn!(uuid = ?header.uuid, "message reported complete but assembly failed");
        return;
    };

    match crate::message::ClusterMessage::decode(&bytes) {
        Ok(decoded) => dispatch(ctx, header.uuid, decoded.clone()),
        Err(e) => {
            tracing::warn!(uuid = ?header.uuid, error = %e, "failed to decode reassembled message");
        }
    }

    if header.destination.is_some() {
        let frame = Frame::Receipt { header, error_code: 0 };
        send_via(socket, &frame, from);
    }
}

/// Route a reassembled message to the local collaborators. The transport
/// only matches `ClusterMessage` variants for local delivery;
/// it does not itself compose or send replies (a `StatusRequest` handler,
/// for instance, is expected to call back into [`crate::transport::ClusterTransport::send`]
/// from within [`crate::message::MessageSink::on_message`]).
fn dispatch(ctx: &Arc<TransportContext>, uuid: Uuid, message: crate::message::ClusterMessage) {
    use crate::message::ClusterMessage;

    if let Some(sink) = &ctx.message_sink {
        sink.on_message(uuid.cluster_id, message.clone());
    }

    let Some(registry) = &ctx.actor_registry else { return };
    let result = match &message {
        ClusterMessage::ActorMessage { target, body } => registry.dispatch(uuid.cluster_id, target, body),
        ClusterMessage::Stop { target } => registry.stop(target),
        ClusterMessage::StatusRequest { .. } | ClusterMessage::StatusResponse { .. } => Ok(()),
    };

    if let Err(error) = result {
        tracing::warn!(uuid = ?uuid, %error, "actor dispatch failed");
    }
}

fn send_via(socket: &Arc<UdpSocket>, frame: &Frame, addr: SocketAddr) {
    let bytes = frame.encode();
    if let Err(error) = socket.send_to(&bytes, addr) {
        tracing::warn!(%error, %addr, "failed to send reply frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicBool;

    use parking_lot::RwLock;

    use crate::address_map::AddressMap;
    use crate::identity::ClusterIdentity;
    use crate::sending::SendingMessage;
    use crate::sockets::{Interface, SocketTable};
    use crate::waiting_queue::WaitingQueue;

    fn fixture_ctx() -> (Arc<TransportContext>, UdpSocket) {
        let unicast = UdpSocket::bind("127.0.0.1:0").unwrap();
        let broadcast_recv = unicast.try_clone().unwrap();
        let table = Arc::new(SocketTable {
            interfaces: vec![Interface {
                name: "lo".into(),
                ip: Ipv4Addr::LOCALHOST,
                netmask: Ipv4Addr::new(255, 0, 0, 0),
                broadcast: None,
                unicast: Arc::new(unicast),
                broadcast_recv: Arc::new(broadcast_recv),
            }],
        });

        let ctx = Arc::new(TransportContext {
            cluster_id: ClusterIdentity::generate(),
            app_name: "test".into(),
            group_name: "group".into(),
            socket_table: table,
            address_map: AddressMap::new(),
            sending: RwLock::new(HashMap::new()),
            receiving: RwLock::new(HashMap::new()),
            sent_waiting_queue: WaitingQueue::new(),
            received_waiting_queue: WaitingQueue::new(),
            actor_registry: None,
            message_sink: None,
            running: AtomicBool::new(true),
            chunk_size: 1024,
        });

        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        (ctx, peer)
    }

    fn recv_one(socket: &UdpSocket) -> Frame {
        socket.set_read_timeout(Some(std::time::Duration::from_secs(1))).unwrap();
        let mut buf = vec![0u8; MAX_UDP_PACKET];
        let (n, _) = socket.recv_from(&mut buf).unwrap();
        Frame::decode(&buf[..n]).unwrap()
    }

    fn sample_header(ctx: &TransportContext, dest: Option<ClusterIdentity>) -> FrameHeader {
        FrameHeader {
            uuid: Uuid::generate(ctx.cluster_id),
            destination: dest,
            total_size: 10,
            chunk_size: 10,
        }
    }

    #[test]
    fn chunks_needed_for_unknown_uuid_elicits_exactly_one_no_longer_exists_reply() {
        let (ctx, peer) = fixture_ctx();
        let socket = Arc::new(peer.try_clone().unwrap());
        let header = sample_header(&ctx, Some(ctx.cluster_id));
        let from = peer.local_addr().unwrap();

        on_chunks_needed(&ctx, &socket, header, &[0, 1], from);

        let reply = recv_one(&peer);
        assert!(matches!(reply, Frame::NoLongerExists { .. }));
        assert_eq!(reply.header().uuid, header.uuid);
    }

    #[test]
    fn ranges_needed_for_unknown_uuid_elicits_no_longer_exists() {
        let (ctx, peer) = fixture_ctx();
        let socket = Arc::new(peer.try_clone().unwrap());
        let header = sample_header(&ctx, Some(ctx.cluster_id));
        let from = peer.local_addr().unwrap();

        on_ranges_needed(&ctx, &socket, header, &[(0, 5)], from);

        assert!(matches!(recv_one(&peer), Frame::NoLongerExists { .. }));
    }

    #[test]
    fn receipt_for_unknown_uuid_elicits_no_longer_exists() {
        let (ctx, peer) = fixture_ctx();
        let socket = Arc::new(peer.try_clone().unwrap());
        let header = sample_header(&ctx, Some(ctx.cluster_id));
        let from = peer.local_addr().unwrap();

        on_receipt(&ctx, &socket, header, 0, from);

        assert!(matches!(recv_one(&peer), Frame::NoLongerExists { .. }));
    }

    #[test]
    fn known_uuid_chunks_needed_resends_only_requested_indices() {
        let (ctx, peer) = fixture_ctx();
        let socket = Arc::new(peer.try_clone().unwrap());
        let uuid = Uuid::generate(ctx.cluster_id);
        let message = Arc::new(SendingMessage::new(uuid, Some(ctx.cluster_id), &vec![9u8; 2500], 1024));
        ctx.sending.write().insert(uuid, message.clone());

        let header = message.header;
        let from = peer.local_addr().unwrap();
        on_chunks_needed(&ctx, &socket, header, &[1], from);

        match recv_one(&peer) {
            Frame::Chunk { index, .. } => assert_eq!(index, 1),
            other => panic!("expected a chunk frame, got {other:?}"),
        }
    }

    #[test]
    fn receipt_request_on_incomplete_message_lists_missing_indices() {
        let (ctx, peer) = fixture_ctx();
        let socket = Arc::new(peer.try_clone().unwrap());
        let header = FrameHeader {
            uuid: Uuid::generate(ctx.cluster_id),
            destination: Some(ctx.cluster_id),
            total_size: 3000,
            chunk_size: 1024,
        };
        let from = peer.local_addr().unwrap();

        on_receipt_request(&ctx, &socket, header, from);

        match recv_one(&peer) {
            Frame::ChunksNeeded { indices, .. } => assert_eq!(indices, vec![0, 1, 2]),
            other => panic!("expected chunks-needed, got {other:?}"),
        }
    }

    #[test]
    fn receipt_request_on_complete_message_gets_a_receipt() {
        let (ctx, peer) = fixture_ctx();
        let socket = Arc::new(peer.try_clone().unwrap());
        let header = FrameHeader {
            uuid: Uuid::generate(ctx.cluster_id),
            destination: Some(ctx.cluster_id),
            total_size: 4,
            chunk_size: 4,
        };
        let from = peer.local_addr().unwrap();

        let message = get_or_create_receiving(&ctx, header);
        assert!(message.add_chunk(0, vec![1, 2, 3, 4]));

        on_receipt_request(&ctx, &socket, header, from);

        assert!(matches!(recv_one(&peer), Frame::Receipt { error_code: 0, .. }));
    }

    #[test]
    fn chunk_not_addressed_to_us_is_ignored() {
        let (ctx, peer) = fixture_ctx();
        let socket = Arc::new(peer.try_clone().unwrap());
        let header = sample_header(&ctx, Some(ClusterIdentity::generate()));
        let from = peer.local_addr().unwrap();

        on_chunk(&ctx, &socket, header, 0, vec![1, 2, 3, 4], from);

        assert!(ctx.receiving.read().is_empty());
    }

    #[test]
    fn broadcast_chunk_completes_without_sending_a_receipt() {
        let (ctx, peer) = fixture_ctx();
        let socket = Arc::new(peer.try_clone().unwrap());
        let header = FrameHeader {
            uuid: Uuid::generate(ClusterIdentity::generate()),
            destination: None,
            total_size: 4,
            chunk_size: 4,
        };
        let from = peer.local_addr().unwrap();

        on_chunk(&ctx, &socket, header, 0, vec![1, 2, 3, 4], from);

        // No receipt is ever sent for a broadcast message.
        peer.set_read_timeout(Some(std::time::Duration::from_millis(200))).unwrap();
        let mut buf = [0u8; 64];
        assert!(peer.recv_from(&mut buf).is_err());
    }

    #[test]
    fn unicast_chunk_completing_the_message_triggers_a_receipt() {
        let (ctx, peer) = fixture_ctx();
        let socket = Arc::new(peer.try_clone().unwrap());
        let header = FrameHeader {
            uuid: Uuid::generate(ClusterIdentity::generate()),
            destination: Some(ctx.cluster_id),
            total_size: 4,
            chunk_size: 4,
        };
        let from = peer.local_addr().unwrap();

        on_chunk(&ctx, &socket, header, 0, vec![1, 2, 3, 4], from);

        assert!(matches!(recv_one(&peer), Frame::Receipt { error_code: 0, .. }));
    }
}
