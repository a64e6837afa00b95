//! Wire-visible protocol constants.
//!
//! Every value here is part of the interoperability contract: all nodes in
//! a cluster must agree on them, so unlike `ClusterConfig` these are never
//! runtime-configurable.

use std::time::Duration;

/// Link-local broadcast port every node listens on.
pub const BROADCAST_PORT: u16 = 9900;

/// Inclusive range of ports probed for the per-interface unicast socket.
pub const DYNAMIC_PORT_RANGE: std::ops::RangeInclusive<u16> = 9901..=9999;

/// Chunk size used when fragmenting a message (bytes).
pub const SENDING_CHUNK_SIZE: u16 = 1024;

/// Maximum number of missing-chunk indices carried in a single
/// `MessageChunksNeeded` frame before it must be split into windows.
pub const MAX_MISSING_LIST: usize = 256;

/// Poll timeout used by the Sender and the two cleaner workers so that
/// shutdown is observed with bounded latency.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// How long the Sender waits for a receipt before nudging the peer.
pub const WAITING_FOR_RECEIPT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Maximum number of receipt-request retries before a sent message is
/// considered lost.
pub const MAX_RECEIPT_WAITS: u32 = 3;

/// Retention window a fully-acknowledged `SendingMessage` is kept for,
/// to absorb late duplicate traffic, before being garbage collected.
pub const WAITING_AFTER_RECEIPT_TIMEOUT: Duration = Duration::from_millis(6000);

/// How long a receiver waits for the remaining chunks of a message before
/// requesting the missing ones again.
pub const WAITING_FOR_ALL_CHUNKS_TIMEOUT: Duration = Duration::from_millis(1000);

/// Maximum number of missing-chunk-request retries before a partially
/// received message is abandoned.
pub const MAX_CHUNK_WAITS: u32 = 3;

/// Retention window a fully-received `ReceivingMessage` is kept for before
/// being garbage collected.
pub const WAITING_AFTER_COMPLETE_TIMEOUT: Duration = Duration::from_millis(6000);

/// Maximum UDP payload this transport will ever put on the wire.
pub const MAX_UDP_PACKET: usize = 16 * 1024;

/// Size of the buffer each Receiver thread reads datagrams into.
pub const RECV_BUFFER_SIZE: usize = 16 * 1024;
