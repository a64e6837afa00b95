//! cluster-net - reliable chunked UDP transport for cluster message delivery
//!
//! A process-wide singleton, keyed by `(app_name, group_name)`, that
//! fragments variable-size application messages into fixed-size chunks and
//! moves them between cluster members over UDP, layering receipts,
//! selective re-transmission and bounded retries on top.

pub mod address_map;
pub mod constants;
pub mod error;
pub mod identity;
pub mod message;
pub mod receiving;
pub mod registry;
pub mod sending;
pub mod sockets;
pub mod transport;
pub mod waiting_queue;
pub mod wire;
mod workers;

pub use error::{ClusterError, Result};
pub use identity::{ClusterIdentity, Uuid};
pub use message::{ActorRegistry, ActorTarget, ClusterMessage, MessageSink, NodeStatus};
pub use transport::{ClusterConfig, ClusterTransport};

/// Crate version, as built.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
