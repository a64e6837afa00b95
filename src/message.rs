//! Application-level payload carried inside a fully reassembled message.
//!
//! The wire frames in [`crate::wire`] only move opaque bytes; this module
//! defines what those bytes actually mean once a [`crate::receiving::ReceivingMessage`]
//! has reassembled them, and the narrow traits the embedding application
//! implements to receive them.

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::identity::ClusterIdentity;

/// How an actor-directed message picks its recipient(s).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorTarget {
    /// Deliver to every actor registered under this class name.
    ByClass(String),
    /// Deliver to the single actor registered under this id.
    ById(String),
}

/// A snapshot of node-level status, carried in `StatusResponse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Application name this node registered under.
    pub app_name: String,
    /// Group name this node registered under.
    pub group_name: String,
    /// Number of actors currently registered locally.
    pub actor_count: u64,
}

/// The tagged payload every reassembled message ultimately decodes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterMessage {
    /// Application payload addressed to one or more local actors.
    ActorMessage {
        /// Recipient(s) of `body`.
        target: ActorTarget,
        /// Opaque application payload.
        body: Vec<u8>,
    },
    /// Request that the named actor(s) stop.
    Stop {
        /// Recipient(s) to stop.
        target: ActorTarget,
    },
    /// Request a status snapshot from the receiving node.
    StatusRequest {
        /// Correlates the eventual `StatusResponse`.
        request_id: u64,
    },
    /// Reply to a `StatusRequest`.
    StatusResponse {
        /// Echoes the request's id.
        request_id: u64,
        /// The responding node's status.
        status: NodeStatus,
    },
}

impl ClusterMessage {
    /// Encode this message for inclusion in a message's chunked body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ClusterError::serialization(e.to_string()))
    }

    /// Decode a message previously produced by [`Self::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(message, _)| message)
            .map_err(|e| ClusterError::serialization(e.to_string()))
    }
}

/// Local actor registry the transport dispatches reassembled messages into.
///
/// Implemented by the embedding application; the transport only ever calls
/// these methods, never constructs actors itself.
pub trait ActorRegistry: Send + Sync {
    /// Deliver `body` to every local actor matched by `target`.
    fn dispatch(&self, source: ClusterIdentity, target: &ActorTarget, body: &[u8]) -> Result<()>;

    /// Stop every local actor matched by `target`.
    fn stop(&self, target: &ActorTarget) -> Result<()>;

    /// Produce a status snapshot for a `StatusRequest` reply.
    fn status(&self) -> NodeStatus;
}

/// Callback invoked once per fully reassembled message, after the transport
/// has already sent the receipt for it.
///
/// Kept distinct from [`ActorRegistry`] so applications that only want to
/// observe traffic (metrics, tracing, tests) don't have to implement actor
/// dispatch at all.
pub trait MessageSink: Send + Sync {
    /// Called once per reassembled message, in delivery (not necessarily
    /// arrival) order per sender.
    fn on_message(&self, source: ClusterIdentity, message: ClusterMessage);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_message_round_trips() {
        let msg = ClusterMessage::ActorMessage {
            target: ActorTarget::ById("worker-3".into()),
            body: vec![1, 2, 3, 4],
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(ClusterMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn stop_by_class_round_trips() {
        let msg = ClusterMessage::Stop { target: ActorTarget::ByClass("worker".into()) };
        let bytes = msg.encode().unwrap();
        assert_eq!(ClusterMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn status_round_trips() {
        let msg = ClusterMessage::StatusResponse {
            request_id: 42,
            status: NodeStatus { app_name: "a".into(), group_name: "g".into(), actor_count: 7 },
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(ClusterMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn decoding_garbage_is_a_serialization_error() {
        let err = ClusterMessage::decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, ClusterError::Serialization { .. }));
    }
}
