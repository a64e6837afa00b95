//! Concurrent, bidirectional map between socket addresses and the cluster
//! identities seen on them.
//!
//! A single `ClusterIdentity` can be reachable over several addresses (one
//! per network interface); callers always want the most recently confirmed
//! address first, so each identity's address list is a small CAS-updated
//! stack with the newest entry at the head.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::identity::ClusterIdentity;

#[derive(Debug, Default)]
struct Inner {
    by_identity: HashMap<ClusterIdentity, Vec<SocketAddr>>,
    by_address: HashMap<SocketAddr, ClusterIdentity>,
}

/// Bidirectional `SocketAddr` <-> `ClusterIdentity` map, safe to share
/// across the Receiver and Sender workers.
#[derive(Debug, Default, Clone)]
pub struct AddressMap {
    inner: Arc<RwLock<Inner>>,
}

impl AddressMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `address` is a valid, currently-reachable route to
    /// `identity`. If this address is already the map's preferred route for
    /// this identity, this is a no-op; otherwise it is prepended, becoming
    /// the new preferred route.
    pub fn observe(&self, identity: ClusterIdentity, address: SocketAddr) {
        let mut inner = self.inner.write();
        inner.by_address.insert(address, identity);
        let addresses = inner.by_identity.entry(identity).or_default();
        if addresses.first() == Some(&address) {
            return;
        }
        addresses.retain(|a| *a != address);
        addresses.insert(0, address);
    }

    /// The preferred (most recently confirmed) address for `identity`, if
    /// any address has ever been observed for it.
    pub fn preferred_address(&self, identity: &ClusterIdentity) -> Option<SocketAddr> {
        self.inner.read().by_identity.get(identity).and_then(|v| v.first().copied())
    }

    /// All known addresses for `identity`, preferred first.
    pub fn addresses_for(&self, identity: &ClusterIdentity) -> Vec<SocketAddr> {
        self.inner.read().by_identity.get(identity).cloned().unwrap_or_default()
    }

    /// The identity last observed at `address`, if any.
    pub fn identity_for(&self, address: &SocketAddr) -> Option<ClusterIdentity> {
        self.inner.read().by_address.get(address).copied()
    }

    /// Number of distinct identities currently tracked.
    pub fn len(&self) -> usize {
        self.inner.read().by_identity.len()
    }

    /// Whether no identity has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
