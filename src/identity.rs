//! Cluster and message identity types.
//!
//! `ClusterIdentity` names a node for the life of its process;
//! `Uuid` combines a `ClusterIdentity` with a local uniqueness pair to name
//! both messages and actors. Both are plain 64-bit-component value types so
//! they can be memcpy'd into wire frames without an intermediate encoder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque 128-bit identifier for a cluster member, stable for the life of
/// the process that generated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterIdentity {
    /// Millisecond timestamp captured at generation time.
    pub time: u64,
    /// Random tiebreaker, so two nodes started in the same millisecond
    /// still generate distinct identities.
    pub rand: u64,
}

impl ClusterIdentity {
    /// Generate a fresh identity using the process-wide RNG.
    pub fn generate() -> Self {
        Self { time: now_millis(), rand: next_random() }
    }

    /// An all-zero identity, used on the wire to mean "broadcast" /
    /// "no destination".
    pub const ZERO: Self = Self { time: 0, rand: 0 };

    /// Whether this identity is the all-zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.time == 0 && self.rand == 0
    }
}

/// Composite identifier for a message or an actor: a `ClusterIdentity` plus
/// a local uniqueness pair minted at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid {
    /// Identity of the cluster member that minted this id.
    pub cluster_id: ClusterIdentity,
    /// Millisecond timestamp captured at generation time.
    pub time: u64,
    /// Random tiebreaker.
    pub rand: u64,
}

impl Uuid {
    /// Generate a fresh id scoped to `cluster_id`.
    pub fn generate(cluster_id: ClusterIdentity) -> Self {
        Self { cluster_id, time: now_millis(), rand: next_random() }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Process-wide xorshift64 generator, seeded once from wall-clock time and
/// the process id so that distinct processes (and distinct runs) diverge
/// immediately without pulling in an external RNG crate.
static RNG_STATE: AtomicU64 = AtomicU64::new(0);

fn seed() -> u64 {
    let time_bits = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1);
    let pid_bits = std::process::id() as u64;
    // A stack address as a cheap source of ASLR-derived entropy.
    let stack_marker: u8 = 0;
    let addr_bits = &stack_marker as *const u8 as u64;
    (time_bits ^ pid_bits.rotate_left(32) ^ addr_bits.rotate_left(17)) | 1
}

fn next_random() -> u64 {
    let mut current = RNG_STATE.load(Ordering::Relaxed);
    loop {
        let mut x = if current == 0 { seed() } else { current };
        // xorshift64*
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        match RNG_STATE.compare_exchange_weak(current, x, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return x.wrapping_mul(0x2545_f491_4f6c_dd1d),
            Err(observed) => current = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identities_are_nonzero_and_distinct() {
        let a = ClusterIdentity::generate();
        let b = ClusterIdentity::generate();
        assert!(!a.is_zero());
        assert_ne!(a, b);
    }

    #[test]
    fn zero_identity_is_detected() {
        assert!(ClusterIdentity::ZERO.is_zero());
        assert!(!ClusterIdentity::generate().is_zero());
    }

    #[test]
    fn uuids_minted_from_same_cluster_id_still_differ() {
        let cid = ClusterIdentity::generate();
        let a = Uuid::generate(cid);
        let b = Uuid::generate(cid);
        assert_eq!(a.cluster_id, cid);
        assert_eq!(b.cluster_id, cid);
        assert_ne!((a.time, a.rand), (b.time, b.rand));
    }

    #[test]
    fn uuid_and_identity_hash_consistently_with_eq() {
        use std::collections::HashSet;
        let cid = ClusterIdentity::generate();
        let u1 = Uuid::generate(cid);
        let mut set = HashSet::new();
        set.insert(u1);
        assert!(set.contains(&u1));
    }
}
