//! Process-wide registry of live `ClusterTransport`s, keyed by
//! `(app_name, group_name)`.
//!
//! A process only ever wants one transport per application/group pair; a
//! second call asking for the same pair gets the existing instance back
//! instead of standing up a duplicate set of sockets and worker threads.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::transport::ClusterTransport;

type Key = (String, String);

static REGISTRY: Lazy<Mutex<HashMap<Key, Arc<ClusterTransport>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Return the existing transport for `(app_name, group_name)`, or build one
/// with `build` and register it if none exists yet.
///
/// `build` is only called while the registry lock is held and only when no
/// entry exists, so two threads racing to create the same pair never both
/// pay the startup cost; the loser simply gets the winner's instance.
pub fn get_or_create(
    app_name: &str,
    group_name: &str,
    build: impl FnOnce() -> crate::error::Result<ClusterTransport>,
) -> crate::error::Result<Arc<ClusterTransport>> {
    let key = (app_name.to_string(), group_name.to_string());
    let mut registry = REGISTRY.lock();
    if let Some(existing) = registry.get(&key) {
        return Ok(existing.clone());
    }
    let transport = Arc::new(build()?);
    registry.insert(key, transport.clone());
    Ok(transport)
}

/// Look up a previously created transport without creating one.
pub fn get(app_name: &str, group_name: &str) -> Option<Arc<ClusterTransport>> {
    REGISTRY.lock().get(&(app_name.to_string(), group_name.to_string())).cloned()
}

/// Remove a transport from the registry, e.g. after it has been shut down.
/// Does not itself shut the transport down.
pub fn remove(app_name: &str, group_name: &str) {
    REGISTRY.lock().remove(&(app_name.to_string(), group_name.to_string()));
}

/// Number of transports currently registered, mainly for tests.
pub fn len() -> usize {
    REGISTRY.lock().len()
}
