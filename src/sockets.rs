//! Multi-interface socket discovery.
//!
//! Each local IPv4 interface gets two sockets: a unicast socket bound to the
//! first free port in [`DYNAMIC_PORT_RANGE`], and a broadcast-receive socket
//! bound to the wildcard address on `BROADCAST_PORT` with
//! `SO_REUSEADDR`/`SO_BROADCAST` set, so every interface's broadcast-receive
//! socket can share the one well-known broadcast port.
//!
//! Discovery is expensive (it walks every interface and tries up to a
//! hundred ports) and interfaces don't change mid-process, so the result is
//! memoized behind a double-checked lock.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;

use get_if_addrs::{IfAddr, Ifv4Addr};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::constants::{BROADCAST_PORT, DYNAMIC_PORT_RANGE};
use crate::error::{ClusterError, Result};

/// A local network interface with both of its cluster-transport sockets.
pub struct Interface {
    /// Interface name as reported by the OS (`eth0`, `en0`, ...).
    pub name: String,
    /// IPv4 address of this interface.
    pub ip: Ipv4Addr,
    /// Netmask of this interface, used to decide which interface a given
    /// peer address belongs to.
    pub netmask: Ipv4Addr,
    /// Broadcast address of this interface, if the OS reported one.
    pub broadcast: Option<Ipv4Addr>,
    /// Unicast socket, bound to a port in `DYNAMIC_PORT_RANGE`.
    pub unicast: Arc<UdpSocket>,
    /// Broadcast-receive socket, bound to the wildcard address on `BROADCAST_PORT`.
    pub broadcast_recv: Arc<UdpSocket>,
}

impl Interface {
    /// Whether `target` belongs to this interface's subnet.
    fn contains(&self, target: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(self.ip) & mask == u32::from(target) & mask
    }
}

/// All sockets discovered for this process.
pub struct SocketTable {
    /// One entry per local IPv4 interface found at discovery time.
    pub interfaces: Vec<Interface>,
}

impl SocketTable {
    /// Pick the interface whose subnet contains `target`. Returns `None` if
    /// no local interface shares a subnet with it (e.g. the peer is behind
    /// NAT and only reachable via a default route this table doesn't model) —
    /// per spec §4.1, `socketForTarget` returns nil in that case rather than
    /// guessing a default interface, and callers (`destinationFor`) treat a
    /// `None` here as "no route", falling back to broadcast.
    ///
    /// Subnet membership is decided by masking both addresses with the
    /// interface's netmask, not by comparing the two addresses' decimal
    /// string representations as prefixes: `10.0.1.9` is not "in" `10.0.10.0/24`
    /// just because the strings share a leading `"10.0.1"`.
    pub fn socket_for_target(&self, target: Ipv4Addr) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.contains(target))
    }

    /// Every `(broadcast_address, port)` a broadcast frame should be sent to
    /// in order to reach all attached subnets.
    ///
    /// Interfaces the OS didn't report a broadcast address for (loopback,
    /// some point-to-point links) fall back to their own address: every
    /// broadcast-receive socket listens on the wildcard address, so a send
    /// to the interface's own IP still reaches it, it just won't leave the
    /// local host.
    pub fn broadcast_destinations(&self) -> Vec<SocketAddr> {
        self.interfaces
            .iter()
            .map(|iface| SocketAddr::V4(SocketAddrV4::new(iface.broadcast.unwrap_or(iface.ip), BROADCAST_PORT)))
            .collect()
    }
}

static SOCKET_TABLE: OnceCell<Mutex<Option<Arc<SocketTable>>>> = OnceCell::new();

/// Discover (or return the memoized) socket table for this process.
///
/// With `restrict_to == None`, every non-loopback IPv4 interface is bound
/// exactly once per process and the result is memoized behind a
/// double-checked lock: recomputing the table requires a process shutdown
/// and restart. When `restrict_to` names specific addresses (the
/// `ClusterConfig::with_bind_interfaces` escape hatch), discovery bypasses
/// the process-wide cache and binds a fresh, independent set of sockets —
/// this is what lets a single test process stand up several `ClusterTransport`
/// "nodes" on loopback, each with its own sockets, instead of all of them
/// fighting over one memoized table.
pub fn discover_sockets(restrict_to: Option<&[IpAddr]>) -> Result<Arc<SocketTable>> {
    if let Some(allowed) = restrict_to {
        return Ok(Arc::new(build_socket_table(Some(allowed))?));
    }

    let cell = SOCKET_TABLE.get_or_init(|| Mutex::new(None));

    if let Some(table) = cell.lock().as_ref() {
        return Ok(table.clone());
    }

    let mut guard = cell.lock();
    if let Some(table) = guard.as_ref() {
        return Ok(table.clone());
    }

    let table = Arc::new(build_socket_table(None)?);
    *guard = Some(table.clone());
    Ok(table)
}

fn build_socket_table(restrict_to: Option<&[IpAddr]>) -> Result<SocketTable> {
    let raw = get_if_addrs::get_if_addrs()
        .map_err(|e| ClusterError::socket(format!("enumerating interfaces: {e}")))?;

    let mut interfaces = Vec::new();
    for iface in raw {
        let IfAddr::V4(Ifv4Addr { ip, netmask, broadcast }) = iface.addr else {
            continue;
        };
        match restrict_to {
            // Unrestricted discovery only ever considers real, non-loopback
            // interfaces; loopback is reachable only via an explicit override.
            None if ip.is_loopback() => continue,
            None => {}
            Some(allowed) if !allowed.contains(&IpAddr::V4(ip)) => continue,
            Some(_) => {}
        }
        let unicast = bind_unicast(ip)?;
        let broadcast_recv = bind_broadcast_receive(ip)?;
        interfaces.push(Interface {
            name: iface.name,
            ip,
            netmask,
            broadcast,
            unicast: Arc::new(unicast),
            broadcast_recv: Arc::new(broadcast_recv),
        });
    }

    if interfaces.is_empty() {
        return Err(ClusterError::socket("no usable IPv4 interfaces found"));
    }

    Ok(SocketTable { interfaces })
}

fn bind_unicast(ip: Ipv4Addr) -> Result<UdpSocket> {
    for port in DYNAMIC_PORT_RANGE {
        let addr = SocketAddrV4::new(ip, port);
        match UdpSocket::bind(addr) {
            Ok(socket) => {
                socket
                    .set_broadcast(true)
                    .map_err(|e| ClusterError::socket(format!("SO_BROADCAST for {addr}: {e}")))?;
                set_poll_timeout(&socket)?;
                return Ok(socket);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(ClusterError::Io(e)),
        }
    }
    Err(ClusterError::socket(format!(
        "no free port for {ip} in {}..={}",
        DYNAMIC_PORT_RANGE.start(),
        DYNAMIC_PORT_RANGE.end()
    )))
}

/// Bound the blocking `recv_from` a Receiver thread makes so it periodically
/// wakes up and observes the shutdown flag, rather than relying on a
/// socket-close exception the way the originating implementation does.
fn set_poll_timeout(socket: &UdpSocket) -> Result<()> {
    socket
        .set_read_timeout(Some(crate::constants::POLL_TIMEOUT))
        .map_err(ClusterError::Io)
}

/// `ip` is only used for error messages: the socket itself binds to the
/// wildcard address so it reliably receives broadcast traffic regardless of
/// whether the OS associates a broadcast address with this interface (it
/// does for real subnets, but typically not for loopback). Binding multiple
/// of these per process is safe — `SO_REUSEADDR` lets every interface's
/// broadcast-receive socket share `0.0.0.0:BROADCAST_PORT`, and each copy of
/// an incoming datagram is deduplicated downstream by the receiving
/// message's processed-once latch.
fn bind_broadcast_receive(ip: Ipv4Addr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| ClusterError::socket(format!("creating broadcast socket for {ip}: {e}")))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| ClusterError::socket(format!("SO_REUSEADDR for {ip}: {e}")))?;
    socket
        .set_broadcast(true)
        .map_err(|e| ClusterError::socket(format!("SO_BROADCAST for {ip}: {e}")))?;
    let addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, BROADCAST_PORT).into();
    socket
        .bind(&addr.into())
        .map_err(|e| ClusterError::socket(format!("binding broadcast socket to {addr}: {e}")))?;
    let socket: UdpSocket = socket.into();
    set_poll_timeout(&socket)?;
    Ok(socket)
}
