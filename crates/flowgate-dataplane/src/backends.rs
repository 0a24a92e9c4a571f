//! Backend (real server) registry.
//!
//! Id-keyed table of backends plus the embedded consistent-hash ring.
//! Status flips leave the ring untouched so a flapping backend does not
//! reshuffle every flow; selection simply rejects non-UP entries.

use std::collections::HashMap;

use parking_lot::Mutex;

use flowgate_wire::{FiveTuple, MacAddr};

use crate::hashring::ConsistentHashRing;

/// Health status of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Accepting traffic.
    Up,
    /// Known dead; selection rejects it.
    Down,
    /// Health probe in flight; treated as not available.
    Checking,
}

/// One backend server.
#[derive(Debug, Clone, Copy)]
pub struct RealServer {
    /// Unique 1-based id.
    pub id: u32,
    /// IPv4 address.
    pub ip: u32,
    /// Service port.
    pub port: u16,
    /// MAC address, required for DR forwarding.
    pub mac: MacAddr,
    /// Relative weight (100 = one virtual-node base share).
    pub weight: u32,
    /// Health status.
    pub status: ServerStatus,

    /// Connections currently assigned.
    pub conn_count: u64,
    /// Connections ever assigned.
    pub total_conn: u64,
    /// Bytes received from clients for this backend.
    pub bytes_in: u64,
    /// Bytes sent back to clients from this backend.
    pub bytes_out: u64,
}

impl RealServer {
    /// Create a backend, initially UP with zeroed counters.
    pub fn new(id: u32, ip: u32, port: u16, mac: MacAddr, weight: u32) -> Self {
        Self {
            id,
            ip,
            port,
            mac,
            weight,
            status: ServerStatus::Up,
            conn_count: 0,
            total_conn: 0,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// True when the backend may receive new flows.
    #[inline]
    pub fn is_available(&self) -> bool {
        self.status == ServerStatus::Up
    }
}

/// Registry of backends with flow dispatch.
///
/// The table and the ring each sit behind their own short mutex; no
/// operation holds both at once.
pub struct BackendRegistry {
    servers: Mutex<HashMap<u32, RealServer>>,
    ring: ConsistentHashRing,
}

impl BackendRegistry {
    /// Create an empty registry with the given virtual-node base.
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            ring: ConsistentHashRing::new(virtual_nodes),
        }
    }

    /// Add a backend to the table and the ring.
    pub fn insert(&self, rs: RealServer) {
        let id = rs.id;
        let weight = rs.weight;
        self.servers.lock().insert(id, rs);
        self.ring.add(id, weight);
    }

    /// Remove a backend from both structures.
    pub fn remove(&self, id: u32) -> bool {
        let removed = self.servers.lock().remove(&id).is_some();
        if removed {
            self.ring.remove(id);
        }
        removed
    }

    /// Flip a backend's status in place; the ring is left alone.
    pub fn set_status(&self, id: u32, status: ServerStatus) -> bool {
        match self.servers.lock().get_mut(&id) {
            Some(rs) => {
                rs.status = status;
                true
            }
            None => false,
        }
    }

    /// Dispatch a flow: ring lookup, then availability check.
    ///
    /// Returns a copy of the chosen backend, or `None` when the ring is
    /// empty or the chosen backend is not UP.
    pub fn select(&self, tuple: &FiveTuple) -> Option<RealServer> {
        let id = self.ring.lookup(tuple)?;
        let servers = self.servers.lock();
        servers.get(&id).filter(|rs| rs.is_available()).copied()
    }

    /// Fetch a backend by id.
    pub fn get(&self, id: u32) -> Option<RealServer> {
        self.servers.lock().get(&id).copied()
    }

    /// Snapshot of every backend, ordered by id.
    pub fn all(&self) -> Vec<RealServer> {
        let mut list: Vec<_> = self.servers.lock().values().copied().collect();
        list.sort_by_key(|rs| rs.id);
        list
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    /// True when no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.servers.lock().is_empty()
    }

    /// Account a new connection against a backend.
    pub fn record_conn(&self, id: u32) {
        if let Some(rs) = self.servers.lock().get_mut(&id) {
            rs.conn_count += 1;
            rs.total_conn += 1;
        }
    }

    /// Account a finished connection.
    pub fn record_disconnect(&self, id: u32) {
        if let Some(rs) = self.servers.lock().get_mut(&id) {
            rs.conn_count = rs.conn_count.saturating_sub(1);
        }
    }

    /// Account forwarded traffic.
    pub fn record_traffic(&self, id: u32, bytes_in: u64, bytes_out: u64) {
        if let Some(rs) = self.servers.lock().get_mut(&id) {
            rs.bytes_in += bytes_in;
            rs.bytes_out += bytes_out;
        }
    }
}
