//! Per-flow session tracking.
//!
//! Sessions pin a flow to the backend chosen at first sight, so every
//! later packet of the connection lands on the same server. The table
//! is keyed by the client-side tuple; a secondary index keyed by the
//! post-translation (client -> backend) tuple serves return-path
//! lookups. Expiry is a periodic sweep over last-active timestamps on a
//! monotonic nanosecond clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use flowgate_wire::{FiveTuple, MacAddr};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// State of one tracked flow.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    /// Flow as the client sent it (client -> VIP).
    pub client: FiveTuple,
    /// Flow after translation (client -> backend).
    pub server: FiveTuple,
    /// Chosen backend id.
    pub backend_id: u32,
    /// Client's MAC as seen on its first frame; the NAT return path
    /// uses it as the on-link next hop when no gateway is configured.
    pub client_mac: MacAddr,
    /// Creation time, nanoseconds on the table's monotonic clock.
    pub created_ns: u64,
    /// Last packet time.
    pub last_active_ns: u64,
    /// Packets seen.
    pub packets: u64,
    /// Bytes seen.
    pub bytes: u64,
}

impl Session {
    /// True when the session has been idle longer than `timeout_secs`.
    #[inline]
    pub fn is_expired(&self, now_ns: u64, timeout_secs: u64) -> bool {
        now_ns.saturating_sub(self.last_active_ns) > timeout_secs * NANOS_PER_SEC
    }
}

#[derive(Default)]
struct Tables {
    by_client: HashMap<FiveTuple, Session>,
    // server-side tuple -> client key, for return-path lookups
    by_server: HashMap<FiveTuple, FiveTuple>,
}

/// Concurrent session table with touch-on-lookup and periodic expiry.
pub struct SessionTable {
    inner: Mutex<Tables>,
    timeout_secs: AtomicU64,
    total: AtomicU64,
    epoch: Instant,
}

impl SessionTable {
    /// Create a table expiring sessions idle longer than `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            inner: Mutex::new(Tables::default()),
            timeout_secs: AtomicU64::new(timeout_secs),
            total: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Change the idle timeout.
    pub fn set_timeout(&self, timeout_secs: u64) {
        self.timeout_secs.store(timeout_secs, Ordering::Relaxed);
    }

    #[inline]
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Find a session by its client tuple, refreshing last-active.
    pub fn lookup(&self, tuple: &FiveTuple) -> Option<Session> {
        self.lookup_at(tuple, self.now_ns())
    }

    fn lookup_at(&self, tuple: &FiveTuple, now: u64) -> Option<Session> {
        let mut tables = self.inner.lock();
        let session = tables.by_client.get_mut(tuple)?;
        session.last_active_ns = now;
        Some(*session)
    }

    /// Find a session for a reply packet (backend -> client direction).
    ///
    /// The reversed reply tuple is the session's server-side tuple.
    pub fn lookup_reply(&self, reply_tuple: &FiveTuple) -> Option<Session> {
        let server_tuple = reply_tuple.reverse();
        let now = self.now_ns();
        let mut tables = self.inner.lock();
        let client_key = *tables.by_server.get(&server_tuple)?;
        let session = tables.by_client.get_mut(&client_key)?;
        session.last_active_ns = now;
        Some(*session)
    }

    /// Track a new flow bound to `backend_id`.
    ///
    /// `server` is the post-translation (client -> backend) tuple; it
    /// feeds the return-path index.
    pub fn create(
        &self,
        client: FiveTuple,
        server: FiveTuple,
        backend_id: u32,
        client_mac: MacAddr,
    ) -> Session {
        self.create_at(client, server, backend_id, client_mac, self.now_ns())
    }

    fn create_at(
        &self,
        client: FiveTuple,
        server: FiveTuple,
        backend_id: u32,
        client_mac: MacAddr,
        now: u64,
    ) -> Session {
        let session = Session {
            client,
            server,
            backend_id,
            client_mac,
            created_ns: now,
            last_active_ns: now,
            packets: 0,
            bytes: 0,
        };
        let mut tables = self.inner.lock();
        if tables.by_client.insert(client, session).is_none() {
            self.total.fetch_add(1, Ordering::Relaxed);
        }
        tables.by_server.insert(server, client);
        session
    }

    /// Touch a session and add one packet of `bytes` to its counters.
    pub fn update_stats(&self, tuple: &FiveTuple, bytes: u64) {
        let now = self.now_ns();
        if let Some(session) = self.inner.lock().by_client.get_mut(tuple) {
            session.last_active_ns = now;
            session.packets += 1;
            session.bytes += bytes;
        }
    }

    /// Drop a session by its client tuple.
    pub fn remove(&self, tuple: &FiveTuple) -> bool {
        let mut tables = self.inner.lock();
        match tables.by_client.remove(tuple) {
            Some(session) => {
                tables.by_server.remove(&session.server);
                true
            }
            None => false,
        }
    }

    /// Sweep expired sessions; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(self.now_ns())
    }

    fn cleanup_at(&self, now: u64) -> usize {
        let timeout = self.timeout_secs.load(Ordering::Relaxed);
        let mut tables = self.inner.lock();
        let expired: Vec<Session> = tables
            .by_client
            .values()
            .filter(|s| s.is_expired(now, timeout))
            .copied()
            .collect();
        for session in &expired {
            tables.by_client.remove(&session.client);
            tables.by_server.remove(&session.server);
        }
        expired.len()
    }

    /// Currently tracked sessions.
    pub fn active(&self) -> usize {
        self.inner.lock().by_client.len()
    }

    /// Sessions ever created (monotonic).
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}
