//! The per-worker packet engine.
//!
//! Owns the full RX decision for one frame: parse, answer ARP and ICMP
//! aimed at the VIP locally, pin TCP/UDP flows to a backend through the
//! session table and consistent-hash registry, and hand the rewritten
//! frame back to the driver. The polling driver (DPDK-style) lives
//! outside this crate; it calls [`PacketEngine::process_frame`] for
//! every received frame and transmits when the verdict says so.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use flowgate_wire::headers::{arp, icmp};
use flowgate_wire::{ethertype, ipproto, parser, FiveTuple, MacAddr, PacketMeta};

use crate::backends::BackendRegistry;
use crate::forward::Forwarder;
use crate::session::SessionTable;
use crate::stats::LbStats;

/// What the driver should do with a processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The (possibly rewritten) frame goes back out.
    Transmit,
    /// The frame is consumed and discarded.
    Drop,
    /// Not our traffic; the driver may pass it up its own stack.
    Ignore,
}

/// Identity and wiring of one load-balancing worker.
pub struct PacketEngine {
    vip: u32,
    vip_mac: MacAddr,
    forwarder: Forwarder,
    registry: Arc<BackendRegistry>,
    sessions: Arc<SessionTable>,
    stats: Arc<LbStats>,
    running: AtomicBool,
    // WARN suppression for backendless drops.
    no_backend_logged: AtomicU64,
}

/// Log every 1st, then every 64th occurrence.
const NO_BACKEND_LOG_EVERY: u64 = 64;

impl PacketEngine {
    /// Wire up an engine for one VIP.
    pub fn new(
        vip: u32,
        vip_mac: MacAddr,
        forwarder: Forwarder,
        registry: Arc<BackendRegistry>,
        sessions: Arc<SessionTable>,
        stats: Arc<LbStats>,
    ) -> Self {
        Self {
            vip,
            vip_mac,
            forwarder,
            registry,
            sessions,
            stats,
            running: AtomicBool::new(true),
            no_backend_logged: AtomicU64::new(0),
        }
    }

    /// Request the polling loop to wind down; frames arriving after
    /// this are ignored.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// True until [`stop`](Self::stop) is called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Process one received frame in place.
    pub fn process_frame(&self, frame: &mut [u8]) -> Verdict {
        if !self.is_running() {
            return Verdict::Ignore;
        }
        self.stats.record_rx();

        let Some(meta) = parser::parse(frame) else {
            self.stats.record_drop();
            return Verdict::Drop;
        };

        match meta.ether_type {
            ethertype::ARP => self.handle_arp(frame),
            ethertype::IPV4 => self.handle_ipv4(frame, &meta),
            _ => {
                self.stats.record_drop();
                Verdict::Drop
            }
        }
    }

    fn handle_arp(&self, frame: &mut [u8]) -> Verdict {
        self.stats.arp_packets.fetch_add(1, Ordering::Relaxed);
        if arp::reply_in_place(frame, self.vip, self.vip_mac) {
            self.stats.record_tx();
            Verdict::Transmit
        } else {
            // A request for some other host, or a gratuitous reply.
            Verdict::Ignore
        }
    }

    fn handle_ipv4(&self, frame: &mut [u8], meta: &PacketMeta) -> Verdict {
        if meta.ip_protocol == ipproto::ICMP && meta.dst_ip == self.vip {
            self.stats.icmp_packets.fetch_add(1, Ordering::Relaxed);
            return if icmp::echo_reply_in_place(frame, meta) {
                self.stats.record_tx();
                Verdict::Transmit
            } else {
                self.stats.record_drop();
                Verdict::Drop
            };
        }

        match meta.ip_protocol {
            ipproto::TCP => {
                self.stats.tcp_packets.fetch_add(1, Ordering::Relaxed);
            }
            ipproto::UDP => {
                self.stats.udp_packets.fetch_add(1, Ordering::Relaxed);
            }
            _ => return Verdict::Ignore,
        }

        if meta.dst_ip == self.vip {
            return self.dispatch(frame, meta);
        }

        // Not addressed to the VIP: in NAT mode this may be a backend
        // reply flowing back through us.
        let tuple = meta.to_tuple();
        if let Some(session) = self.sessions.lookup_reply(&tuple) {
            if self.forwarder.forward_reply(frame, meta, &session) {
                self.sessions
                    .update_stats(&session.client, u64::from(meta.total_len));
                self.registry
                    .record_traffic(session.backend_id, 0, u64::from(meta.total_len));
                self.stats.nat_translations.fetch_add(1, Ordering::Relaxed);
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                self.stats.record_tx();
                return Verdict::Transmit;
            }
            self.stats.record_drop();
            return Verdict::Drop;
        }
        Verdict::Ignore
    }

    /// VIP-bound TCP/UDP: existing session or select-and-create.
    fn dispatch(&self, frame: &mut [u8], meta: &PacketMeta) -> Verdict {
        let tuple = meta.to_tuple();

        if let Some(session) = self.sessions.lookup(&tuple) {
            if let Some(backend) = self.registry.get(session.backend_id) {
                if backend.is_available()
                    && self.forwarder.forward(frame, meta, &backend)
                {
                    self.account_forward(&tuple, backend.id, meta);
                    return Verdict::Transmit;
                }
            }
            // Bound backend vanished or refused the frame.
            self.stats.record_drop();
            return Verdict::Drop;
        }

        let Some(backend) = self.registry.select(&tuple) else {
            self.stats.no_backend.fetch_add(1, Ordering::Relaxed);
            self.stats.record_drop();
            let n = self.no_backend_logged.fetch_add(1, Ordering::Relaxed);
            if n % NO_BACKEND_LOG_EVERY == 0 {
                warn!(flow = %tuple, suppressed = n, "no backend available, dropping new flow");
            }
            return Verdict::Drop;
        };

        let server_tuple = FiveTuple::new(
            tuple.src_ip,
            backend.ip,
            tuple.src_port,
            backend.port,
            tuple.protocol,
        );
        self.sessions
            .create(tuple, server_tuple, backend.id, meta.src_mac);
        self.registry.record_conn(backend.id);
        debug!(flow = %tuple, backend = backend.id, "new flow pinned");

        if self.forwarder.forward(frame, meta, &backend) {
            self.account_forward(&tuple, backend.id, meta);
            Verdict::Transmit
        } else {
            self.stats.record_drop();
            Verdict::Drop
        }
    }

    fn account_forward(&self, tuple: &FiveTuple, backend_id: u32, meta: &PacketMeta) {
        self.sessions.update_stats(tuple, u64::from(meta.total_len));
        self.registry
            .record_traffic(backend_id, u64::from(meta.total_len), 0);
        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        if matches!(self.forwarder.mode(), crate::forward::ForwardMode::Nat) {
            self.stats.nat_translations.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.record_tx();
    }

    /// The engine's shared statistics block.
    pub fn stats(&self) -> &LbStats {
        &self.stats
    }
}
