//! Data-plane counters.
//!
//! Individually atomic with relaxed ordering: readers may observe a
//! brief skew between related counters, but no counter ever decreases
//! except through [`LbStats::reset`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter block shared by the packet engine and the proxy.
#[repr(C, align(64))]
#[derive(Default)]
pub struct LbStats {
    /// Frames or stream chunks received.
    pub rx_packets: AtomicU64,
    /// Frames or stream chunks sent.
    pub tx_packets: AtomicU64,
    /// Anything counted and discarded.
    pub dropped: AtomicU64,

    /// ARP frames seen.
    pub arp_packets: AtomicU64,
    /// ICMP frames seen.
    pub icmp_packets: AtomicU64,
    /// TCP segments seen.
    pub tcp_packets: AtomicU64,
    /// UDP datagrams seen.
    pub udp_packets: AtomicU64,

    /// Units forwarded toward a backend or a client.
    pub forwarded: AtomicU64,
    /// NAT header rewrites performed.
    pub nat_translations: AtomicU64,
    /// New flows dropped because no backend was available.
    pub no_backend: AtomicU64,
}

impl LbStats {
    /// Fresh zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a received unit.
    #[inline(always)]
    pub fn record_rx(&self) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a transmitted unit.
    #[inline(always)]
    pub fn record_tx(&self) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a drop.
    #[inline(always)]
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough copy of every counter.
    pub fn snapshot(&self) -> LbStatsSnapshot {
        LbStatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            arp_packets: self.arp_packets.load(Ordering::Relaxed),
            icmp_packets: self.icmp_packets.load(Ordering::Relaxed),
            tcp_packets: self.tcp_packets.load(Ordering::Relaxed),
            udp_packets: self.udp_packets.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            nat_translations: self.nat_translations.load(Ordering::Relaxed),
            no_backend: self.no_backend.load(Ordering::Relaxed),
        }
    }

    /// Bulk-clear every counter.
    pub fn reset(&self) {
        self.rx_packets.store(0, Ordering::Relaxed);
        self.tx_packets.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.arp_packets.store(0, Ordering::Relaxed);
        self.icmp_packets.store(0, Ordering::Relaxed);
        self.tcp_packets.store(0, Ordering::Relaxed);
        self.udp_packets.store(0, Ordering::Relaxed);
        self.forwarded.store(0, Ordering::Relaxed);
        self.nat_translations.store(0, Ordering::Relaxed);
        self.no_backend.store(0, Ordering::Relaxed);
    }
}

/// Non-atomic copy of [`LbStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LbStatsSnapshot {
    /// Frames or stream chunks received.
    pub rx_packets: u64,
    /// Frames or stream chunks sent.
    pub tx_packets: u64,
    /// Anything counted and discarded.
    pub dropped: u64,
    /// ARP frames seen.
    pub arp_packets: u64,
    /// ICMP frames seen.
    pub icmp_packets: u64,
    /// TCP segments seen.
    pub tcp_packets: u64,
    /// UDP datagrams seen.
    pub udp_packets: u64,
    /// Units forwarded.
    pub forwarded: u64,
    /// NAT rewrites performed.
    pub nat_translations: u64,
    /// New flows dropped for lack of a backend.
    pub no_backend: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let stats = LbStats::new();
        stats.record_rx();
        stats.record_rx();
        stats.record_tx();
        stats.record_drop();
        stats.nat_translations.fetch_add(3, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.rx_packets, 2);
        assert_eq!(snap.tx_packets, 1);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.nat_translations, 3);

        stats.reset();
        assert_eq!(stats.snapshot(), LbStatsSnapshot::default());
    }

    #[test]
    fn concurrent_updates_lose_nothing() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(LbStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        stats.record_rx();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().rx_packets, 40_000);
    }
}
