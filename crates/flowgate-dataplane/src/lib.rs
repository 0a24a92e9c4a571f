//! Flowgate data plane
//!
//! The load-balancing core: consistent-hash dispatch, per-flow session
//! tracking, lock-free inter-core queues, and the packet engine that
//! ties them to the NAT/DR forwarders.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        PACKET ENGINE                         │
//! │                                                              │
//! │  RX frame ──► parse ──► ARP/ICMP to VIP? ──► reply in place  │
//! │                │                                             │
//! │                ▼                                             │
//! │          session table ── miss ──► consistent-hash ring      │
//! │                │                        │                    │
//! │                │ hit                    ▼                    │
//! │                │                 backend registry            │
//! │                ▼                        │                    │
//! │          NAT / DR forwarder ◄───────────┘                    │
//! │                │                                             │
//! │                ▼                                             │
//! │             TX frame                                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The polling driver that delivers RX frames and transmits the
//! engine's verdicts lives outside this crate; per worker the engine is
//! single-threaded, and control-plane mutation (backend add/remove,
//! status flips) synchronizes through short mutexes on the ring and
//! registry. The SPSC/MPMC rings are the hand-off primitive between
//! polling cores.

#![warn(missing_docs)]

pub mod backends;
pub mod engine;
pub mod forward;
pub mod hashring;
pub mod ringbuf;
pub mod session;
pub mod stats;

pub use backends::{BackendRegistry, RealServer, ServerStatus};
pub use engine::{PacketEngine, Verdict};
pub use forward::{ForwardMode, Forwarder};
pub use hashring::ConsistentHashRing;
pub use ringbuf::{MpmcRing, SpscRing};
pub use session::{Session, SessionTable};
pub use stats::{LbStats, LbStatsSnapshot};
