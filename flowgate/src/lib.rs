//! Flowgate - L4/L7 TCP load balancer
//!
//! Terminates client connections on a virtual service address, picks a
//! backend by consistent hashing over the connection five-tuple, and
//! proxies bytes both ways. The packet-level NAT/DR path lives in
//! `flowgate-dataplane`; this crate owns the resolved configuration,
//! the L7 proxy loop and the process surface (CLI, signals, logging).

#![warn(missing_docs)]

pub mod config;
pub mod proxy;

pub use config::{BackendConfig, ConfigError, LbConfig};
pub use proxy::{ProxyError, ProxyServer};
