//! Resolved load-balancer configuration.
//!
//! The on-disk format is INI: `[section]` headers, `key = value`
//! lines, `#`/`;` comments. Backends are declared as
//! `server<i> = ip:port:weight:mac`; the MAC itself contains colons,
//! so everything after the third field is joined back together.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use flowgate_dataplane::ForwardMode;
use flowgate_wire::MacAddr;

/// Why a configuration failed to load.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read at all.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path as given on the command line.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A present option holds an unusable value.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Fully qualified `section.key`.
        key: String,
        /// The offending value.
        value: String,
    },
    /// A required option is absent.
    #[error("missing required option {0}")]
    Missing(&'static str),
}

/// One backend as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    /// Backend IPv4 address.
    pub ip: u32,
    /// Backend service port.
    pub port: u16,
    /// Dispatch weight.
    pub weight: u32,
    /// Backend MAC (all-zero when absent or malformed).
    pub mac: MacAddr,
}

/// The resolved configuration record.
#[derive(Debug, Clone)]
pub struct LbConfig {
    /// Forwarding mode for the packet path.
    pub mode: ForwardMode,
    /// Idle session expiry, seconds.
    pub session_timeout: u64,
    /// Virtual-node base for the consistent-hash ring.
    pub virtual_nodes: u32,
    /// The VIP the balancer terminates.
    pub vip: u32,
    /// MAC advertised for the VIP (ARP replies, DR source).
    pub vip_mac: MacAddr,
    /// Listener ports on the VIP.
    pub ports: Vec<u16>,
    /// Next-hop gateway for NAT egress (0 when unset).
    pub gateway: u32,
    /// Configured backends, in file order.
    pub backends: Vec<BackendConfig>,
}

impl LbConfig {
    /// Load and resolve a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ini(&text)
    }

    /// Resolve configuration from INI text.
    pub fn from_ini(text: &str) -> Result<Self, ConfigError> {
        let map = scan_ini(text);

        let mode = get_or(&map, "global.mode", "nat")
            .parse::<ForwardMode>()
            .map_err(|_| invalid(&map, "global.mode"))?;
        let session_timeout = parse_num(&map, "global.session_timeout", 300)?;
        let virtual_nodes = parse_num(&map, "global.virtual_nodes", 150)?;

        let vip_str = map
            .get("vip.ip")
            .ok_or(ConfigError::Missing("vip.ip"))?;
        let vip = vip_str
            .parse::<Ipv4Addr>()
            .map(u32::from)
            .map_err(|_| invalid(&map, "vip.ip"))?;
        let vip_mac = parse_mac_lenient(get_or(&map, "vip.mac", ""), "vip.mac");

        let mut ports = Vec::new();
        for token in get_or(&map, "vip.ports", "80").split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.parse::<u16>() {
                Ok(p) => ports.push(p),
                Err(_) => warn!(port = token, "ignoring unparsable listener port"),
            }
        }
        if ports.is_empty() {
            return Err(invalid(&map, "vip.ports"));
        }

        let gateway = match map.get("network.gateway") {
            Some(s) => s
                .parse::<Ipv4Addr>()
                .map(u32::from)
                .map_err(|_| invalid(&map, "network.gateway"))?,
            None => 0,
        };

        let count: u32 = parse_num(&map, "realserver.count", 0)?;
        let mut backends = Vec::with_capacity(count as usize);
        for i in 1..=count {
            let key = format!("realserver.server{i}");
            let Some(line) = map.get(key.as_str()) else {
                warn!(key, "declared backend has no entry");
                continue;
            };
            backends.push(parse_backend(line, &key)?);
        }

        Ok(Self {
            mode,
            session_timeout,
            virtual_nodes,
            vip,
            vip_mac,
            ports,
            gateway,
            backends,
        })
    }

    /// Log the resolved record at INFO, one line per concern.
    pub fn dump(&self) {
        info!(
            mode = ?self.mode,
            vip = %Ipv4Addr::from(self.vip),
            vip_mac = %self.vip_mac,
            ports = ?self.ports,
            "service"
        );
        info!(
            gateway = %Ipv4Addr::from(self.gateway),
            session_timeout = self.session_timeout,
            virtual_nodes = self.virtual_nodes,
            "runtime"
        );
        for (i, b) in self.backends.iter().enumerate() {
            info!(
                id = i + 1,
                addr = %format!("{}:{}", Ipv4Addr::from(b.ip), b.port),
                weight = b.weight,
                mac = %b.mac,
                "backend"
            );
        }
    }
}

/// Flatten INI text into a `section.key -> value` map.
fn scan_ini(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut section = String::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(rest) = line.strip_prefix('[') {
            if let Some(name) = rest.strip_suffix(']') {
                section = name.trim().to_string();
            } else {
                warn!(line = raw, "ignoring malformed section header");
            }
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = raw, "ignoring line without '='");
            continue;
        };
        let full_key = if section.is_empty() {
            key.trim().to_string()
        } else {
            format!("{section}.{}", key.trim())
        };
        map.insert(full_key, value.trim().to_string());
    }
    map
}

fn get_or<'a>(map: &'a HashMap<String, String>, key: &str, default: &'a str) -> &'a str {
    map.get(key).map(String::as_str).unwrap_or(default)
}

fn invalid(map: &HashMap<String, String>, key: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: map.get(key).cloned().unwrap_or_default(),
    }
}

fn parse_num<T: std::str::FromStr>(
    map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match map.get(key) {
        Some(s) => s.parse().map_err(|_| invalid(map, key)),
        None => Ok(default),
    }
}

/// Parse a MAC, falling back to all-zero with a warning.
fn parse_mac_lenient(s: &str, key: &str) -> MacAddr {
    if s.is_empty() {
        return MacAddr::ZERO;
    }
    match s.parse() {
        Ok(mac) => mac,
        Err(_) => {
            warn!(key, value = s, "malformed MAC, using 00:00:00:00:00:00");
            MacAddr::ZERO
        }
    }
}

/// Parse `ip:port:weight:mac`; the MAC is whatever remains after the
/// third colon, rejoined.
fn parse_backend(line: &str, key: &str) -> Result<BackendConfig, ConfigError> {
    let err = || ConfigError::Invalid {
        key: key.to_string(),
        value: line.to_string(),
    };

    let mut parts = line.splitn(4, ':');
    let ip = parts
        .next()
        .and_then(|s| s.trim().parse::<Ipv4Addr>().ok())
        .map(u32::from)
        .ok_or_else(err)?;
    let port = parts
        .next()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .ok_or_else(err)?;
    let weight = parts
        .next()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .ok_or_else(err)?;
    let mac = parse_mac_lenient(parts.next().unwrap_or("").trim(), key);

    Ok(BackendConfig {
        ip,
        port,
        weight,
        mac,
    })
}
