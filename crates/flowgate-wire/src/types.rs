//! Core wire-level identities: five-tuples, MAC addresses, parse results.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// 5-tuple flow identity.
///
/// Addresses and ports are held as host integers; they enter and leave
/// the struct through big-endian conversions at the wire boundary, so
/// two tuples parsed from the same flow compare equal on any platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct FiveTuple {
    /// Source IPv4 address.
    pub src_ip: u32,
    /// Destination IPv4 address.
    pub dst_ip: u32,
    /// Source port (0 for port-less protocols).
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// IP protocol (TCP=6, UDP=17).
    pub protocol: u8,
}

impl FiveTuple {
    /// Create a new flow identity.
    #[inline(always)]
    pub const fn new(src_ip: u32, dst_ip: u32, src_port: u16, dst_port: u16, protocol: u8) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        }
    }

    /// The reply direction of this flow: endpoints swapped, protocol kept.
    #[inline(always)]
    pub fn reverse(&self) -> Self {
        Self::new(
            self.dst_ip,
            self.src_ip,
            self.dst_port,
            self.src_port,
            self.protocol,
        )
    }

    /// Packed network-order representation, the input to the flow hash.
    ///
    /// Layout is fixed: src(4) dst(4) sport(2) dport(2) proto(1).
    #[inline]
    pub fn to_wire_bytes(&self) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[0..4].copy_from_slice(&self.src_ip.to_be_bytes());
        out[4..8].copy_from_slice(&self.dst_ip.to_be_bytes());
        out[8..10].copy_from_slice(&self.src_port.to_be_bytes());
        out[10..12].copy_from_slice(&self.dst_port.to_be_bytes());
        out[12] = self.protocol;
        out
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={}",
            Ipv4Addr::from(self.src_ip),
            self.src_port,
            Ipv4Addr::from(self.dst_ip),
            self.dst_port,
            self.protocol
        )
    }
}

/// A 48-bit Ethernet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The all-ones broadcast address.
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);

    /// The all-zero address, used for "unknown" in configuration.
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// Raw octets.
    #[inline(always)]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// True for ff:ff:ff:ff:ff:ff.
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }

    /// True when the group bit is set (includes broadcast).
    #[inline]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// True for 00:00:00:00:00:00.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Error parsing a textual MAC address.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid mac address: {0}")]
pub struct MacParseError(pub String);

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut n = 0;
        for part in s.split(':') {
            if n == 6 || part.len() != 2 {
                return Err(MacParseError(s.to_string()));
            }
            octets[n] =
                u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
            n += 1;
        }
        if n != 6 {
            return Err(MacParseError(s.to_string()));
        }
        Ok(MacAddr(octets))
    }
}

/// Everything one parse pass learns about a frame.
///
/// Offsets let later stages rewrite the original buffer in place; the
/// invariant `l2_offset <= l3_offset <= l4_offset <= payload_offset <=
/// total_len` holds for every meta the parser returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketMeta {
    /// Destination MAC of the frame.
    pub dst_mac: MacAddr,
    /// Source MAC of the frame.
    pub src_mac: MacAddr,
    /// EtherType of the frame.
    pub ether_type: u16,

    /// Source IPv4 address (0 for non-IPv4 frames).
    pub src_ip: u32,
    /// Destination IPv4 address.
    pub dst_ip: u32,
    /// IP protocol number.
    pub ip_protocol: u8,
    /// IP time-to-live.
    pub ip_ttl: u8,

    /// Source L4 port (0 when the L4 header was not fully present).
    pub src_port: u16,
    /// Destination L4 port.
    pub dst_port: u16,

    /// Offset of the Ethernet header (always 0 today).
    pub l2_offset: u16,
    /// Offset of the IP header.
    pub l3_offset: u16,
    /// Offset of the L4 header.
    pub l4_offset: u16,
    /// Offset of the application payload.
    pub payload_offset: u16,

    /// Total frame length.
    pub total_len: u16,
    /// Bytes after `payload_offset`.
    pub payload_len: u16,
}

impl PacketMeta {
    /// The flow identity of this packet.
    #[inline(always)]
    pub fn to_tuple(&self) -> FiveTuple {
        FiveTuple::new(
            self.src_ip,
            self.dst_ip,
            self.src_port,
            self.dst_port,
            self.ip_protocol,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_reverse_roundtrip() {
        let t = FiveTuple::new(0x0102_0304, 0x0506_0708, 80, 8080, 6);
        let r = t.reverse();
        assert_eq!(r.src_ip, t.dst_ip);
        assert_eq!(r.dst_port, t.src_port);
        assert_eq!(r.protocol, 6);
        assert_eq!(r.reverse(), t);
    }

    #[test]
    fn tuple_wire_bytes_pinned() {
        let t = FiveTuple::new(0x0102_0304, 0x0506_0708, 80, 8080, 6);
        assert_eq!(
            t.to_wire_bytes(),
            [1, 2, 3, 4, 5, 6, 7, 8, 0, 80, 0x1F, 0x90, 6]
        );
    }

    #[test]
    fn mac_parse_and_display() {
        let mac: MacAddr = "00:0c:29:3e:38:92".parse().unwrap();
        assert_eq!(mac.octets(), [0x00, 0x0C, 0x29, 0x3E, 0x38, 0x92]);
        assert_eq!(mac.to_string(), "00:0c:29:3e:38:92");

        assert!("00:0c:29".parse::<MacAddr>().is_err());
        assert!("00:0c:29:3e:38:92:aa".parse::<MacAddr>().is_err());
        assert!("zz:0c:29:3e:38:92".parse::<MacAddr>().is_err());
    }

    #[test]
    fn mac_classes() {
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(MacAddr::BROADCAST.is_multicast());
        assert!(MacAddr([0x01, 0, 0x5E, 0, 0, 1]).is_multicast());
        assert!(!MacAddr([0x00, 0x0C, 0x29, 0, 0, 1]).is_multicast());
        assert!(MacAddr::ZERO.is_zero());
    }
}
