//! Frame construction with valid checksums.
//!
//! Used by the test suites and by tooling that needs well-formed
//! frames; the forwarding path itself only rewrites frames it
//! received.

use crate::headers::{eth, icmp, ip4, tcp, udp};
use crate::types::MacAddr;
use crate::{csum, ethertype, ipproto};

/// Endpoint description for a built frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    /// Source MAC.
    pub src_mac: MacAddr,
    /// Destination MAC.
    pub dst_mac: MacAddr,
    /// Source IPv4 address.
    pub src_ip: u32,
    /// Destination IPv4 address.
    pub dst_ip: u32,
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
}

fn push_eth_ip(spec: &FrameSpec, protocol: u8, l4_len: usize) -> Vec<u8> {
    let total = eth::LEN + ip4::MIN_LEN + l4_len;
    let mut frame = vec![0u8; total];

    eth::set_dst_mac(&mut frame, spec.dst_mac);
    eth::set_src_mac(&mut frame, spec.src_mac);
    frame[12..14].copy_from_slice(&ethertype::IPV4.to_be_bytes());

    let h = &mut frame[eth::LEN..];
    h[0] = 0x45;
    h[2..4].copy_from_slice(&((ip4::MIN_LEN + l4_len) as u16).to_be_bytes());
    h[8] = 64; // ttl
    h[9] = protocol;
    ip4::set_src(h, spec.src_ip);
    ip4::set_dst(h, spec.dst_ip);
    ip4::recompute_checksum(h);

    frame
}

/// Build an Ethernet/IPv4/TCP frame with valid checksums.
pub fn tcp_frame(spec: FrameSpec, payload: &[u8]) -> Vec<u8> {
    let l4_len = tcp::MIN_LEN + payload.len();
    let mut frame = push_eth_ip(&spec, ipproto::TCP, l4_len);
    let l4 = eth::LEN + ip4::MIN_LEN;

    {
        let h = &mut frame[l4..];
        tcp::set_src_port(h, spec.src_port);
        tcp::set_dst_port(h, spec.dst_port);
        h[12] = 5 << 4; // data offset
        h[13] = 0x18; // PSH|ACK
        h[14..16].copy_from_slice(&8192u16.to_be_bytes()); // window
        h[tcp::MIN_LEN..].copy_from_slice(payload);
    }

    let c = csum::l4_checksum(spec.src_ip, spec.dst_ip, ipproto::TCP, &frame[l4..]);
    tcp::set_checksum(&mut frame[l4..], c);
    frame
}

/// Build an Ethernet/IPv4/UDP frame with valid checksums.
pub fn udp_frame(spec: FrameSpec, payload: &[u8]) -> Vec<u8> {
    let l4_len = udp::LEN + payload.len();
    let mut frame = push_eth_ip(&spec, ipproto::UDP, l4_len);
    let l4 = eth::LEN + ip4::MIN_LEN;

    {
        let h = &mut frame[l4..];
        udp::set_src_port(h, spec.src_port);
        udp::set_dst_port(h, spec.dst_port);
        h[4..6].copy_from_slice(&(l4_len as u16).to_be_bytes());
        h[udp::LEN..].copy_from_slice(payload);
    }

    let c = csum::l4_checksum(spec.src_ip, spec.dst_ip, ipproto::UDP, &frame[l4..]);
    udp::set_checksum(&mut frame[l4..], c);
    frame
}

/// Build an Ethernet/IPv4/ICMP echo request frame.
pub fn icmp_echo_frame(src_ip: u32, dst_ip: u32, payload: &[u8]) -> Vec<u8> {
    let spec = FrameSpec {
        src_mac: MacAddr([0x02, 0, 0, 0, 0, 0x01]),
        dst_mac: MacAddr([0x02, 0, 0, 0, 0, 0x02]),
        src_ip,
        dst_ip,
        src_port: 0,
        dst_port: 0,
    };
    let l4_len = icmp::LEN + payload.len();
    let mut frame = push_eth_ip(&spec, ipproto::ICMP, l4_len);
    let l4 = eth::LEN + ip4::MIN_LEN;

    {
        let h = &mut frame[l4..];
        h[0] = icmp::ECHO_REQUEST;
        h[4..6].copy_from_slice(&0x1234u16.to_be_bytes()); // identifier
        h[6..8].copy_from_slice(&1u16.to_be_bytes()); // sequence
        h[icmp::LEN..].copy_from_slice(payload);
    }

    let c = csum::checksum(&frame[l4..]);
    frame[l4 + 2..l4 + 4].copy_from_slice(&c.to_be_bytes());
    frame
}
