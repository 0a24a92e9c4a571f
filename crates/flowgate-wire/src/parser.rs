//! One-pass frame parser.
//!
//! Produces a [`PacketMeta`] describing every layer of a frame, or
//! `None` when declared header lengths are inconsistent with the bytes
//! actually present. Non-IPv4 frames (ARP in particular) parse
//! successfully with only the L2 fields populated so the caller can
//! dispatch on EtherType.

use crate::headers::{eth, ip4, tcp, udp};
use crate::types::PacketMeta;
use crate::{ethertype, ipproto};

/// Parse a raw Ethernet frame.
///
/// Contract:
/// - `len >= 14`, else `None`.
/// - Non-IPv4: L2 fields populated, L3/L4 offsets all point at the
///   Ethernet payload.
/// - IPv4: header lengths must fit inside `len`; otherwise `None`.
/// - TCP/UDP: when the full L4 header is present the ports and payload
///   offset are filled; a truncated L4 header leaves ports at 0 and the
///   payload at `l4_offset`.
pub fn parse(frame: &[u8]) -> Option<PacketMeta> {
    if frame.len() < eth::LEN {
        return None;
    }

    let mut meta = PacketMeta {
        dst_mac: eth::dst_mac(frame),
        src_mac: eth::src_mac(frame),
        ether_type: eth::ethertype(frame),
        l2_offset: 0,
        l3_offset: eth::LEN as u16,
        total_len: frame.len() as u16,
        ..PacketMeta::default()
    };

    if meta.ether_type != ethertype::IPV4 {
        meta.l4_offset = meta.l3_offset;
        meta.payload_offset = meta.l3_offset;
        meta.payload_len = meta.total_len - meta.payload_offset;
        return Some(meta);
    }

    let l3 = eth::LEN;
    if frame.len() < l3 + ip4::MIN_LEN {
        return None;
    }
    let ip = &frame[l3..];
    let ip_hdr_len = ip4::header_len(ip);
    if ip4::version(ip) != 4 || ip_hdr_len < ip4::MIN_LEN || l3 + ip_hdr_len > frame.len() {
        return None;
    }
    if usize::from(ip4::total_len(ip)) < ip_hdr_len {
        return None;
    }

    meta.src_ip = ip4::src(ip);
    meta.dst_ip = ip4::dst(ip);
    meta.ip_protocol = ip4::protocol(ip);
    meta.ip_ttl = ip4::ttl(ip);
    meta.l4_offset = (l3 + ip_hdr_len) as u16;

    let l4 = usize::from(meta.l4_offset);
    let mut payload = l4;
    match meta.ip_protocol {
        ipproto::TCP if frame.len() >= l4 + tcp::MIN_LEN => {
            let th = &frame[l4..];
            let tcp_hdr_len = tcp::header_len(th);
            if tcp_hdr_len < tcp::MIN_LEN || l4 + tcp_hdr_len > frame.len() {
                return None;
            }
            meta.src_port = tcp::src_port(th);
            meta.dst_port = tcp::dst_port(th);
            payload = l4 + tcp_hdr_len;
        }
        ipproto::UDP if frame.len() >= l4 + udp::LEN => {
            let uh = &frame[l4..];
            meta.src_port = udp::src_port(uh);
            meta.dst_port = udp::dst_port(uh);
            payload = l4 + udp::LEN;
        }
        _ => {}
    }

    meta.payload_offset = payload as u16;
    meta.payload_len = meta.total_len - meta.payload_offset;
    Some(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{self, FrameSpec};
    use crate::headers::arp;
    use crate::types::MacAddr;

    fn spec() -> FrameSpec {
        FrameSpec {
            src_mac: MacAddr([0x02, 0, 0, 0, 0, 0x01]),
            dst_mac: MacAddr([0x02, 0, 0, 0, 0, 0x02]),
            src_ip: 0x0102_0304,
            dst_ip: 0x0506_0708,
            src_port: 12345,
            dst_port: 8080,
        }
    }

    #[test]
    fn parse_built_tcp_frame() {
        let frame = build::tcp_frame(spec(), b"hello");
        let meta = parse(&frame).unwrap();

        assert_eq!(meta.ether_type, ethertype::IPV4);
        assert_eq!(meta.src_mac.octets()[5], 0x01);
        assert_eq!(meta.src_ip, 0x0102_0304);
        assert_eq!(meta.dst_ip, 0x0506_0708);
        assert_eq!(meta.ip_protocol, ipproto::TCP);
        assert_eq!(meta.ip_ttl, 64);
        assert_eq!(meta.src_port, 12345);
        assert_eq!(meta.dst_port, 8080);
        assert_eq!(meta.l3_offset, 14);
        assert_eq!(meta.l4_offset, 34);
        assert_eq!(meta.payload_offset, 54);
        assert_eq!(meta.payload_len, 5);
        assert_eq!(usize::from(meta.total_len), frame.len());

        let t = meta.to_tuple();
        assert_eq!(t.src_port, 12345);
        assert_eq!(t.protocol, ipproto::TCP);
    }

    #[test]
    fn parse_built_udp_frame() {
        let frame = build::udp_frame(spec(), b"dns?");
        let meta = parse(&frame).unwrap();

        assert_eq!(meta.ip_protocol, ipproto::UDP);
        assert_eq!(meta.src_port, 12345);
        assert_eq!(meta.dst_port, 8080);
        assert_eq!(meta.payload_offset, 42);
        assert_eq!(meta.payload_len, 4);
    }

    #[test]
    fn offsets_are_ordered() {
        for frame in [
            build::tcp_frame(spec(), b"x"),
            build::udp_frame(spec(), b""),
            build::icmp_echo_frame(1, 2, b"ping"),
        ] {
            let m = parse(&frame).unwrap();
            assert!(m.l2_offset <= m.l3_offset);
            assert!(m.l3_offset <= m.l4_offset);
            assert!(m.l4_offset <= m.payload_offset);
            assert!(usize::from(m.payload_offset) <= frame.len());
        }
    }

    #[test]
    fn short_frame_rejected() {
        assert!(parse(&[0u8; 13]).is_none());
        assert!(parse(&[]).is_none());
    }

    #[test]
    fn truncated_ipv4_rejected() {
        let mut frame = vec![0u8; 20];
        frame[12..14].copy_from_slice(&ethertype::IPV4.to_be_bytes());
        assert!(parse(&frame).is_none());
    }

    #[test]
    fn bad_ihl_rejected() {
        let mut frame = build::tcp_frame(spec(), b"");
        frame[14] = 0x42; // ihl = 2, below minimum
        assert!(parse(&frame).is_none());
        frame[14] = 0x4F; // ihl = 15, longer than the frame
        assert!(parse(&frame).is_none());
    }

    #[test]
    fn arp_frame_parses_l2_only() {
        let mut frame = vec![0u8; eth::LEN + arp::LEN];
        eth::set_src_mac(&mut frame, MacAddr([9; 6]));
        frame[12..14].copy_from_slice(&ethertype::ARP.to_be_bytes());

        let meta = parse(&frame).unwrap();
        assert_eq!(meta.ether_type, ethertype::ARP);
        assert_eq!(meta.src_mac, MacAddr([9; 6]));
        assert_eq!(meta.src_ip, 0);
        assert_eq!(meta.src_port, 0);
        assert_eq!(meta.l4_offset, 14);
        assert_eq!(usize::from(meta.payload_len), arp::LEN);
    }

    #[test]
    fn truncated_tcp_leaves_ports_zero() {
        let full = build::tcp_frame(spec(), b"");
        // Keep IP intact but cut into the TCP header.
        let mut frame = full[..eth::LEN + ip4::MIN_LEN + 8].to_vec();
        let ip = &mut frame[eth::LEN..];
        ip[2..4].copy_from_slice(&((ip4::MIN_LEN + 8) as u16).to_be_bytes());

        let meta = parse(&frame).unwrap();
        assert_eq!(meta.src_port, 0);
        assert_eq!(meta.dst_port, 0);
        assert_eq!(meta.payload_offset, meta.l4_offset);
    }
}
