//! NAT and DR frame forwarders.
//!
//! Both rewrite the received frame in place and leave transmission to
//! the caller. NAT translates the destination (and the source on the
//! return path) with incremental checksum maintenance; DR only swaps
//! MACs and relies on the backend owning the VIP on a loopback
//! interface, answering the client directly.
//!
//! Fragmented datagrams: only the first fragment carries ports, so
//! follow-up fragments translate by address alone. There is no
//! reassembly here.

use std::str::FromStr;

use flowgate_wire::headers::{eth, ip4, tcp, udp};
use flowgate_wire::{csum, ipproto, ethertype, MacAddr, PacketMeta};

use crate::backends::RealServer;
use crate::session::Session;

/// Which forwarder the data plane runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Full destination/source NAT with checksum patching.
    Nat,
    /// Direct routing: MAC rewrite only, backend replies to the client.
    Dr,
}

impl FromStr for ForwardMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nat" => Ok(Self::Nat),
            "dr" => Ok(Self::Dr),
            other => Err(format!("unknown forward mode: {other}")),
        }
    }
}

/// NAT forwarder state.
#[derive(Debug, Clone, Copy)]
pub struct NatForwarder {
    /// The VIP the balancer terminates.
    pub vip: u32,
    /// MAC used as the source of every emitted frame.
    pub local_mac: MacAddr,
    /// Next hop for egress when the peer is not on-link.
    pub gateway_mac: Option<MacAddr>,
}

impl NatForwarder {
    /// Translate a client frame toward `backend`.
    ///
    /// Rewrites dst ip/port, decrements TTL, patches the IP and L4
    /// checksums incrementally and retargets the MACs. Returns false,
    /// leaving the frame untouched, when it is not forwardable:
    /// non-IPv4 or TTL expired.
    pub fn forward(&self, pkt: &mut [u8], meta: &PacketMeta, backend: &RealServer) -> bool {
        if meta.ether_type != ethertype::IPV4 || meta.ip_ttl <= 1 {
            return false;
        }

        rewrite_l3_l4(
            pkt,
            meta,
            Rewrite {
                ip_field: IpField::Dst,
                new_ip: backend.ip,
                new_port: backend.port,
            },
        );

        let next_hop = self.gateway_mac.unwrap_or(backend.mac);
        eth::set_dst_mac(pkt, next_hop);
        eth::set_src_mac(pkt, self.local_mac);
        true
    }

    /// Translate a backend reply back toward the client.
    ///
    /// The source becomes the VIP and the port the client connected to,
    /// both taken from the session's client-side tuple.
    pub fn forward_reply(&self, pkt: &mut [u8], meta: &PacketMeta, session: &Session) -> bool {
        if meta.ether_type != ethertype::IPV4 || meta.ip_ttl <= 1 {
            return false;
        }

        rewrite_l3_l4(
            pkt,
            meta,
            Rewrite {
                ip_field: IpField::Src,
                new_ip: self.vip,
                new_port: session.client.dst_port,
            },
        );

        let next_hop = self.gateway_mac.unwrap_or(session.client_mac);
        eth::set_dst_mac(pkt, next_hop);
        eth::set_src_mac(pkt, self.local_mac);
        true
    }
}

/// DR forwarder state.
#[derive(Debug, Clone, Copy)]
pub struct DrForwarder {
    /// MAC used as the source of every emitted frame.
    pub local_mac: MacAddr,
}

impl DrForwarder {
    /// Point the frame at the backend's MAC; L3 and L4 stay untouched.
    pub fn forward(&self, pkt: &mut [u8], meta: &PacketMeta, backend: &RealServer) -> bool {
        if meta.ether_type != ethertype::IPV4 {
            return false;
        }
        eth::set_dst_mac(pkt, backend.mac);
        eth::set_src_mac(pkt, self.local_mac);
        true
    }
}

/// The configured forwarder, one of two variants with a common surface.
pub enum Forwarder {
    /// NAT translation, both directions through the balancer.
    Nat(NatForwarder),
    /// Direct routing, forward path only.
    Dr(DrForwarder),
}

impl Forwarder {
    /// Forward a client frame toward `backend`.
    pub fn forward(&self, pkt: &mut [u8], meta: &PacketMeta, backend: &RealServer) -> bool {
        match self {
            Forwarder::Nat(f) => f.forward(pkt, meta, backend),
            Forwarder::Dr(f) => f.forward(pkt, meta, backend),
        }
    }

    /// Forward a backend reply toward the client.
    ///
    /// DR has no return path through the balancer, so it always
    /// declines.
    pub fn forward_reply(&self, pkt: &mut [u8], meta: &PacketMeta, session: &Session) -> bool {
        match self {
            Forwarder::Nat(f) => f.forward_reply(pkt, meta, session),
            Forwarder::Dr(_) => false,
        }
    }

    /// Which mode this forwarder implements.
    pub fn mode(&self) -> ForwardMode {
        match self {
            Forwarder::Nat(_) => ForwardMode::Nat,
            Forwarder::Dr(_) => ForwardMode::Dr,
        }
    }
}

enum IpField {
    Src,
    Dst,
}

struct Rewrite {
    ip_field: IpField,
    new_ip: u32,
    new_port: u16,
}

/// Apply an address/port rewrite with incremental checksum patching.
///
/// The L4 checksum covers the pseudo header, so an IP change patches it
/// even when no port changes. A UDP checksum of zero means "absent" on
/// the wire and stays zero.
fn rewrite_l3_l4(pkt: &mut [u8], meta: &PacketMeta, rw: Rewrite) {
    let l3 = usize::from(meta.l3_offset);
    let l4 = usize::from(meta.l4_offset);
    let l4_parsed = meta.payload_offset > meta.l4_offset;

    let (old_ip, old_port) = match rw.ip_field {
        IpField::Src => (meta.src_ip, meta.src_port),
        IpField::Dst => (meta.dst_ip, meta.dst_port),
    };

    // IP header: address, TTL, then one checksum patch per change.
    let ttl_proto_old = u16::from_be_bytes([meta.ip_ttl, meta.ip_protocol]);
    let ttl_proto_new = u16::from_be_bytes([meta.ip_ttl - 1, meta.ip_protocol]);
    {
        let ip = &mut pkt[l3..];
        match rw.ip_field {
            IpField::Src => ip4::set_src(ip, rw.new_ip),
            IpField::Dst => ip4::set_dst(ip, rw.new_ip),
        }
        ip[8] = meta.ip_ttl - 1;

        let mut c = ip4::checksum(ip);
        c = csum::incremental_update32(c, old_ip, rw.new_ip);
        c = csum::incremental_update(c, ttl_proto_old, ttl_proto_new);
        ip4::set_checksum(ip, c);
    }

    if !l4_parsed {
        return;
    }

    match meta.ip_protocol {
        ipproto::TCP => {
            let th = &mut pkt[l4..];
            match rw.ip_field {
                IpField::Src => tcp::set_src_port(th, rw.new_port),
                IpField::Dst => tcp::set_dst_port(th, rw.new_port),
            }
            let mut c = tcp::checksum(th);
            c = csum::incremental_update32(c, old_ip, rw.new_ip);
            c = csum::incremental_update(c, old_port, rw.new_port);
            tcp::set_checksum(th, c);
        }
        ipproto::UDP => {
            let uh = &mut pkt[l4..];
            match rw.ip_field {
                IpField::Src => udp::set_src_port(uh, rw.new_port),
                IpField::Dst => udp::set_dst_port(uh, rw.new_port),
            }
            let old_csum = udp::checksum(uh);
            if old_csum != 0 {
                let mut c = old_csum;
                c = csum::incremental_update32(c, old_ip, rw.new_ip);
                c = csum::incremental_update(c, old_port, rw.new_port);
                udp::set_checksum(uh, c);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_wire::build::{self, FrameSpec};
    use flowgate_wire::parser;

    const VIP: u32 = 0xC0A8_0164; // 192.168.1.100
    const CLIENT_IP: u32 = 0xC0A8_0105;
    const BACKEND_IP: u32 = 0x0A00_0001;
    const LOCAL_MAC: MacAddr = MacAddr([0x00, 0x0C, 0x29, 0x3E, 0x38, 0x92]);
    const BACKEND_MAC: MacAddr = MacAddr([0x00, 0x0C, 0x29, 0xAA, 0xBB, 0x01]);
    const CLIENT_MAC: MacAddr = MacAddr([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x05]);

    fn backend() -> RealServer {
        RealServer::new(1, BACKEND_IP, 8080, BACKEND_MAC, 100)
    }

    fn client_frame(payload: &[u8]) -> Vec<u8> {
        build::tcp_frame(
            FrameSpec {
                src_mac: CLIENT_MAC,
                dst_mac: LOCAL_MAC,
                src_ip: CLIENT_IP,
                dst_ip: VIP,
                src_port: 40000,
                dst_port: 80,
            },
            payload,
        )
    }

    fn verify_ip_checksum(frame: &[u8], l3: usize) {
        let len = ip4::header_len(&frame[l3..]);
        assert_eq!(csum::fold(csum::sum_words(&frame[l3..l3 + len])), 0xFFFF);
    }

    fn verify_tcp_checksum(frame: &[u8], l3: usize, l4: usize) {
        let ip = &frame[l3..];
        let seg = &frame[l4..];
        let sum = csum::pseudo_header_sum(ip4::src(ip), ip4::dst(ip), ipproto::TCP, seg.len() as u16)
            + csum::sum_words(seg);
        assert_eq!(csum::fold(sum), 0xFFFF);
    }

    #[test]
    fn nat_forward_rewrites_and_keeps_checksums_valid() {
        let nat = NatForwarder {
            vip: VIP,
            local_mac: LOCAL_MAC,
            gateway_mac: None,
        };
        let mut frame = client_frame(b"GET /");
        let meta = parser::parse(&frame).unwrap();

        assert!(nat.forward(&mut frame, &meta, &backend()));

        let l3 = usize::from(meta.l3_offset);
        let l4 = usize::from(meta.l4_offset);
        assert_eq!(ip4::dst(&frame[l3..]), BACKEND_IP);
        assert_eq!(ip4::src(&frame[l3..]), CLIENT_IP);
        assert_eq!(ip4::ttl(&frame[l3..]), 63);
        assert_eq!(tcp::dst_port(&frame[l4..]), 8080);
        assert_eq!(tcp::src_port(&frame[l4..]), 40000);
        assert_eq!(eth::dst_mac(&frame), BACKEND_MAC);
        assert_eq!(eth::src_mac(&frame), LOCAL_MAC);

        verify_ip_checksum(&frame, l3);
        verify_tcp_checksum(&frame, l3, l4);
    }

    #[test]
    fn nat_forward_prefers_gateway_mac() {
        let gw = MacAddr([2, 2, 2, 2, 2, 2]);
        let nat = NatForwarder {
            vip: VIP,
            local_mac: LOCAL_MAC,
            gateway_mac: Some(gw),
        };
        let mut frame = client_frame(b"");
        let meta = parser::parse(&frame).unwrap();
        assert!(nat.forward(&mut frame, &meta, &backend()));
        assert_eq!(eth::dst_mac(&frame), gw);
    }

    #[test]
    fn nat_reply_restores_vip_source() {
        let nat = NatForwarder {
            vip: VIP,
            local_mac: LOCAL_MAC,
            gateway_mac: None,
        };

        // Reply from the backend toward the client.
        let mut frame = build::tcp_frame(
            FrameSpec {
                src_mac: BACKEND_MAC,
                dst_mac: LOCAL_MAC,
                src_ip: BACKEND_IP,
                dst_ip: CLIENT_IP,
                src_port: 8080,
                dst_port: 40000,
            },
            b"200 OK",
        );
        let meta = parser::parse(&frame).unwrap();

        let session = Session {
            client: flowgate_wire::FiveTuple::new(CLIENT_IP, VIP, 40000, 80, ipproto::TCP),
            server: flowgate_wire::FiveTuple::new(CLIENT_IP, BACKEND_IP, 40000, 8080, ipproto::TCP),
            backend_id: 1,
            client_mac: CLIENT_MAC,
            created_ns: 0,
            last_active_ns: 0,
            packets: 0,
            bytes: 0,
        };

        assert!(nat.forward_reply(&mut frame, &meta, &session));

        let l3 = usize::from(meta.l3_offset);
        let l4 = usize::from(meta.l4_offset);
        assert_eq!(ip4::src(&frame[l3..]), VIP);
        assert_eq!(tcp::src_port(&frame[l4..]), 80);
        assert_eq!(ip4::dst(&frame[l3..]), CLIENT_IP);
        assert_eq!(eth::dst_mac(&frame), CLIENT_MAC);

        verify_ip_checksum(&frame, l3);
        verify_tcp_checksum(&frame, l3, l4);
    }

    #[test]
    fn nat_drops_expiring_ttl() {
        let nat = NatForwarder {
            vip: VIP,
            local_mac: LOCAL_MAC,
            gateway_mac: None,
        };
        let mut frame = client_frame(b"");
        frame[14 + 8] = 1; // ttl
        let l3 = 14usize;
        ip4::recompute_checksum(&mut frame[l3..]);
        let meta = parser::parse(&frame).unwrap();
        assert!(!nat.forward(&mut frame, &meta, &backend()));
    }

    #[test]
    fn nat_udp_zero_checksum_stays_zero() {
        let nat = NatForwarder {
            vip: VIP,
            local_mac: LOCAL_MAC,
            gateway_mac: None,
        };
        let mut frame = build::udp_frame(
            FrameSpec {
                src_mac: CLIENT_MAC,
                dst_mac: LOCAL_MAC,
                src_ip: CLIENT_IP,
                dst_ip: VIP,
                src_port: 5000,
                dst_port: 53,
            },
            b"query",
        );
        let meta = parser::parse(&frame).unwrap();
        let l4 = usize::from(meta.l4_offset);
        udp::set_checksum(&mut frame[l4..], 0);

        assert!(nat.forward(&mut frame, &meta, &backend()));
        assert_eq!(udp::checksum(&frame[l4..]), 0);
        assert_eq!(udp::dst_port(&frame[l4..]), 8080);
    }

    #[test]
    fn dr_touches_only_macs() {
        let dr = DrForwarder { local_mac: LOCAL_MAC };
        let mut frame = client_frame(b"payload");
        let before = frame.clone();
        let meta = parser::parse(&frame).unwrap();

        assert!(dr.forward(&mut frame, &meta, &backend()));

        assert_eq!(eth::dst_mac(&frame), BACKEND_MAC);
        assert_eq!(eth::src_mac(&frame), LOCAL_MAC);
        // Everything past L2 is byte-identical.
        assert_eq!(&frame[eth::LEN..], &before[eth::LEN..]);
    }

    #[test]
    fn dr_has_no_return_path() {
        let fwd = Forwarder::Dr(DrForwarder { local_mac: LOCAL_MAC });
        assert_eq!(fwd.mode(), ForwardMode::Dr);

        let mut frame = client_frame(b"");
        let meta = parser::parse(&frame).unwrap();
        let session = Session {
            client: flowgate_wire::FiveTuple::default(),
            server: flowgate_wire::FiveTuple::default(),
            backend_id: 1,
            client_mac: CLIENT_MAC,
            created_ns: 0,
            last_active_ns: 0,
            packets: 0,
            bytes: 0,
        };
        assert!(!fwd.forward_reply(&mut frame, &meta, &session));
    }

    #[test]
    fn mode_parses_from_config_strings() {
        assert_eq!("nat".parse::<ForwardMode>().unwrap(), ForwardMode::Nat);
        assert_eq!("DR".parse::<ForwardMode>().unwrap(), ForwardMode::Dr);
        assert!("direct".parse::<ForwardMode>().is_err());
    }
}
