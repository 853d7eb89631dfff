//! Link, network and transport header decoding.
//!
//! Only what is needed to recover TCP payloads is decoded: Ethernet II with
//! stacked 802.1Q/802.1ad tags, Linux cooked capture (SLL), raw IPv4/IPv6 and
//! TCP. Checksums are not verified and IP fragments are skipped.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use log::trace;

use super::types::{FlowKey, TcpFlags, TcpSegment};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
const IPPROTO_TCP: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    LinuxSll,
    RawIp,
}

impl LinkType {
    /// Maps a pcap `LINKTYPE_*` value.
    pub fn from_pcap(value: u32) -> Option<Self> {
        match value {
            1 => Some(LinkType::Ethernet),
            113 => Some(LinkType::LinuxSll),
            12 | 14 | 101 | 228 | 229 => Some(LinkType::RawIp),
            _ => None,
        }
    }
}

/// Decodes captured frames into TCP segments on the monitored ports.
pub struct FrameDecoder {
    interface: String,
    ports: HashSet<u16>,
}

impl FrameDecoder {
    pub fn new(interface: &str, ports: &[u16]) -> Self {
        Self {
            interface: interface.to_string(),
            ports: ports.iter().copied().collect(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Returns the TCP segment carried by `frame` when either port is
    /// monitored. Anything else, truncated frames included, yields `None`.
    pub fn decode(&self, link: LinkType, frame: &[u8]) -> Option<TcpSegment> {
        let (ethertype, ip) = match link {
            LinkType::Ethernet => ethernet_payload(frame)?,
            LinkType::LinuxSll => sll_payload(frame)?,
            LinkType::RawIp => match frame.first()? >> 4 {
                4 => (ETHERTYPE_IPV4, frame),
                6 => (ETHERTYPE_IPV6, frame),
                _ => return None,
            },
        };

        let (src, dst, tcp) = match ethertype {
            ETHERTYPE_IPV4 => ipv4_payload(ip)?,
            ETHERTYPE_IPV6 => ipv6_payload(ip)?,
            _ => return None,
        };

        let segment = self.tcp_segment(src, dst, tcp)?;
        trace!(
            "{}: seq={} flags={:#04x} len={}",
            segment.flow,
            segment.sequence,
            segment.flags.0,
            segment.payload.len()
        );
        Some(segment)
    }

    fn tcp_segment(&self, src: IpAddr, dst: IpAddr, tcp: &[u8]) -> Option<TcpSegment> {
        if tcp.len() < 20 {
            return None;
        }
        let src_port = u16::from_be_bytes([tcp[0], tcp[1]]);
        let dst_port = u16::from_be_bytes([tcp[2], tcp[3]]);
        if !self.ports.contains(&src_port) && !self.ports.contains(&dst_port) {
            return None;
        }

        let sequence = u32::from_be_bytes([tcp[4], tcp[5], tcp[6], tcp[7]]);
        let data_offset = usize::from(tcp[12] >> 4) * 4;
        if data_offset < 20 || data_offset > tcp.len() {
            return None;
        }

        Some(TcpSegment {
            flow: FlowKey::tcp(
                &self.interface,
                SocketAddr::new(src, src_port),
                SocketAddr::new(dst, dst_port),
            ),
            sequence,
            flags: TcpFlags(tcp[13]),
            payload: tcp[data_offset..].to_vec(),
        })
    }
}

fn ethernet_payload(frame: &[u8]) -> Option<(u16, &[u8])> {
    if frame.len() < 14 {
        return None;
    }
    let mut ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    let mut offset = 14;
    while ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ {
        let tag = frame.get(offset..offset + 4)?;
        ethertype = u16::from_be_bytes([tag[2], tag[3]]);
        offset += 4;
    }
    Some((ethertype, &frame[offset..]))
}

fn sll_payload(frame: &[u8]) -> Option<(u16, &[u8])> {
    if frame.len() < 16 {
        return None;
    }
    Some((u16::from_be_bytes([frame[14], frame[15]]), &frame[16..]))
}

fn ipv4_payload(packet: &[u8]) -> Option<(IpAddr, IpAddr, &[u8])> {
    if packet.len() < 20 || packet[0] >> 4 != 4 {
        return None;
    }
    let header_len = usize::from(packet[0] & 0x0f) * 4;
    let total_len = usize::from(u16::from_be_bytes([packet[2], packet[3]]));
    if header_len < 20 || total_len < header_len || packet.len() < header_len {
        return None;
    }
    if packet[9] != IPPROTO_TCP {
        return None;
    }
    // More-fragments flag or a non-zero fragment offset.
    let fragment = u16::from_be_bytes([packet[6], packet[7]]);
    if fragment & 0x3fff != 0 {
        return None;
    }

    let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
    // Ethernet padding can follow the datagram; TSO captures can report 0.
    let end = if total_len == 0 {
        packet.len()
    } else {
        total_len.min(packet.len())
    };
    Some((src.into(), dst.into(), &packet[header_len..end]))
}

fn ipv6_payload(packet: &[u8]) -> Option<(IpAddr, IpAddr, &[u8])> {
    if packet.len() < 40 || packet[0] >> 4 != 6 {
        return None;
    }
    let payload_len = usize::from(u16::from_be_bytes([packet[4], packet[5]]));
    let src = ipv6_addr(&packet[8..24])?;
    let dst = ipv6_addr(&packet[24..40])?;

    let end = if payload_len == 0 {
        packet.len()
    } else {
        (40 + payload_len).min(packet.len())
    };
    let mut next_header = packet[6];
    let mut offset = 40;
    loop {
        match next_header {
            IPPROTO_TCP => break,
            // hop-by-hop, routing, destination options
            0 | 43 | 60 => {
                let ext = packet.get(offset..offset + 2)?;
                next_header = ext[0];
                offset += (usize::from(ext[1]) + 1) * 8;
            }
            _ => return None,
        }
    }
    if offset > end {
        return None;
    }
    Some((src.into(), dst.into(), &packet[offset..end]))
}

fn ipv6_addr(bytes: &[u8]) -> Option<Ipv6Addr> {
    let octets: [u8; 16] = bytes.try_into().ok()?;
    Some(Ipv6Addr::from(octets))
}

/// Frame builders shared by the unit tests of the capture layer.
#[cfg(test)]
pub(crate) mod testing {
    use std::net::{Ipv4Addr, SocketAddrV4};

    pub fn tcp_header(src_port: u16, dst_port: u16, seq: u32, flags: u8) -> Vec<u8> {
        let mut tcp = Vec::with_capacity(20);
        tcp.extend_from_slice(&src_port.to_be_bytes());
        tcp.extend_from_slice(&dst_port.to_be_bytes());
        tcp.extend_from_slice(&seq.to_be_bytes());
        tcp.extend_from_slice(&0u32.to_be_bytes());
        tcp.push(5 << 4);
        tcp.push(flags);
        tcp.extend_from_slice(&[0xff, 0xff, 0, 0, 0, 0]);
        tcp
    }

    pub fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr, tcp_and_payload: &[u8]) -> Vec<u8> {
        let total = (20 + tcp_and_payload.len()) as u16;
        let mut ip = vec![0x45, 0];
        ip.extend_from_slice(&total.to_be_bytes());
        ip.extend_from_slice(&[0, 0, 0x40, 0, 64, 6, 0, 0]);
        ip.extend_from_slice(&src.octets());
        ip.extend_from_slice(&dst.octets());
        ip.extend_from_slice(tcp_and_payload);
        ip
    }

    pub fn ethernet_frame(
        src: SocketAddrV4,
        dst: SocketAddrV4,
        seq: u32,
        flags: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut tcp = tcp_header(src.port(), dst.port(), seq, flags);
        tcp.extend_from_slice(payload);
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        frame.extend_from_slice(&ipv4_packet(*src.ip(), *dst.ip(), &tcp));
        frame
    }
}
