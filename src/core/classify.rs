//! Frame classification: raw captured bytes in, normalized record out.
//!
//! Parses link layer, IPv4/IPv6, and TCP/UDP headers by hand. Classification
//! never fails: frames without an IP header come back as `Unknown`, IP frames
//! with an unrecognized or truncated transport layer as `Other IP`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::Local;
use serde::Serialize;

// pcap DLT_* values we know how to strip.
const DLT_NULL: i32 = 0;
const DLT_EN10MB: i32 = 1;
const DLT_RAW: i32 = 12;
const DLT_LOOP: i32 = 108;
const DLT_LINUX_SLL: i32 = 113;
const DLT_IPV4: i32 = 228;
const DLT_IPV6: i32 = 229;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_IPV6: u16 = 0x86DD;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

/// Transport-layer protocol of a classified frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    /// IP traffic that is neither TCP nor UDP (or whose transport header
    /// was truncated).
    #[serde(rename = "Other IP")]
    OtherIp,
    /// No parseable IP header.
    #[serde(rename = "Unknown")]
    Unknown,
}

/// A single TCP header flag. Listed in the order classification checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TcpFlag {
    #[serde(rename = "SYN")]
    Syn,
    #[serde(rename = "ACK")]
    Ack,
    #[serde(rename = "FIN")]
    Fin,
    #[serde(rename = "RST")]
    Rst,
    #[serde(rename = "PSH")]
    Psh,
}

/// Normalized record for one admitted frame, serializable for the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PacketRecord {
    /// Wall-clock capture time, `HH:MM:SS`.
    pub timestamp: String,
    /// Size of the whole captured frame in bytes.
    pub size: u64,
    pub protocol: Protocol,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    /// `None` for non-IP frames, `Some(0)` for non-TCP/UDP IP traffic.
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    /// TCP flags set on the frame; empty for anything that is not TCP.
    pub flags: Vec<TcpFlag>,
}

impl PacketRecord {
    fn unknown(size: u64) -> Self {
        Self {
            timestamp: wall_clock(),
            size,
            protocol: Protocol::Unknown,
            src_ip: None,
            dst_ip: None,
            src_port: None,
            dst_port: None,
            flags: Vec::new(),
        }
    }
}

fn wall_clock() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Classify one captured frame. `linktype` is the pcap datalink value of the
/// capture handle (`Linktype.0`).
pub fn classify_packet(linktype: i32, frame: &[u8]) -> PacketRecord {
    let size = frame.len() as u64;

    let Some(ip) = strip_link_header(linktype, frame) else {
        return PacketRecord::unknown(size);
    };
    let Some((src_ip, dst_ip, proto_byte, transport)) = parse_ip_header(ip) else {
        return PacketRecord::unknown(size);
    };

    let mut record = PacketRecord {
        timestamp: wall_clock(),
        size,
        protocol: Protocol::OtherIp,
        src_ip: Some(src_ip),
        dst_ip: Some(dst_ip),
        src_port: Some(0),
        dst_port: Some(0),
        flags: Vec::new(),
    };

    match proto_byte {
        // TCP: ports at 0..4, flags byte at offset 13.
        IPPROTO_TCP if transport.len() >= 14 => {
            record.protocol = Protocol::Tcp;
            record.src_port = Some(u16::from_be_bytes([transport[0], transport[1]]));
            record.dst_port = Some(u16::from_be_bytes([transport[2], transport[3]]));
            record.flags = parse_tcp_flags(transport[13]);
        }
        IPPROTO_UDP if transport.len() >= 4 => {
            record.protocol = Protocol::Udp;
            record.src_port = Some(u16::from_be_bytes([transport[0], transport[1]]));
            record.dst_port = Some(u16::from_be_bytes([transport[2], transport[3]]));
        }
        // Anything else (or a truncated TCP/UDP header) stays Other IP.
        _ => {}
    }

    record
}

/// Drop the link-layer header, returning the IP packet within, or `None`
/// when the frame does not carry IP.
fn strip_link_header(linktype: i32, data: &[u8]) -> Option<&[u8]> {
    match linktype {
        DLT_EN10MB => {
            if data.len() < 14 {
                return None;
            }
            let (ethertype, offset) = match u16::from_be_bytes([data[12], data[13]]) {
                ETHERTYPE_VLAN => {
                    if data.len() < 18 {
                        return None;
                    }
                    (u16::from_be_bytes([data[16], data[17]]), 18)
                }
                ethertype => (ethertype, 14),
            };
            match ethertype {
                ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => data.get(offset..),
                _ => None,
            }
        }
        DLT_LINUX_SLL => {
            if data.len() < 16 {
                return None;
            }
            match u16::from_be_bytes([data[14], data[15]]) {
                ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => data.get(16..),
                _ => None,
            }
        }
        // 4-byte host-order address family, then the IP header.
        DLT_NULL | DLT_LOOP => data.get(4..),
        DLT_RAW | DLT_IPV4 | DLT_IPV6 => Some(data),
        _ => None,
    }
}

/// Parse an IPv4 or IPv6 header. Returns source address, destination
/// address, transport protocol byte, and the transport payload.
fn parse_ip_header(data: &[u8]) -> Option<(IpAddr, IpAddr, u8, &[u8])> {
    if data.is_empty() {
        return None;
    }
    match data[0] >> 4 {
        4 => {
            if data.len() < 20 {
                return None;
            }
            let ihl = ((data[0] & 0x0F) as usize) * 4;
            if ihl < 20 || data.len() < ihl {
                return None;
            }
            let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
            let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
            Some((IpAddr::V4(src), IpAddr::V4(dst), data[9], &data[ihl..]))
        }
        6 => {
            if data.len() < 40 {
                return None;
            }
            let src: [u8; 16] = data[8..24].try_into().ok()?;
            let dst: [u8; 16] = data[24..40].try_into().ok()?;
            Some((
                IpAddr::V6(Ipv6Addr::from(src)),
                IpAddr::V6(Ipv6Addr::from(dst)),
                data[6],
                &data[40..],
            ))
        }
        _ => None,
    }
}

/// Derive the flag set from the TCP flags byte. Each bit is tested
/// independently; multiple flags may be set at once.
fn parse_tcp_flags(bits: u8) -> Vec<TcpFlag> {
    let mut flags = Vec::new();
    if bits & 0x02 != 0 {
        flags.push(TcpFlag::Syn);
    }
    if bits & 0x10 != 0 {
        flags.push(TcpFlag::Ack);
    }
    if bits & 0x01 != 0 {
        flags.push(TcpFlag::Fin);
    }
    if bits & 0x04 != 0 {
        flags.push(TcpFlag::Rst);
    }
    if bits & 0x08 != 0 {
        flags.push(TcpFlag::Psh);
    }
    flags
}
