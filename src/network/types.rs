use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Tcp,
}

/// One TCP connection as seen on one interface.
///
/// A key built from a segment keeps the segment's direction; [`FlowKey::canonical`]
/// orders the endpoints so both directions of a connection share one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub interface: String,
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub protocol: TransportProtocol,
}

impl FlowKey {
    pub fn tcp(interface: &str, source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            interface: interface.to_string(),
            source,
            destination,
            protocol: TransportProtocol::Tcp,
        }
    }

    /// The key with its endpoints in canonical order, and the side the
    /// original direction maps to.
    pub fn canonical(&self) -> (FlowKey, Side) {
        if self.source <= self.destination {
            (self.clone(), Side::Forward)
        } else {
            (self.reversed(), Side::Reverse)
        }
    }

    pub fn reversed(&self) -> FlowKey {
        FlowKey {
            interface: self.interface.clone(),
            source: self.destination,
            destination: self.source,
            protocol: self.protocol,
        }
    }

    /// Sender and receiver of the half-stream `side` of this canonical key.
    pub fn endpoints(&self, side: Side) -> (SocketAddr, SocketAddr) {
        match side {
            Side::Forward => (self.source, self.destination),
            Side::Reverse => (self.destination, self.source),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.interface, self.source, self.destination)
    }
}

/// Half-stream of a canonical flow: `Forward` carries bytes from the
/// canonical source to the canonical destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Forward,
    Reverse,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Forward => 0,
            Side::Reverse => 1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Forward => Side::Reverse,
            Side::Reverse => Side::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const ACK: u8 = 0x10;

    pub fn fin(self) -> bool {
        self.0 & Self::FIN != 0
    }

    pub fn syn(self) -> bool {
        self.0 & Self::SYN != 0
    }

    pub fn rst(self) -> bool {
        self.0 & Self::RST != 0
    }
}

/// A decoded TCP segment, direction as captured.
#[derive(Debug, Clone, PartialEq)]
pub struct TcpSegment {
    pub flow: FlowKey,
    pub sequence: u32,
    pub flags: TcpFlags,
    pub payload: Vec<u8>,
}

/// When a packet was seen.
///
/// `offset` is monotonic and drives every timeout; `wall` is only stamped on
/// records. For pcap replay both come from the file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketTime {
    pub offset: Duration,
    pub wall: DateTime<Utc>,
}
