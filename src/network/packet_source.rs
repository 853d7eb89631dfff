//! Where frames come from: a live interface or a pcap file.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::debug;

use super::packet::LinkType;
use super::types::PacketTime;
use crate::error_handling::types::CaptureError;

pub enum PacketRead {
    Frame { data: Vec<u8>, time: PacketTime },
    /// Nothing arrived within the read timeout.
    Timeout,
    /// The source is finished (end of a pcap file).
    Exhausted,
}

/// A blocking source of link-layer frames.
pub trait PacketSource: Send {
    fn link_type(&self) -> LinkType;

    /// Blocks for at most the source's read timeout.
    fn next_frame(&mut self) -> Result<PacketRead, CaptureError>;

    /// Current offset on the clock frame offsets are measured against, for
    /// sources that follow the wall clock. Replayed sources have none.
    fn elapsed(&self) -> Option<Duration> {
        None
    }
}

const PCAP_MAGIC_MICROS: u32 = 0xa1b2_c3d4;
const PCAP_MAGIC_NANOS: u32 = 0xa1b2_3c4d;
const MAX_RECORD_LEN: usize = 256 * 1024;

/// Classic libpcap file reader, either byte order, micro or nanosecond stamps.
pub struct PcapFileSource<R: Read> {
    reader: R,
    link: LinkType,
    big_endian: bool,
    nanos: bool,
    first: Option<DateTime<Utc>>,
}

impl PcapFileSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let file = File::open(path).map_err(CaptureError::ReadError)?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read> PcapFileSource<R> {
    pub fn from_reader(mut reader: R) -> Result<Self, CaptureError> {
        let mut header = [0u8; 24];
        reader.read_exact(&mut header).map_err(|e| {
            CaptureError::PcapFormat(format!("truncated global header: {}", e))
        })?;

        let magic_le = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let magic_be = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let (big_endian, nanos) = match (magic_le, magic_be) {
            (PCAP_MAGIC_MICROS, _) => (false, false),
            (PCAP_MAGIC_NANOS, _) => (false, true),
            (_, PCAP_MAGIC_MICROS) => (true, false),
            (_, PCAP_MAGIC_NANOS) => (true, true),
            _ => {
                return Err(CaptureError::PcapFormat(format!(
                    "unknown magic {:#010x}",
                    magic_le
                )))
            }
        };

        let network = read_u32(&header[20..24], big_endian);
        let link = LinkType::from_pcap(network).ok_or(CaptureError::UnsupportedLinkType(network))?;

        Ok(Self {
            reader,
            link,
            big_endian,
            nanos,
            first: None,
        })
    }
}

fn read_u32(bytes: &[u8], big_endian: bool) -> u32 {
    let b = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if big_endian {
        u32::from_be_bytes(b)
    } else {
        u32::from_le_bytes(b)
    }
}

impl<R: Read + Send> PacketSource for PcapFileSource<R> {
    fn link_type(&self) -> LinkType {
        self.link
    }

    fn next_frame(&mut self) -> Result<PacketRead, CaptureError> {
        let mut header = [0u8; 16];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(PacketRead::Exhausted),
            Err(e) => return Err(CaptureError::ReadError(e)),
        }

        let secs = read_u32(&header[0..4], self.big_endian);
        let frac = read_u32(&header[4..8], self.big_endian);
        let captured = read_u32(&header[8..12], self.big_endian) as usize;
        if captured > MAX_RECORD_LEN {
            return Err(CaptureError::PcapFormat(format!(
                "record of {} bytes exceeds {}",
                captured, MAX_RECORD_LEN
            )));
        }

        let mut data = vec![0u8; captured];
        self.reader.read_exact(&mut data).map_err(|e| {
            CaptureError::PcapFormat(format!("truncated record: {}", e))
        })?;

        let nanos = if self.nanos { frac } else { frac.saturating_mul(1000) };
        let wall = Utc
            .timestamp_opt(i64::from(secs), nanos.min(999_999_999))
            .single()
            .unwrap_or_else(Utc::now);
        let first = *self.first.get_or_insert(wall);
        let offset = (wall - first).to_std().unwrap_or_default();

        Ok(PacketRead::Frame {
            data,
            time: PacketTime { offset, wall },
        })
    }
}

/// Live capture on one interface through an `AF_PACKET` raw socket.
#[cfg(target_os = "linux")]
pub struct AfPacketSource {
    socket: socket2::Socket,
    buffer: Vec<u8>,
    started: std::time::Instant,
}

#[cfg(target_os = "linux")]
impl AfPacketSource {
    /// Opens a raw socket bound to `interface`.
    ///
    /// # Arguments
    ///
    /// * `interface` - the interface name, e.g. `eth0`
    /// * `read_timeout` - upper bound on one blocking read, which is also how
    ///   quickly the capture worker notices a shutdown request
    ///
    /// # Errors
    ///
    /// [`CaptureError::InterfaceNotFound`] when the interface does not exist,
    /// [`CaptureError::SocketError`] when the socket cannot be created (usually
    /// a missing `CAP_NET_RAW`).
    pub fn open(interface: &str, read_timeout: Duration) -> Result<Self, CaptureError> {
        use socket2::{Domain, Protocol, Socket, Type};

        let index = interface_index(interface)?;
        let eth_p_all = (libc::ETH_P_ALL as u16).to_be();
        let socket = Socket::new(
            Domain::PACKET,
            Type::RAW,
            Some(Protocol::from(i32::from(eth_p_all))),
        )
        .map_err(CaptureError::SocketError)?;

        bind_packet_socket(&socket, index, eth_p_all).map_err(CaptureError::SocketError)?;

        socket
            .set_read_timeout(Some(read_timeout))
            .map_err(CaptureError::SocketError)?;
        if let Err(e) = socket.set_recv_buffer_size(8 * 1024 * 1024) {
            debug!("{}: could not enlarge receive buffer: {}", interface, e);
        }

        Ok(Self {
            socket,
            buffer: vec![0u8; 65_536],
            started: std::time::Instant::now(),
        })
    }
}

/// Kernel index of `interface`, read from sysfs.
#[cfg(target_os = "linux")]
fn interface_index(interface: &str) -> Result<i32, CaptureError> {
    let not_found = || CaptureError::InterfaceNotFound(interface.to_string());
    if interface.is_empty() || interface.contains(['/', '\0']) || interface.starts_with('.') {
        return Err(not_found());
    }
    std::fs::read_to_string(format!("/sys/class/net/{}/ifindex", interface))
        .ok()
        .and_then(|raw| raw.trim().parse::<i32>().ok())
        .filter(|index| *index > 0)
        .ok_or_else(not_found)
}

/// Binds a packet socket to one interface. socket2 has no safe constructor
/// for `sockaddr_ll`, so this is the one raw `bind` call in the crate.
#[cfg(target_os = "linux")]
fn bind_packet_socket(socket: &socket2::Socket, index: i32, protocol: u16) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let addr = libc::sockaddr_ll {
        sll_family: libc::AF_PACKET as u16,
        sll_protocol: protocol,
        sll_ifindex: index,
        sll_hatype: 0,
        sll_pkttype: 0,
        sll_halen: 0,
        sll_addr: [0; 8],
    };
    // SAFETY: `addr` is a fully initialised sockaddr_ll and the length matches it.
    let rc = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
impl PacketSource for AfPacketSource {
    fn link_type(&self) -> LinkType {
        LinkType::Ethernet
    }

    fn next_frame(&mut self) -> Result<PacketRead, CaptureError> {
        match (&self.socket).read(&mut self.buffer) {
            Ok(len) => Ok(PacketRead::Frame {
                data: self.buffer[..len].to_vec(),
                time: PacketTime {
                    offset: self.started.elapsed(),
                    wall: Utc::now(),
                },
            }),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(PacketRead::Timeout)
            }
            Err(e) => Err(CaptureError::ReadError(e)),
        }
    }

    fn elapsed(&self) -> Option<Duration> {
        Some(self.started.elapsed())
    }
}

/// Fallback for platforms without `AF_PACKET`.
#[cfg(not(target_os = "linux"))]
pub struct AfPacketSource;

#[cfg(not(target_os = "linux"))]
impl AfPacketSource {
    pub fn open(interface: &str, _read_timeout: Duration) -> Result<Self, CaptureError> {
        Err(CaptureError::InterfaceNotFound(format!(
            "{}: live capture is only supported on Linux",
            interface
        )))
    }
}

#[cfg(not(target_os = "linux"))]
impl PacketSource for AfPacketSource {
    fn link_type(&self) -> LinkType {
        LinkType::Ethernet
    }

    fn next_frame(&mut self) -> Result<PacketRead, CaptureError> {
        debug!("live capture unavailable on this platform");
        Ok(PacketRead::Exhausted)
    }
}

/// Writes a classic little-endian microsecond pcap. Test support only.
#[cfg(test)]
pub(crate) fn pcap_bytes(link: u32, frames: &[(u32, u32, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&PCAP_MAGIC_MICROS.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&65_535u32.to_le_bytes());
    out.extend_from_slice(&link.to_le_bytes());
    for (secs, micros, data) in frames {
        out.extend_from_slice(&secs.to_le_bytes());
        out.extend_from_slice(&micros.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}
