//! # HTTP Reconstructor
//!
//! Turns the in-order half-streams handed out by the
//! [`ConnectionTracker`](crate::network::connection_tracker::ConnectionTracker)
//! into [`ExchangeRecord`]s.
//!
//! ```text
//! TcpSegment ─▶ ConnectionTracker ─▶ HttpConnection (per flow)
//!                                     ├ StreamParser forward ─┐
//!                                     ├ StreamParser reverse ─┼─▶ Pairing (FIFO) ─▶ records
//!                                     └ non-HTTP flag         ┘
//! ```
//!
//! Either half-stream may carry requests: a message is a request or a
//! response by its start line, not by port. Responses are paired with the
//! oldest outstanding request of the flow.

use std::collections::VecDeque;
use std::mem;
use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use uuid::Uuid;

use super::parser::{
    parse_head, request_framing, response_framing, BodyDecoder, HeadParse, MessageHead,
    ParseError, StartLine,
};
use super::types::{Direction, ExchangeRecord};
use crate::network::connection_tracker::{
    ConnectionTracker, Observation, ResetReason, TrackerSettings,
};
use crate::network::types::{FlowKey, PacketTime, Side, TcpSegment};

/// Flow metadata every record of one delivery shares.
struct FlowContext<'a> {
    key: &'a FlowKey,
    node: &'a str,
    wall: DateTime<Utc>,
}

#[derive(Clone)]
struct PendingRequest {
    correlation_id: String,
    method: String,
    path: String,
    host: Option<String>,
    full_url: Option<String>,
}

/// Request queue and sequence counters of one connection.
struct Pairing {
    connection_id: String,
    next_request: u64,
    next_unpaired: u64,
    next_interim: u64,
    outstanding: VecDeque<PendingRequest>,
    close_requested: bool,
}

impl Pairing {
    fn front_method(&self) -> Option<&str> {
        self.outstanding.front().map(|r| r.method.as_str())
    }

    fn request_record(
        &mut self,
        ctx: &FlowContext,
        side: Side,
        head: MessageHead,
        body_bytes: usize,
    ) -> Option<ExchangeRecord> {
        let (client, server) = ctx.key.endpoints(side);
        let wants_close = head.wants_close();
        let StartLine::Request {
            method,
            target,
            version,
        } = head.start
        else {
            return None;
        };

        let (path, authority) = split_target(&target);
        let host = head
            .headers
            .get("host")
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .or(authority);
        let full_url = path
            .starts_with('/')
            .then(|| format!("http://{}{}", url_host(host.as_deref(), server), path));

        self.next_request += 1;
        let correlation_id = format!("{}-{}", self.connection_id, self.next_request);
        if wants_close {
            self.close_requested = true;
        }

        self.outstanding.push_back(PendingRequest {
            correlation_id: correlation_id.clone(),
            method: method.clone(),
            path: path.clone(),
            host: host.clone(),
            full_url: full_url.clone(),
        });

        Some(ExchangeRecord {
            id: Uuid::new_v4(),
            correlation_id,
            timestamp: ctx.wall,
            direction: Direction::Request,
            node: ctx.node.to_string(),
            interface: ctx.key.interface.clone(),
            client_addr: client,
            server_addr: server,
            service: None,
            host,
            method: Some(method),
            path: Some(path),
            full_url,
            version,
            status_code: None,
            status_text: None,
            headers: head.headers,
            body_bytes,
        })
    }

    fn response_record(
        &mut self,
        ctx: &FlowContext,
        side: Side,
        head: MessageHead,
        body_bytes: usize,
    ) -> Option<ExchangeRecord> {
        let (server, client) = ctx.key.endpoints(side);
        let wants_close = head.wants_close();
        let StartLine::Response {
            version,
            status,
            reason,
        } = head.start
        else {
            return None;
        };
        if wants_close {
            self.close_requested = true;
        }

        // Interim responses leave the request outstanding and get their own
        // correlation id, the final response keeps the request's.
        let interim = status < 200;
        let request = if interim {
            self.outstanding.front().cloned()
        } else {
            self.outstanding.pop_front()
        };

        let (correlation_id, method, path, host, full_url) = match request {
            Some(r) => {
                let correlation_id = if interim {
                    self.next_interim += 1;
                    format!("{}-i{}", r.correlation_id, self.next_interim)
                } else {
                    r.correlation_id
                };
                (correlation_id, Some(r.method), Some(r.path), r.host, r.full_url)
            }
            None => {
                self.next_unpaired += 1;
                debug!("{}: response without outstanding request", ctx.key);
                (
                    format!("{}-u{}", self.connection_id, self.next_unpaired),
                    None,
                    None,
                    None,
                    None,
                )
            }
        };

        Some(ExchangeRecord {
            id: Uuid::new_v4(),
            correlation_id,
            timestamp: ctx.wall,
            direction: Direction::Response,
            node: ctx.node.to_string(),
            interface: ctx.key.interface.clone(),
            client_addr: client,
            server_addr: server,
            service: None,
            host,
            method,
            path,
            full_url,
            version,
            status_code: Some(status),
            status_text: Some(reason),
            headers: head.headers,
            body_bytes,
        })
    }
}

/// Splits an absolute-form target into path and authority.
fn split_target(target: &str) -> (String, Option<String>) {
    let lower = target.to_ascii_lowercase();
    let rest = if lower.starts_with("http://") {
        &target[7..]
    } else if lower.starts_with("https://") {
        &target[8..]
    } else {
        return (target.to_string(), None);
    };
    match rest.find(['/', '?']) {
        Some(i) if rest[i..].starts_with('/') => (rest[i..].to_string(), Some(rest[..i].to_string())),
        Some(i) => (format!("/{}", &rest[i..]), Some(rest[..i].to_string())),
        None => ("/".to_string(), Some(rest.to_string())),
    }
}

fn url_host(host: Option<&str>, server: SocketAddr) -> String {
    match host {
        Some(h) => h.to_string(),
        None if server.port() == 80 => match server {
            SocketAddr::V4(a) => a.ip().to_string(),
            SocketAddr::V6(a) => format!("[{}]", a.ip()),
        },
        None => server.to_string(),
    }
}

#[derive(Default)]
enum Phase {
    #[default]
    Head,
    Body {
        head: MessageHead,
        decoder: BodyDecoder,
    },
}

/// Parse state of one half-stream.
#[derive(Default)]
struct StreamParser {
    buffer: Vec<u8>,
    phase: Phase,
}

impl StreamParser {
    fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Head) && self.buffer.is_empty()
    }

    /// Parses every complete message in the buffer.
    fn drain(
        &mut self,
        pairing: &mut Pairing,
        ctx: &FlowContext,
        side: Side,
        max_buffer: usize,
        out: &mut Vec<ExchangeRecord>,
    ) -> Result<Upgrade, ParseError> {
        loop {
            match mem::take(&mut self.phase) {
                Phase::Head => {
                    let skip = self
                        .buffer
                        .iter()
                        .take_while(|&&b| b == b'\r' || b == b'\n')
                        .count();
                    self.buffer.drain(..skip);
                    if self.buffer.is_empty() {
                        return Ok(Upgrade::No);
                    }
                    let (head, consumed) = match parse_head(&self.buffer)? {
                        HeadParse::Complete { head, consumed } => (head, consumed),
                        HeadParse::Partial => {
                            if self.buffer.len() > max_buffer {
                                return Err(ParseError::BufferOverflow(self.buffer.len()));
                            }
                            return Ok(Upgrade::No);
                        }
                    };
                    self.buffer.drain(..consumed);

                    let framing = match &head.start {
                        StartLine::Request { .. } => request_framing(&head.headers)?,
                        StartLine::Response { status, .. } => {
                            response_framing(*status, pairing.front_method(), &head.headers)?
                        }
                    };
                    self.phase = Phase::Body {
                        head,
                        decoder: BodyDecoder::new(framing),
                    };
                }
                Phase::Body { head, mut decoder } => {
                    let used = decoder.advance(&self.buffer)?;
                    self.buffer.drain(..used);
                    if !decoder.is_done() {
                        self.phase = Phase::Body { head, decoder };
                        return Ok(Upgrade::No);
                    }
                    if let Some(upgrade) = emit(pairing, ctx, side, head, decoder.decoded(), out) {
                        return Ok(upgrade);
                    }
                }
            }
        }
    }

    /// The half-stream ended: a close-delimited body completes, anything
    /// else still in flight is discarded.
    fn finish(
        &mut self,
        pairing: &mut Pairing,
        ctx: &FlowContext,
        side: Side,
        out: &mut Vec<ExchangeRecord>,
    ) {
        match mem::take(&mut self.phase) {
            Phase::Body { head, decoder } if decoder.ends_at_close() => {
                emit(pairing, ctx, side, head, decoder.decoded(), out);
            }
            Phase::Body { .. } => debug!("{}: stream closed inside a message body", ctx.key),
            Phase::Head if !self.buffer.is_empty() => {
                debug!("{}: stream closed inside a message head", ctx.key)
            }
            Phase::Head => {}
        }
        self.buffer.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upgrade {
    No,
    /// The connection stopped speaking HTTP/1.x (101, or a CONNECT tunnel).
    Switched,
}

fn emit(
    pairing: &mut Pairing,
    ctx: &FlowContext,
    side: Side,
    head: MessageHead,
    body_bytes: usize,
    out: &mut Vec<ExchangeRecord>,
) -> Option<Upgrade> {
    match head.start {
        StartLine::Request { .. } => {
            out.extend(pairing.request_record(ctx, side, head, body_bytes));
            None
        }
        StartLine::Response { status, .. } => {
            let tunnel = status == 101
                || (pairing.front_method() == Some("CONNECT") && (200..300).contains(&status));
            out.extend(pairing.response_record(ctx, side, head, body_bytes));
            tunnel.then_some(Upgrade::Switched)
        }
    }
}

/// HTTP state of one connection, stored by the tracker next to its streams.
pub struct HttpConnection {
    streams: [StreamParser; 2],
    pairing: Pairing,
    non_http: bool,
}

impl Default for HttpConnection {
    fn default() -> Self {
        Self {
            streams: Default::default(),
            pairing: Pairing {
                connection_id: Uuid::new_v4().simple().to_string(),
                next_request: 0,
                next_unpaired: 0,
                next_interim: 0,
                outstanding: VecDeque::new(),
                close_requested: false,
            },
            non_http: false,
        }
    }
}

impl HttpConnection {
    pub fn is_non_http(&self) -> bool {
        self.non_http
    }

    /// A `Connection: close` exchange has fully completed.
    pub fn finished(&self) -> bool {
        !self.non_http
            && self.pairing.close_requested
            && self.pairing.outstanding.is_empty()
            && self.streams.iter().all(StreamParser::is_idle)
    }

    fn mark_non_http(&mut self, key: &FlowKey, reason: &str) {
        debug!("{}: no longer followed as HTTP ({})", key, reason);
        self.non_http = true;
        self.streams = Default::default();
        self.pairing.outstanding.clear();
    }

    fn feed(
        &mut self,
        ctx: &FlowContext,
        side: Side,
        data: &[u8],
        fin: bool,
        max_buffer: usize,
    ) -> Result<Vec<ExchangeRecord>, ParseError> {
        let mut out = Vec::new();
        if self.non_http {
            return Ok(out);
        }

        let stream = &mut self.streams[side.index()];
        stream.buffer.extend_from_slice(data);
        match stream.drain(&mut self.pairing, ctx, side, max_buffer, &mut out) {
            Ok(Upgrade::No) => {
                if fin {
                    stream.finish(&mut self.pairing, ctx, side, &mut out);
                }
            }
            Ok(Upgrade::Switched) => self.mark_non_http(ctx.key, "protocol switched"),
            Err(ParseError::BufferOverflow(n)) => return Err(ParseError::BufferOverflow(n)),
            Err(e) => self.mark_non_http(ctx.key, &e.to_string()),
        }
        Ok(out)
    }
}

/// Tracker plus HTTP parsing for one capture worker.
pub struct Reconstructor {
    tracker: ConnectionTracker<HttpConnection>,
    node: String,
}

impl Reconstructor {
    pub fn new(settings: TrackerSettings, node: &str) -> Self {
        Self {
            tracker: ConnectionTracker::new(settings),
            node: node.to_string(),
        }
    }

    pub fn tracked_flows(&self) -> usize {
        self.tracker.len()
    }

    /// Feeds one segment and returns the records it completed, in order.
    pub fn process(&mut self, segment: &TcpSegment, at: PacketTime) -> Vec<ExchangeRecord> {
        let (key, side, data, fin) = match self.tracker.observe(segment, at.offset) {
            Observation::Delivered {
                key,
                side,
                data,
                fin,
            } => (key, side, data, fin),
            Observation::Reset { key, reason } => {
                if reason == ResetReason::Overflow {
                    warn!("{}: dropped, partial exchange discarded", key);
                }
                return Vec::new();
            }
            Observation::Ignored | Observation::Buffered | Observation::Untracked => {
                return Vec::new()
            }
        };

        let max_buffer = self.tracker.settings().max_buffer_bytes;
        let Some(state) = self.tracker.get_mut(&key) else {
            return Vec::new();
        };
        let ctx = FlowContext {
            key: &key,
            node: &self.node,
            wall: at.wall,
        };

        match state.parser.feed(&ctx, side, &data, fin, max_buffer) {
            Ok(records) => {
                if state.closed() || state.parser.finished() {
                    debug!("{}: connection finished", key);
                    self.tracker.remove(&key);
                }
                records
            }
            Err(e) => {
                warn!("{}: {}, dropping flow", key, e);
                self.tracker.remove(&key);
                Vec::new()
            }
        }
    }

    /// Drops idle flows; their partial exchanges produce no records.
    pub fn evict_idle(&mut self, now: Duration) -> usize {
        self.tracker.evict_idle(now).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::types::TcpFlags;

    const CLIENT: &str = "10.244.1.5:51000";
    const SERVER: &str = "10.96.0.12:8080";

    struct Conn {
        reconstructor: Reconstructor,
        client_seq: u32,
        server_seq: u32,
        clock: Duration,
    }

    impl Conn {
        fn new() -> Self {
            Self {
                reconstructor: Reconstructor::new(
                    TrackerSettings {
                        idle_timeout: Duration::from_secs(60),
                        reorder_window: Duration::from_secs(3),
                        max_buffer_bytes: 4096,
                        max_flows: 16,
                    },
                    "node-a",
                ),
                client_seq: 1_000,
                server_seq: 50_000,
                clock: Duration::ZERO,
            }
        }

        fn at(&mut self) -> PacketTime {
            self.clock += Duration::from_millis(1);
            PacketTime {
                offset: self.clock,
                wall: Utc::now(),
            }
        }

        fn client(&mut self, bytes: &[u8]) -> Vec<ExchangeRecord> {
            self.client_flags(bytes, TcpFlags::ACK)
        }

        fn client_flags(&mut self, bytes: &[u8], flags: u8) -> Vec<ExchangeRecord> {
            let seg = TcpSegment {
                flow: FlowKey::tcp("eth0", CLIENT.parse().unwrap(), SERVER.parse().unwrap()),
                sequence: self.client_seq,
                flags: TcpFlags(flags),
                payload: bytes.to_vec(),
            };
            self.client_seq = self.client_seq.wrapping_add(bytes.len() as u32);
            let at = self.at();
            self.reconstructor.process(&seg, at)
        }

        fn server(&mut self, bytes: &[u8]) -> Vec<ExchangeRecord> {
            self.server_flags(bytes, TcpFlags::ACK)
        }

        fn server_flags(&mut self, bytes: &[u8], flags: u8) -> Vec<ExchangeRecord> {
            let seg = TcpSegment {
                flow: FlowKey::tcp("eth0", SERVER.parse().unwrap(), CLIENT.parse().unwrap()),
                sequence: self.server_seq,
                flags: TcpFlags(flags),
                payload: bytes.to_vec(),
            };
            self.server_seq = self.server_seq.wrapping_add(bytes.len() as u32);
            let at = self.at();
            self.reconstructor.process(&seg, at)
        }
    }

    #[test]
    fn one_request_and_one_response_are_paired() {
        let mut conn = Conn::new();
        let requests = conn.client(
            b"POST /api/v1/orders?x=1 HTTP/1.1\r\nHost: orders.shop.svc.cluster.local:8080\r\nContent-Length: 4\r\n\r\nabcd",
        );
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.direction, Direction::Request);
        assert_eq!(request.method.as_deref(), Some("POST"));
        assert_eq!(request.path.as_deref(), Some("/api/v1/orders?x=1"));
        assert_eq!(
            request.full_url.as_deref(),
            Some("http://orders.shop.svc.cluster.local:8080/api/v1/orders?x=1")
        );
        assert_eq!(request.client_addr, CLIENT.parse().unwrap());
        assert_eq!(request.server_addr, SERVER.parse().unwrap());
        assert_eq!(request.node, "node-a");
        assert_eq!(request.body_bytes, 4);

        let responses = conn.server(b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok");
        assert_eq!(responses.len(), 1);
        let response = &responses[0];
        assert_eq!(response.direction, Direction::Response);
        assert_eq!(response.correlation_id, request.correlation_id);
        assert_ne!(response.id, request.id);
        assert_eq!(response.status_code, Some(201));
        assert_eq!(response.status_text.as_deref(), Some("Created"));
        assert_eq!(response.method.as_deref(), Some("POST"));
        assert_eq!(response.client_addr, CLIENT.parse().unwrap());
        assert_eq!(response.server_addr, SERVER.parse().unwrap());
    }

    #[test]
    fn message_split_across_segments() {
        let mut conn = Conn::new();
        assert!(conn.client(b"GET /a HT").is_empty());
        assert!(conn.client(b"TP/1.1\r\nHost: a\r\n").is_empty());
        assert_eq!(conn.client(b"\r\n").len(), 1);
    }

    #[test]
    fn pipelined_requests_pair_in_fifo_order() {
        let mut conn = Conn::new();
        let requests = conn.client(b"GET /first HTTP/1.1\r\nHost: a\r\n\r\nGET /second HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(requests.len(), 2);
        assert_ne!(requests[0].correlation_id, requests[1].correlation_id);

        let responses = conn.server(
            b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\naHTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
        );
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].correlation_id, requests[0].correlation_id);
        assert_eq!(responses[0].path.as_deref(), Some("/first"));
        assert_eq!(responses[1].correlation_id, requests[1].correlation_id);
        assert_eq!(responses[1].status_code, Some(404));
    }

    #[test]
    fn interim_response_keeps_the_request_outstanding() {
        let mut conn = Conn::new();
        let request = conn.client(b"PUT /blob HTTP/1.1\r\nHost: a\r\nExpect: 100-continue\r\nContent-Length: 0\r\n\r\n");
        let responses = conn.server(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n");
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].status_code, Some(100));
        assert_eq!(responses[1].status_code, Some(204));
        assert_eq!(responses[1].correlation_id, request[0].correlation_id);
        assert_eq!(
            responses[0].correlation_id,
            format!("{}-i1", request[0].correlation_id)
        );
        assert_eq!(responses[0].path.as_deref(), Some("/blob"));
    }

    #[test]
    fn continue_exchange_keeps_the_final_response_in_the_capture_log() {
        use crate::data_capture::file_storage::JsonLinesStorage;
        use crate::data_capture::recorder::{ExchangeRecorder, RecordOutcome};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchanges.jsonl");
        let mut recorder =
            ExchangeRecorder::new(Box::new(JsonLinesStorage::open(&path).unwrap()));

        let mut conn = Conn::new();
        let mut records = conn.client(
            b"PUT /blob HTTP/1.1\r\nHost: a\r\nExpect: 100-continue\r\nContent-Length: 0\r\n\r\n",
        );
        records.extend(conn.server(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n",
        ));
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(recorder.record(record), RecordOutcome::Written);
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let statuses: Vec<Option<u64>> = content
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["status_code"].as_u64())
            .collect();
        assert_eq!(statuses, vec![None, Some(100), Some(201)]);
    }

    #[test]
    fn head_response_has_no_body() {
        let mut conn = Conn::new();
        conn.client(b"HEAD /file HTTP/1.1\r\nHost: a\r\n\r\n");
        let responses = conn.server(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].body_bytes, 0);
    }

    #[test]
    fn chunked_response() {
        let mut conn = Conn::new();
        conn.client(b"GET /stream HTTP/1.1\r\nHost: a\r\n\r\n");
        assert!(conn
            .server(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n")
            .is_empty());
        let responses = conn.server(b"0\r\nX-Trailer: 1\r\n\r\n");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].body_bytes, 5);
    }

    #[test]
    fn close_delimited_response_completes_on_fin() {
        let mut conn = Conn::new();
        conn.client(b"GET /old HTTP/1.0\r\n\r\n");
        assert!(conn.server(b"HTTP/1.0 200 OK\r\n\r\nsome body").is_empty());
        let responses = conn.server_flags(b" more", TcpFlags::ACK | TcpFlags::FIN);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].body_bytes, 14);
        assert_eq!(responses[0].full_url.as_deref(), Some("http://10.96.0.12:8080/old"));
    }

    #[test]
    fn unpaired_response_has_no_request_fields() {
        let mut conn = Conn::new();
        let responses = conn.server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(responses.len(), 1);
        assert!(responses[0].method.is_none());
        assert!(responses[0].path.is_none());
        assert!(responses[0].correlation_id.contains("-u"));
    }

    #[test]
    fn non_http_flows_are_ignored_thereafter() {
        let mut conn = Conn::new();
        assert!(conn.client(&[0x16, 0x03, 0x01, 0x02, 0x00]).is_empty());
        assert!(conn.client(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").is_empty());
        assert_eq!(conn.reconstructor.tracked_flows(), 1);
    }

    #[test]
    fn upgraded_connection_stops_parsing() {
        let mut conn = Conn::new();
        conn.client(b"GET /ws HTTP/1.1\r\nHost: a\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n");
        let responses = conn.server(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n\x81\x05hello");
        assert_eq!(responses.len(), 1);
        assert!(conn.client(b"\x81\x85garbage").is_empty());
    }

    #[test]
    fn connection_close_exchange_releases_the_flow() {
        let mut conn = Conn::new();
        conn.client(b"GET / HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n");
        conn.server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(conn.reconstructor.tracked_flows(), 0);
    }

    #[test]
    fn evicting_a_half_received_request_emits_nothing() {
        let mut conn = Conn::new();
        assert!(conn.client(b"POST /upload HTTP/1.1\r\nHost: a\r\nContent-Length: 100\r\n\r\npartial").is_empty());
        assert_eq!(conn.reconstructor.evict_idle(Duration::from_secs(120)), 1);
        assert_eq!(conn.reconstructor.tracked_flows(), 0);
    }

    #[test]
    fn absolute_form_targets_are_split() {
        assert_eq!(
            split_target("http://proxy.local:3128/a/b?c"),
            ("/a/b?c".to_string(), Some("proxy.local:3128".to_string()))
        );
        assert_eq!(
            split_target("http://example.com"),
            ("/".to_string(), Some("example.com".to_string()))
        );
        assert_eq!(split_target("/plain"), ("/plain".to_string(), None));
    }
}
