//! Incremental HTTP/1.x message parsing.
//!
//! [`parse_head`] recognises a start line plus header block once the blank
//! line has arrived; [`BodyDecoder`] then consumes the body according to its
//! [`BodyFraming`] without keeping the bytes, only counting them.

use std::fmt;

use super::types::Headers;

/// Header blocks larger than this are not HTTP we want to follow.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_METHOD_LEN: usize = 20;
const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The bytes cannot be the start of an HTTP/1.x message.
    NotHttp(String),
    /// Started like HTTP but broke the grammar.
    Malformed(String),
    HeadTooLarge,
    /// More unparsed bytes accumulated than the flow may hold.
    BufferOverflow(usize),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::NotHttp(e) => write!(f, "not HTTP: {}", e),
            ParseError::Malformed(e) => write!(f, "malformed HTTP: {}", e),
            ParseError::HeadTooLarge => write!(f, "header block exceeds {} bytes", MAX_HEAD_BYTES),
            ParseError::BufferOverflow(n) => write!(f, "{} unparsed bytes buffered", n),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq)]
pub enum StartLine {
    Request {
        method: String,
        target: String,
        version: String,
    },
    Response {
        version: String,
        status: u16,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageHead {
    pub start: StartLine,
    pub headers: Headers,
}

impl MessageHead {
    pub fn version(&self) -> &str {
        match &self.start {
            StartLine::Request { version, .. } | StartLine::Response { version, .. } => version,
        }
    }

    /// Whether the sender asked for the connection to close after this message.
    pub fn wants_close(&self) -> bool {
        self.headers.has_token("connection", "close")
            || (self.version() == "HTTP/1.0" && !self.headers.has_token("connection", "keep-alive"))
    }
}

#[derive(Debug)]
pub enum HeadParse {
    Complete { head: MessageHead, consumed: usize },
    Partial,
}

/// Parses a start line and header block from the front of `buf`.
pub fn parse_head(buf: &[u8]) -> Result<HeadParse, ParseError> {
    check_prefix(buf)?;

    let Some(end) = find_head_end(buf) else {
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ParseError::HeadTooLarge);
        }
        return Ok(HeadParse::Partial);
    };
    if end > MAX_HEAD_BYTES {
        return Err(ParseError::HeadTooLarge);
    }

    let mut lines = buf[..end]
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line));

    let start_line = lines
        .next()
        .ok_or_else(|| ParseError::Malformed("empty head".to_string()))?;
    let start = parse_start_line(start_line)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if line[0] == b' ' || line[0] == b'\t' {
            let folded = String::from_utf8_lossy(line);
            if !headers.continue_last(folded.trim()) {
                return Err(ParseError::Malformed("continuation before first header".to_string()));
            }
            continue;
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| ParseError::Malformed("header line without colon".to_string()))?;
        let name = &line[..colon];
        if name.is_empty() || !name.iter().all(|&b| is_token_char(b)) {
            return Err(ParseError::Malformed(format!(
                "invalid header name {:?}",
                String::from_utf8_lossy(name)
            )));
        }
        let value = String::from_utf8_lossy(&line[colon + 1..]);
        headers.push(
            String::from_utf8_lossy(name).into_owned(),
            value.trim_matches(|c| c == ' ' || c == '\t').to_string(),
        );
    }

    Ok(HeadParse::Complete {
        head: MessageHead { start, headers },
        consumed: end,
    })
}

/// Rejects streams that cannot start with a request method or `HTTP/`
/// without waiting for a whole header block.
fn check_prefix(buf: &[u8]) -> Result<(), ParseError> {
    const STATUS_PREFIX: &[u8] = b"HTTP/";
    for (i, &b) in buf.iter().enumerate() {
        if b == b' ' {
            return if i == 0 {
                Err(ParseError::NotHttp("leading space".to_string()))
            } else {
                Ok(())
            };
        }
        if is_method_char(b) {
            if i >= MAX_METHOD_LEN {
                return Err(ParseError::NotHttp("method too long".to_string()));
            }
            continue;
        }
        let n = buf.len().min(STATUS_PREFIX.len());
        return if buf[..n] == STATUS_PREFIX[..n] {
            Ok(())
        } else {
            Err(ParseError::NotHttp(format!("unexpected byte {:#04x}", b)))
        };
    }
    Ok(())
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    let mut i = 0;
    while let Some(pos) = buf[i..].iter().position(|&b| b == b'\n') {
        let nl = i + pos;
        match buf.get(nl + 1) {
            Some(b'\n') => return Some(nl + 2),
            Some(b'\r') if buf.get(nl + 2) == Some(&b'\n') => return Some(nl + 3),
            _ => i = nl + 1,
        }
    }
    None
}

fn parse_start_line(line: &[u8]) -> Result<StartLine, ParseError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ParseError::Malformed("start line is not UTF-8".to_string()))?;

    if text.starts_with("HTTP/") {
        let mut parts = text.splitn(3, ' ');
        let version = parse_version(parts.next().unwrap_or_default())?;
        let code = parts.next().unwrap_or_default();
        if code.len() != 3 {
            return Err(ParseError::Malformed(format!("status code {:?}", code)));
        }
        let status = code
            .parse::<u16>()
            .map_err(|_| ParseError::Malformed(format!("status code {:?}", code)))?;
        if !(100..=599).contains(&status) {
            return Err(ParseError::Malformed(format!("status code {}", status)));
        }
        return Ok(StartLine::Response {
            version,
            status,
            reason: parts.next().unwrap_or_default().trim().to_string(),
        });
    }

    let parts: Vec<&str> = text.split(' ').collect();
    if parts.len() != 3 {
        return Err(ParseError::Malformed(format!("request line {:?}", text)));
    }
    let (method, target, version) = (parts[0], parts[1], parts[2]);
    if method.is_empty() || !method.bytes().all(is_method_char) {
        return Err(ParseError::NotHttp(format!("method {:?}", method)));
    }
    if target.is_empty() {
        return Err(ParseError::Malformed("empty request target".to_string()));
    }
    Ok(StartLine::Request {
        method: method.to_string(),
        target: target.to_string(),
        version: parse_version(version)?,
    })
}

fn parse_version(version: &str) -> Result<String, ParseError> {
    match version {
        "HTTP/1.0" | "HTTP/1.1" => Ok(version.to_string()),
        v if v.starts_with("HTTP/") => Err(ParseError::NotHttp(format!("version {}", v))),
        v => Err(ParseError::Malformed(format!("version {:?}", v))),
    }
}

fn is_method_char(b: u8) -> bool {
    b.is_ascii_uppercase() || b == b'-' || b == b'_'
}

fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Length(u64),
    Chunked,
    /// Delimited by the sender closing the connection.
    UntilClose,
}

fn content_length(headers: &Headers) -> Result<Option<u64>, ParseError> {
    let mut length = None;
    for value in headers.get_all("content-length") {
        for part in value.split(',') {
            let n = part
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::Malformed(format!("content-length {:?}", value)))?;
            if length.is_some_and(|l| l != n) {
                return Err(ParseError::Malformed("conflicting content-length".to_string()));
            }
            length = Some(n);
        }
    }
    Ok(length)
}

/// `None` without Transfer-Encoding, otherwise whether chunked is the final coding.
fn chunked(headers: &Headers) -> Option<bool> {
    let last = headers
        .get_all("transfer-encoding")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .last()?;
    Some(last.eq_ignore_ascii_case("chunked"))
}

pub fn request_framing(headers: &Headers) -> Result<BodyFraming, ParseError> {
    match chunked(headers) {
        Some(true) => Ok(BodyFraming::Chunked),
        Some(false) => Err(ParseError::Malformed(
            "request transfer-encoding without chunked".to_string(),
        )),
        None => Ok(match content_length(headers)? {
            Some(0) | None => BodyFraming::None,
            Some(n) => BodyFraming::Length(n),
        }),
    }
}

/// Body framing of a response to a request made with `request_method`.
pub fn response_framing(
    status: u16,
    request_method: Option<&str>,
    headers: &Headers,
) -> Result<BodyFraming, ParseError> {
    if request_method == Some("HEAD") || (100..200).contains(&status) || status == 204 || status == 304 {
        return Ok(BodyFraming::None);
    }
    if request_method == Some("CONNECT") && (200..300).contains(&status) {
        return Ok(BodyFraming::None);
    }
    match chunked(headers) {
        Some(true) => Ok(BodyFraming::Chunked),
        Some(false) => Ok(BodyFraming::UntilClose),
        None => Ok(match content_length(headers)? {
            Some(0) => BodyFraming::None,
            Some(n) => BodyFraming::Length(n),
            None => BodyFraming::UntilClose,
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum DecodeState {
    Length { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkDataEnd,
    Trailers,
    UntilClose,
    Done,
}

/// Consumes one message body, counting decoded bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDecoder {
    state: DecodeState,
    decoded: usize,
}

impl BodyDecoder {
    pub fn new(framing: BodyFraming) -> Self {
        let state = match framing {
            BodyFraming::None | BodyFraming::Length(0) => DecodeState::Done,
            BodyFraming::Length(n) => DecodeState::Length { remaining: n },
            BodyFraming::Chunked => DecodeState::ChunkSize,
            BodyFraming::UntilClose => DecodeState::UntilClose,
        };
        Self { state, decoded: 0 }
    }

    pub fn decoded(&self) -> usize {
        self.decoded
    }

    pub fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }

    /// A close completes the body only when the body is close-delimited.
    pub fn ends_at_close(&self) -> bool {
        matches!(self.state, DecodeState::UntilClose | DecodeState::Done)
    }

    /// Consumes as much of `buf` as belongs to the body and returns the
    /// number of bytes used. Check [`BodyDecoder::is_done`] afterwards.
    pub fn advance(&mut self, buf: &[u8]) -> Result<usize, ParseError> {
        let mut used = 0;
        loop {
            let rest = &buf[used..];
            match self.state {
                DecodeState::Done => return Ok(used),
                DecodeState::UntilClose => {
                    self.decoded += rest.len();
                    return Ok(buf.len());
                }
                DecodeState::Length { remaining } | DecodeState::ChunkData { remaining } => {
                    let take = remaining.min(rest.len() as u64);
                    self.decoded += take as usize;
                    used += take as usize;
                    let remaining = remaining - take;
                    if remaining > 0 {
                        self.state = match self.state {
                            DecodeState::Length { .. } => DecodeState::Length { remaining },
                            _ => DecodeState::ChunkData { remaining },
                        };
                        return Ok(used);
                    }
                    self.state = match self.state {
                        DecodeState::Length { .. } => DecodeState::Done,
                        _ => DecodeState::ChunkDataEnd,
                    };
                }
                DecodeState::ChunkSize => {
                    let Some(line_len) = rest.iter().position(|&b| b == b'\n') else {
                        if rest.len() > MAX_CHUNK_LINE {
                            return Err(ParseError::Malformed("chunk size line too long".to_string()));
                        }
                        return Ok(used);
                    };
                    let line = String::from_utf8_lossy(&rest[..line_len]);
                    let size_text = line.split(';').next().unwrap_or_default().trim();
                    let size = u64::from_str_radix(size_text, 16)
                        .map_err(|_| ParseError::Malformed(format!("chunk size {:?}", size_text)))?;
                    used += line_len + 1;
                    self.state = if size == 0 {
                        DecodeState::Trailers
                    } else {
                        DecodeState::ChunkData { remaining: size }
                    };
                }
                DecodeState::ChunkDataEnd => match rest {
                    [b'\r', b'\n', ..] => {
                        used += 2;
                        self.state = DecodeState::ChunkSize;
                    }
                    [b'\n', ..] => {
                        used += 1;
                        self.state = DecodeState::ChunkSize;
                    }
                    [] | [b'\r'] => return Ok(used),
                    _ => return Err(ParseError::Malformed("missing CRLF after chunk".to_string())),
                },
                DecodeState::Trailers => {
                    let Some(line_len) = rest.iter().position(|&b| b == b'\n') else {
                        if rest.len() > MAX_HEAD_BYTES {
                            return Err(ParseError::HeadTooLarge);
                        }
                        return Ok(used);
                    };
                    let line = &rest[..line_len];
                    used += line_len + 1;
                    if line.is_empty() || line == b"\r" {
                        self.state = DecodeState::Done;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(buf: &[u8]) -> (MessageHead, usize) {
        match parse_head(buf).unwrap() {
            HeadParse::Complete { head, consumed } => (head, consumed),
            HeadParse::Partial => panic!("expected a complete head"),
        }
    }

    #[test]
    fn parses_request_head() {
        let raw = b"GET /api/users?page=2 HTTP/1.1\r\nHost: orders\r\nX-Folded: a\r\n b\r\n\r\nbody";
        let (head, consumed) = complete(raw);
        assert_eq!(consumed, raw.len() - 4);
        assert_eq!(
            head.start,
            StartLine::Request {
                method: "GET".to_string(),
                target: "/api/users?page=2".to_string(),
                version: "HTTP/1.1".to_string(),
            }
        );
        assert_eq!(head.headers.get("host"), Some("orders"));
        assert_eq!(head.headers.get("x-folded"), Some("a b"));
    }

    #[test]
    fn parses_status_line_with_and_without_reason() {
        let (head, _) = complete(b"HTTP/1.1 404 Not Found\r\n\r\n");
        assert!(matches!(head.start, StartLine::Response { status: 404, ref reason, .. } if reason == "Not Found"));
        let (head, _) = complete(b"HTTP/1.0 200\n\n");
        assert!(matches!(head.start, StartLine::Response { status: 200, ref reason, .. } if reason.is_empty()));
    }

    #[test]
    fn partial_heads_wait_for_more() {
        assert!(matches!(parse_head(b"GE").unwrap(), HeadParse::Partial));
        assert!(matches!(parse_head(b"HTT").unwrap(), HeadParse::Partial));
        assert!(matches!(
            parse_head(b"POST /x HTTP/1.1\r\nHost: a\r\n").unwrap(),
            HeadParse::Partial
        ));
    }

    #[test]
    fn binary_and_tls_streams_are_not_http() {
        assert!(matches!(parse_head(&[0x16, 0x03, 0x01, 0x00]), Err(ParseError::NotHttp(_))));
        assert!(matches!(parse_head(b"hello world"), Err(ParseError::NotHttp(_))));
        assert!(matches!(
            parse_head(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"),
            Err(ParseError::NotHttp(_))
        ));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(matches!(
            parse_head(b"GET / HTTP/1.1\r\nno colon here\r\n\r\n"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            parse_head(b"GET / HTTP/1.1\r\nBad Name: x\r\n\r\n"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            parse_head(b"HTTP/1.1 2000 OK\r\n\r\n"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut raw = b"GET / HTTP/1.1\r\nX: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEAD_BYTES + 1));
        assert_eq!(parse_head(&raw).unwrap_err(), ParseError::HeadTooLarge);
    }

    #[test]
    fn framing_rules() {
        let mut headers = Headers::new();
        assert_eq!(request_framing(&headers).unwrap(), BodyFraming::None);
        assert_eq!(response_framing(200, Some("GET"), &headers).unwrap(), BodyFraming::UntilClose);
        assert_eq!(response_framing(204, Some("GET"), &headers).unwrap(), BodyFraming::None);
        assert_eq!(response_framing(304, Some("GET"), &headers).unwrap(), BodyFraming::None);
        assert_eq!(response_framing(101, Some("GET"), &headers).unwrap(), BodyFraming::None);

        headers.push("Content-Length", "12");
        assert_eq!(request_framing(&headers).unwrap(), BodyFraming::Length(12));
        assert_eq!(response_framing(200, Some("HEAD"), &headers).unwrap(), BodyFraming::None);

        headers.push("Transfer-Encoding", "gzip, chunked");
        assert_eq!(request_framing(&headers).unwrap(), BodyFraming::Chunked);

        let mut conflicting = Headers::new();
        conflicting.push("Content-Length", "1");
        conflicting.push("Content-Length", "2");
        assert!(request_framing(&conflicting).is_err());
    }

    #[test]
    fn length_body_across_reads() {
        let mut decoder = BodyDecoder::new(BodyFraming::Length(5));
        assert_eq!(decoder.advance(b"abc").unwrap(), 3);
        assert!(!decoder.is_done());
        assert_eq!(decoder.advance(b"deNEXT").unwrap(), 2);
        assert!(decoder.is_done());
        assert_eq!(decoder.decoded(), 5);
    }

    #[test]
    fn chunked_body_with_extensions_and_trailers() {
        let body = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nExpires: never\r\n\r\nGET";
        let mut decoder = BodyDecoder::new(BodyFraming::Chunked);
        let used = decoder.advance(body).unwrap();
        assert!(decoder.is_done());
        assert_eq!(&body[used..], b"GET");
        assert_eq!(decoder.decoded(), 9);
    }

    #[test]
    fn chunked_body_split_mid_size_line() {
        let mut decoder = BodyDecoder::new(BodyFraming::Chunked);
        assert_eq!(decoder.advance(b"1").unwrap(), 0);
        // unconsumed bytes stay with the caller and are offered again
        let used = decoder.advance(b"10\r\n0123456789abcdef\r").unwrap();
        assert_eq!(used, 20);
        assert!(!decoder.is_done());
        assert_eq!(decoder.advance(b"\r\n0\r\n\r\n").unwrap(), 7);
        assert!(decoder.is_done());
        assert_eq!(decoder.decoded(), 16);
    }

    #[test]
    fn bad_chunk_size_is_malformed() {
        let mut decoder = BodyDecoder::new(BodyFraming::Chunked);
        assert!(matches!(decoder.advance(b"zz\r\n"), Err(ParseError::Malformed(_))));
    }
}
