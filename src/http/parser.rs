//! Incremental HTTP/1.x request parser.
//!
//! Bytes are pushed in with [`RequestParser::commit`] as they arrive from the
//! socket. The parser walks through its [`Phase`]s and reports, exactly once,
//! when it has reached a terminal phase: either a completed request or one of
//! the failure phases the connection turns into an error response.

use crate::http::request::{split_target, Method, Request, Version};

/// Upper bound for the request line plus all header lines.
pub const HEADER_MAX_LENGTH: usize = 8192;

/// Upper bound for one chunk-size line including extensions.
pub const CHUNK_HEADER_MAX_LENGTH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Header,
    BodyRaw,
    ChunkedHeader,
    ChunkedBody,
    ChunkedCr,
    ChunkedLf,

    HeaderExceed,
    BodyExceed,
    Malformed,
    Completed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::HeaderExceed | Phase::BodyExceed | Phase::Malformed | Phase::Completed
        )
    }
}

/// Request line and headers, before the body is known.
struct Head {
    method: Method,
    target: String,
    path: String,
    query: String,
    version: Version,
    headers: Vec<(String, String)>,
}

pub struct RequestParser {
    phase: Phase,
    max_body_size: usize,
    header: Vec<u8>,
    chunk_header: Vec<u8>,
    head: Option<Head>,
    body: Vec<u8>,
    body_remaining: usize,
    last_chunk: bool,
}

impl RequestParser {
    /// Creates a parser that rejects bodies larger than `max_body_size`.
    pub fn new(max_body_size: usize) -> Self {
        Self {
            phase: Phase::Header,
            max_body_size,
            header: Vec::with_capacity(1024),
            chunk_header: Vec::new(),
            head: None,
            body: Vec::new(),
            body_remaining: 0,
            last_chunk: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Feeds `data` to the parser.
    ///
    /// Returns true on the call that moves the parser into a terminal phase;
    /// every call after that is a no-op returning false. Bytes following a
    /// completed request are ignored.
    pub fn commit(&mut self, mut data: &[u8]) -> bool {
        if self.phase.is_terminal() {
            return false;
        }

        loop {
            self.phase = match self.phase {
                Phase::Header => self.handle_header(&mut data),
                Phase::BodyRaw => self.handle_body_raw(&mut data),
                Phase::ChunkedHeader => self.handle_chunked_header(&mut data),
                Phase::ChunkedBody => self.handle_chunked_body(&mut data),
                Phase::ChunkedCr => expect_byte(&mut data, b'\r', Phase::ChunkedCr, Phase::ChunkedLf),
                Phase::ChunkedLf => {
                    let next = if self.last_chunk {
                        Phase::Completed
                    } else {
                        Phase::ChunkedHeader
                    };
                    expect_byte(&mut data, b'\n', Phase::ChunkedLf, next)
                }
                terminal => terminal,
            };

            if self.phase.is_terminal() {
                return true;
            }
            if data.is_empty() {
                return false;
            }
        }
    }

    /// Takes the completed request out of the parser.
    ///
    /// Returns `None` unless the phase is [`Phase::Completed`] and the request
    /// has not been taken yet.
    pub fn take_request(&mut self) -> Option<Request> {
        if self.phase != Phase::Completed {
            return None;
        }
        let head = self.head.take()?;
        Some(Request {
            method: head.method,
            target: head.target,
            path: head.path,
            query: head.query,
            version: head.version,
            headers: head.headers,
            body: std::mem::take(&mut self.body),
        })
    }

    fn handle_header(&mut self, data: &mut &[u8]) -> Phase {
        let space = HEADER_MAX_LENGTH - self.header.len();
        let copy = data.len().min(space);
        let fresh = self.header.len();
        self.header.extend_from_slice(&data[..copy]);

        let search_from = fresh.saturating_sub(3);
        let Some(position) = find(&self.header[search_from..], b"\r\n\r\n") else {
            *data = &data[copy..];
            if self.header.len() == HEADER_MAX_LENGTH {
                return Phase::HeaderExceed;
            }
            return Phase::Header;
        };
        let end = search_from + position;

        // Give back whatever was copied past the terminator.
        let used = end + 4 - fresh;
        *data = &data[used..];

        let head = match parse_head(&self.header[..end]) {
            Some(head) => head,
            None => return Phase::Malformed,
        };
        self.header = Vec::new();

        let content_length = header_value(&head.headers, "Content-Length").map(str::to_owned);
        let transfer_encoding = header_value(&head.headers, "Transfer-Encoding").map(str::to_owned);
        self.head = Some(head);

        if let Some(encoding) = transfer_encoding {
            if !encoding.trim().eq_ignore_ascii_case("chunked") || content_length.is_some() {
                return Phase::Malformed;
            }
            return Phase::ChunkedHeader;
        }

        if let Some(length) = content_length {
            let Some(length) = parse_size(length.trim().as_bytes()) else {
                return Phase::Malformed;
            };
            if length > self.max_body_size {
                return Phase::BodyExceed;
            }
            if length == 0 {
                return Phase::Completed;
            }
            self.body_remaining = length;
            self.body.reserve(length);
            return Phase::BodyRaw;
        }

        Phase::Completed
    }

    fn handle_body_raw(&mut self, data: &mut &[u8]) -> Phase {
        if !self.copy_body(data) {
            return Phase::BodyExceed;
        }
        if self.body_remaining == 0 {
            return Phase::Completed;
        }
        Phase::BodyRaw
    }

    fn handle_chunked_header(&mut self, data: &mut &[u8]) -> Phase {
        let space = CHUNK_HEADER_MAX_LENGTH - self.chunk_header.len();
        let copy = data.len().min(space);
        let fresh = self.chunk_header.len();
        self.chunk_header.extend_from_slice(&data[..copy]);

        let search_from = fresh.saturating_sub(1);
        let Some(position) = find(&self.chunk_header[search_from..], b"\r\n") else {
            *data = &data[copy..];
            if self.chunk_header.len() == CHUNK_HEADER_MAX_LENGTH {
                return Phase::Malformed;
            }
            return Phase::ChunkedHeader;
        };
        let end = search_from + position;
        *data = &data[end + 2 - fresh..];

        let line = &self.chunk_header[..end];
        let size = match line.iter().position(|&b| b == b';') {
            Some(semicolon) => &line[..semicolon],
            None => line,
        };
        let Some(size) = parse_size_hex(trim_ascii(size)) else {
            return Phase::Malformed;
        };
        self.chunk_header.clear();

        if size == 0 {
            self.last_chunk = true;
            return Phase::ChunkedCr;
        }
        if size > self.max_body_size.saturating_sub(self.body.len()) {
            return Phase::BodyExceed;
        }
        self.body_remaining = size;
        Phase::ChunkedBody
    }

    fn handle_chunked_body(&mut self, data: &mut &[u8]) -> Phase {
        if !self.copy_body(data) {
            return Phase::BodyExceed;
        }
        if self.body_remaining == 0 {
            return Phase::ChunkedCr;
        }
        Phase::ChunkedBody
    }

    /// Moves up to `body_remaining` bytes into the body, returns false when
    /// the body would grow past its cap.
    fn copy_body(&mut self, data: &mut &[u8]) -> bool {
        let copy = data.len().min(self.body_remaining);
        match self.body.len().checked_add(copy) {
            Some(total) if total <= self.max_body_size => {}
            _ => return false,
        }
        self.body.extend_from_slice(&data[..copy]);
        *data = &data[copy..];
        self.body_remaining -= copy;
        true
    }
}

fn expect_byte(data: &mut &[u8], expected: u8, waiting: Phase, next: Phase) -> Phase {
    match data.split_first() {
        None => waiting,
        Some((&byte, rest)) if byte == expected => {
            *data = rest;
            next
        }
        Some(_) => Phase::Malformed,
    }
}

fn parse_head(bytes: &[u8]) -> Option<Head> {
    let text = std::str::from_utf8(bytes).ok()?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next()?;
    let mut parts = request_line.splitn(3, ' ');
    let method = Method::from_bytes(parts.next()?.as_bytes())?;
    let target = parts.next()?;
    let version = match parts.next()? {
        "HTTP/1.1" => Version::Http11,
        "HTTP/1.0" => Version::Http10,
        _ => return None,
    };
    if target.is_empty() || target.bytes().any(|b| b.is_ascii_control()) {
        return None;
    }
    let (path, query) = split_target(target)?;

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':')?;
        if name.is_empty() || name.contains(|c: char| c.is_ascii_whitespace() || c.is_ascii_control()) {
            return None;
        }
        // Bare CR or LF would survive the CRLF split; tabs are legal in values.
        if value.bytes().any(|b| b.is_ascii_control() && b != b'\t') {
            return None;
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Some(Head {
        method,
        target: target.to_string(),
        path,
        query,
        version,
        headers,
    })
}

fn header_value<'a>(headers: &'a [(String, String)], key: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.as_str())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Parses a non-empty run of decimal digits, rejecting overflow.
pub fn parse_size(digits: &[u8]) -> Option<usize> {
    parse_radix(digits, 10)
}

/// Parses a non-empty run of hexadecimal digits, rejecting overflow.
pub fn parse_size_hex(digits: &[u8]) -> Option<usize> {
    parse_radix(digits, 16)
}

fn parse_radix(digits: &[u8], radix: u32) -> Option<usize> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0usize, |acc, &b| {
        let digit = (b as char).to_digit(radix)? as usize;
        acc.checked_mul(radix as usize)?.checked_add(digit)
    })
}
