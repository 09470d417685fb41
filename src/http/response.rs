use std::fmt;
use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::http::writer::{BodySource, ResponseWriter};

/// An HTTP status code.
///
/// Any three-digit code can be represented since CGI scripts may answer with
/// arbitrary statuses; the associated constants cover what the server itself
/// produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const SEE_OTHER: StatusCode = StatusCode(303);
    pub const TEMPORARY_REDIRECT: StatusCode = StatusCode(307);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const GATEWAY_TIMEOUT: StatusCode = StatusCode(504);

    /// Builds a status code from its number, accepting 100..=999.
    pub fn from_u16(code: u16) -> Option<Self> {
        (100..=999).contains(&code).then_some(StatusCode(code))
    }

    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use webserv::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.as_u16(), 200);
    /// assert_eq!(StatusCode::NOT_FOUND.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the standard HTTP reason phrase for this status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use webserv::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::NOT_FOUND.reason_phrase(), "Not Found");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            102 => "Processing",
            103 => "Early Hints",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            203 => "Non-Authoritative Information",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            207 => "Multi-Status",
            208 => "Already Reported",
            226 => "IM Used",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            305 => "Use Proxy",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Range Not Satisfiable",
            417 => "Expectation Failed",
            418 => "I'm a teapot",
            421 => "Misdirected Request",
            422 => "Unprocessable Entity",
            423 => "Locked",
            424 => "Failed Dependency",
            425 => "Too Early",
            426 => "Upgrade Required",
            428 => "Precondition Required",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            451 => "Unavailable For Legal Reasons",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            506 => "Variant Also Negotiates",
            507 => "Insufficient Storage",
            508 => "Loop Detected",
            510 => "Not Extended",
            511 => "Network Authentication Required",
            _ => "Unknown Error",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

/// Where the body of a response comes from.
#[derive(Debug)]
pub enum Body {
    Empty,
    /// Bytes generated for this response only.
    Owned(Vec<u8>),
    /// Bytes that may be shared with their producer, such as CGI output.
    Shared(Bytes),
    /// An open file streamed in chunks; `length` was measured when opened.
    File { file: File, length: u64 },
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Owned(bytes) => bytes.len() as u64,
            Body::Shared(bytes) => bytes.len() as u64,
            Body::File { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outgoing link speed assumed when budgeting how long a transfer may take.
const ASSUMED_BYTES_PER_SECOND: u64 = 8 * 1024;

/// An HTTP response whose headers can still be changed.
///
/// `Content-Length` and `Connection: close` are always emitted by
/// [`Response::finalize`] and must not be added by hand.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    reason: Option<String>,
    headers: Vec<(String, String)>,
    body: Body,
    omit_body: bool,
}

impl Response {
    /// Creates a response with no body.
    pub fn empty(status: StatusCode) -> Self {
        Self::with_body(status, Body::Empty)
    }

    /// Creates a response that owns its body bytes.
    pub fn owned(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self::with_body(status, Body::Owned(body.into()))
    }

    /// Creates a response whose body is a shared, reference-counted buffer.
    pub fn shared(status: StatusCode, body: Bytes) -> Self {
        Self::with_body(status, Body::Shared(body))
    }

    /// Opens `path` and creates a response streaming its contents.
    ///
    /// The length is taken by seeking to the end and back, so it reflects the
    /// file at open time.
    pub fn file(status: StatusCode, path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let length = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Self::with_body(status, Body::File { file, length }))
    }

    fn with_body(status: StatusCode, body: Body) -> Self {
        Self {
            status,
            reason: None,
            headers: Vec::new(),
            body,
            omit_body: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Looks up an added header, ignoring ASCII case.
    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Adds a header, fluent style.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_header(key, value);
        self
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.push((key.into(), value.into()));
    }

    /// Replaces the reason phrase on the status line.
    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    /// Keeps the advertised `Content-Length` but sends no body bytes.
    pub fn omit_body(&mut self) {
        self.omit_body = true;
    }

    /// Serializes the header block and freezes the response into a writer.
    ///
    /// Also returns how long the transfer may take, assuming an 8 KiB/s
    /// client and never less than one second.
    pub fn finalize(self) -> (ResponseWriter, Duration) {
        let length = self.body.len();
        let reason = self.reason.as_deref().unwrap_or(self.status.reason_phrase());

        let mut head = BytesMut::with_capacity(128);
        head.put_slice(format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), reason).as_bytes());
        head.put_slice(format!("Content-Length: {length}\r\n").as_bytes());
        head.put_slice(b"Connection: close\r\n");
        for (key, value) in &self.headers {
            head.put_slice(key.as_bytes());
            head.put_slice(b": ");
            head.put_slice(value.as_bytes());
            head.put_slice(b"\r\n");
        }
        head.put_slice(b"\r\n");

        let source = if self.omit_body {
            BodySource::Memory(Bytes::new())
        } else {
            match self.body {
                Body::Empty => BodySource::Memory(Bytes::new()),
                Body::Owned(bytes) => BodySource::Memory(Bytes::from(bytes)),
                Body::Shared(bytes) => BodySource::Memory(bytes),
                Body::File { file, length } => BodySource::file(file, length),
            }
        };

        let total = head.len() as u64 + if self.omit_body { 0 } else { length };
        let millis = total.saturating_mul(1000) / ASSUMED_BYTES_PER_SECOND;
        let timeout = Duration::from_millis(millis).max(Duration::from_secs(1));

        (ResponseWriter::new(head.freeze(), source), timeout)
    }
}
