//! CGI/1.1 support: child process management, sessions, and turning script
//! output into a response.

pub mod process;
pub mod session;

use bytes::Bytes;

use crate::http::response::{Response, StatusCode};

/// Builds a response from raw CGI output.
///
/// The header block ends at the first blank line, whether written as
/// `\r\n\r\n` or as `\n\n` by scripts that skip the carriage returns. A
/// `Status: <code> <reason>` line overrides the default `200 OK`.
/// `Content-Length` and `Connection` are dropped since the server emits its
/// own. Returns `None` when the output
/// has no header block or a header line cannot be parsed.
pub fn parse_output(output: Bytes) -> Option<Response> {
    let (head_end, body_start) = match (find(&output, b"\r\n\r\n"), find(&output, b"\n\n")) {
        (Some(crlf), Some(lf)) if lf < crlf => (lf, lf + 2),
        (Some(crlf), _) => (crlf, crlf + 4),
        (None, Some(lf)) => (lf, lf + 2),
        (None, None) => return None,
    };
    let head = std::str::from_utf8(&output[..head_end]).ok()?;

    let mut status = StatusCode::OK;
    let mut reason = None;
    let mut headers = Vec::new();
    for line in head.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':')?;
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            return None;
        }

        if name.eq_ignore_ascii_case("Status") {
            let (code, phrase) = value.split_once(' ').unwrap_or((value, ""));
            status = StatusCode::from_u16(code.parse().ok()?)?;
            reason = (!phrase.trim().is_empty()).then(|| phrase.trim().to_string());
        } else if name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("Connection") {
            continue;
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let mut response = Response::shared(status, output.slice(body_start..));
    if let Some(reason) = reason {
        response.set_reason(reason);
    }
    for (name, value) in headers {
        response.add_header(name, value);
    }
    Some(response)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
