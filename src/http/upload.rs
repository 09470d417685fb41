//! `multipart/form-data` uploads.
//!
//! Every part that carries a `filename` in its `Content-Disposition` is
//! written to the upload directory; other fields are ignored.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::HttpError;
use crate::http::request::Request;
use crate::http::response::StatusCode;
use crate::routing::check_path_level;

/// Stores the files of a multipart request under `directory`.
///
/// Returns the number of files written.
pub fn handle_upload(request: &Request, directory: &Path) -> Result<usize, HttpError> {
    let boundary = request
        .header("Content-Type")
        .and_then(extract_boundary)
        .ok_or(HttpError::new(StatusCode::BAD_REQUEST))?;

    let mut body = request.body.as_slice();
    if body.is_empty() {
        return Ok(0);
    }

    let delimiter = format!("--{boundary}");
    body = body
        .strip_prefix(delimiter.as_bytes())
        .and_then(|rest| rest.strip_prefix(b"\r\n"))
        .ok_or(HttpError::new(StatusCode::BAD_REQUEST))?;

    let delimiter = format!("\r\n--{boundary}");
    let mut written = 0;
    while !body.is_empty() {
        let end = find(body, delimiter.as_bytes()).ok_or(HttpError::new(StatusCode::BAD_REQUEST))?;
        if store_part(&body[..end], directory)? {
            written += 1;
        }
        body = &body[end + delimiter.len()..];

        if body.starts_with(b"--") {
            break;
        }
        body = body
            .strip_prefix(b"\r\n")
            .ok_or(HttpError::new(StatusCode::BAD_REQUEST))?;
    }
    Ok(written)
}

fn store_part(part: &[u8], directory: &Path) -> Result<bool, HttpError> {
    let Some(split) = find(part, b"\r\n\r\n") else {
        return Ok(false);
    };
    let Ok(head) = std::str::from_utf8(&part[..split]) else {
        return Ok(false);
    };
    let Some(file_name) = extract_file_name(head) else {
        return Ok(false);
    };
    if file_name.is_empty() || !check_path_level(file_name) {
        return Err(HttpError::new(StatusCode::FORBIDDEN));
    }

    let path = directory.join(file_name.trim_start_matches('/'));
    let content = &part[split + 4..];
    fs::write(&path, content).map_err(|e| match HttpError::from(e) {
        // A missing upload directory is a server problem, not a client one.
        error if error.status == StatusCode::NOT_FOUND => HttpError::new(StatusCode::INTERNAL_SERVER_ERROR),
        error => error,
    })?;
    debug!(path = %path.display(), bytes = content.len(), "stored upload");
    Ok(true)
}

/// Finds the `boundary` parameter of a `multipart/form-data` content type.
pub fn extract_boundary(content_type: &str) -> Option<&str> {
    let mut params = content_type.split(';');
    let kind = params.next()?.trim();
    if !kind.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim_matches('"'))
        .filter(|value| !value.is_empty())
}

fn extract_file_name(head: &str) -> Option<&str> {
    let disposition = head.split("\r\n").find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("Content-Disposition")
            .then_some(value.trim())
    })?;

    let mut params = disposition.split(';');
    if !params.next()?.trim().eq_ignore_ascii_case("form-data") {
        return None;
    }
    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| *key == "filename")
        .map(|(_, value)| value.trim_matches('"'))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
