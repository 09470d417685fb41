//! Route resolution: request path to a configured route and filesystem node.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{LocalRoute, RedirectRoute, ServerConfig};

/// What a candidate path turned out to be on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Regular,
    Directory,
    NotFound,
    NoAccess,
    /// Sockets, devices, fifos.
    Unsupported,
}

/// The outcome of resolving one request path.
#[derive(Debug)]
pub enum RoutingInfo<'a> {
    NotFound,
    NoAccess,
    Local {
        route: &'a LocalRoute,
        node_path: PathBuf,
        node_type: NodeType,
        /// Set for regular files whose extension has a CGI interpreter.
        interpreter: Option<&'a Path>,
    },
    Redirect(&'a RedirectRoute),
}

/// Length of `route_path` if it covers `path` at a segment boundary.
///
/// `/api` covers `/api`, `/api/` and `/api/users` but not `/apix`; `/`
/// covers everything.
pub fn match_length(route_path: &str, path: &str) -> Option<usize> {
    let prefix = route_path.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(prefix.len())
    } else {
        None
    }
}

/// Longest match; equal lengths keep the first candidate.
fn longest<'a, T>(routes: &'a [T], path: &str, route_path: impl Fn(&T) -> &str) -> Option<(usize, &'a T)> {
    let mut best: Option<(usize, &T)> = None;
    for route in routes {
        if let Some(length) = match_length(route_path(route), path) {
            if best.is_none_or(|(current, _)| length > current) {
                best = Some((length, route));
            }
        }
    }
    best
}

/// Resolves `path` (already percent-decoded) against the routes of `server`.
pub fn find_route<'a>(server: &'a ServerConfig, path: &str) -> RoutingInfo<'a> {
    let local = longest(&server.locations, path, |r| r.path.as_str());
    let redirect = longest(&server.redirects, path, |r| r.path.as_str());

    let route = match (local, redirect) {
        (None, None) => return RoutingInfo::NotFound,
        (Some((local_len, _)), Some((redirect_len, redirect))) if redirect_len > local_len => {
            return RoutingInfo::Redirect(redirect);
        }
        (None, Some((_, redirect))) => return RoutingInfo::Redirect(redirect),
        (Some((_, route)), _) => route,
    };

    let prefix = route.path.trim_end_matches('/');
    let relative = path[prefix.len()..].trim_start_matches('/');
    let node_path = join_root(&route.root, relative);
    resolve_local(route, node_path)
}

/// Classifies `node_path` as a node of `route`.
pub fn resolve_local(route: &LocalRoute, node_path: PathBuf) -> RoutingInfo<'_> {
    let node_type = classify(&node_path);
    match node_type {
        NodeType::NotFound => RoutingInfo::NotFound,
        NodeType::NoAccess | NodeType::Unsupported => RoutingInfo::NoAccess,
        NodeType::Regular | NodeType::Directory => {
            let interpreter = if node_type == NodeType::Regular {
                node_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(|e| route.cgi.get(e))
                    .map(PathBuf::as_path)
            } else {
                None
            };
            RoutingInfo::Local {
                route,
                node_path,
                node_type,
                interpreter,
            }
        }
    }
}

fn join_root(root: &Path, relative: &str) -> PathBuf {
    let mut text = root.as_os_str().to_os_string();
    text.push("/");
    text.push(relative);
    PathBuf::from(text)
}

pub fn classify(path: &Path) -> NodeType {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => NodeType::Regular,
        Ok(meta) if meta.is_dir() => NodeType::Directory,
        Ok(_) => NodeType::Unsupported,
        Err(e) => match e.kind() {
            io::ErrorKind::PermissionDenied => NodeType::NoAccess,
            _ => NodeType::NotFound,
        },
    }
}

/// True when `path` never climbs above its starting directory.
///
/// Empty and `.` segments are ignored, every other segment descends one
/// level and `..` climbs one.
pub fn check_path_level(path: &str) -> bool {
    let mut level = 0usize;
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match level.checked_sub(1) {
                Some(up) => level = up,
                None => return false,
            },
            _ => level += 1,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_boundaries() {
        assert_eq!(match_length("/api", "/api/users"), Some(4));
        assert_eq!(match_length("/api/", "/api"), Some(4));
        assert_eq!(match_length("/api", "/apix"), None);
        assert_eq!(match_length("/", "/anything"), Some(0));
    }

    #[test]
    fn path_levels() {
        assert!(check_path_level("/a/b/../c"));
        assert!(check_path_level("/a/./../b"));
        assert!(!check_path_level("/../etc/passwd"));
        assert!(!check_path_level("/a/../../b"));
    }
}
