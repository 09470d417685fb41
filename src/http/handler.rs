//! Request handling policy: turns a routed request into a response or a CGI
//! launch.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{LocalRoute, RedirectRoute, ServerConfig};
use crate::error::HttpError;
use crate::http::request::{encode_path, Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::{html, mime, upload};
use crate::routing::{check_path_level, find_route, match_length, resolve_local, NodeType, RoutingInfo};

/// What the connection should do next.
#[derive(Debug)]
pub enum Action<'a> {
    Respond(Response),
    Cgi {
        route: &'a LocalRoute,
        interpreter: &'a Path,
        node_path: PathBuf,
    },
}

pub fn handle<'a>(server: &'a ServerConfig, request: &Request) -> Result<Action<'a>, HttpError> {
    if !check_path_level(&request.path) {
        return Err(HttpError::new(StatusCode::BAD_REQUEST));
    }

    let mut routing = find_route(server, &request.path);
    // A directory gets at most one index lookup.
    for attempt in 0..2 {
        let (route, node_path, node_type, interpreter) = match routing {
            RoutingInfo::NotFound => return Err(HttpError::new(StatusCode::NOT_FOUND)),
            RoutingInfo::NoAccess => return Err(HttpError::new(StatusCode::FORBIDDEN)),
            RoutingInfo::Redirect(route) => return redirect(server, route, request).map(Action::Respond),
            RoutingInfo::Local {
                route,
                node_path,
                node_type,
                interpreter,
            } => (route, node_path, node_type, interpreter),
        };

        if !allows(&route.methods, request.method) {
            return Ok(Action::Respond(method_not_allowed(server, &route.methods)));
        }

        match node_type {
            NodeType::Regular => {
                if let Some(interpreter) = interpreter {
                    return Ok(Action::Cgi {
                        route,
                        interpreter,
                        node_path,
                    });
                }
                return serve_file(request, &node_path).map(Action::Respond);
            }
            NodeType::Directory => {}
            _ => return Err(HttpError::new(StatusCode::FORBIDDEN)),
        }

        match request.method {
            Method::POST if route.upload => {
                let directory = route.upload_dir.as_deref().unwrap_or(node_path.as_path());
                let stored = upload::handle_upload(request, directory)?;
                debug!(stored, directory = %directory.display(), "upload finished");
                let response = Response::empty(StatusCode::SEE_OTHER).header("Location", encode_path(&request.path));
                return Ok(Action::Respond(response));
            }
            Method::POST | Method::DELETE => return Err(HttpError::new(StatusCode::FORBIDDEN)),
            _ => {}
        }

        if attempt > 0 {
            // The index itself is a directory.
            return Err(HttpError::new(StatusCode::INTERNAL_SERVER_ERROR));
        }

        if let Some(index) = &route.index {
            match resolve_local(route, node_path.join(index)) {
                RoutingInfo::NotFound if route.autoindex => {}
                next => {
                    routing = next;
                    continue;
                }
            }
        }

        if route.autoindex {
            let page = html::directory_listing(&request.path, &node_path)?;
            return Ok(Action::Respond(
                Response::owned(StatusCode::OK, page).header("Content-Type", "text/html"),
            ));
        }
        return Err(HttpError::new(StatusCode::FORBIDDEN));
    }

    Err(HttpError::new(StatusCode::INTERNAL_SERVER_ERROR))
}

fn serve_file(request: &Request, node_path: &Path) -> Result<Response, HttpError> {
    if request.method == Method::DELETE {
        return match fs::remove_file(node_path) {
            Ok(()) => {
                debug!(path = %node_path.display(), "deleted file");
                Ok(Response::empty(StatusCode::NO_CONTENT))
            }
            Err(e) => {
                warn!(path = %node_path.display(), error = %e, "failed to delete file");
                Err(HttpError::new(StatusCode::FORBIDDEN))
            }
        };
    }

    let response = Response::file(StatusCode::OK, node_path)?;
    Ok(response.header("Content-Type", mime::from_path(node_path)))
}

fn redirect(server: &ServerConfig, route: &RedirectRoute, request: &Request) -> Result<Response, HttpError> {
    if !allows(&route.methods, request.method) {
        return Ok(method_not_allowed(server, &route.methods));
    }

    let prefix_len = match_length(&route.path, &request.path).unwrap_or(request.path.len());
    let remainder = request.path[prefix_len..].trim_start_matches('/');
    let mut location = if remainder.is_empty() {
        route.location.clone()
    } else {
        format!("{}/{}", route.location.trim_end_matches('/'), encode_path(remainder))
    };
    if !request.query.is_empty() {
        location.push('?');
        location.push_str(&request.query);
    }

    Ok(Response::empty(StatusCode::TEMPORARY_REDIRECT).header("Location", location))
}

/// HEAD is accepted wherever GET is.
pub fn allows(methods: &[Method], method: Method) -> bool {
    methods.contains(&method) || (method == Method::HEAD && methods.contains(&Method::GET))
}

fn method_not_allowed(server: &ServerConfig, methods: &[Method]) -> Response {
    let mut allowed: Vec<&str> = methods.iter().map(Method::as_str).collect();
    if methods.contains(&Method::GET) && !methods.contains(&Method::HEAD) {
        allowed.push(Method::HEAD.as_str());
    }
    error_response(Some(server), StatusCode::METHOD_NOT_ALLOWED).header("Allow", allowed.join(", "))
}

/// Builds the error page for `status`, preferring the server's configured
/// page and falling back to a generated one.
pub fn error_response(server: Option<&ServerConfig>, status: StatusCode) -> Response {
    if let Some(path) = server.and_then(|s| s.error_pages.get(&status.as_u16())) {
        match Response::file(status, path) {
            Ok(response) => return response.header("Content-Type", "text/html"),
            Err(e) => warn!(path = %path.display(), error = %e, "error page unavailable"),
        }
    }
    Response::owned(status, html::error_page(status)).header("Content-Type", "text/html")
}
