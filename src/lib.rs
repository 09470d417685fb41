//! webserv - non-blocking HTTP/1.x server with CGI support
//!
//! Core library for the event loop, HTTP handling, routing and CGI.

pub mod cgi;
pub mod config;
pub mod error;
pub mod http;
pub mod routing;
pub mod server;
pub mod timer;
