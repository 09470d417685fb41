//! HTTP protocol implementation.
//!
//! This module implements the HTTP/1.x side of the server. Every connection
//! serves exactly one request and is closed afterwards.
//!
//! # Architecture
//!
//! The HTTP layer is organized into several submodules:
//!
//! - **`connection`**: The per-client state machine driven by readiness events
//! - **`parser`**: Incremental request parser, including chunked bodies
//! - **`request`**: HTTP request representation
//! - **`response`**: Status codes and responses whose headers are still mutable
//! - **`writer`**: Streams a finalized response to a non-blocking socket
//! - **`handler`**: Maps a routed request to a response or a CGI launch
//! - **`upload`**: `multipart/form-data` file uploads
//! - **`html`**: Generated error pages and directory listings
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌──────────────────┐
//!        │ AwaitingRequest  │ ← Feed socket bytes to the parser
//!        └──────┬───────────┘
//!               │ Request parsed (or rejected)
//!               ├──────────────────────┐
//!               │                      ▼
//!               │             ┌──────────────────┐
//!               │             │   AwaitingCgi    │ ← Child runs, pipes pumped
//!               │             └──────┬───────────┘
//!               ▼                    │ Session finished
//!        ┌──────────────────┐        │
//!        │ SendingResponse  │ ◄──────┘
//!        └──────┬───────────┘
//!               │ Response sent
//!               ▼
//!        ┌──────────────────┐
//!        │    Lingering     │ ← Wait for the client to close, then tear down
//!        └──────────────────┘
//! ```

pub mod connection;
pub mod handler;
pub mod html;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod upload;
pub mod writer;
