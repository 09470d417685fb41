//! The single-threaded server runtime.
//!
//! - **`dispatcher`**: readiness notification over `mio::Poll`
//! - **`arena`**: generation-checked storage for connections
//! - **`listener`**: one bound socket per distinct address
//! - **`runtime`**: the event loop tying them together
//! - **`shutdown`**: signal-driven stop flag

pub mod arena;
pub mod dispatcher;
pub mod listener;
pub mod runtime;
pub mod shutdown;

pub use runtime::Runtime;
pub use shutdown::Shutdown;
