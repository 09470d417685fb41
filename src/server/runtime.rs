//! The event loop: dispatch, expiry sweep, deferred cleanup.

use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::http::connection::Connection;
use crate::server::arena::{Arena, Handle};
use crate::server::dispatcher::{Dispatcher, EventSink, Readiness, Target};
use crate::server::listener::Listener;
use crate::server::shutdown::Shutdown;

/// Upper bound on how long one dispatch may block.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Used instead while a CGI child has closed stdout but not exited yet.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct Runtime {
    dispatcher: Dispatcher,
    server: Server,
    shutdown: Shutdown,
}

impl Runtime {
    /// Binds every configured address and subscribes the listeners.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        Self::with_shutdown(config, Shutdown::new())
    }

    pub fn with_shutdown(config: Config, shutdown: Shutdown) -> anyhow::Result<Self> {
        let mut dispatcher = Dispatcher::new()?;
        let config = Rc::new(config);

        let mut listeners = Vec::new();
        for (addr, group) in config.bind_groups() {
            let mut listener = Listener::bind(addr, group)?;
            listener.register(listeners.len(), &mut dispatcher)?;
            listeners.push(listener);
        }

        Ok(Self {
            dispatcher,
            server: Server {
                config,
                listeners,
                connections: Arena::new(),
                cleanup: Vec::new(),
            },
            shutdown,
        })
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.server.listeners.iter().map(Listener::local_addr).collect()
    }

    /// Runs until the shutdown flag is raised.
    pub fn run(&mut self) -> anyhow::Result<()> {
        while !self.shutdown.is_triggered() {
            self.turn()?;
        }
        info!(connections = self.server.connections.len(), "Shutting down");
        self.server.close_all(&mut self.dispatcher);
        Ok(())
    }

    /// One loop iteration.
    pub fn turn(&mut self) -> anyhow::Result<()> {
        let timeout = if self.server.waiting_for_children() {
            CHILD_POLL_INTERVAL
        } else {
            self.server.next_deadline().min(IDLE_POLL_INTERVAL)
        };
        self.dispatcher.dispatch(Some(timeout), &mut self.server)?;
        self.server.sweep_expired(&mut self.dispatcher);
        self.server.drain_cleanup(&mut self.dispatcher);
        Ok(())
    }
}

struct Server {
    config: Rc<Config>,
    listeners: Vec<Listener>,
    connections: Arena<Connection>,
    cleanup: Vec<Handle>,
}

impl Server {
    fn accept(&mut self, index: usize, dispatcher: &mut Dispatcher) {
        let Some(listener) = self.listeners.get(index) else {
            return;
        };
        loop {
            let (stream, peer) = match listener.accept() {
                Ok(Some(pair)) => pair,
                Ok(None) => return,
                Err(e) => {
                    warn!(addr = %listener.local_addr(), error = %e, "accept failed");
                    return;
                }
            };
            let local = stream.local_addr().unwrap_or_else(|_| listener.local_addr());

            let config = Rc::clone(&self.config);
            let group = listener.group();
            let handle = self
                .connections
                .insert_with(|handle| Connection::new(handle, stream, peer, local, config, group));

            let registered = match self.connections.get_mut(handle) {
                Some(connection) => connection.register(dispatcher),
                None => continue,
            };
            match registered {
                Ok(()) => debug!(peer = %peer, ?handle, "connection accepted"),
                Err(e) => {
                    warn!(peer = %peer, error = %format!("{e:#}"), "failed to register connection");
                    self.connections.remove(handle);
                }
            }
        }
    }

    fn schedule_cleanup(&mut self, handle: Handle) {
        if let Some(connection) = self.connections.get_mut(handle) {
            connection.mark();
            self.cleanup.push(handle);
        }
    }

    fn waiting_for_children(&self) -> bool {
        self.connections.iter().any(|(_, c)| c.is_waiting_for_child())
    }

    /// The nearest connection or CGI deadline, or the idle interval.
    fn next_deadline(&self) -> Duration {
        self.connections
            .iter()
            .filter(|(_, c)| !c.is_marked())
            .filter_map(|(_, c)| c.next_deadline())
            .min()
            .unwrap_or(IDLE_POLL_INTERVAL)
    }

    fn sweep_expired(&mut self, dispatcher: &mut Dispatcher) {
        let mut expired = Vec::new();
        for (handle, connection) in self.connections.iter_mut() {
            if connection.is_marked() || connection.poll_expiry(dispatcher) {
                expired.push(handle);
            }
        }
        for handle in expired {
            self.schedule_cleanup(handle);
        }
    }

    fn drain_cleanup(&mut self, dispatcher: &mut Dispatcher) {
        for handle in std::mem::take(&mut self.cleanup) {
            // Duplicates resolve to nothing once the first removal happened.
            if let Some(mut connection) = self.connections.remove(handle) {
                connection.close(dispatcher);
                debug!(peer = %connection.peer(), state = ?connection.state(), "connection closed");
            }
        }
    }

    fn close_all(&mut self, dispatcher: &mut Dispatcher) {
        for handle in self.connections.handles() {
            self.schedule_cleanup(handle);
        }
        self.drain_cleanup(dispatcher);
        for listener in &mut self.listeners {
            listener.deregister(dispatcher);
        }
    }
}

impl EventSink for Server {
    fn handle_events(
        &mut self,
        target: Target,
        readiness: Readiness,
        dispatcher: &mut Dispatcher,
    ) -> anyhow::Result<()> {
        let handle = match target {
            Target::Listener(index) => {
                self.accept(index, dispatcher);
                return Ok(());
            }
            Target::Connection(handle) | Target::CgiInput(handle) | Target::CgiOutput(handle) => handle,
        };
        let Some(connection) = self.connections.get_mut(handle) else {
            return Ok(());
        };

        match target {
            Target::Connection(_) => connection.handle_events(readiness, dispatcher)?,
            _ => connection.handle_cgi_events(target, readiness, dispatcher)?,
        }
        if connection.is_marked() {
            self.cleanup.push(handle);
        }
        Ok(())
    }

    fn handle_exception(&mut self, target: Target, message: &str, dispatcher: &mut Dispatcher) {
        match target {
            Target::Listener(index) => {
                warn!(listener = index, error = %message, "listener failed");
            }
            Target::Connection(handle) => {
                if let Some(connection) = self.connections.get(handle) {
                    warn!(peer = %connection.peer(), error = %message, "connection failed");
                }
                self.schedule_cleanup(handle);
            }
            Target::CgiInput(handle) | Target::CgiOutput(handle) => {
                let Some(connection) = self.connections.get_mut(handle) else {
                    return;
                };
                if let Err(e) = connection.fail_cgi(message, dispatcher) {
                    warn!(peer = %connection.peer(), error = %format!("{e:#}"), "connection failed");
                    self.schedule_cleanup(handle);
                }
            }
        }
    }
}
