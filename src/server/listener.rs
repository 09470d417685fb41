use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use anyhow::Context;
use mio::net::{TcpListener, TcpStream};
use mio::Interest;
use tracing::info;

use crate::server::dispatcher::{Dispatcher, Target};

/// A bound socket shared by every server configured on its address.
pub struct Listener {
    socket: TcpListener,
    addr: SocketAddr,
    group: Rc<[usize]>,
}

impl Listener {
    pub fn bind(addr: SocketAddr, group: Vec<usize>) -> anyhow::Result<Self> {
        let socket = TcpListener::bind(addr).with_context(|| format!("failed to bind {addr}"))?;
        let addr = socket.local_addr().context("failed to read bound address")?;
        info!("Listening on {}", addr);
        Ok(Self {
            socket,
            addr,
            group: group.into(),
        })
    }

    pub fn register(&mut self, index: usize, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        dispatcher.subscribe(&mut self.socket, Interest::READABLE, Target::Listener(index))
    }

    pub fn deregister(&mut self, dispatcher: &mut Dispatcher) {
        dispatcher.unsubscribe(&mut self.socket);
    }

    /// The actual bound address, with the port filled in when 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Server indices in configuration order; the first is the default.
    pub fn group(&self) -> Rc<[usize]> {
        Rc::clone(&self.group)
    }

    /// Accepts one pending connection, `None` once the backlog is empty.
    pub fn accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        loop {
            match self.socket.accept() {
                Ok(pair) => return Ok(Some(pair)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
