//! Readiness dispatcher over `mio::Poll`.
//!
//! Every registered source is keyed by its raw descriptor, which doubles as
//! the `mio` token. Events are copied out of the poll buffer before they are
//! delivered, so sinks may subscribe, modify or unsubscribe anything while a
//! batch is being handled.

use std::collections::HashMap;
use std::io;
use std::os::fd::AsRawFd;
use std::time::Duration;

use anyhow::Context;
use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use tracing::trace;

use crate::server::arena::Handle;

const EVENT_CAPACITY: usize = 256;

/// Who owns a registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Index into the listener list.
    Listener(usize),
    Connection(Handle),
    /// The stdin pipe of a connection's CGI child.
    CgiInput(Handle),
    /// The stdout pipe of a connection's CGI child.
    CgiOutput(Handle),
}

/// The conditions reported for one descriptor in one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
}

impl Readiness {
    fn from_event(event: &mio::event::Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            hangup: event.is_error() || (event.is_read_closed() && event.is_write_closed()),
        }
    }
}

/// Receives the events of a dispatch batch.
pub trait EventSink {
    /// Handles readiness on `target`. An error is routed to
    /// [`handle_exception`](Self::handle_exception) for the same target.
    fn handle_events(
        &mut self,
        target: Target,
        readiness: Readiness,
        dispatcher: &mut Dispatcher,
    ) -> anyhow::Result<()>;

    fn handle_exception(&mut self, target: Target, message: &str, dispatcher: &mut Dispatcher);
}

pub struct Dispatcher {
    poll: Poll,
    events: Events,
    targets: HashMap<Token, Target>,
}

impl Dispatcher {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            poll: Poll::new().context("failed to create poll instance")?,
            events: Events::with_capacity(EVENT_CAPACITY),
            targets: HashMap::new(),
        })
    }

    pub fn subscribe<S>(&mut self, source: &mut S, interest: Interest, target: Target) -> anyhow::Result<()>
    where
        S: Source + AsRawFd + ?Sized,
    {
        let token = Token(source.as_raw_fd() as usize);
        self.poll
            .registry()
            .register(source, token, interest)
            .with_context(|| format!("failed to subscribe descriptor {}", token.0))?;
        self.targets.insert(token, target);
        Ok(())
    }

    pub fn modify<S>(&mut self, source: &mut S, interest: Interest, target: Target) -> anyhow::Result<()>
    where
        S: Source + AsRawFd + ?Sized,
    {
        let token = Token(source.as_raw_fd() as usize);
        self.poll
            .registry()
            .reregister(source, token, interest)
            .with_context(|| format!("failed to modify descriptor {}", token.0))?;
        self.targets.insert(token, target);
        Ok(())
    }

    /// Removes `source`; events already queued for it are dropped.
    pub fn unsubscribe<S>(&mut self, source: &mut S)
    where
        S: Source + AsRawFd + ?Sized,
    {
        let token = Token(source.as_raw_fd() as usize);
        if self.targets.remove(&token).is_some() {
            if let Err(e) = self.poll.registry().deregister(source) {
                trace!(fd = token.0, error = %e, "deregister failed");
            }
        }
    }

    pub fn is_subscribed<S: AsRawFd + ?Sized>(&self, source: &S) -> bool {
        self.targets.contains_key(&Token(source.as_raw_fd() as usize))
    }

    /// Waits up to `timeout` (forever if `None`) and delivers one batch.
    ///
    /// Returns the number of events delivered.
    pub fn dispatch<E: EventSink>(&mut self, timeout: Option<Duration>, sinks: &mut E) -> anyhow::Result<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e).context("failed to poll for events"),
        }

        let batch: Vec<(Token, Readiness)> = self
            .events
            .iter()
            .map(|event| (event.token(), Readiness::from_event(event)))
            .collect();

        let mut delivered = 0;
        for (token, readiness) in batch {
            // Gone if an earlier handler in this batch unsubscribed it.
            let Some(&target) = self.targets.get(&token) else {
                continue;
            };
            delivered += 1;
            if let Err(e) = sinks.handle_events(target, readiness, self) {
                sinks.handle_exception(target, &format!("{e:#}"), self);
            }
        }
        Ok(delivered)
    }
}
