//! One CGI run on behalf of one connection.
//!
//! The request body is written to the child's stdin first; only once it has
//! been fully written (or the child stopped reading) is stdout subscribed and
//! drained. Pipe failures end the session in [`CgiState::Failure`] and never
//! surface as errors of the owning connection.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::{Buf, Bytes, BytesMut};
use mio::Interest;
use tracing::{debug, warn};

use crate::cgi::process::{ProcessStatus, Subprocess};
use crate::http::request::{Method, Request};
use crate::server::arena::Handle;
use crate::server::dispatcher::{Dispatcher, Readiness, Target};
use crate::timer::Timer;

const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgiState {
    Running,
    Success,
    Failure,
    Timeout,
}

/// Everything needed to launch a script for a request.
pub struct CgiRequest<'a> {
    pub request: &'a Request,
    pub interpreter: &'a Path,
    pub node_path: &'a Path,
    pub document_root: &'a Path,
    pub server_name: &'a str,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    /// Cap on the script's output.
    pub max_output: usize,
    pub timeout: Duration,
}

pub struct CgiSession {
    owner: Handle,
    process: Subprocess,
    state: CgiState,
    input: Bytes,
    output: BytesMut,
    max_output: usize,
    timer: Timer,
    input_subscribed: bool,
    output_subscribed: bool,
    output_closed: bool,
}

impl CgiSession {
    /// Spawns the interpreter and subscribes the pipe for the first phase.
    pub fn start(owner: Handle, cgi: &CgiRequest<'_>, dispatcher: &mut Dispatcher) -> anyhow::Result<Self> {
        let (directory, script) = split_node_path(cgi.node_path);
        let interpreter = absolute_if_exists(cgi.interpreter);

        let env = environment(cgi, &script)?;
        let mut args = vec![interpreter.into_os_string(), script.clone().into()];
        if cgi.request.method == Method::GET && !cgi.request.query.is_empty() {
            args.push(cgi.request.query.clone().into());
        }

        let process = Subprocess::spawn(&args, env, &directory)?;

        let mut session = Self {
            owner,
            process,
            state: CgiState::Running,
            input: Bytes::from(cgi.request.body.clone()),
            output: BytesMut::new(),
            max_output: cgi.max_output,
            timer: Timer::new(cgi.timeout),
            input_subscribed: false,
            output_subscribed: false,
            output_closed: false,
        };

        if session.input.has_remaining() {
            if let Some(input) = session.process.input() {
                dispatcher.subscribe(input, Interest::WRITABLE, Target::CgiInput(owner))?;
                session.input_subscribed = true;
            }
        } else {
            session.finish_input(dispatcher)?;
        }

        debug!(pid = session.process.id(), script = %script, "cgi session started");
        Ok(session)
    }

    pub fn state(&self) -> CgiState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == CgiState::Running
    }

    /// True when stdout is closed but the child has not been seen exiting.
    pub fn is_waiting_for_exit(&self) -> bool {
        self.is_running() && self.output_closed
    }

    /// Time left before the session times out; `None` once it has ended.
    pub fn remaining(&self) -> Option<Duration> {
        if !self.is_running() {
            return None;
        }
        self.timer.remaining()
    }

    /// Hands out the collected output, leaving the session's copy empty.
    pub fn take_output(&mut self) -> Bytes {
        std::mem::take(&mut self.output).freeze()
    }

    /// Handles readiness on one of the session's pipes.
    pub fn handle_events(&mut self, target: Target, readiness: Readiness, dispatcher: &mut Dispatcher) {
        if !self.is_running() {
            return;
        }
        let result = match target {
            Target::CgiInput(_) if readiness.writable || readiness.hangup => self.write_input(dispatcher),
            Target::CgiOutput(_) if readiness.readable || readiness.hangup => self.read_output(dispatcher),
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.fail(&format!("{e:#}"), dispatcher);
        }
    }

    /// Marks the session failed after an error outside the pipe handlers.
    pub fn fail(&mut self, message: &str, dispatcher: &mut Dispatcher) {
        if !self.is_running() {
            return;
        }
        warn!(pid = self.process.id(), error = %message, "cgi session failed");
        self.state = CgiState::Failure;
        self.close(dispatcher);
    }

    /// Polls an exit that is still pending after stdout closed, and the timer.
    pub fn check_progress(&mut self, dispatcher: &mut Dispatcher) {
        if !self.is_running() {
            return;
        }
        if self.timer.is_expired() {
            warn!(pid = self.process.id(), "cgi session timed out");
            self.state = CgiState::Timeout;
            self.close(dispatcher);
            return;
        }
        if self.output_closed {
            if let Err(e) = self.poll_exit(dispatcher) {
                self.fail(&format!("{e:#}"), dispatcher);
            }
        }
    }

    /// Unsubscribes and closes both pipes. The child itself is reaped on drop.
    pub fn close(&mut self, dispatcher: &mut Dispatcher) {
        if let Some(input) = self.process.input() {
            if self.input_subscribed {
                dispatcher.unsubscribe(input);
            }
        }
        if let Some(output) = self.process.output() {
            if self.output_subscribed {
                dispatcher.unsubscribe(output);
            }
        }
        self.input_subscribed = false;
        self.output_subscribed = false;
        self.process.close_input();
        self.process.close_output();
    }

    fn write_input(&mut self, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        while self.input.has_remaining() {
            let Some(pipe) = self.process.input() else {
                return Ok(());
            };
            match pipe.write(self.input.chunk()) {
                Ok(0) => bail!("child stdin accepted zero bytes"),
                Ok(n) => self.input.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(pid = self.process.id(), unsent = self.input.remaining(), "child closed stdin early");
                    break;
                }
                Err(e) => return Err(e).context("failed to write to child stdin"),
            }
        }
        self.finish_input(dispatcher)
    }

    /// Ends the write phase for good and starts reading stdout.
    fn finish_input(&mut self, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        if let Some(input) = self.process.input() {
            if self.input_subscribed {
                dispatcher.unsubscribe(input);
            }
        }
        self.input_subscribed = false;
        self.process.close_input();

        let owner = self.owner;
        if let Some(output) = self.process.output() {
            dispatcher.subscribe(output, Interest::READABLE, Target::CgiOutput(owner))?;
            self.output_subscribed = true;
        }
        Ok(())
    }

    fn read_output(&mut self, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        let mut buffer = [0u8; READ_CHUNK_SIZE];
        loop {
            let Some(pipe) = self.process.output() else {
                return Ok(());
            };
            match pipe.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if self.output.len() + n > self.max_output {
                        bail!("cgi output exceeds {} bytes", self.max_output);
                    }
                    self.output.extend_from_slice(&buffer[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("failed to read from child stdout"),
            }
        }

        if let Some(output) = self.process.output() {
            if self.output_subscribed {
                dispatcher.unsubscribe(output);
            }
        }
        self.output_subscribed = false;
        self.process.close_output();
        self.output_closed = true;
        self.poll_exit(dispatcher)
    }

    fn poll_exit(&mut self, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        match self.process.status()? {
            ProcessStatus::Running => {}
            ProcessStatus::ExitSuccess => {
                debug!(pid = self.process.id(), bytes = self.output.len(), "cgi session finished");
                self.state = CgiState::Success;
                self.close(dispatcher);
            }
            ProcessStatus::ExitFailure => bail!("child exited unsuccessfully"),
        }
        Ok(())
    }
}

/// Splits `dir/script` at the last `/`; a bare name runs in `.`.
fn split_node_path(node_path: &Path) -> (PathBuf, String) {
    let text = node_path.to_string_lossy();
    match text.rsplit_once('/') {
        Some(("", script)) => (PathBuf::from("/"), script.to_string()),
        Some((directory, script)) => (PathBuf::from(directory), script.to_string()),
        None => (PathBuf::from("."), text.into_owned()),
    }
}

/// Resolves multi-component interpreter paths against the server's working
/// directory rather than the script's.
fn absolute_if_exists(path: &Path) -> PathBuf {
    if path.components().count() > 1 {
        if let Ok(absolute) = path.canonicalize() {
            return absolute;
        }
    }
    path.to_path_buf()
}

fn environment(cgi: &CgiRequest<'_>, script: &str) -> anyhow::Result<Vec<(String, String)>> {
    let request = cgi.request;
    let script_filename = cgi
        .node_path
        .canonicalize()
        .with_context(|| format!("failed to resolve script {}", cgi.node_path.display()))?;
    let document_root = cgi
        .document_root
        .canonicalize()
        .with_context(|| format!("failed to resolve document root {}", cgi.document_root.display()))?;

    let mut env = vec![
        ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
        ("SERVER_SOFTWARE".to_string(), concat!("webserv/", env!("CARGO_PKG_VERSION")).to_string()),
        ("SERVER_NAME".to_string(), cgi.server_name.to_string()),
        ("SERVER_PORT".to_string(), cgi.local_addr.port().to_string()),
        ("SERVER_PROTOCOL".to_string(), request.version.as_str().to_string()),
        ("REQUEST_METHOD".to_string(), request.method.as_str().to_string()),
        ("REQUEST_URI".to_string(), request.target.clone()),
        ("SCRIPT_NAME".to_string(), request.path.clone()),
        ("SCRIPT_FILENAME".to_string(), script_filename.to_string_lossy().into_owned()),
        ("DOCUMENT_ROOT".to_string(), document_root.to_string_lossy().into_owned()),
        ("PATH_INFO".to_string(), request.path.clone()),
        ("PATH_TRANSLATED".to_string(), script_filename.to_string_lossy().into_owned()),
        ("QUERY_STRING".to_string(), request.query.clone()),
        ("CONTENT_TYPE".to_string(), request.header("Content-Type").unwrap_or_default().to_string()),
        ("CONTENT_LENGTH".to_string(), request.body.len().to_string()),
        ("REMOTE_ADDR".to_string(), cgi.peer_addr.ip().to_string()),
        ("REMOTE_PORT".to_string(), cgi.peer_addr.port().to_string()),
        ("REDIRECT_STATUS".to_string(), "200".to_string()),
    ];
    if let Some(path) = std::env::var_os("PATH") {
        env.push(("PATH".to_string(), path.to_string_lossy().into_owned()));
    }

    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("Content-Type") || name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        let key = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
        env.push((key, value.clone()));
    }

    debug!(script, vars = env.len(), "built cgi environment");
    Ok(env)
}
