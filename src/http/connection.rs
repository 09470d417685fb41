use std::io::{self, Read};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context};
use mio::net::TcpStream;
use mio::Interest;
use tracing::{debug, info, warn};

use crate::cgi::parse_output;
use crate::cgi::session::{CgiRequest, CgiSession, CgiState};
use crate::config::{Config, ServerConfig, DEFAULT_MAX_BODY_SIZE};
use crate::http::handler::{self, error_response, Action};
use crate::http::parser::{Phase, RequestParser};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::server::arena::Handle;
use crate::server::dispatcher::{Dispatcher, Readiness, Target};
use crate::timer::Timer;

const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingRequest,
    AwaitingCgi,
    SendingResponse,
    /// Response sent; waiting for the client to close first.
    Lingering,
}

/// One accepted client socket serving exactly one request.
pub struct Connection {
    handle: Handle,
    stream: TcpStream,
    peer: SocketAddr,
    local: SocketAddr,
    config: Rc<Config>,
    /// Indices of the servers bound to `local`; the first is the default.
    group: Rc<[usize]>,
    state: ConnectionState,
    parser: RequestParser,
    writer: Option<ResponseWriter>,
    cgi: Option<CgiSession>,
    /// Method and path of the request being answered.
    request: Option<(Method, String)>,
    server: usize,
    timer: Timer,
    marked: bool,
}

impl Connection {
    pub fn new(
        handle: Handle,
        stream: TcpStream,
        peer: SocketAddr,
        local: SocketAddr,
        config: Rc<Config>,
        group: Rc<[usize]>,
    ) -> Self {
        let default = group.first().copied().unwrap_or_default();
        let max_body_size = config
            .servers
            .get(default)
            .map(|s| s.max_body_size)
            .unwrap_or(DEFAULT_MAX_BODY_SIZE);
        let timer = Timer::new(config.timeouts.request());

        Self {
            handle,
            stream,
            peer,
            local,
            config,
            group,
            state: ConnectionState::AwaitingRequest,
            parser: RequestParser::new(max_body_size),
            writer: None,
            cgi: None,
            request: None,
            server: default,
            timer,
            marked: false,
        }
    }

    pub fn register(&mut self, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        dispatcher.subscribe(&mut self.stream, Interest::READABLE, Target::Connection(self.handle))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Flags the connection for teardown at the end of the loop iteration.
    pub fn mark(&mut self) {
        self.marked = true;
    }

    pub fn is_marked(&self) -> bool {
        self.marked
    }

    /// True while a CGI child has closed stdout but not yet exited.
    pub fn is_waiting_for_child(&self) -> bool {
        self.cgi.as_ref().is_some_and(CgiSession::is_waiting_for_exit)
    }

    /// Time until the connection or its CGI session next needs a check.
    pub fn next_deadline(&self) -> Option<Duration> {
        let session = self.cgi.as_ref().and_then(CgiSession::remaining);
        match (self.timer.remaining(), session) {
            (Some(own), Some(session)) => Some(own.min(session)),
            (own, session) => own.or(session),
        }
    }

    /// Handles readiness on the client socket.
    pub fn handle_events(&mut self, readiness: Readiness, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        match self.state {
            ConnectionState::AwaitingRequest => {
                if readiness.readable {
                    self.read_request(dispatcher)?;
                }
                if readiness.hangup && self.state == ConnectionState::AwaitingRequest {
                    bail!("peer hung up before completing a request");
                }
            }
            ConnectionState::AwaitingCgi => {
                if readiness.hangup {
                    bail!("peer hung up while waiting for cgi");
                }
            }
            ConnectionState::SendingResponse => {
                if readiness.hangup {
                    bail!("peer hung up during response");
                }
                if readiness.writable {
                    self.pump(dispatcher)?;
                }
            }
            ConnectionState::Lingering => {
                if readiness.readable || readiness.hangup {
                    debug!(peer = %self.peer, "peer closed after response");
                    self.mark();
                }
            }
        }
        Ok(())
    }

    /// Handles readiness on one of this connection's CGI pipes.
    pub fn handle_cgi_events(
        &mut self,
        target: Target,
        readiness: Readiness,
        dispatcher: &mut Dispatcher,
    ) -> anyhow::Result<()> {
        if let Some(session) = self.cgi.as_mut() {
            session.handle_events(target, readiness, dispatcher);
        }
        self.consume_cgi(dispatcher)
    }

    /// Fails the CGI session after an error that escaped its handlers.
    pub fn fail_cgi(&mut self, message: &str, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        if let Some(session) = self.cgi.as_mut() {
            session.fail(message, dispatcher);
        }
        self.consume_cgi(dispatcher)
    }

    /// Runs the once-per-iteration checks: CGI timeout and exit, then the
    /// connection timer. Returns true when the connection should be torn down.
    pub fn poll_expiry(&mut self, dispatcher: &mut Dispatcher) -> bool {
        if let Some(session) = self.cgi.as_mut() {
            session.check_progress(dispatcher);
            if let Err(e) = self.consume_cgi(dispatcher) {
                warn!(peer = %self.peer, error = %format!("{e:#}"), "failed to answer after cgi");
                return true;
            }
        }
        if self.timer.is_expired() {
            debug!(peer = %self.peer, state = ?self.state, "connection timed out");
            return true;
        }
        false
    }

    /// Unsubscribes everything and releases the CGI session.
    pub fn close(&mut self, dispatcher: &mut Dispatcher) {
        dispatcher.unsubscribe(&mut self.stream);
        if let Some(mut session) = self.cgi.take() {
            session.close(dispatcher);
        }
    }

    fn read_request(&mut self, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        let mut buffer = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut buffer) {
                Ok(0) => bail!("peer closed before completing a request"),
                Ok(n) => {
                    if self.parser.commit(&buffer[..n]) {
                        return self.on_parsed(dispatcher);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("failed to read request"),
            }
        }
    }

    fn on_parsed(&mut self, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        let status = match self.parser.phase() {
            Phase::HeaderExceed | Phase::BodyExceed => StatusCode::PAYLOAD_TOO_LARGE,
            Phase::Malformed => StatusCode::BAD_REQUEST,
            _ => match self.parser.take_request() {
                Some(request) => return self.process(request, dispatcher),
                None => StatusCode::BAD_REQUEST,
            },
        };
        debug!(peer = %self.peer, phase = ?self.parser.phase(), "rejected request");
        let response = error_response(self.server_config(), status);
        self.respond(response, dispatcher)
    }

    fn process(&mut self, request: Request, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        self.server = self.select_server(&request);
        self.request = Some((request.method, request.path.clone()));

        let config = Rc::clone(&self.config);
        let Some(server) = config.servers.get(self.server) else {
            bail!("server #{} missing from configuration", self.server);
        };

        let response = match handler::handle(server, &request) {
            Ok(Action::Respond(response)) => response,
            Ok(Action::Cgi {
                route,
                interpreter,
                node_path,
            }) => {
                let server_name = request
                    .host()
                    .map(str::to_string)
                    .or_else(|| server.server_names.first().cloned())
                    .unwrap_or_else(|| self.local.ip().to_string());
                let cgi = CgiRequest {
                    request: &request,
                    interpreter,
                    node_path: &node_path,
                    document_root: &route.root,
                    server_name: &server_name,
                    local_addr: self.local,
                    peer_addr: self.peer,
                    max_output: server.max_body_size,
                    timeout: config.timeouts.cgi(),
                };
                match CgiSession::start(self.handle, &cgi, dispatcher) {
                    Ok(session) => {
                        self.cgi = Some(session);
                        self.timer.stop();
                        self.state = ConnectionState::AwaitingCgi;
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(peer = %self.peer, error = %format!("{e:#}"), "failed to start cgi");
                        error_response(Some(server), StatusCode::BAD_GATEWAY)
                    }
                }
            }
            Err(e) => error_response(Some(server), e.status),
        };
        self.respond(response, dispatcher)
    }

    /// Turns a finished CGI session into the response.
    fn consume_cgi(&mut self, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        let state = match self.cgi.as_ref().map(CgiSession::state) {
            None | Some(CgiState::Running) => return Ok(()),
            Some(state) => state,
        };
        let Some(mut session) = self.cgi.take() else {
            return Ok(());
        };
        session.close(dispatcher);

        let response = match state {
            CgiState::Success => match parse_output(session.take_output()) {
                Some(response) => response,
                None => {
                    warn!(peer = %self.peer, "unparseable cgi output");
                    error_response(self.server_config(), StatusCode::BAD_GATEWAY)
                }
            },
            CgiState::Timeout => error_response(self.server_config(), StatusCode::GATEWAY_TIMEOUT),
            _ => error_response(self.server_config(), StatusCode::BAD_GATEWAY),
        };
        drop(session);

        self.timer.reset();
        self.respond(response, dispatcher)
    }

    fn respond(&mut self, mut response: Response, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        let status = response.status().as_u16();
        match &self.request {
            Some((method, path)) => {
                if *method == Method::HEAD {
                    response.omit_body();
                }
                info!(peer = %self.peer, method = %method, path = %path, status, "request served");
            }
            None => info!(peer = %self.peer, status, "request rejected"),
        }

        let (writer, timeout) = response.finalize();
        self.writer = Some(writer);
        self.timer.restart(timeout);
        self.state = ConnectionState::SendingResponse;
        dispatcher.modify(&mut self.stream, Interest::WRITABLE, Target::Connection(self.handle))?;
        self.pump(dispatcher)
    }

    fn pump(&mut self, dispatcher: &mut Dispatcher) -> anyhow::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writer.transfer_to(&mut self.stream)?;
        if writer.has_data() {
            return Ok(());
        }

        self.writer = None;
        dispatcher.modify(&mut self.stream, Interest::READABLE, Target::Connection(self.handle))?;
        self.timer.restart(self.config.timeouts.linger());
        self.state = ConnectionState::Lingering;
        debug!(peer = %self.peer, "response sent, lingering");
        Ok(())
    }

    fn select_server(&self, request: &Request) -> usize {
        let default = self.group.first().copied().unwrap_or_default();
        let Some(host) = request.host() else {
            return default;
        };
        self.group
            .iter()
            .copied()
            .find(|&index| self.config.servers.get(index).is_some_and(|s| s.answers_to(host)))
            .unwrap_or(default)
    }

    fn server_config(&self) -> Option<&ServerConfig> {
        self.config.servers.get(self.server)
    }
}
