//! HTTP/1.1 connection driver
//!
//! Reads requests off the session, runs the dispatcher on a handler thread
//! and writes the response, looping while the connection stays persistent.
//!
//! Three deadlines apply. While no byte of a request has arrived the idle
//! timeout runs; an expired idle connection is closed silently. From the
//! first byte the header timeout runs until the header section is complete,
//! so a peer trickling bytes cannot hold the connection. The request
//! timeout, also counted from the first byte, covers the body and the
//! handler. Header and request timeouts answer 408 (or 503 when the handler
//! is the slow part) and close the connection.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::cancel::CancelToken;
use super::chunked::ChunkedEncoder;
use super::config::ServerConfig;
use super::dispatch::{spawn_handler, Dispatcher, HandlerMessage, RequestContext, HANDLER_QUEUE_DEPTH};
use super::parser::{ParseStatus, ParserLimits, RequestParser};
use super::session::{HttpSession, SessionOps};
use super::stats::ServerStats;
use super::{Error, HttpRequest, HttpResponse, Method, Result, Status, TimeoutKind, Version};

const READ_BUFFER_SIZE: usize = 8192;

/// Serves one HTTP/1.x connection
pub struct Http1Server<S: SessionOps> {
    session: HttpSession<S>,
    config: Arc<ServerConfig>,
    dispatcher: Arc<dyn Dispatcher>,
    stats: Arc<ServerStats>,
    cancel: CancelToken,
    parser: RequestParser,
    buffer: Vec<u8>,
}

/// What the handler produced, as far as the connection is concerned
enum Outcome {
    /// Response complete; the connection may carry another request
    KeepAlive,
    Close,
}

impl<S: SessionOps> Http1Server<S> {
    pub fn new(
        session: HttpSession<S>,
        config: Arc<ServerConfig>,
        dispatcher: Arc<dyn Dispatcher>,
        stats: Arc<ServerStats>,
        cancel: CancelToken,
    ) -> Self {
        let parser = RequestParser::new(ParserLimits::from(config.as_ref()));
        Http1Server {
            session,
            config,
            dispatcher,
            stats,
            cancel,
            parser,
            buffer: Vec::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Serve requests until the connection closes
    ///
    /// `initial` holds bytes already read while selecting the protocol.
    pub fn serve(mut self, initial: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(initial);
        let result = self.run();
        let _ = self.session.close();
        result
    }

    fn run(&mut self) -> Result<()> {
        loop {
            let Some((request, started)) = self.read_request()? else {
                return Ok(());
            };
            let keep_alive = request.keep_alive() && !self.cancel.is_cancelled();
            match self.respond(request, keep_alive, started)? {
                Outcome::KeepAlive => continue,
                Outcome::Close => return Ok(()),
            }
        }
    }

    /// Next request and the moment its first byte arrived
    ///
    /// `None` when the peer closed or the connection went idle between requests.
    fn read_request(&mut self) -> Result<Option<(HttpRequest, Instant)>> {
        let idle_since = Instant::now();
        let mut started = (!self.buffer.is_empty()).then(Instant::now);
        let mut chunk = vec![0u8; READ_BUFFER_SIZE];

        loop {
            if !self.buffer.is_empty() {
                match self.parser.parse(&self.buffer) {
                    Ok(ParseStatus::Complete { request, consumed }) => {
                        self.buffer.drain(..consumed);
                        return Ok(Some((request, started.unwrap_or(idle_since))));
                    }
                    Ok(ParseStatus::Partial) => {}
                    Err(e) => {
                        warn!(error = %e, "rejecting request");
                        self.write_error(e.status());
                        return Err(e);
                    }
                }
            }

            let (deadline, kind) = match started {
                None => (idle_since + self.config.idle_timeout, TimeoutKind::Idle),
                Some(t) if !self.parser.headers_complete() => {
                    let limit = self.config.header_timeout.min(self.config.request_timeout);
                    (t + limit, TimeoutKind::Header)
                }
                Some(t) => (t + self.config.request_timeout, TimeoutKind::Request),
            };

            if started.is_none() && self.cancel.is_cancelled() {
                debug!("closing idle connection for shutdown");
                return Ok(None);
            }

            let now = Instant::now();
            if now >= deadline {
                if kind == TimeoutKind::Idle {
                    debug!("idle timeout");
                    return Ok(None);
                }
                warn!(timeout = %kind, buffered = self.buffer.len(), "request timed out");
                self.write_error(Status::REQUEST_TIMEOUT);
                return Err(Error::Timeout(kind));
            }

            let wait = (deadline - now).min(self.config.poll_interval);
            if !self.session.wait_readable(wait)? {
                continue;
            }
            let n = self.session.read(&mut chunk)?;
            if n == 0 {
                if started.is_none() {
                    debug!("peer closed the connection");
                    return Ok(None);
                }
                return Err(Error::ConnectionClosed);
            }
            if started.is_none() {
                started = Some(Instant::now());
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn respond(&mut self, request: HttpRequest, keep_alive: bool, started: Instant) -> Result<Outcome> {
        self.stats.request();
        debug!(method = request.method().as_str(), path = request.path(), version = %request.version(), "request");

        let head = request.method() == Method::Head;
        let version = request.version();
        let cancel = self.cancel.child();
        let (tx, rx) = mpsc::sync_channel(HANDLER_QUEUE_DEPTH);
        let ctx = RequestContext::new(None, cancel.clone());

        if let Err(e) = spawn_handler(Arc::clone(&self.dispatcher), request, ctx, 0, tx, None) {
            warn!(error = %e, "failed to start handler");
            self.write_error(Status::INTERNAL_SERVER_ERROR);
            return Ok(Outcome::Close);
        }

        let deadline = started + self.config.request_timeout;
        let result = self.write_response(&rx, deadline, head, version, keep_alive);
        // the handler is done or abandoned either way
        cancel.cancel();
        result
    }

    fn write_response(
        &mut self,
        rx: &Receiver<HandlerMessage>,
        deadline: Instant,
        head: bool,
        version: Version,
        mut keep_alive: bool,
    ) -> Result<Outcome> {
        let wait = deadline.saturating_duration_since(Instant::now());
        let (mut response, streaming) = match recv(rx, wait) {
            Ok(HandlerMessage::Response {
                response,
                streaming,
                ..
            }) => (response, streaming),
            Ok(HandlerMessage::Failed { .. }) | Err(RecvTimeoutError::Disconnected) => {
                self.write_error(Status::INTERNAL_SERVER_ERROR);
                return Ok(Outcome::Close);
            }
            Ok(_) => {
                return Err(Error::Protocol("handler sent body before response".to_string()));
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("handler exceeded the request timeout");
                self.write_error(Status::SERVICE_UNAVAILABLE);
                return Err(Error::Timeout(TimeoutKind::Request));
            }
        };

        let no_body = head || response.status().forbids_body();
        let chunked = streaming && !no_body && version == Version::Http11;
        if streaming && !no_body && !chunked {
            // HTTP/1.0 has no chunked coding; the body ends when we close
            keep_alive = false;
        }
        set_connection_header(&mut response, version, keep_alive);

        if !streaming {
            let body_len = response.body().len();
            let mut wire = response.to_wire();
            if no_body {
                wire.truncate(wire.len() - body_len);
            }
            self.session.write_all(&wire)?;
            return Ok(if keep_alive { Outcome::KeepAlive } else { Outcome::Close });
        }

        response.headers_mut().remove("Content-Length");
        if chunked {
            response.headers_mut().set("Transfer-Encoding", "chunked");
        }
        let mut head_bytes = Vec::with_capacity(256);
        response.write_head(&mut head_bytes);
        self.session.write_all(&head_bytes)?;
        if no_body {
            return Ok(if keep_alive { Outcome::KeepAlive } else { Outcome::Close });
        }

        self.stream_body(rx, chunked)?;
        Ok(if keep_alive { Outcome::KeepAlive } else { Outcome::Close })
    }

    fn stream_body(&mut self, rx: &Receiver<HandlerMessage>, chunked: bool) -> Result<()> {
        loop {
            match recv(rx, self.config.request_timeout) {
                Ok(HandlerMessage::Data { data, .. }) => {
                    if chunked {
                        ChunkedEncoder::new(&mut self.session).write_chunk(&data)?;
                    } else {
                        self.session.write_all(&data)?;
                    }
                }
                Ok(HandlerMessage::End { .. }) => {
                    if chunked {
                        ChunkedEncoder::new(&mut self.session).finish()?;
                    }
                    return Ok(());
                }
                Ok(HandlerMessage::Failed { panicked, .. }) => {
                    // headers are out; all we can do is cut the body short
                    return Err(Error::Protocol(if panicked {
                        "handler panicked while streaming".to_string()
                    } else {
                        "body producer failed".to_string()
                    }));
                }
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => return Err(Error::Timeout(TimeoutKind::Request)),
                Err(RecvTimeoutError::Disconnected) => return Err(Error::ConnectionClosed),
            }
        }
    }

    /// Best-effort error response; the connection is closed afterwards
    fn write_error(&mut self, status: Status) {
        let response = HttpResponse::builder()
            .status(status)
            .header("Content-Type", "text/plain")
            .header("Connection", "close")
            .body(status.reason_phrase())
            .build();
        if let Err(e) = self.session.write_all(&response.to_wire()) {
            debug!(error = %e, "failed to write error response");
        }
    }
}

fn recv(rx: &Receiver<HandlerMessage>, timeout: Duration) -> std::result::Result<HandlerMessage, RecvTimeoutError> {
    rx.recv_timeout(timeout)
}

fn set_connection_header(response: &mut HttpResponse, version: Version, keep_alive: bool) {
    if !keep_alive {
        response.headers_mut().set("Connection", "close");
    } else if version == Version::Http10 {
        response.headers_mut().set("Connection", "keep-alive");
    }
}
