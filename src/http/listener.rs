//! Accept loop
//!
//! A [`Listener`] owns the listening socket and spawns one thread per
//! accepted connection. Shutdown is cooperative: the accept loop and every
//! connection poll the shared [`CancelToken`] at `poll_interval`.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread;

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::config::ServerConfig;
use super::dispatch::Dispatcher;
use super::session::{from_tcp_stream, poll_fd, HttpSession, PollEvents};
use super::shell::serve_connection;
use super::stats::ServerStats;
use super::tls::TlsConfig;
use super::{Error, Result};

const BACKLOG: i32 = 1024;

/// Listening socket plus everything a connection needs
pub struct Listener {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    dispatcher: Arc<dyn Dispatcher>,
    tls: Option<Arc<TlsConfig>>,
    stats: Arc<ServerStats>,
    cancel: CancelToken,
}

/// Stops a running [`Listener`] from another thread
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancelToken,
}

impl ShutdownHandle {
    /// Stop accepting and ask every connection to wind down
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Keeps `active_connections` honest whichever way a connection ends
struct ConnectionGuard(Arc<ServerStats>);

impl ConnectionGuard {
    fn new(stats: Arc<ServerStats>) -> Self {
        stats.connection_opened();
        ConnectionGuard(stats)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.connection_closed();
    }
}

impl Listener {
    /// Bind a cleartext listener on the first address that works
    pub fn bind(
        addr: impl ToSocketAddrs,
        config: ServerConfig,
        dispatcher: impl Dispatcher,
    ) -> Result<Self> {
        let mut last_err = None;
        for addr in addr.to_socket_addrs()? {
            match bind_socket(addr) {
                Ok(listener) => return Self::from_std(listener, config, dispatcher),
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::Io(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no address to bind")
        })))
    }

    /// Wrap an already bound socket
    pub fn from_std(
        listener: TcpListener,
        config: ServerConfig,
        dispatcher: impl Dispatcher,
    ) -> Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Listener {
            listener,
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            tls: None,
            stats: Arc::new(ServerStats::new()),
            cancel: CancelToken::new(),
        })
    }

    /// Terminate TLS on every accepted connection
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(Arc::new(tls));
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.cancel.clone(),
        }
    }

    /// Accept connections until shut down
    ///
    /// Connections still open when this returns keep running until their
    /// drivers notice the cancellation.
    pub fn serve(&self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, tls = self.tls.is_some(), "listening");

        while !self.cancel.is_cancelled() {
            let fd = self.listener.as_raw_fd();
            if !poll_fd(fd, PollEvents::Read, Some(self.config.poll_interval))? {
                continue;
            }
            match self.listener.accept() {
                Ok((stream, peer)) => self.spawn_connection(stream, peer),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }

        info!(%addr, "listener stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let guard = ConnectionGuard::new(Arc::clone(&self.stats));
        let config = Arc::clone(&self.config);
        let dispatcher = Arc::clone(&self.dispatcher);
        let stats = Arc::clone(&self.stats);
        let tls = self.tls.clone();
        let cancel = self.cancel.child();

        let spawned = thread::Builder::new()
            .name(format!("conn-{peer}"))
            .spawn(move || {
                let _guard = guard;
                debug!(%peer, "connection accepted");
                let result = run_connection(stream, tls, config, dispatcher, stats, cancel);
                match result {
                    Ok(()) => debug!(%peer, "connection closed"),
                    Err(e) => debug!(%peer, error = %e, "connection ended with error"),
                }
            });
        if let Err(e) = spawned {
            warn!(%peer, error = %e, "failed to spawn connection thread");
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("addr", &self.listener.local_addr().ok())
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

fn bind_socket(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SockProtocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    Ok(socket.into())
}

fn run_connection(
    stream: TcpStream,
    tls: Option<Arc<TlsConfig>>,
    config: Arc<ServerConfig>,
    dispatcher: Arc<dyn Dispatcher>,
    stats: Arc<ServerStats>,
    cancel: CancelToken,
) -> Result<()> {
    // accepted sockets may inherit O_NONBLOCK from the listener
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;

    match tls {
        Some(tls) => {
            stream.set_read_timeout(Some(config.header_timeout))?;
            let ops = tls.accept(stream)?;
            ops.get_ref().set_read_timeout(None)?;
            debug!(version = ops.version(), "TLS established");
            serve_connection(HttpSession::new(ops), config, dispatcher, stats, cancel)
        }
        None => serve_connection(from_tcp_stream(stream), config, dispatcher, stats, cancel),
    }
}
