//! Listener lifecycle: bind, accept, drain, stop.
//!
//! ```text
//! Starting --bind ok--> Listening --shutdown--> Draining --drained/deadline--> Stopped
//!     \--bind/tls failure-------------------------------------------------------^
//! ```
//!
//! Shutdown stops accepting immediately, lets in-flight responses finish and
//! force-closes whatever is still open once the drain deadline passes.

use std::net::SocketAddr;
use std::time::Duration;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use hyper_util::server::graceful::{GracefulShutdown, Watcher};
use s3proxy_core::ProxyConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::service::ProxyService;
use crate::tls::{TlsFiles, load_acceptor};

/// Default deadline for in-flight connections once shutdown starts.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a transient accept failure.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// File descriptor exhaustion; same values on Linux and the BSDs.
#[cfg(unix)]
const EMFILE: i32 = 24;
#[cfg(unix)]
const ENFILE: i32 = 23;

/// Where and how to listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind, e.g. `0.0.0.0`.
    pub address: String,
    /// TCP port; `0` picks a free one.
    pub port: u16,
    /// Terminate TLS with these files when set.
    pub tls: Option<TlsFiles>,
    /// How long shutdown waits for in-flight connections.
    pub drain_timeout: Duration,
}

impl ServerConfig {
    /// Plain-HTTP listener on `address:port`.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            tls: None,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    /// Derive the listener settings from the gateway configuration.
    #[must_use]
    pub fn from_proxy_config(config: &ProxyConfig) -> Self {
        let tls = match (&config.tls_certificate, &config.tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles::new(cert, key)),
            _ => None,
        };
        Self {
            tls,
            ..Self::new(config.server_address.clone(), config.server_port)
        }
    }

    /// Terminate TLS with the given files.
    #[must_use]
    pub fn with_tls(mut self, files: TlsFiles) -> Self {
        self.tls = Some(files);
        self
    }

    /// Override the drain deadline.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Observable lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Binding the listener.
    Starting,
    /// Accepting connections.
    Listening,
    /// No longer accepting; waiting for in-flight connections.
    Draining,
    /// Listener closed and every connection finished or force-closed.
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// An HTTP(S) server in front of a [`ProxyService`].
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    service: ProxyService,
}

impl Server {
    /// Create a server; nothing is bound until [`Server::start`].
    #[must_use]
    pub fn new(config: ServerConfig, service: ProxyService) -> Self {
        Self { config, service }
    }

    /// Bind the listener and start accepting connections in the background.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let (state_tx, state_rx) = watch::channel(ServerState::Starting);

        let bound = self.bind().await;
        let (listener, acceptor, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                error!(error = %e, "server failed to start");
                transition(&state_tx, ServerState::Stopped);
                return Err(e);
            }
        };

        let shutdown = CancellationToken::new();
        let (result_tx, result_rx) = oneshot::channel();
        let serve = ServeLoop {
            listener,
            acceptor,
            service: self.service,
            shutdown: shutdown.clone(),
            state: state_tx,
            drain_timeout: self.config.drain_timeout,
        };

        transition(&serve.state, ServerState::Listening);
        info!(
            %local_addr,
            tls = serve.acceptor.is_some(),
            "server listening"
        );
        tokio::spawn(async move {
            let result = serve.run().await;
            if let Err(result) = result_tx.send(result) {
                debug!(?result, "server handle dropped before the result was read");
            }
        });

        Ok(ServerHandle {
            local_addr,
            state: state_rx,
            shutdown,
            result: result_rx,
        })
    }

    async fn bind(&self) -> Result<(TcpListener, Option<TlsAcceptor>, SocketAddr), ServerError> {
        let acceptor = self.config.tls.as_ref().map(load_acceptor).transpose()?;
        let address = format!("{}:{}", self.config.address, self.config.port);
        let listener = TcpListener::bind((self.config.address.as_str(), self.config.port))
            .await
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { address, source })?;
        Ok((listener, acceptor, local_addr))
    }
}

/// Control and observe a running [`Server`].
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: watch::Receiver<ServerState>,
    shutdown: CancellationToken,
    result: oneshot::Receiver<Result<(), ServerError>>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.clone()
    }

    /// Begin a graceful shutdown. Calling it again has no effect.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// A cloneable trigger for starting shutdown from another task.
    #[must_use]
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger(self.shutdown.clone())
    }

    /// Wait until the server has stopped.
    ///
    /// Returns [`ServerError::ShutdownTimeout`] when connections had to be
    /// force-closed.
    pub async fn wait(self) -> Result<(), ServerError> {
        self.result
            .await
            .unwrap_or_else(|_| Err(ServerError::Aborted))
    }
}

/// Starts a graceful shutdown of the server it was taken from.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger(CancellationToken);

impl ShutdownTrigger {
    /// Begin a graceful shutdown.
    pub fn trigger(&self) {
        self.0.cancel();
    }
}

fn transition(state: &watch::Sender<ServerState>, next: ServerState) {
    let previous = state.send_replace(next);
    info!(from = %previous, to = %next, "server state changed");
}

struct ServeLoop {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    service: ProxyService,
    shutdown: CancellationToken,
    state: watch::Sender<ServerState>,
    drain_timeout: Duration,
}

impl ServeLoop {
    async fn run(self) -> Result<(), ServerError> {
        let Self {
            listener,
            acceptor,
            service,
            shutdown,
            state,
            drain_timeout,
        } = self;

        let graceful = GracefulShutdown::new();
        let http = HttpConnBuilder::new(TokioExecutor::new());
        let mut connections = JoinSet::new();

        let failure = loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("shutdown requested, no longer accepting connections");
                    break None;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(%peer_addr, "accepted connection");
                        connections.spawn(serve_connection(
                            stream,
                            peer_addr,
                            acceptor.clone(),
                            http.clone(),
                            service.clone(),
                            graceful.watcher(),
                        ));
                    }
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!(error = %e, "transient accept failure, backing off");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => {
                        error!(error = %e, "listener failed");
                        break Some(ServerError::Listener(e));
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    match joined {
                        Err(e) if e.is_panic() => error!(error = %e, "connection task panicked"),
                        _ => {}
                    }
                }
            }
        };
        drop(listener);

        transition(&state, ServerState::Draining);
        info!(
            open_connections = connections.len(),
            timeout = ?drain_timeout,
            "draining connections"
        );
        let drained = tokio::time::timeout(drain_timeout, async {
            graceful.shutdown().await;
            while connections.join_next().await.is_some() {}
        })
        .await;

        let drain_result = match drained {
            Ok(()) => {
                info!("all connections drained");
                Ok(())
            }
            Err(_) => {
                let remaining = connections.len();
                warn!(remaining, timeout = ?drain_timeout, "drain deadline passed, closing connections");
                connections.abort_all();
                while connections.join_next().await.is_some() {}
                Err(ServerError::ShutdownTimeout {
                    timeout: drain_timeout,
                    remaining,
                })
            }
        };

        transition(&state, ServerState::Stopped);
        match failure {
            Some(e) => {
                if let Err(drain_err) = drain_result {
                    warn!(error = %drain_err, "drain did not complete after listener failure");
                }
                Err(e)
            }
            None => drain_result,
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    http: HttpConnBuilder<TokioExecutor>,
    service: ProxyService,
    watcher: Watcher,
) {
    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => drive(TokioIo::new(tls), peer_addr, &http, service, watcher).await,
            Err(e) => debug!(%peer_addr, error = %e, "TLS handshake failed"),
        },
        None => drive(TokioIo::new(stream), peer_addr, &http, service, watcher).await,
    }
}

async fn drive<I>(
    io: TokioIo<I>,
    peer_addr: SocketAddr,
    http: &HttpConnBuilder<TokioExecutor>,
    service: ProxyService,
    watcher: Watcher,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn = http.serve_connection(io, service);
    if let Err(e) = watcher.watch(conn.into_owned()).await {
        debug!(%peer_addr, error = %e, "connection closed with error");
    }
}

fn is_transient_accept_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    ) || is_fd_exhaustion(e)
}

#[cfg(unix)]
fn is_fd_exhaustion(e: &std::io::Error) -> bool {
    matches!(e.raw_os_error(), Some(EMFILE | ENFILE))
}

#[cfg(not(unix))]
fn is_fd_exhaustion(_e: &std::io::Error) -> bool {
    false
}
