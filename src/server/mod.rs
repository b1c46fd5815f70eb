//! Async TCP transport using Tokio.
//!
//! Accepts TCP connections, parses HTTP/1.1 requests with `httparse` and hands
//! each one to a [`Dispatcher`]. Connections are persistent (keep-alive) unless
//! the client asks otherwise or the server is shutting down.
//!
//! Shutdown is driven by a [`Cancellation`]: once it fires the accept loop
//! stops, idle connections close, and in-flight requests get a grace period to
//! finish before their connections are aborted.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::app::{ConfigError, config::duration_ms};
use crate::dispatch::{Cancellation, Dispatcher};
use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server has already been started")]
    AlreadyStarted,

    #[error("server is not listening")]
    NotListening,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("accept loop terminated abnormally: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Default maximum size of a complete HTTP request (8 MiB).
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// What happened to open connections during shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections that finished within the grace period.
    pub drained: usize,
    /// Connections still running when the grace period ran out.
    pub aborted: usize,
}

/// A bound listener, ready to serve.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
///
/// use ligero::dispatch::{self, Dispatcher};
/// use ligero::router::Router;
/// use ligero::server::Server;
/// use ligero::{Request, ResponseWriter};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/", |_req: Request, mut res: ResponseWriter| async move {
///         res.send("Hello!")
///     })?;
///
///     let (stop, signal) = dispatch::channel();
///     let server = Server::bind("127.0.0.1:8080").await?;
///     let serving = tokio::spawn(server.run(
///         Dispatcher::new(router),
///         signal,
///         Duration::from_secs(5),
///     ));
///
///     tokio::signal::ctrl_c().await?;
///     stop.cancel();
///     serving.await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_request_size: usize,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Largest request (head plus body) accepted before answering `413`.
    #[must_use]
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }

    /// Accepts connections until `shutdown` fires, then drains.
    ///
    /// Connections still open `grace` after shutdown are aborted; the returned
    /// report says how many.
    pub async fn run(self, dispatcher: Dispatcher, shutdown: Cancellation, grace: Duration) -> ShutdownReport {
        info!(address = %self.local_addr, "listening");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!(in_flight = connections.len(), "shutdown requested, draining connections");
                    break;
                }

                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    debug!(peer = %peer_addr, "connection accepted");
                    let connection = Connection {
                        peer_addr,
                        dispatcher: dispatcher.clone(),
                        shutdown: shutdown.clone(),
                        max_request_size: self.max_request_size,
                    };

                    connections.spawn(async move {
                        if let Err(e) = connection.serve(stream).await {
                            warn!(peer = %peer_addr, error = %e, "connection closed with error");
                        }
                    });
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(self.listener);
        let report = drain(&mut connections, grace).await;
        info!(
            drained = report.drained,
            aborted = report.aborted,
            "server stopped"
        );
        report
    }
}

async fn drain(connections: &mut JoinSet<()>, grace: Duration) -> ShutdownReport {
    let mut drained = 0;
    let finished = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {
            drained += 1;
        }
    })
    .await;

    if finished.is_ok() {
        return ShutdownReport { drained, aborted: 0 };
    }

    while connections.try_join_next().is_some() {
        drained += 1;
    }
    let aborted = connections.len();
    warn!(
        aborted,
        grace_ms = duration_ms(grace),
        "grace period elapsed, aborting in-flight connections"
    );
    connections.shutdown().await;
    ShutdownReport { drained, aborted }
}

/// One accepted TCP connection and everything it needs to serve requests.
struct Connection {
    peer_addr: SocketAddr,
    dispatcher: Dispatcher,
    shutdown: Cancellation,
    max_request_size: usize,
}

impl Connection {
    /// Serves requests until the peer closes, asks for `Connection: close`,
    /// sends something unparseable, or the server shuts down.
    async fn serve(self, mut stream: TcpStream) -> Result<(), std::io::Error> {
        let peer_addr = self.peer_addr;
        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
        let mut need_more = true;

        loop {
            if need_more {
                let idle = buf.is_empty();
                let bytes_read = tokio::select! {
                    biased;

                    () = self.shutdown.cancelled(), if idle => {
                        debug!(peer = %peer_addr, "closing idle connection for shutdown");
                        break;
                    }

                    read = stream.read_buf(&mut buf) => read?,
                };

                if bytes_read == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
            }

            if buf.len() > self.max_request_size {
                warn!(peer = %peer_addr, "request too large, sending 413");
                write_error(&mut stream, StatusCode::PayloadTooLarge).await?;
                break;
            }

            let (request, body_offset) = match Request::parse(&buf) {
                Ok(pair) => pair,
                Err(RequestError::Incomplete) => {
                    need_more = true;
                    continue;
                }
                Err(RequestError::UnsupportedTransferEncoding(encoding)) => {
                    warn!(peer = %peer_addr, %encoding, "unsupported transfer encoding, sending 501");
                    write_error(&mut stream, StatusCode::NotImplemented).await?;
                    break;
                }
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                    let response = Response::new(StatusCode::BadRequest)
                        .body(format!("Bad Request: {e}"))
                        .keep_alive(false);
                    stream.write_all(&response.into_bytes()).await?;
                    break;
                }
            };

            let declared = request.content_length().unwrap_or(0);
            let total_needed = match body_offset.checked_add(declared) {
                Some(total) if total <= self.max_request_size => total,
                _ => {
                    warn!(peer = %peer_addr, declared, "declared body too large, sending 413");
                    write_error(&mut stream, StatusCode::PayloadTooLarge).await?;
                    break;
                }
            };
            if buf.len() < total_needed {
                need_more = true;
                continue;
            }

            let wants_keep_alive = request.is_keep_alive();
            debug!(
                peer = %peer_addr,
                method = %request.method(),
                path = %request.path(),
                "dispatching request"
            );

            let response = self.dispatcher.dispatch(request).await;
            let keep_alive = wants_keep_alive && !self.shutdown.is_cancelled();
            stream
                .write_all(&response.keep_alive(keep_alive).into_bytes())
                .await?;
            stream.flush().await?;

            buf.advance(total_needed);

            if !keep_alive {
                debug!(peer = %peer_addr, "closing connection after response");
                break;
            }
            need_more = buf.is_empty();
        }

        Ok(())
    }
}

async fn write_error(stream: &mut TcpStream, status: StatusCode) -> Result<(), std::io::Error> {
    let response = Response::new(status)
        .body(status.canonical_reason())
        .keep_alive(false);
    stream.write_all(&response.into_bytes()).await
}
