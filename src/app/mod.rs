//! Server lifecycle: create, register routes, start, stop.
//!
//! ```text
//! Created ──start()──▶ Listening ──stop()──▶ Stopped
//! ```
//!
//! Routes can only be registered while the app is `Created`. `start` freezes
//! the route table behind an `Arc`, so the serving path never takes a lock.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::dispatch::{self, CancelHandle, Dispatcher, FailureReporter, TracingReporter};
use crate::http::Method;
use crate::router::{BoxedHandler, Handler, RouteError, Router, handler};
use crate::server::{Server, ServerError, ShutdownReport};

pub mod config;

pub use config::{Config, ConfigError, ValidationError};

/// Where an [`App`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Listening => "listening",
            Self::Stopped => "stopped",
        })
    }
}

struct Running {
    local_addr: SocketAddr,
    stop: CancelHandle,
    task: JoinHandle<ShutdownReport>,
}

/// An HTTP application: a route table plus the server that serves it.
///
/// Each `App` is independent; several can run in one process.
///
/// # Examples
///
/// ```rust,no_run
/// use ligero::{App, HandlerError, Request, ResponseWriter};
///
/// async fn hello(req: Request, mut res: ResponseWriter) -> Result<(), HandlerError> {
///     res.send(format!("Hello, {}!", req.param("name").unwrap_or("world")))?;
///     Ok(())
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut app = App::create(8080);
///     app.get("/hello/{name}", hello)?;
///
///     app.start().await?;
///     tokio::signal::ctrl_c().await?;
///     app.stop().await?;
///     Ok(())
/// }
/// ```
pub struct App {
    config: Config,
    router: Arc<Router>,
    fallback: Option<BoxedHandler>,
    reporter: Arc<dyn FailureReporter>,
    state: ServerState,
    running: Option<Running>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("routes", &self.router)
            .field("state", &self.state)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl App {
    /// An app on `port` with default settings.
    pub fn create(port: u16) -> Self {
        Self::with_config(Config::new(port))
    }

    /// An app using `config`. The config is validated by [`start`](Self::start).
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            router: Arc::new(Router::new()),
            fallback: None,
            reporter: Arc::new(TracingReporter),
            state: ServerState::Created,
            running: None,
        }
    }

    /// Sends handler failures to `reporter` instead of the tracing log.
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl FailureReporter) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// The bound address while listening. Useful with port `0`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Registered routes as `(method, pattern)` in registration order.
    pub fn routes(&self) -> Vec<(Method, String)> {
        self.router.routes()
    }

    /// Registers `handler` for `method` and `pattern`.
    ///
    /// # Errors
    ///
    /// - [`RouteError::ServerAlreadyStarted`] once [`start`](Self::start) has been called.
    /// - [`RouteError::InvalidPattern`] / [`RouteError::Duplicate`] from the route table.
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, RouteError> {
        if self.state != ServerState::Created {
            return Err(RouteError::ServerAlreadyStarted {
                route: format!("{method} {pattern}"),
            });
        }
        Arc::make_mut(&mut self.router).register(method, pattern, handler)?;
        Ok(self)
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::Get, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::Post, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::Put, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::Delete, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::Patch, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::Head, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::Options, pattern, handler)
    }

    /// Handler for requests that match no route. Replaces any earlier fallback.
    pub fn fallback(&mut self, handler: impl Handler) -> Result<&mut Self, RouteError> {
        if self.state != ServerState::Created {
            return Err(RouteError::ServerAlreadyStarted {
                route: "fallback".to_owned(),
            });
        }
        self.fallback = Some(handler::boxed(handler));
        Ok(self)
    }

    /// Binds the listener and starts serving in the background.
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyStarted`] if called more than once.
    /// - [`ServerError::Config`] if the configuration is invalid.
    /// - [`ServerError::Bind`] if the address cannot be bound.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.state != ServerState::Created {
            return Err(ServerError::AlreadyStarted);
        }
        self.config.validate()?;

        let server = Server::bind(self.config.bind_address())
            .await?
            .max_request_size(self.config.max_request_size);
        let local_addr = server.local_addr();

        let (stop, signal) = dispatch::channel();
        let dispatcher = Dispatcher::from_shared(Arc::clone(&self.router))
            .with_boxed_fallback(self.fallback.clone())
            .with_context_path(&self.config.context_path)
            .with_handler_timeout(self.config.handler_timeout())
            .with_shared_reporter(Arc::clone(&self.reporter))
            .with_cancellation(signal.clone());

        for (method, pattern) in self.router.routes() {
            info!(%method, pattern = %pattern, "route");
        }

        let task = tokio::spawn(server.run(dispatcher, signal, self.config.shutdown_grace()));
        self.running = Some(Running {
            local_addr,
            stop,
            task,
        });
        self.state = ServerState::Listening;

        info!(
            address = %local_addr,
            routes = self.router.len(),
            context_path = self.config.context_path().as_deref().unwrap_or("/"),
            "server started"
        );
        Ok(local_addr)
    }

    /// Stops accepting, cancels in-flight requests cooperatively and waits for
    /// them up to the configured grace period.
    ///
    /// # Errors
    ///
    /// - [`ServerError::NotListening`] if the app is not listening.
    /// - [`ServerError::Join`] if the accept loop panicked.
    pub async fn stop(&mut self) -> Result<ShutdownReport, ServerError> {
        let Some(running) = self.running.take() else {
            return Err(ServerError::NotListening);
        };

        info!(address = %running.local_addr, "stopping server");
        running.stop.cancel();
        self.state = ServerState::Stopped;
        Ok(running.task.await?)
    }

    /// Starts, waits for `signal`, then stops.
    ///
    /// ```rust,no_run
    /// # async fn run() -> Result<(), ligero::ServerError> {
    /// let mut app = ligero::App::create(8080);
    /// app.run_until(async {
    ///     let _ = tokio::signal::ctrl_c().await;
    /// })
    /// .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_until<F>(&mut self, signal: F) -> Result<ShutdownReport, ServerError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        signal.await;
        self.stop().await
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            debug!(address = %running.local_addr, "app dropped while listening, signalling shutdown");
            running.stop.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::http::{Request, ResponseWriter};
    use crate::router::HandlerError;

    fn local() -> Config {
        Config::new(0).with_host("127.0.0.1")
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    async fn ok(_req: Request, mut res: ResponseWriter) -> Result<(), HandlerError> {
        res.send("ok")?;
        Ok(())
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let mut app = App::with_config(local());
        assert_eq!(app.state(), ServerState::Created);
        assert!(app.local_addr().is_none());

        app.get("/", ok).unwrap();
        let addr = app.start().await.unwrap();
        assert_eq!(app.state(), ServerState::Listening);
        assert_eq!(app.local_addr(), Some(addr));
        assert_ne!(addr.port(), 0);

        let response = get(addr, "/").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("ok"));

        let report = app.stop().await.unwrap();
        assert_eq!(report.aborted, 0);
        assert_eq!(app.state(), ServerState::Stopped);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn registration_after_start_is_rejected() {
        let mut app = App::with_config(local());
        app.get("/", ok).unwrap();
        app.start().await.unwrap();

        let err = app.get("/late", ok).unwrap_err();
        assert!(matches!(err, RouteError::ServerAlreadyStarted { ref route } if route == "GET /late"));
        assert!(matches!(
            app.fallback(ok).unwrap_err(),
            RouteError::ServerAlreadyStarted { .. }
        ));
        assert_eq!(app.routes().len(), 1);

        app.stop().await.unwrap();
    }

    #[tokio::test]
    async fn double_start_and_early_stop_fail() {
        let mut app = App::with_config(local());
        assert!(matches!(app.stop().await, Err(ServerError::NotListening)));

        app.start().await.unwrap();
        assert!(matches!(app.start().await, Err(ServerError::AlreadyStarted)));

        app.stop().await.unwrap();
        assert!(matches!(app.start().await, Err(ServerError::AlreadyStarted)));
        assert!(matches!(app.stop().await, Err(ServerError::NotListening)));
    }

    #[tokio::test]
    async fn invalid_config_fails_start() {
        let mut app = App::with_config(local().with_max_request_size(0));
        assert!(matches!(app.start().await, Err(ServerError::Config(_))));
        assert_eq!(app.state(), ServerState::Created);
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let mut first = App::with_config(local());
        let addr = first.start().await.unwrap();

        let mut second = App::with_config(local().with_port(addr.port()));
        assert!(matches!(second.start().await, Err(ServerError::Bind { .. })));

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_drains_slow_request_within_grace() {
        let mut app = App::with_config(local().with_shutdown_grace(Duration::from_secs(5)));
        app.get("/slow", |_req: Request, mut res: ResponseWriter| async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            res.send("done")?;
            Ok::<(), HandlerError>(())
        })
        .unwrap();
        let addr = app.start().await.unwrap();

        let in_flight = tokio::spawn(get(addr, "/slow"));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let report = app.stop().await.unwrap();
        assert_eq!(report.aborted, 0);

        let response = in_flight.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("done"));
    }

    #[tokio::test]
    async fn stop_cancels_cooperative_handlers() {
        let mut app = App::with_config(local());
        app.get("/watch", |req: Request, mut res: ResponseWriter| async move {
            tokio::select! {
                () = req.cancellation().cancelled() => {
                    res.status(crate::StatusCode::ServiceUnavailable)?.send("shutting down")?;
                }
                () = tokio::time::sleep(Duration::from_secs(30)) => {
                    res.send("finished")?;
                }
            }
            Ok::<(), HandlerError>(())
        })
        .unwrap();
        let addr = app.start().await.unwrap();

        let in_flight = tokio::spawn(get(addr, "/watch"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        app.stop().await.unwrap();

        let response = in_flight.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(response.ends_with("shutting down"));
    }

    #[tokio::test]
    async fn routes_are_listed_with_context_path_applied_at_dispatch() {
        let mut app = App::with_config(local().with_context_path("/api"));
        app.get("/ping", ok).unwrap();
        assert_eq!(app.routes(), vec![(Method::Get, "/ping".to_owned())]);

        let addr = app.start().await.unwrap();
        assert!(get(addr, "/api/ping").await.starts_with("HTTP/1.1 200 OK"));
        assert!(get(addr, "/ping").await.starts_with("HTTP/1.1 404 Not Found"));
        app.stop().await.unwrap();
    }

    #[tokio::test]
    async fn dropping_app_shuts_listener_down() {
        let mut app = App::with_config(local());
        let addr = app.start().await.unwrap();
        drop(app);

        let mut refused = false;
        for _ in 0..50 {
            if TcpStream::connect(addr).await.is_err() {
                refused = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(refused);
    }
}
