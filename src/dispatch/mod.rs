//! Per-request dispatch: resolve, run the handler in isolation, finalize.
//!
//! [`Dispatcher::dispatch`] is the single entry point used by the transport.
//! It always produces exactly one [`Response`]:
//!
//! | Outcome                          | Response                          |
//! |----------------------------------|-----------------------------------|
//! | no route matches the path        | `404` (or the fallback handler)   |
//! | path matches, method does not    | `405` with an `Allow` header      |
//! | handler sends a response         | that response                     |
//! | handler returns without sending  | `204`, or the status it chose     |
//! | handler returns `Err` or panics  | `500`, failure reported           |
//! | handler exceeds its deadline     | `504`, task aborted, reported     |
//!
//! Every handler runs in its own tokio task, so a panic unwinds that task
//! only. The dispatcher holds no per-request state and is cheap to clone.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::{JoinError, JoinHandle};
use tracing::{info, trace};

use crate::http::{Method, Request, Response, ResponseWriter, StatusCode};
use crate::router::{BoxedHandler, Handler, HandlerResult, Resolution, Router, handler};

mod cancel;
mod report;

pub use cancel::{CancelHandle, Cancellation, channel};
pub use report::{DispatchFailure, FailureKind, FailureReporter, TracingReporter};

/// Lifecycle of a single dispatch, emitted in `trace`-level events.
///
/// `Received → Resolving → {NotFound | MethodNotAllowed | Dispatching}`, then
/// `HandlerRunning → {Completed | Failed}`, and finally `ResponseSent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Resolving,
    NotFound,
    MethodNotAllowed,
    Dispatching,
    HandlerRunning,
    Completed,
    Failed,
    ResponseSent,
}

impl DispatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Resolving => "resolving",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::Dispatching => "dispatching",
            Self::HandlerRunning => "handler_running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::ResponseSent => "response_sent",
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn transition(state: DispatchState, method: &Method, path: &str) {
    trace!(state = %state, %method, path, "dispatch state");
}

/// Resolves requests against a frozen [`Router`] and runs the matched handler.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use ligero::dispatch::Dispatcher;
/// use ligero::http::{Method, StatusCode};
/// use ligero::router::Router;
/// use ligero::{HandlerError, Request, ResponseWriter};
///
/// async fn show(req: Request, mut res: ResponseWriter) -> Result<(), HandlerError> {
///     res.send(format!("user {}", req.param("id").unwrap_or("?")))?;
///     Ok(())
/// }
///
/// let mut router = Router::new();
/// router.get("/users/{id}", show).unwrap();
/// let dispatcher = Dispatcher::new(router);
///
/// let response = dispatcher
///     .dispatch(Request::builder(Method::Get, "/users/42").build())
///     .await;
/// assert_eq!(response.status(), StatusCode::Ok);
/// assert_eq!(response.body_bytes().as_ref(), b"user 42");
///
/// let response = dispatcher
///     .dispatch(Request::builder(Method::Delete, "/users/42").build())
///     .await;
/// assert_eq!(response.status(), StatusCode::MethodNotAllowed);
/// assert_eq!(response.headers().get("allow"), Some("GET, HEAD"));
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<Router>,
    fallback: Option<BoxedHandler>,
    context_path: Option<Arc<str>>,
    handler_timeout: Option<Duration>,
    reporter: Arc<dyn FailureReporter>,
    cancellation: Cancellation,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.router.len())
            .field("fallback", &self.fallback.is_some())
            .field("context_path", &self.context_path)
            .field("handler_timeout", &self.handler_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Freezes `router` and builds a dispatcher with no fallback, no context
    /// path, no deadline and the [`TracingReporter`].
    pub fn new(router: Router) -> Self {
        Self::from_shared(Arc::new(router))
    }

    pub(crate) fn from_shared(router: Arc<Router>) -> Self {
        Self {
            router,
            fallback: None,
            context_path: None,
            handler_timeout: None,
            reporter: Arc::new(TracingReporter),
            cancellation: Cancellation::never(),
        }
    }

    /// Handler for requests no route matches.
    #[must_use]
    pub fn with_fallback(mut self, handler: impl Handler) -> Self {
        self.fallback = Some(handler::boxed(handler));
        self
    }

    pub(crate) fn with_boxed_fallback(mut self, handler: Option<BoxedHandler>) -> Self {
        self.fallback = handler;
        self
    }

    /// Prefix stripped from request paths before routing. Paths outside it are `404`.
    #[must_use]
    pub fn with_context_path(mut self, context_path: &str) -> Self {
        self.context_path = normalize_context_path(context_path).map(Arc::from);
        self
    }

    /// Deadline for each handler invocation.
    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: impl FailureReporter) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub(crate) fn with_shared_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Signal attached to every dispatched request.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Produces the single response for `request`.
    pub async fn dispatch(&self, request: Request) -> Response {
        let started = Instant::now();
        let method = request.method().clone();
        let path = request.path().to_owned();
        transition(DispatchState::Received, &method, &path);

        let mut response = self.respond(request).await;
        if method == Method::Head {
            response = response.omit_body(true);
        }

        transition(DispatchState::ResponseSent, &method, &path);
        info!(
            %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "request handled"
        );
        response
    }

    async fn respond(&self, mut request: Request) -> Response {
        let method = request.method().clone();
        let path = request.path().to_owned();

        transition(DispatchState::Resolving, &method, &path);
        let Some(route_path) = self.strip_context_path(&path) else {
            transition(DispatchState::NotFound, &method, &path);
            return not_found();
        };

        match self.router.resolve(&method, route_path) {
            Resolution::Matched(found) => {
                transition(DispatchState::Dispatching, &method, &path);
                let (handler, params, pattern) = found.into_parts();
                request.set_params(params);
                self.run(handler, request, Some(pattern)).await
            }
            Resolution::MethodNotAllowed { allowed } => {
                transition(DispatchState::MethodNotAllowed, &method, &path);
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                Response::new(StatusCode::MethodNotAllowed)
                    .header("Allow", allow)
                    .body(StatusCode::MethodNotAllowed.canonical_reason())
            }
            Resolution::NotFound => match &self.fallback {
                Some(fallback) => {
                    transition(DispatchState::Dispatching, &method, &path);
                    self.run(BoxedHandler::clone(fallback), request, None).await
                }
                None => {
                    transition(DispatchState::NotFound, &method, &path);
                    not_found()
                }
            },
        }
    }

    fn strip_context_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        let Some(prefix) = self.context_path.as_deref() else {
            return Some(path);
        };
        match path.strip_prefix(prefix) {
            Some("") => Some("/"),
            Some(rest) if rest.starts_with('/') => Some(rest),
            _ => None,
        }
    }

    async fn run(
        &self,
        handler: BoxedHandler,
        mut request: Request,
        pattern: Option<String>,
    ) -> Response {
        let method = request.method().clone();
        let path = request.path().to_owned();
        request.set_cancellation(self.cancellation.clone());

        let writer = ResponseWriter::new();
        let observer = writer.share();

        transition(DispatchState::HandlerRunning, &method, &path);
        let mut task = HandlerTask(tokio::spawn(async move { handler.call(request, writer).await }));

        let joined = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task.0).await {
                Ok(joined) => joined,
                Err(_elapsed) => {
                    drop(task);
                    observer.seal();
                    return self.fail(
                        method,
                        path,
                        pattern,
                        FailureKind::Timeout(limit),
                        StatusCode::GatewayTimeout,
                    );
                }
            },
            None => (&mut task.0).await,
        };

        let kind = match joined {
            Ok(Ok(())) => {
                transition(DispatchState::Completed, &method, &path);
                return observer.finish().unwrap_or_default();
            }
            Ok(Err(err)) => FailureKind::Error(err.to_string()),
            Err(join_err) => join_failure(join_err),
        };

        observer.seal();
        self.fail(method, path, pattern, kind, StatusCode::InternalServerError)
    }

    fn fail(
        &self,
        method: Method,
        path: String,
        pattern: Option<String>,
        kind: FailureKind,
        status: StatusCode,
    ) -> Response {
        transition(DispatchState::Failed, &method, &path);
        self.reporter.report(&DispatchFailure {
            method,
            path,
            pattern,
            kind,
        });
        Response::new(status).body(status.canonical_reason())
    }
}

/// Aborts the handler task when the dispatch is dropped or gives up on it.
struct HandlerTask(JoinHandle<HandlerResult>);

impl Drop for HandlerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn not_found() -> Response {
    Response::new(StatusCode::NotFound).body(StatusCode::NotFound.canonical_reason())
}

fn join_failure(err: JoinError) -> FailureKind {
    if err.is_panic() {
        FailureKind::Panic(panic_message(err.into_panic()))
    } else {
        FailureKind::Aborted
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// `"/api/"` → `Some("/api")`, `"api"` → `Some("/api")`, `""` and `"/"` → `None`.
pub(crate) fn normalize_context_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{trimmed}"))
    }
}
