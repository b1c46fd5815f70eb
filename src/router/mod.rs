//! Route table: map (method, path) pairs to handlers.
//!
//! Routes are kept in registration order and resolved by a linear scan: the
//! first entry whose method and pattern both match wins. There is no
//! specificity ranking, so register `/users/new` before `/users/{id}` if the
//! literal should take precedence.
//!
//! Resolution distinguishes three outcomes:
//!
//! - [`Resolution::Matched`]: a handler plus the bindings captured from the path.
//! - [`Resolution::MethodNotAllowed`]: the path matched, but only for other methods.
//! - [`Resolution::NotFound`]: no pattern matched the path at all.
//!
//! A `HEAD` request with no explicit `HEAD` route is served by the first
//! matching `GET` route.

use std::fmt;

use thiserror::Error;

use crate::http::Method;

pub mod handler;
pub mod params;
pub mod pattern;

pub use handler::{Handler, HandlerError, HandlerFuture, HandlerResult, IntoHandlerResult};
pub use params::Params;
pub use pattern::{Pattern, PatternError, WILDCARD_PARAM};

pub(crate) use handler::BoxedHandler;

/// Registration-time failures.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    InvalidPattern(#[from] PatternError),

    #[error("route {method} {pattern} is already registered")]
    Duplicate { method: Method, pattern: String },

    /// `route` names what was being registered, e.g. `GET /users` or `fallback`.
    #[error("cannot register {route}: the server has already started")]
    ServerAlreadyStarted { route: String },
}

// A registered route. Its index in `Router::routes` is its registration order.
#[derive(Clone)]
struct Route {
    method: Method,
    pattern: Pattern,
    handler: BoxedHandler,
}

/// The outcome of [`Router::resolve`].
pub enum Resolution {
    Matched(RouteMatch),
    MethodNotAllowed { allowed: Vec<Method> },
    NotFound,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matched(m) => f.debug_tuple("Matched").field(m).finish(),
            Self::MethodNotAllowed { allowed } => f
                .debug_struct("MethodNotAllowed")
                .field("allowed", allowed)
                .finish(),
            Self::NotFound => f.write_str("NotFound"),
        }
    }
}

/// A successful match: the handler to run and the captured bindings.
pub struct RouteMatch {
    handler: BoxedHandler,
    params: Params,
    pattern: String,
    index: usize,
}

impl RouteMatch {
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Canonical pattern of the matched route.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Registration index of the matched route.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn into_parts(self) -> (BoxedHandler, Params, String) {
        (self.handler, self.params, self.pattern)
    }
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("pattern", &self.pattern)
            .field("index", &self.index)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Ordered route table.
///
/// # Examples
///
/// ```rust
/// use ligero::http::Method;
/// use ligero::router::{Resolution, Router};
/// use ligero::{Request, ResponseWriter};
///
/// let mut router = Router::new();
/// router.get("/users/{id}", |_req: Request, _res: ResponseWriter| async {}).unwrap();
///
/// match router.resolve(&Method::Get, "/users/42") {
///     Resolution::Matched(m) => assert_eq!(m.params().get("id"), Some("42")),
///     other => panic!("unexpected {other:?}"),
/// }
/// assert!(matches!(
///     router.resolve(&Method::Delete, "/users/42"),
///     Resolution::MethodNotAllowed { .. }
/// ));
/// assert!(matches!(router.resolve(&Method::Get, "/posts"), Resolution::NotFound));
/// ```
#[derive(Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|r| (&r.method, r.pattern.as_str())))
            .finish()
    }
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Compiles `pattern` and appends a route for `method`.
    ///
    /// # Errors
    ///
    /// - [`RouteError::InvalidPattern`]: the pattern does not compile.
    /// - [`RouteError::Duplicate`]: the same method and canonical pattern is
    ///   already registered.
    pub fn register(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, RouteError> {
        let pattern = Pattern::compile(pattern)?;
        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.pattern == pattern)
        {
            return Err(RouteError::Duplicate {
                method,
                pattern: pattern.as_str().to_owned(),
            });
        }

        tracing::debug!(%method, pattern = %pattern, "route registered");
        self.routes.push(Route {
            method,
            pattern,
            handler: handler::boxed(handler),
        });
        Ok(self)
    }

    /// Registers a `GET` route.
    pub fn get(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.register(Method::Get, pattern, handler)
    }

    /// Registers a `POST` route.
    pub fn post(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.register(Method::Post, pattern, handler)
    }

    /// Registers a `PUT` route.
    pub fn put(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.register(Method::Put, pattern, handler)
    }

    /// Registers a `DELETE` route.
    pub fn delete(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.register(Method::Delete, pattern, handler)
    }

    /// Registers a `PATCH` route.
    pub fn patch(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.register(Method::Patch, pattern, handler)
    }

    /// Registers a `HEAD` route. Without one, `HEAD` falls back to `GET`.
    pub fn head(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.register(Method::Head, pattern, handler)
    }

    /// Registers an `OPTIONS` route.
    pub fn options(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.register(Method::Options, pattern, handler)
    }

    /// Resolves `method` and `path` against the table.
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution {
        let mut allowed: Vec<Method> = Vec::new();
        let mut head_fallback: Option<(usize, Params)> = None;

        for (index, route) in self.routes.iter().enumerate() {
            let Some(params) = route.pattern.matches(path) else {
                continue;
            };

            if &route.method == method {
                return Resolution::Matched(self.route_match(index, params));
            }

            if *method == Method::Head && route.method == Method::Get && head_fallback.is_none() {
                head_fallback = Some((index, params));
            }

            if !allowed.contains(&route.method) {
                allowed.push(route.method.clone());
            }
        }

        if let Some((index, params)) = head_fallback {
            return Resolution::Matched(self.route_match(index, params));
        }

        if allowed.is_empty() {
            return Resolution::NotFound;
        }

        if let Some(get) = allowed.iter().position(|m| *m == Method::Get) {
            if !allowed.contains(&Method::Head) {
                allowed.insert(get + 1, Method::Head);
            }
        }
        Resolution::MethodNotAllowed { allowed }
    }

    fn route_match(&self, index: usize, params: Params) -> RouteMatch {
        let route = &self.routes[index];
        RouteMatch {
            handler: BoxedHandler::clone(&route.handler),
            params,
            pattern: route.pattern.as_str().to_owned(),
            index,
        }
    }

    /// Registered routes as `(method, canonical pattern)` in registration order.
    pub fn routes(&self) -> Vec<(Method, String)> {
        self.routes
            .iter()
            .map(|r| (r.method.clone(), r.pattern.as_str().to_owned()))
            .collect()
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
