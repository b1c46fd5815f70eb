//! The handler capability and its type erasure.
//!
//! A handler is anything that accepts a [`Request`] and a [`ResponseWriter`]
//! and eventually completes. Async functions and closures qualify through the
//! blanket impl below:
//!
//! ```rust,no_run
//! use ligero::{HandlerError, Request, ResponseWriter};
//!
//! async fn hello(req: Request, mut res: ResponseWriter) -> Result<(), HandlerError> {
//!     let name = req.param("name").unwrap_or("world");
//!     res.send(format!("hello, {name}"))?;
//!     Ok(())
//! }
//!
//! async fn noop(_req: Request, _res: ResponseWriter) {}
//! ```
//!
//! The router stores handlers as `Arc<dyn Handler>` so every route shares one
//! representation regardless of the concrete closure type.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::http::{Request, ResponseWriter};

/// Failure returned by a handler. Becomes a `500` response.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What every handler resolves to after erasure.
pub type HandlerResult = Result<(), HandlerError>;

/// Heap-allocated handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// Type-erased handler shared between routes and concurrent dispatches.
pub(crate) type BoxedHandler = Arc<dyn Handler>;

/// Return types accepted from handler functions: `()` or `Result<(), E>`.
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> HandlerResult;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> HandlerResult {
        Ok(())
    }
}

impl<E> IntoHandlerResult for Result<(), E>
where
    E: Into<HandlerError>,
{
    fn into_handler_result(self) -> HandlerResult {
        self.map_err(Into::into)
    }
}

/// Accept a request, write a response.
///
/// Implemented automatically for
/// `Fn(Request, ResponseWriter) -> impl Future<Output = impl IntoHandlerResult>`.
/// Implement it by hand for handler types that carry their own state.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: Request, res: ResponseWriter) -> HandlerFuture;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request, ResponseWriter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + 'static,
{
    fn call(&self, req: Request, res: ResponseWriter) -> HandlerFuture {
        let fut = (self)(req, res);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

pub(crate) fn boxed(handler: impl Handler) -> BoxedHandler {
    Arc::new(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    struct Greeter {
        greeting: &'static str,
    }

    impl Handler for Greeter {
        fn call(&self, _req: Request, mut res: ResponseWriter) -> HandlerFuture {
            let greeting = self.greeting;
            Box::pin(async move {
                res.send(greeting)?;
                Ok(())
            })
        }
    }

    fn request() -> Request {
        Request::builder(Method::Get, "/").build()
    }

    #[tokio::test]
    async fn unit_returning_fn_is_ok() {
        let handler = boxed(|_req: Request, _res: ResponseWriter| async {});
        assert!(handler.call(request(), ResponseWriter::new()).await.is_ok());
    }

    #[tokio::test]
    async fn error_is_boxed() {
        let handler = boxed(|_req: Request, _res: ResponseWriter| async {
            Err::<(), _>("database unavailable")
        });
        let err = handler.call(request(), ResponseWriter::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "database unavailable");
    }

    #[tokio::test]
    async fn struct_handler_writes_response() {
        let handler = boxed(Greeter { greeting: "hola" });
        let res = ResponseWriter::new();
        let observer = res.share();
        handler.call(request(), res).await.unwrap();
        let response = observer.finish().unwrap();
        assert_eq!(response.body_bytes().as_ref(), b"hola");
    }
}
