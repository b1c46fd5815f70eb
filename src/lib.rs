//! # ligero
//!
//! A lightweight async HTTP framework: create an app on a port, register
//! routes, start it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ligero::{App, HandlerError, Request, ResponseWriter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = App::create(8080);
//!
//!     app.get("/", |_req: Request, mut res: ResponseWriter| async move {
//!         res.send("Hello, World!")
//!     })?
//!     .get("/users/{id}", |req: Request, mut res: ResponseWriter| async move {
//!         let id = req.param("id").unwrap_or_default().to_owned();
//!         res.json(&serde_json::json!({ "id": id }))?;
//!         Ok::<(), HandlerError>(())
//!     })?;
//!
//!     app.start().await?;
//!     println!("Listening on http://{}", app.local_addr().unwrap());
//!     tokio::signal::ctrl_c().await?;
//!     app.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Layout
//!
//! - [`router`] compiles path patterns and resolves requests in registration order.
//! - [`dispatch`] runs the matched handler in its own task and guarantees one response.
//! - [`http`] holds the request view, the write-once response writer and wire types.
//! - [`server`] is the HTTP/1.1 transport over `tokio::net`.
//! - [`app`] ties them together with an explicit lifecycle and [`Config`].

pub mod app;
pub mod dispatch;
pub mod http;
pub mod router;
pub mod server;

pub use app::{App, Config, ConfigError, ServerState};
pub use dispatch::{Cancellation, Dispatcher, FailureReporter};
pub use http::{Headers, Method, Request, Response, ResponseError, ResponseWriter, StatusCode};
pub use router::{Handler, HandlerError, HandlerResult, RouteError, Router};
pub use server::{ServerError, ShutdownReport};
