//! Small demo app.
//!
//! ```text
//! cargo run --example hello
//! curl http://127.0.0.1:8080/api/hello/ada
//! curl -X POST http://127.0.0.1:8080/api/echo -d '{"msg":"hi"}'
//! ```
//!
//! Set `LIGERO_CONFIG=path/to/config.toml` to load settings from a file.

use std::time::Duration;

use ligero::{App, Config, HandlerError, Request, ResponseWriter, StatusCode};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Deserialize, Serialize)]
struct Echo {
    msg: String,
}

async fn hello(req: Request, mut res: ResponseWriter) -> Result<(), HandlerError> {
    let name = req.param("name").unwrap_or("world");
    let greeting = match req.query_param("lang") {
        Some("es") => format!("¡Hola, {name}!"),
        _ => format!("Hello, {name}!"),
    };
    res.send(greeting)?;
    Ok(())
}

async fn echo(req: Request, mut res: ResponseWriter) -> Result<(), HandlerError> {
    match req.json::<Echo>() {
        Ok(body) => res.json(&body)?,
        Err(e) => res
            .status(StatusCode::BadRequest)?
            .send(format!("invalid JSON: {e}"))?,
    }
    Ok(())
}

async fn files(req: Request, mut res: ResponseWriter) -> Result<(), HandlerError> {
    let rest = req.param(ligero::router::WILDCARD_PARAM).unwrap_or_default();
    res.send(format!("would serve {rest:?}"))?;
    Ok(())
}

async fn slow(req: Request, mut res: ResponseWriter) -> Result<(), HandlerError> {
    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(3)) => res.send("finally")?,
        () = req.cancellation().cancelled() => {
            res.status(StatusCode::ServiceUnavailable)?.send("shutting down")?;
        }
    }
    Ok(())
}

async fn not_found(req: Request, mut res: ResponseWriter) -> Result<(), HandlerError> {
    res.status(StatusCode::NotFound)?
        .json(&serde_json::json!({ "error": "not found", "path": req.path() }))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ligero=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::var("LIGERO_CONFIG") {
        Ok(path) => Config::load(path)?,
        Err(_) => Config::new(8080)
            .with_host("127.0.0.1")
            .with_context_path("/api")
            .with_handler_timeout(Duration::from_secs(10)),
    };

    let mut app = App::with_config(config);
    app.get("/hello/{name}", hello)?
        .get("/hello", hello)?
        .post("/echo", echo)?
        .get("/files/*", files)?
        .get("/slow", slow)?
        .fallback(not_found)?;

    app.run_until(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}
