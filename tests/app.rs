//! End-to-end tests: a real `App` on an ephemeral port, driven over TCP.

use std::net::SocketAddr;
use std::time::Duration;

use ligero::{App, Config, HandlerError, Request, ResponseWriter, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn parse_reply(raw: &str) -> Reply {
    let (head, body) = raw.split_once("\r\n\r\n").expect("response head");
    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|line| line.split(' ').nth(1))
        .and_then(|code| code.parse().ok())
        .expect("status line");
    let headers = lines
        .filter_map(|line| line.split_once(": "))
        .map(|(n, v)| (n.to_owned(), v.to_owned()))
        .collect();
    Reply {
        status,
        headers,
        body: body.to_owned(),
    }
}

async fn send(addr: SocketAddr, method: &str, target: &str, body: &str) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let raw = format!(
        "{method} {target} HTTP/1.1\r\nHost: test\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    parse_reply(&String::from_utf8(out).unwrap())
}

async fn app() -> (App, SocketAddr) {
    let config = Config::new(0)
        .with_host("127.0.0.1")
        .with_handler_timeout(Duration::from_millis(200));
    let mut app = App::with_config(config);

    app.get("/users/new", |_req: Request, mut res: ResponseWriter| async move {
        res.send("new user form")
    })
    .unwrap()
    .get("/users/{id}", |req: Request, mut res: ResponseWriter| async move {
        res.send(format!("user {}", req.param("id").unwrap_or_default()))
    })
    .unwrap()
    .post("/users", |req: Request, mut res: ResponseWriter| async move {
        let value: serde_json::Value = req.json()?;
        res.status(StatusCode::Created)?
            .header("Location", "/users/1")?
            .json(&value)?;
        Ok::<(), HandlerError>(())
    })
    .unwrap()
    .get("/search", |req: Request, mut res: ResponseWriter| async move {
        res.send(req.query_param("q").unwrap_or_default().to_owned())
    })
    .unwrap()
    .get("/panic", |_req: Request, _res: ResponseWriter| async move {
        let r: () = panic!("handler bug");
        r
    })
    .unwrap()
    .get("/slow", |_req: Request, mut res: ResponseWriter| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        res.send("late")
    })
    .unwrap()
    .get("/silent", |_req: Request, _res: ResponseWriter| async {})
    .unwrap()
    .get("/old", |_req: Request, mut res: ResponseWriter| async move {
        res.redirect("/new")
    })
    .unwrap();

    let addr = app.start().await.unwrap();
    (app, addr)
}

#[tokio::test]
async fn routes_params_and_precedence() {
    let (mut app, addr) = app().await;

    let reply = send(addr, "GET", "/users/42", "").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "user 42");
    assert_eq!(reply.header("content-type"), Some("text/plain; charset=utf-8"));

    let reply = send(addr, "GET", "/users/new", "").await;
    assert_eq!(reply.body, "new user form");

    let reply = send(addr, "GET", "/users/42/", "").await;
    assert_eq!(reply.body, "user 42");

    app.stop().await.unwrap();
}

#[tokio::test]
async fn not_found_and_method_not_allowed() {
    let (mut app, addr) = app().await;

    assert_eq!(send(addr, "GET", "/nope", "").await.status, 404);

    let reply = send(addr, "DELETE", "/users/42", "").await;
    assert_eq!(reply.status, 405);
    assert_eq!(reply.header("allow"), Some("GET, HEAD"));

    let reply = send(addr, "PUT", "/users", "").await;
    assert_eq!(reply.status, 405);
    assert_eq!(reply.header("allow"), Some("POST"));

    app.stop().await.unwrap();
}

#[tokio::test]
async fn json_body_round_trip() {
    let (mut app, addr) = app().await;

    let reply = send(addr, "POST", "/users", r#"{"name":"Ada"}"#).await;
    assert_eq!(reply.status, 201);
    assert_eq!(reply.header("location"), Some("/users/1"));
    assert_eq!(reply.header("content-type"), Some("application/json"));
    assert_eq!(reply.body, r#"{"name":"Ada"}"#);

    let reply = send(addr, "POST", "/users", "not json").await;
    assert_eq!(reply.status, 500);

    app.stop().await.unwrap();
}

#[tokio::test]
async fn query_parameters_are_decoded() {
    let (mut app, addr) = app().await;
    let reply = send(addr, "GET", "/search?q=caf%C3%A9+con+leche", "").await;
    assert_eq!(reply.body, "café con leche");
    app.stop().await.unwrap();
}

#[tokio::test]
async fn failures_are_contained() {
    let (mut app, addr) = app().await;

    assert_eq!(send(addr, "GET", "/panic", "").await.status, 500);
    assert_eq!(send(addr, "GET", "/slow", "").await.status, 504);
    assert_eq!(send(addr, "GET", "/users/7", "").await.body, "user 7");

    app.stop().await.unwrap();
}

#[tokio::test]
async fn defaults_for_silent_head_and_redirect() {
    let (mut app, addr) = app().await;

    let reply = send(addr, "GET", "/silent", "").await;
    assert_eq!(reply.status, 204);
    assert!(reply.body.is_empty());
    assert_eq!(reply.header("content-length"), None);

    let reply = send(addr, "HEAD", "/users/42", "").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("content-length"), Some("7"));
    assert!(reply.body.is_empty());

    let reply = send(addr, "GET", "/old", "").await;
    assert_eq!(reply.status, 302);
    assert_eq!(reply.header("location"), Some("/new"));

    app.stop().await.unwrap();
}

#[tokio::test]
async fn keep_alive_serves_several_requests_on_one_connection() {
    let (mut app, addr) = app().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    for id in ["1", "2", "3"] {
        stream
            .write_all(format!("GET /users/{id} HTTP/1.1\r\nHost: test\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let expected_body = format!("user {id}");
        let mut seen = Vec::new();
        let mut chunk = [0u8; 1024];
        while !String::from_utf8_lossy(&seen).ends_with(&expected_body) {
            let n = stream.read(&mut chunk).await.unwrap();
            assert_ne!(n, 0, "connection closed early");
            seen.extend_from_slice(&chunk[..n]);
        }
        let reply = parse_reply(&String::from_utf8(seen).unwrap());
        assert_eq!(reply.header("connection"), Some("keep-alive"));
    }

    drop(stream);
    app.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_requests_get_their_own_responses() {
    let (mut app, addr) = app().await;

    let mut clients = tokio::task::JoinSet::new();
    for id in 0..100u32 {
        clients.spawn(async move {
            let reply = send(addr, "GET", &format!("/users/{id}"), "").await;
            (id, reply)
        });
    }
    while let Some(joined) = clients.join_next().await {
        let (id, reply) = joined.unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, format!("user {id}"));
    }

    app.stop().await.unwrap();
}

#[tokio::test]
async fn independent_apps_run_side_by_side() {
    let (mut first, first_addr) = app().await;

    let mut second = App::with_config(Config::new(0).with_host("127.0.0.1"));
    second
        .get("/users/{id}", |_req: Request, mut res: ResponseWriter| async move {
            res.send("from second")
        })
        .unwrap();
    let second_addr = second.start().await.unwrap();

    assert_eq!(send(first_addr, "GET", "/users/1", "").await.body, "user 1");
    assert_eq!(send(second_addr, "GET", "/users/1", "").await.body, "from second");

    first.stop().await.unwrap();
    second.stop().await.unwrap();
}
