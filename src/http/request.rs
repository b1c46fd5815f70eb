//! Incoming request view.
//!
//! A [`Request`] is built either by [`Request::parse`] (the bundled HTTP/1.1
//! transport) or by [`Request::builder`] (external transports and tests). The
//! dispatcher attaches path parameters and the cancellation signal before the
//! handler sees it; after that the view is read-only.

use std::str;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use thiserror::Error;

use super::{Headers, Method};
use crate::dispatch::Cancellation;
use crate::router::Params;

/// Errors that can occur while parsing an HTTP/1.1 request head.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header")]
    InvalidContentLength,

    #[error("conflicting Content-Length headers")]
    ConflictingContentLength,

    #[error("unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),
}

/// An incoming HTTP request.
///
/// # Examples
///
/// ```
/// use ligero::http::Request;
///
/// let raw = b"GET /hello?name=w%C3%B6rld HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("wörld"));
/// assert_eq!(request.header("host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    query_params: Vec<(String, String)>,
    body: Bytes,
    params: Params,
    cancellation: Cancellation,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parses a request head from `buf`.
    ///
    /// Returns the request and the byte offset at which the body begins. The
    /// body holds whatever part of `Content-Length` is already present in
    /// `buf`; callers compare [`content_length`](Self::content_length) with
    /// the bytes they have before dispatching.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the head is not fully buffered yet.
    /// - [`RequestError::Parse`]: the head is malformed.
    /// - [`RequestError::InvalidContentLength`]: `Content-Length` is not a number.
    /// - [`RequestError::ConflictingContentLength`]: several `Content-Length` values disagree.
    /// - [`RequestError::UnsupportedTransferEncoding`]: chunked or other encodings.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            header_map.append(header.name, String::from_utf8_lossy(header.value));
        }

        // Every coding in every Transfer-Encoding line counts, not only the first.
        if let Some(encoding) = header_map
            .get_all("transfer-encoding")
            .flat_map(|line| line.split(','))
            .map(str::trim)
            .find(|coding| !coding.is_empty() && !coding.eq_ignore_ascii_case("identity"))
        {
            return Err(RequestError::UnsupportedTransferEncoding(encoding.to_owned()));
        }

        let content_length = content_length(&header_map)?;
        let available = buf.len().saturating_sub(body_offset).min(content_length);
        let body = Bytes::copy_from_slice(&buf[body_offset..body_offset + available]);

        let mut request = Self::from_parts(method, target, header_map, body);
        request.version = version;
        Ok((request, body_offset))
    }

    /// Starts building a request for `method` and `target` (path plus optional query).
    ///
    /// ```
    /// use ligero::http::{Method, Request};
    ///
    /// let req = Request::builder(Method::Post, "/users?notify=1")
    ///     .header("Content-Type", "application/json")
    ///     .body(r#"{"name":"ada"}"#)
    ///     .build();
    /// assert_eq!(req.path(), "/users");
    /// assert_eq!(req.query_param("notify"), Some("1"));
    /// ```
    pub fn builder(method: Method, target: impl AsRef<str>) -> RequestBuilder {
        RequestBuilder {
            method,
            target: target.as_ref().to_owned(),
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    fn from_parts(method: Method, target: &str, headers: Headers, body: Bytes) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };
        let query_params = query.as_deref().map(parse_query_string).unwrap_or_default();

        Self {
            method,
            path,
            version: 1,
            headers,
            query,
            query_params,
            body,
            params: Params::new(),
            cancellation: Cancellation::never(),
        }
    }

    pub(crate) fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub(crate) fn set_cancellation(&mut self, cancellation: Cancellation) {
        self.cancellation = cancellation;
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the raw request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of the named header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the first decoded value of a query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates all decoded query parameters in order, duplicates included.
    pub fn query_params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.query_params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a path parameter bound by the matched route.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as UTF-8 text.
    pub fn body_text(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.body)
    }

    /// Deserializes the body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }

    /// The signal flipped when the server shuts down while this request is in flight.
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) if conn.eq_ignore_ascii_case("close") => false,
            Some(conn) if conn.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.split(',').next()?.trim().parse().ok()
    }
}

/// Builder returned by [`Request::builder`].
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    target: String,
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl RequestBuilder {
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// HTTP minor version (0 or 1). Defaults to 1.
    #[must_use]
    pub fn version(mut self, minor: u8) -> Self {
        self.version = minor;
        self
    }

    pub fn build(self) -> Request {
        let mut request = Request::from_parts(self.method, &self.target, self.headers, self.body);
        request.version = self.version;
        request
    }
}

/// The declared body length; `0` when absent. Repeated values must agree.
fn content_length(headers: &Headers) -> Result<usize, RequestError> {
    let mut declared = None;
    for raw in headers
        .get_all("content-length")
        .flat_map(|line| line.split(','))
    {
        let value = raw
            .trim()
            .parse::<usize>()
            .map_err(|_| RequestError::InvalidContentLength)?;
        match declared {
            Some(previous) if previous != value => {
                return Err(RequestError::ConflictingContentLength);
            }
            _ => declared = Some(value),
        }
    }
    Ok(declared.unwrap_or(0))
}

/// Parses `key=value&key2=value2`, decoding `+` and percent escapes.
///
/// A key without `=` maps to an empty value. Invalid UTF-8 is replaced
/// lossily instead of rejecting the whole request.
fn parse_query_string(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(req.header("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
        assert!(req.params().is_empty());
    }

    #[test]
    fn query_values_are_decoded() {
        let raw = b"GET /search?q=rust+lang&tag=a%2Fb&flag&tag=c HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust+lang&tag=a%2Fb&flag&tag=c"));
        assert_eq!(req.query_param("q"), Some("rust lang"));
        assert_eq!(req.query_param("tag"), Some("a/b"));
        assert_eq!(req.query_param("flag"), Some(""));
        let tags: Vec<_> = req.query_params().filter(|(k, _)| *k == "tag").collect();
        assert_eq!(tags, vec![("tag", "a/b"), ("tag", "c")]);
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn duplicate_headers_survive_parsing() {
        let raw = b"GET / HTTP/1.1\r\nAccept: a\r\naccept: b\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        let all: Vec<_> = req.headers().get_all("Accept").collect();
        assert_eq!(all, vec!["a", "b"]);
    }

    #[test]
    fn keep_alive_rules() {
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn body_is_bounded_by_content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET / HTTP/1.1\r\n\r\n";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(req.body().as_ref(), b"hello");
        assert_eq!(&raw[body_offset..body_offset + 5], b"hello");
    }

    #[test]
    fn partial_body_is_reported_short() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nhel";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.body().len(), 3);
        assert_eq!(req.content_length(), Some(10));
    }

    #[test]
    fn chunked_bodies_are_rejected() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::UnsupportedTransferEncoding(_))
        ));
    }

    #[test]
    fn bad_content_length_is_rejected() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::InvalidContentLength)
        ));
    }

    #[test]
    fn chunked_after_identity_is_rejected() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: identity\r\nTransfer-Encoding: chunked\r\n\r\n";
        match Request::parse(raw) {
            Err(RequestError::UnsupportedTransferEncoding(coding)) => assert_eq!(coding, "chunked"),
            other => panic!("expected unsupported encoding, got {other:?}"),
        }

        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: identity, chunked\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::UnsupportedTransferEncoding(_))
        ));
    }

    #[test]
    fn disagreeing_content_lengths_are_rejected() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 30\r\n\r\nabc";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::ConflictingContentLength)
        ));

        let raw = b"POST / HTTP/1.1\r\nContent-Length: 3, 4\r\n\r\nabc";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::ConflictingContentLength)
        ));
    }

    #[test]
    fn repeated_equal_content_lengths_are_accepted() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 3\r\n\r\nabc";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(3));
        assert_eq!(req.body().as_ref(), b"abc");
    }

    #[test]
    fn non_utf8_header_values_are_kept_lossily() {
        let raw = b"GET / HTTP/1.1\r\nX-Name: caf\xe9\r\nX-Name: ok\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        let all: Vec<_> = req.headers().get_all("x-name").collect();
        assert_eq!(all, vec!["caf\u{fffd}", "ok"]);
    }

    #[test]
    fn json_body() {
        #[derive(serde::Deserialize)]
        struct Greeting {
            message: String,
        }

        let req = Request::builder(Method::Post, "/datos")
            .body(r#"{"message":"hola"}"#)
            .build();
        let greeting: Greeting = req.json().unwrap();
        assert_eq!(greeting.message, "hola");
        assert_eq!(req.body_text().unwrap(), r#"{"message":"hola"}"#);
    }
}
