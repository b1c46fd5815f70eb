//! Write-once response builder handed to handlers.
//!
//! A [`ResponseWriter`] accumulates status and headers until one of the
//! terminal calls (`send`, `json`, `redirect`, `end`) completes it. From then on
//! every mutating call returns [`ResponseError::AlreadySent`]; the first
//! response is never overwritten.
//!
//! The dispatcher keeps a second handle on the same slot. When the handler
//! returns, fails or times out, the dispatcher *seals* the slot and takes the
//! response out. Writes arriving after that (from an abandoned task, for
//! instance) are rejected the same way.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use super::{Headers, Response, StatusCode};

const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Misuse of a [`ResponseWriter`], surfaced to the handler.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response already sent")]
    AlreadySent,

    #[error("failed to serialize JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct Draft {
    status: Option<StatusCode>,
    headers: Headers,
    content_type: Option<String>,
}

impl Draft {
    fn complete(self, default_status: StatusCode, body: Bytes) -> Response {
        let mut headers = self.headers;
        if !body.is_empty() || self.content_type.is_some() {
            let content_type = self
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());
            headers.set("Content-Type", content_type);
        }
        Response::from_parts(self.status.unwrap_or(default_status), headers, body)
    }
}

#[derive(Debug)]
enum Slot {
    Open(Draft),
    Sent(Response),
    Sealed,
}

/// Mutable, write-once response builder.
///
/// # Examples
///
/// ```
/// # async fn handler(_req: ligero::Request, mut res: ligero::ResponseWriter)
/// #     -> Result<(), ligero::HandlerError> {
/// use ligero::http::{ResponseError, StatusCode};
///
/// res.status(StatusCode::Created)?
///     .header("Location", "/users/42")?
///     .send("created")?;
///
/// // A second write is refused instead of corrupting the wire.
/// assert!(matches!(res.send("again"), Err(ResponseError::AlreadySent)));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ResponseWriter {
    slot: Arc<Mutex<Slot>>,
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Open(Draft::default()))),
        }
    }

    /// Second handle on the same slot, kept by the dispatcher.
    pub(crate) fn share(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // No code panics while holding the lock, so poisoning carries no
        // half-written state.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_draft(&self, f: impl FnOnce(&mut Draft)) -> Result<(), ResponseError> {
        match &mut *self.lock() {
            Slot::Open(draft) => {
                f(draft);
                Ok(())
            }
            Slot::Sent(_) | Slot::Sealed => Err(ResponseError::AlreadySent),
        }
    }

    fn complete(&self, default_status: StatusCode, body: Bytes) -> Result<(), ResponseError> {
        let mut slot = self.lock();
        match std::mem::replace(&mut *slot, Slot::Sealed) {
            Slot::Open(draft) => {
                *slot = Slot::Sent(draft.complete(default_status, body));
                Ok(())
            }
            other => {
                *slot = other;
                Err(ResponseError::AlreadySent)
            }
        }
    }

    /// Sets the status code.
    pub fn status(&mut self, status: StatusCode) -> Result<&mut Self, ResponseError> {
        self.with_draft(|d| d.status = Some(status))?;
        Ok(self)
    }

    /// Sets a header, replacing earlier values of the same name.
    pub fn header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<&mut Self, ResponseError> {
        let (name, value) = (name.into(), value.into());
        if name.eq_ignore_ascii_case("content-type") {
            return self.content_type(value);
        }
        self.with_draft(|d| d.headers.set(name, value))?;
        Ok(self)
    }

    /// Appends a header, keeping earlier values of the same name.
    pub fn append_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<&mut Self, ResponseError> {
        let (name, value) = (name.into(), value.into());
        self.with_draft(|d| d.headers.append(name, value))?;
        Ok(self)
    }

    /// Sets the `Content-Type` used when the body is sent.
    pub fn content_type(&mut self, content_type: impl Into<String>) -> Result<&mut Self, ResponseError> {
        let content_type = content_type.into();
        self.with_draft(|d| d.content_type = Some(content_type))?;
        Ok(self)
    }

    /// Completes the response with `body`. Status defaults to `200 OK`.
    pub fn send(&mut self, body: impl Into<Bytes>) -> Result<(), ResponseError> {
        self.complete(StatusCode::Ok, body.into())
    }

    /// Serializes `value` as JSON and completes the response with it.
    pub fn json<T>(&mut self, value: &T) -> Result<(), ResponseError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(value)?;
        self.content_type("application/json")?;
        self.complete(StatusCode::Ok, Bytes::from(body))
    }

    /// Completes the response as a `302 Found` redirect to `location`.
    pub fn redirect(&mut self, location: impl Into<String>) -> Result<(), ResponseError> {
        let location = location.into();
        self.with_draft(|d| {
            d.status = Some(StatusCode::Found);
            d.headers.set("Location", location);
        })?;
        self.complete(StatusCode::Found, Bytes::new())
    }

    /// Completes the response without a body. Status defaults to `204 No Content`.
    pub fn end(&mut self) -> Result<(), ResponseError> {
        self.complete(StatusCode::NoContent, Bytes::new())
    }

    /// `true` once a terminal call has completed the response.
    pub fn is_sent(&self) -> bool {
        !matches!(&*self.lock(), Slot::Open(_))
    }

    /// Seals the slot and returns what the handler produced.
    ///
    /// An unsent draft is completed with an empty body (`204` unless the
    /// handler chose a status). Returns `None` if the slot was already sealed.
    pub(crate) fn finish(&self) -> Option<Response> {
        let mut slot = self.lock();
        match std::mem::replace(&mut *slot, Slot::Sealed) {
            Slot::Open(draft) => Some(draft.complete(StatusCode::NoContent, Bytes::new())),
            Slot::Sent(response) => Some(response),
            Slot::Sealed => None,
        }
    }

    /// Seals the slot, discarding anything the handler wrote.
    pub(crate) fn seal(&self) {
        *self.lock() = Slot::Sealed;
    }
}
