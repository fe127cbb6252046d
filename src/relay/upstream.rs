use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::{HeaderMap, StatusCode};

use crate::error::RelayError;

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;
type ReleaseHook = Box<dyn FnOnce() + Send>;

/// An upstream HTTP response owned by one relay pipeline.
///
/// Releasing drops the body (closing or recycling the connection) and fires
/// the optional release hook. [`UpstreamConnection::release`] is idempotent and
/// `Drop` calls it, so every exit path releases exactly once.
pub struct UpstreamConnection {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<BodyStream>,
    release_hook: Option<ReleaseHook>,
    released: bool,
}

impl UpstreamConnection {
    /// Wrap an arbitrary byte stream as an upstream response body.
    pub fn new<S, E>(status: StatusCode, headers: HeaderMap, body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + 'static,
    {
        let body = body.map(|chunk| chunk.map_err(|e| RelayError::Transport(e.to_string())));
        Self {
            status,
            headers,
            body: Some(Box::pin(body)),
            release_hook: None,
            released: false,
        }
    }

    #[must_use]
    pub fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        Self::new(status, headers, response.bytes_stream())
    }

    /// Attach a callback that runs when the connection is released.
    #[must_use]
    pub fn with_release_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release_hook = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Drop the body and fire the release hook. Later calls are no-ops.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.body = None;
        if let Some(hook) = self.release_hook.take() {
            hook();
        }
        tracing::debug!(status = self.status.as_u16(), "upstream connection released");
    }
}

impl Stream for UpstreamConnection {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.body.as_mut() {
            Some(body) => body.as_mut().poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for UpstreamConnection {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for UpstreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnection")
            .field("status", &self.status)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
