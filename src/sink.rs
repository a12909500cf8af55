use std::io;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::header::{HeaderValue, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;

pub(crate) type ResponseSender = oneshot::Sender<Result<SinkOutput, SinkError>>;
pub(crate) type ResponseReceiver = oneshot::Receiver<Result<SinkOutput, SinkError>>;

/// The finalized response produced by closing a [`ResponseSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkOutput {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("response sink is closed")]
    Closed,
    #[error("response sink was already closed")]
    AlreadyClosed,
    #[error("a response sink was already opened for this request")]
    AlreadyOpened,
    #[error("response sink was dropped before it was closed")]
    Abandoned,
    #[error("invalid cookie header value {0:?}")]
    InvalidCookie(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    Open,
    Closed,
}

/// Accumulates streamed body chunks into a single buffer. Closed exactly once.
#[derive(Debug)]
pub struct ResponseSink {
    status: StatusCode,
    headers: HeaderMap,
    buffer: Vec<u8>,
    state: SinkState,
    resolve: Option<ResponseSender>,
}

impl ResponseSink {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, resolve: ResponseSender) -> Self {
        Self {
            status,
            headers,
            buffer: Vec::new(),
            state: SinkState::Open,
            resolve: Some(resolve),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Number of body bytes buffered so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state == SinkState::Closed
    }

    /// Appends a chunk after everything written so far.
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        if self.state == SinkState::Closed {
            return Err(SinkError::Closed);
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    /// Finalizes the response and resolves the pending bridge.
    pub fn close(&mut self) -> Result<(), SinkError> {
        if self.state == SinkState::Closed {
            return Err(SinkError::AlreadyClosed);
        }
        self.state = SinkState::Closed;

        let output = SinkOutput {
            status: self.status,
            headers: mem::take(&mut self.headers),
            body: mem::take(&mut self.buffer),
        };
        if let Some(resolve) = self.resolve.take() {
            if resolve.send(Ok(output)).is_err() {
                tracing::debug!("response sink closed after the bridge stopped waiting");
            }
        }
        Ok(())
    }
}

impl Drop for ResponseSink {
    fn drop(&mut self) {
        if self.state == SinkState::Open {
            if let Some(resolve) = self.resolve.take() {
                let _ = resolve.send(Err(SinkError::Abandoned));
            }
        }
    }
}

impl AsyncWrite for ResponseSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = self
            .get_mut()
            .write(buf)
            .map(|()| buf.len())
            .map_err(|err| io::Error::new(io::ErrorKind::BrokenPipe, err));
        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let sink = self.get_mut();
        if sink.is_closed() {
            return Poll::Ready(Ok(()));
        }
        Poll::Ready(
            sink.close()
                .map_err(|err| io::Error::new(io::ErrorKind::BrokenPipe, err)),
        )
    }
}

/// Folds serialized cookies into the header map as `set-cookie` entries.
///
/// Existing headers, including earlier `set-cookie` values, are kept.
pub fn merge_headers_cookies<I, S>(mut headers: HeaderMap, cookies: I) -> Result<HeaderMap, SinkError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for cookie in cookies {
        let cookie = cookie.as_ref();
        let value = HeaderValue::from_str(cookie)
            .map_err(|_| SinkError::InvalidCookie(cookie.to_owned()))?;
        headers.append(SET_COOKIE, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;
    use tokio::io::AsyncWriteExt;

    fn sink() -> (ResponseSink, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        (ResponseSink::new(StatusCode::OK, headers, tx), rx)
    }

    #[tokio::test]
    async fn concatenates_chunks_in_order() {
        let (mut sink, rx) = sink();
        sink.write(b"<html>").unwrap();
        sink.write(b"").unwrap();
        sink.write(b"About").unwrap();
        sink.write(b"</html>").unwrap();
        assert_eq!(sink.len(), 18);
        sink.close().unwrap();

        let output = rx.await.expect("resolved").expect("closed cleanly");
        assert_eq!(output.status, StatusCode::OK);
        assert_eq!(output.body, b"<html>About</html>");
        assert_eq!(output.headers[CONTENT_TYPE], "text/html");
    }

    #[tokio::test]
    async fn empty_sink_closes_with_empty_body() {
        let (mut sink, rx) = sink();
        sink.close().unwrap();
        let output = rx.await.unwrap().unwrap();
        assert!(output.body.is_empty());
    }

    #[test]
    fn rejects_writes_and_second_close_after_close() {
        let (mut sink, _rx) = sink();
        sink.write(b"x").unwrap();
        sink.close().unwrap();
        assert!(sink.is_closed());
        assert_eq!(sink.write(b"y"), Err(SinkError::Closed));
        assert_eq!(sink.close(), Err(SinkError::AlreadyClosed));
    }

    #[tokio::test]
    async fn dropping_open_sink_resolves_abandoned() {
        let (mut sink, rx) = sink();
        sink.write(b"partial").unwrap();
        drop(sink);
        assert_eq!(rx.await.unwrap(), Err(SinkError::Abandoned));
    }

    #[tokio::test]
    async fn async_write_shutdown_closes() {
        let (mut sink, rx) = sink();
        sink.write_all(b"hello ").await.unwrap();
        sink.write_all(b"world").await.unwrap();
        sink.shutdown().await.unwrap();
        assert!(sink.write_all(b"!").await.is_err());

        let output = rx.await.unwrap().unwrap();
        assert_eq!(output.body, b"hello world");
    }

    #[test]
    fn merges_cookies_as_set_cookie_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.append(SET_COOKIE, HeaderValue::from_static("existing=1"));

        let merged = merge_headers_cookies(headers, ["a=1; Path=/", "b=2; HttpOnly"]).unwrap();
        let cookies: Vec<_> = merged.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["existing=1", "a=1; Path=/", "b=2; HttpOnly"]);
        assert_eq!(merged[CONTENT_TYPE], "text/html");
    }

    #[test]
    fn rejects_unrepresentable_cookie() {
        let err = merge_headers_cookies(HeaderMap::new(), ["bad\ncookie"]).unwrap_err();
        assert!(matches!(err, SinkError::InvalidCookie(_)));
    }
}
