use std::collections::BTreeMap;
use std::env;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode, Uri};
use tokio::sync::oneshot;

use crate::normalize::NormalizedRequest;
use crate::platform::PlatformContext;
use crate::sink::{ResponseReceiver, ResponseSender, ResponseSink, SinkError, merge_headers_cookies};

/// Error type returned by request handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Trailing work a handler keeps running after its response is complete.
pub type Completion = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'static>>;

/// The application's request pipeline: routing, rendering, and everything else the adapter
/// does not do itself.
///
/// A handler that recognizes the request opens exactly one sink with
/// [`ServerRequestEvent::writable_stream`], writes its body, closes the sink, and returns
/// `Some`. Returning `None` means no route matched and the adapter answers with a 404 page.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        event: ServerRequestEvent,
    ) -> Result<Option<HandledRequest>, HandlerError>;
}

/// Outcome of a handler that matched the request.
pub struct HandledRequest {
    completion: Completion,
}

impl HandledRequest {
    /// Wraps trailing work (analytics flushes, log shipping, ...) that may finish after the
    /// response has been returned.
    pub fn new<F>(completion: F) -> Self
    where
        F: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            completion: Box::pin(completion),
        }
    }

    /// A handled request with no trailing work.
    pub fn completed() -> Self {
        Self::new(async { Ok::<(), HandlerError>(()) })
    }

    pub fn into_completion(self) -> Completion {
        self.completion
    }
}

impl std::fmt::Debug for HandledRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandledRequest").finish_non_exhaustive()
    }
}

/// How the request handler is being driven.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServerMode {
    /// Running inside the provider.
    #[default]
    Server,
    /// Running under the local development server.
    Dev,
}

/// Read-only view of the environment exposed to handlers.
#[derive(Clone, Debug, Default)]
pub struct Env {
    overrides: BTreeMap<String, String>,
}

impl Env {
    /// Reads straight from the process environment.
    pub fn process() -> Self {
        Self::default()
    }

    /// Shadows a process variable for this accessor only.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.overrides
            .get(key)
            .cloned()
            .or_else(|| env::var(key).ok())
    }
}

/// Everything the request handler receives for one invocation.
#[derive(Debug)]
pub struct ServerRequestEvent {
    mode: ServerMode,
    platform: PlatformContext,
    env: Env,
    request: NormalizedRequest,
    resolve: Option<ResponseSender>,
}

impl ServerRequestEvent {
    pub(crate) fn new(
        mode: ServerMode,
        platform: PlatformContext,
        env: Env,
        request: NormalizedRequest,
    ) -> (Self, ResponseReceiver) {
        let (resolve, receiver) = oneshot::channel();
        let event = Self {
            mode,
            platform,
            env,
            request,
            resolve: Some(resolve),
        };
        (event, receiver)
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    pub fn url(&self) -> &Uri {
        &self.request.url
    }

    pub fn platform(&self) -> &PlatformContext {
        &self.platform
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn request(&self) -> &NormalizedRequest {
        &self.request
    }

    /// Opens the response sink. `cookies` are already-serialized `Set-Cookie` values and are
    /// merged into `headers`. Only one sink can be opened per request.
    pub fn writable_stream<I, S>(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
        cookies: I,
    ) -> Result<ResponseSink, SinkError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.resolve.is_none() {
            return Err(SinkError::AlreadyOpened);
        }
        let headers = merge_headers_cookies(headers, cookies)?;
        let resolve = self.resolve.take().ok_or(SinkError::AlreadyOpened)?;
        Ok(ResponseSink::new(status, headers, resolve))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use axum::http::header::SET_COOKIE;

    fn event() -> (ServerRequestEvent, ResponseReceiver) {
        let request = NormalizedRequest {
            method: Method::GET,
            url: Uri::from_static("https://example.com/about"),
            headers: HeaderMap::new(),
            body: None,
        };
        ServerRequestEvent::new(
            ServerMode::Server,
            PlatformContext::default(),
            Env::process(),
            request,
        )
    }

    #[test]
    fn env_overrides_shadow_process_values() {
        let env = Env::process().with("EDGEBRIDGE_TEST_ONLY_KEY", "override");
        assert_eq!(env.get("EDGEBRIDGE_TEST_ONLY_KEY").as_deref(), Some("override"));
        assert_eq!(env.get("EDGEBRIDGE_TEST_MISSING_KEY"), None);
    }

    #[tokio::test]
    async fn only_one_sink_per_request() {
        let (mut event, rx) = event();
        assert_eq!(event.url().path(), "/about");

        let mut sink = event
            .writable_stream(StatusCode::OK, HeaderMap::new(), ["sid=1"])
            .expect("first sink");
        let second = event.writable_stream(StatusCode::OK, HeaderMap::new(), Vec::<String>::new());
        assert!(matches!(second, Err(SinkError::AlreadyOpened)));

        sink.write(b"ok").unwrap();
        sink.close().unwrap();
        let output = rx.await.unwrap().unwrap();
        assert_eq!(output.headers[SET_COOKIE], "sid=1");
        assert_eq!(output.body, b"ok");
    }

    #[tokio::test]
    async fn invalid_cookie_keeps_sink_available() {
        let (mut event, _rx) = event();
        let err = event
            .writable_stream(StatusCode::OK, HeaderMap::new(), ["bad\r\n"])
            .expect_err("invalid cookie");
        assert!(matches!(err, SinkError::InvalidCookie(_)));
        assert!(
            event
                .writable_stream(StatusCode::OK, HeaderMap::new(), Vec::<String>::new())
                .is_ok()
        );
    }

    #[tokio::test]
    async fn completion_future_runs_to_result() {
        let handled = HandledRequest::new(async { Err::<(), HandlerError>("flush failed".into()) });
        let result = handled.into_completion().await;
        assert_eq!(result.unwrap_err().to_string(), "flush failed");
        assert!(HandledRequest::completed().into_completion().await.is_ok());
    }
}
