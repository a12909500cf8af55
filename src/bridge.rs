use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::EdgeBridgeError;
use crate::handler::{Completion, RequestHandler, ServerRequestEvent};
use crate::observe::Observer;
use crate::platform::EventShape;
use crate::response::OutboundEvent;
use crate::sink::ResponseReceiver;

/// Drives a request handler and turns whatever it wrote into an [`OutboundEvent`].
pub struct ResponseBridge {
    shape: EventShape,
    observer: Arc<dyn Observer>,
}

impl ResponseBridge {
    pub fn new(shape: EventShape, observer: Arc<dyn Observer>) -> Self {
        Self { shape, observer }
    }

    /// Runs `handler` against `event` and waits for the sink on `receiver` to close.
    ///
    /// A handler that returns `None`, or returns `Some` without ever opening a sink, gets the
    /// fixed 404 page. Trailing completion work is detached and never awaited here.
    pub async fn run<H>(
        &self,
        handler: &H,
        event: ServerRequestEvent,
        receiver: ResponseReceiver,
    ) -> Result<OutboundEvent, EdgeBridgeError>
    where
        H: RequestHandler + ?Sized,
    {
        let path = event.url().path().to_owned();
        self.observer.handler_invoked(event.url());

        let handled = handler
            .handle(event)
            .await
            .map_err(EdgeBridgeError::Handler)?;
        let Some(handled) = handled else {
            tracing::debug!(%path, "no route matched");
            return Ok(OutboundEvent::not_found(self.shape, &path));
        };

        detach_completion(handled.into_completion(), self.observer.clone());

        match receiver.await {
            Ok(Ok(output)) => Ok(OutboundEvent::from_sink(self.shape, &output)),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => {
                tracing::debug!(%path, "handler produced no response");
                Ok(OutboundEvent::not_found(self.shape, &path))
            }
        }
    }
}

/// Spawns the handler's trailing work. Failures go to the observer and nowhere else.
pub fn detach_completion(completion: Completion, observer: Arc<dyn Observer>) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            if let Err(err) = completion.await {
                observer.completion_failed(&err);
            }
        }
        .instrument(tracing::Span::current()),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::handler::{Env, HandledRequest, HandlerError, ServerMode};
    use crate::normalize::NormalizedRequest;
    use crate::platform::PlatformContext;
    use crate::response::UNMATCHED_PATH_HEADER;
    use async_trait::async_trait;
    use axum::http::header::{CONTENT_TYPE, HeaderValue, SET_COOKIE};
    use axum::http::{HeaderMap, Method, StatusCode, Uri};
    use tokio::sync::mpsc;

    /// Forwards completion failures to a channel so tests can wait for them.
    pub(crate) struct RecordingObserver {
        pub(crate) failures: mpsc::UnboundedSender<String>,
    }

    impl Observer for RecordingObserver {
        fn completion_failed(&self, error: &HandlerError) {
            let _ = self.failures.send(error.to_string());
        }
    }

    struct Page {
        chunks: Vec<&'static str>,
        completion_error: Option<&'static str>,
    }

    #[async_trait]
    impl RequestHandler for Page {
        async fn handle(
            &self,
            mut event: ServerRequestEvent,
        ) -> Result<Option<HandledRequest>, HandlerError> {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
            let mut sink = event.writable_stream(StatusCode::OK, headers, ["theme=dark"])?;
            for chunk in &self.chunks {
                sink.write(chunk.as_bytes())?;
            }
            sink.close()?;

            let completion_error = self.completion_error;
            Ok(Some(HandledRequest::new(async move {
                match completion_error {
                    Some(message) => Err::<(), HandlerError>(message.into()),
                    None => Ok(()),
                }
            })))
        }
    }

    struct NoRoute;

    #[async_trait]
    impl RequestHandler for NoRoute {
        async fn handle(
            &self,
            _event: ServerRequestEvent,
        ) -> Result<Option<HandledRequest>, HandlerError> {
            Ok(None)
        }
    }

    struct Abandons;

    #[async_trait]
    impl RequestHandler for Abandons {
        async fn handle(
            &self,
            mut event: ServerRequestEvent,
        ) -> Result<Option<HandledRequest>, HandlerError> {
            let mut sink = event.writable_stream(StatusCode::OK, HeaderMap::new(), Vec::<String>::new())?;
            sink.write(b"half")?;
            Ok(Some(HandledRequest::completed()))
        }
    }

    struct Fails;

    #[async_trait]
    impl RequestHandler for Fails {
        async fn handle(
            &self,
            _event: ServerRequestEvent,
        ) -> Result<Option<HandledRequest>, HandlerError> {
            Err("render exploded".into())
        }
    }

    struct WritesLater;

    #[async_trait]
    impl RequestHandler for WritesLater {
        async fn handle(
            &self,
            mut event: ServerRequestEvent,
        ) -> Result<Option<HandledRequest>, HandlerError> {
            let mut sink =
                event.writable_stream(StatusCode::ACCEPTED, HeaderMap::new(), Vec::<String>::new())?;
            tokio::spawn(async move {
                for chunk in ["a", "b", "c"] {
                    tokio::task::yield_now().await;
                    let _ = sink.write(chunk.as_bytes());
                }
                let _ = sink.close();
            });
            Ok(Some(HandledRequest::completed()))
        }
    }

    pub(crate) fn request_event(path: &'static str) -> (ServerRequestEvent, ResponseReceiver) {
        let request = NormalizedRequest {
            method: Method::GET,
            url: Uri::from_static(path),
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

    fn bridge(shape: EventShape) -> (ResponseBridge, mpsc::UnboundedReceiver<String>) {
        let (failures, rx) = mpsc::unbounded_channel();
        let observer = Arc::new(RecordingObserver { failures });
        (ResponseBridge::new(shape, observer), rx)
    }

    #[tokio::test]
    async fn converts_sink_output_to_cloudfront_response() {
        let (bridge, _failures) = bridge(EventShape::CloudFront);
        let (event, receiver) = request_event("https://example.com/about");
        let handler = Page {
            chunks: vec!["<html>", "About", "</html>"],
            completion_error: None,
        };

        let response = bridge.run(&handler, event, receiver).await.expect("response");
        assert_eq!(response.status(), Some(200));
        assert_eq!(response.body(), Some("<html>About</html>"));
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.header_values(SET_COOKIE.as_str()), vec!["theme=dark"]);
    }

    #[tokio::test]
    async fn synthesizes_not_found_when_no_route_matches() {
        let (bridge, _failures) = bridge(EventShape::ApiGateway);
        let (event, receiver) = request_event("https://example.com/nowhere");

        let response = bridge.run(&NoRoute, event, receiver).await.expect("response");
        assert_eq!(response.status(), Some(404));
        assert_eq!(response.header(UNMATCHED_PATH_HEADER), Some("/nowhere"));
    }

    #[tokio::test]
    async fn completion_failure_is_reported_not_returned() {
        let (bridge, mut failures) = bridge(EventShape::CloudFront);
        let (event, receiver) = request_event("https://example.com/about");
        let handler = Page {
            chunks: vec!["ok"],
            completion_error: Some("analytics flush failed"),
        };

        let response = bridge.run(&handler, event, receiver).await.expect("response");
        assert_eq!(response.status(), Some(200));
        assert_eq!(response.body(), Some("ok"));
        assert_eq!(
            failures.recv().await.as_deref(),
            Some("analytics flush failed")
        );
    }

    #[tokio::test]
    async fn abandoned_sink_is_an_error() {
        let (bridge, _failures) = bridge(EventShape::CloudFront);
        let (event, receiver) = request_event("https://example.com/about");

        let err = bridge.run(&Abandons, event, receiver).await.expect_err("abandoned");
        assert!(matches!(err, EdgeBridgeError::Sink(crate::sink::SinkError::Abandoned)));
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let (bridge, _failures) = bridge(EventShape::CloudFront);
        let (event, receiver) = request_event("https://example.com/about");

        let err = bridge.run(&Fails, event, receiver).await.expect_err("failure");
        assert!(matches!(err, EdgeBridgeError::Handler(_)));
        assert!(err.to_string().contains("render exploded"));
    }

    #[tokio::test]
    async fn waits_for_sink_closed_after_handler_returns() {
        let (bridge, _failures) = bridge(EventShape::ApiGateway);
        let (event, receiver) = request_event("https://example.com/stream");

        let response = bridge.run(&WritesLater, event, receiver).await.expect("response");
        assert_eq!(response.status(), Some(202));
        assert_eq!(response.body(), Some("abc"));
    }

    #[tokio::test]
    async fn detached_completion_runs_to_end() {
        let (failures, mut rx) = mpsc::unbounded_channel();
        let observer: Arc<dyn Observer> = Arc::new(RecordingObserver { failures });

        detach_completion(Box::pin(async { Ok::<(), HandlerError>(()) }), observer.clone())
            .await
            .expect("join");
        detach_completion(Box::pin(async { Err::<(), HandlerError>("late".into()) }), observer)
            .await
            .expect("join");

        assert_eq!(rx.recv().await.as_deref(), Some("late"));
        assert!(rx.try_recv().is_err());
    }
}
