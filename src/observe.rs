use axum::http::{Method, Uri};

use crate::error::EdgeBridgeError;
use crate::handler::HandlerError;
use crate::platform::EventShape;

/// Receives one call per checkpoint of an invocation. Every method defaults to a no-op.
pub trait Observer: Send + Sync {
    /// Called before the payload is parsed, so malformed events are seen too.
    fn event_received(&self, _shape: EventShape) {}

    fn request_normalized(&self, _method: &Method, _url: &Uri) {}

    fn static_short_circuit(&self, _url: &Uri, _strategy: &'static str) {}

    fn handler_invoked(&self, _url: &Uri) {}

    fn response_finalized(&self, _status: Option<u16>) {}

    fn error_caught(&self, _error: &EdgeBridgeError) {}

    /// Trailing work of an already-answered request failed.
    fn completion_failed(&self, _error: &HandlerError) {}
}

/// Default observer that emits structured `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn event_received(&self, shape: EventShape) {
        tracing::info!(%shape, "inbound event received");
    }

    fn request_normalized(&self, method: &Method, url: &Uri) {
        tracing::debug!(%method, %url, "request normalized");
    }

    fn static_short_circuit(&self, url: &Uri, strategy: &'static str) {
        tracing::debug!(path = url.path(), strategy, "serving static asset");
    }

    fn handler_invoked(&self, url: &Uri) {
        tracing::debug!(path = url.path(), "invoking request handler");
    }

    fn response_finalized(&self, status: Option<u16>) {
        match status {
            Some(status) => tracing::info!(status, "response finalized"),
            None => tracing::info!("request passed through to origin"),
        }
    }

    fn error_caught(&self, error: &EdgeBridgeError) {
        tracing::error!(error = %error, "invocation failed");
    }

    fn completion_failed(&self, error: &HandlerError) {
        tracing::warn!(error = %error, "request completion reported an error");
    }
}

/// Observer that records nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}
