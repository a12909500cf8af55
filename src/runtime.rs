use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use lambda_runtime::{LambdaEvent, service_fn};
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tracing::Instrument;

use crate::assets::{self, StaticStrategy};
use crate::bridge::ResponseBridge;
use crate::config::{AdapterConfig, ErrorDetail};
use crate::error::{EdgeBridgeError, Result};
use crate::event::InboundEvent;
use crate::handler::{Env, RequestHandler, ServerMode, ServerRequestEvent};
use crate::observe::{Observer, TracingObserver};
use crate::platform::{EventShape, PlatformContext};
use crate::response::OutboundEvent;

const MAX_DEV_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Translates provider events into requests for `H` and its responses back into provider events.
pub struct EdgeAdapter<H> {
    config: AdapterConfig,
    handler: Arc<H>,
    observer: Arc<dyn Observer>,
    env: Env,
    mode: ServerMode,
}

impl<H> EdgeAdapter<H>
where
    H: RequestHandler + 'static,
{
    /// Creates an adapter that reports through [`TracingObserver`].
    pub fn new(config: AdapterConfig, handler: H) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            observer: Arc::new(TracingObserver),
            env: Env::process(),
            mode: ServerMode::Server,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Environment accessor handed to the request handler.
    pub fn with_env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Handles one invocation. Never fails: every error becomes the fixed 500 response.
    pub async fn handle(&self, payload: Value, platform: PlatformContext) -> OutboundEvent {
        let span = tracing::info_span!(
            "invocation",
            request_id = platform.request_id.as_deref().unwrap_or_default(),
            shape = %self.config.shape(),
        );

        async {
            let response = match self.try_handle(payload, platform).await {
                Ok(response) => response,
                Err(err) => {
                    self.observer.error_caught(&err);
                    let detail = match self.config.error_detail {
                        ErrorDetail::Hidden => None,
                        ErrorDetail::Exposed => Some(err.to_string()),
                    };
                    OutboundEvent::internal_error(self.config.shape(), detail.as_deref())
                }
            };
            self.observer.response_finalized(response.status());
            response
        }
        .instrument(span)
        .await
    }

    async fn try_handle(&self, payload: Value, platform: PlatformContext) -> Result<OutboundEvent> {
        let shape = self.config.shape();
        self.observer.event_received(shape);
        let event = InboundEvent::parse(shape, payload)?;
        let request = event.normalize(&self.config.placeholder_origin)?;
        self.observer
            .request_normalized(&request.method, &request.url);

        if self
            .config
            .static_paths
            .is_static_path(&request.method, request.path())
        {
            let strategy = &self.config.profile.static_strategy;
            match strategy {
                StaticStrategy::LocalFiles { root } => {
                    self.observer
                        .static_short_circuit(&request.url, strategy.name());
                    let asset = assets::read_local(root, request.path()).await?;
                    let mut headers = HeaderMap::new();
                    if let Some(content_type) = asset.content_type {
                        headers.insert(
                            axum::http::header::CONTENT_TYPE,
                            HeaderValue::from_static(content_type),
                        );
                    }
                    return Ok(OutboundEvent::from_parts(
                        shape,
                        StatusCode::OK,
                        &headers,
                        &asset.body,
                    ));
                }
                StaticStrategy::OriginRewrite { domain, region } => {
                    self.observer
                        .static_short_circuit(&request.url, strategy.name());
                    let InboundEvent::CloudFront { raw_request, .. } = &event else {
                        return Err(assets::AssetError::NotRewritable.into());
                    };
                    let rewritten = assets::rewrite_origin(raw_request, domain, region)?;
                    return Ok(OutboundEvent::Passthrough(rewritten));
                }
                StaticStrategy::Disabled => {}
            }
        }

        let platform = PlatformContext {
            request_id: platform
                .request_id
                .or_else(|| event.request_id().map(str::to_owned)),
            ..platform
        };
        let (server_event, receiver) =
            ServerRequestEvent::new(self.mode, platform, self.env.clone(), request);
        ResponseBridge::new(shape, self.observer.clone())
            .run(self.handler.as_ref(), server_event, receiver)
            .await
    }
}

/// Runs the adapter as an AWS Lambda function until the runtime shuts it down.
pub async fn run<H>(adapter: EdgeAdapter<H>) -> Result<()>
where
    H: RequestHandler + 'static,
{
    let adapter = Arc::new(adapter);
    tracing::info!(shape = %adapter.config.shape(), "edgebridge lambda starting");

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let adapter = adapter.clone();
        async move {
            let platform = PlatformContext::from(&event.context);
            Ok::<OutboundEvent, lambda_runtime::Error>(adapter.handle(event.payload, platform).await)
        }
    }))
    .await
    .map_err(EdgeBridgeError::Lambda)
}

/// Loads [`AdapterConfig`] from the environment and runs `handler` on AWS Lambda.
pub async fn run_handler<H>(handler: H) -> Result<()>
where
    H: RequestHandler + 'static,
{
    let config = AdapterConfig::from_env()?;
    run(EdgeAdapter::new(config, handler)).await
}

/// Serves the adapter over plain HTTP for local development.
///
/// Each request is replayed through the adapter as an event of the configured shape, so static
/// short-circuiting, the 404 page and error handling behave as they do once deployed.
pub async fn serve<H>(mut adapter: EdgeAdapter<H>) -> Result<()>
where
    H: RequestHandler + 'static,
{
    adapter.mode = ServerMode::Dev;
    let bind_addr = adapter.config.bind_addr;
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "edgebridge dev server listening");

    let router = Router::new()
        .fallback(dev_request::<H>)
        .with_state(Arc::new(adapter));

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn dev_request<H>(State(adapter): State<Arc<EdgeAdapter<H>>>, request: Request) -> Response
where
    H: RequestHandler + 'static,
{
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_DEV_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => return (StatusCode::PAYLOAD_TOO_LARGE, err.to_string()).into_response(),
    };

    let host = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let payload = dev_event(
        adapter.config.shape(),
        parts.method.as_str(),
        parts.uri.path(),
        parts.uri.query(),
        host,
        &parts.headers,
        &body,
    );

    let outbound = adapter.handle(payload, PlatformContext::default()).await;
    outbound_to_response(outbound)
}

/// Builds an event of the given shape from a plain HTTP request.
pub(crate) fn dev_event(
    shape: EventShape,
    method: &str,
    path: &str,
    query: Option<&str>,
    host: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Value {
    let encoded_body = (!body.is_empty()).then(|| STANDARD.encode(body));
    match shape {
        EventShape::CloudFront => {
            let mut nested = Map::new();
            for name in headers.keys() {
                let entries: Vec<Value> = headers
                    .get_all(name)
                    .iter()
                    .map(|value| {
                        json!({
                            "key": name.as_str(),
                            "value": String::from_utf8_lossy(value.as_bytes()),
                        })
                    })
                    .collect();
                nested.insert(name.as_str().to_owned(), Value::Array(entries));
            }
            let mut request = json!({
                "method": method,
                "uri": path,
                "querystring": query.unwrap_or_default(),
                "headers": nested,
            });
            if let Some(data) = encoded_body {
                request["body"] = json!({ "encoding": "base64", "data": data });
            }
            json!({
                "Records": [{
                    "cf": {
                        "config": { "distributionDomainName": host },
                        "request": request
                    }
                }]
            })
        }
        EventShape::ApiGateway => {
            let mut multi_headers: Map<String, Value> = Map::new();
            for name in headers.keys() {
                let values: Vec<Value> = headers
                    .get_all(name)
                    .iter()
                    .map(|value| Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()))
                    .collect();
                multi_headers.insert(name.as_str().to_owned(), Value::Array(values));
            }
            let mut query_params: Map<String, Value> = Map::new();
            for pair in query.unwrap_or_default().split('&').filter(|pair| !pair.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                let key = urlencoding::decode(key).map(|key| key.into_owned()).unwrap_or_else(|_| key.to_owned());
                let value = urlencoding::decode(value).map(|value| value.into_owned()).unwrap_or_else(|_| value.to_owned());
                let entry = query_params
                    .entry(key)
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(values) = entry {
                    values.push(Value::String(value));
                }
            }
            // API Gateway hands proxies the decoded path.
            let path = urlencoding::decode(path)
                .map(|path| path.into_owned())
                .unwrap_or_else(|_| path.to_owned());
            json!({
                "path": path,
                "httpMethod": method,
                "multiValueHeaders": multi_headers,
                "multiValueQueryStringParameters": query_params,
                "body": encoded_body,
                "isBase64Encoded": true,
            })
        }
    }
}

/// Converts an outbound event into a plain HTTP response.
pub(crate) fn outbound_to_response(outbound: OutboundEvent) -> Response {
    let Some(status) = outbound
        .status()
        .and_then(|status| StatusCode::from_u16(status).ok())
    else {
        // Origin passthrough: there is no edge to fetch from locally.
        return (
            StatusCode::BAD_GATEWAY,
            "static asset is served by the configured origin",
        )
            .into_response();
    };

    let mut headers = HeaderMap::new();
    let names: Vec<String> = match &outbound {
        OutboundEvent::CloudFront(response) => response.headers.keys().cloned().collect(),
        OutboundEvent::ApiGateway(response) => response
            .headers
            .keys()
            .chain(response.multi_value_headers.keys())
            .cloned()
            .collect(),
        OutboundEvent::Passthrough(_) => Vec::new(),
    };
    for name in names {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in outbound.header_values(&name) {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(header_name.clone(), value);
            }
        }
    }

    let mut response = Response::new(Body::from(outbound.body_bytes()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
