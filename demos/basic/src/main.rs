use axum::http::header::{CONTENT_TYPE, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use edgebridge::{
    AdapterConfig, EdgeAdapter, HandledRequest, HandlerError, RequestHandler, ServerRequestEvent,
    async_trait, run, serve,
};

struct Pages;

#[async_trait]
impl RequestHandler for Pages {
    async fn handle(
        &self,
        mut event: ServerRequestEvent,
    ) -> Result<Option<HandledRequest>, HandlerError> {
        let title = match event.url().path() {
            "/" => "Home",
            "/about" => "About",
            _ => return Ok(None),
        };
        let greeting = event
            .env()
            .get("GREETING")
            .unwrap_or_else(|| "it works!".to_owned());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        let mut sink = event.writable_stream(StatusCode::OK, headers, ["visited=1; Path=/"])?;
        sink.write(format!("<html><head><title>{title}</title></head>").as_bytes())?;
        sink.write(format!("<body><h1>{title}</h1><p>{greeting}</p></body></html>").as_bytes())?;
        sink.close()?;

        let path = event.url().path().to_owned();
        Ok(Some(HandledRequest::new(async move {
            tracing::info!(%path, "page view recorded");
            Ok::<(), HandlerError>(())
        })))
    }
}

#[tokio::main]
async fn main() -> edgebridge::Result<()> {
    tracing_subscriber::fmt::init();

    let config = AdapterConfig::from_env()?;
    let adapter = EdgeAdapter::new(config, Pages);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        run(adapter).await
    } else {
        serve(adapter).await
    }
}
