use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{HeaderMap, Method, Uri};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::event::{
    ApiGatewayEvent, BodyEncoding, CloudFrontBody, CloudFrontRecord, InboundEvent, NormalizeError,
};

/// Canonical request handed to the request handler, built once per invocation.
#[derive(Clone, Debug)]
pub struct NormalizedRequest {
    pub method: Method,
    /// Absolute URL (`scheme://authority/path?query`).
    pub url: Uri,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl NormalizedRequest {
    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }
}

impl InboundEvent {
    /// Builds the canonical request. `placeholder_origin` is used for gateway events that
    /// carry no domain name.
    pub fn normalize(&self, placeholder_origin: &str) -> Result<NormalizedRequest, NormalizeError> {
        match self {
            InboundEvent::CloudFront { record, .. } => normalize_cloudfront(record),
            InboundEvent::ApiGateway(event) => normalize_gateway(event, placeholder_origin),
        }
    }
}

fn normalize_cloudfront(record: &CloudFrontRecord) -> Result<NormalizedRequest, NormalizeError> {
    let request = &record.cf.request;
    let query = request
        .querystring
        .as_deref()
        .filter(|query| !query.is_empty());
    let full_url = match query {
        Some(query) => format!(
            "https://{}{}?{}",
            record.cf.config.distribution_domain_name, request.uri, query
        ),
        None => format!(
            "https://{}{}",
            record.cf.config.distribution_domain_name, request.uri
        ),
    };

    let mut headers = HeaderMap::new();
    for (name, entries) in &request.headers {
        for entry in entries {
            append_header(&mut headers, name, &entry.value)?;
        }
    }

    Ok(NormalizedRequest {
        method: parse_method(request.method.as_deref())?,
        url: parse_url(full_url)?,
        headers,
        body: request.body.as_ref().map(decode_cloudfront_body).transpose()?.flatten(),
    })
}

fn normalize_gateway(
    event: &ApiGatewayEvent,
    placeholder_origin: &str,
) -> Result<NormalizedRequest, NormalizeError> {
    let origin = event
        .request_context
        .as_ref()
        .and_then(|context| context.domain_name.as_deref())
        .filter(|domain| !domain.is_empty())
        .map(|domain| format!("https://{domain}"))
        .unwrap_or_else(|| placeholder_origin.trim_end_matches('/').to_owned());

    let path = encode_gateway_path(&event.path);
    let full_url = match gateway_query(event) {
        Some(query) => format!("{origin}{path}?{query}"),
        None => format!("{origin}{path}"),
    };

    let mut headers = HeaderMap::new();
    if let Some(multi) = &event.multi_value_headers {
        for (name, values) in multi {
            for value in values {
                append_header(&mut headers, name, value)?;
            }
        }
    } else if let Some(single) = &event.headers {
        for (name, value) in single {
            append_header(&mut headers, name, value)?;
        }
    }

    let body = match event.body.as_deref().filter(|body| !body.is_empty()) {
        Some(body) if event.is_base64_encoded => Some(decode_base64_text(body)?),
        Some(body) => Some(body.to_owned()),
        None => None,
    };

    Ok(NormalizedRequest {
        method: parse_method(event.http_method.as_deref())?,
        url: parse_url(full_url)?,
        headers,
        body,
    })
}

/// Gateway proxy events carry the path already decoded, so each segment is re-encoded before
/// the URL is composed.
fn encode_gateway_path(path: &str) -> String {
    let encoded = path
        .trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{encoded}")
}

fn gateway_query(event: &ApiGatewayEvent) -> Option<String> {
    let pairs: Vec<String> = match (
        &event.multi_value_query_string_parameters,
        &event.query_string_parameters,
    ) {
        (Some(multi), _) if !multi.is_empty() => multi
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |value| encode_pair(key, value)))
            .collect(),
        (_, Some(single)) => single
            .iter()
            .map(|(key, value)| encode_pair(key, value))
            .collect(),
        _ => Vec::new(),
    };

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("&"))
    }
}

fn encode_pair(key: &str, value: &str) -> String {
    format!(
        "{}={}",
        urlencoding::encode(key),
        urlencoding::encode(value)
    )
}

fn parse_method(method: Option<&str>) -> Result<Method, NormalizeError> {
    match method.map(str::trim).filter(|method| !method.is_empty()) {
        None => Ok(Method::GET),
        Some(method) => Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| NormalizeError::InvalidMethod(method.to_owned())),
    }
}

fn parse_url(url: String) -> Result<Uri, NormalizeError> {
    match Uri::try_from(url.as_str()) {
        Ok(uri) if uri.scheme().is_some() && uri.authority().is_some() => Ok(uri),
        Ok(_) => Err(NormalizeError::InvalidUrl {
            url,
            reason: "url is not absolute".to_owned(),
        }),
        Err(err) => Err(NormalizeError::InvalidUrl {
            url,
            reason: err.to_string(),
        }),
    }
}

fn append_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), NormalizeError> {
    let invalid = || NormalizeError::InvalidHeader {
        name: name.to_owned(),
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
    let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
    headers.append(header_name, header_value);
    Ok(())
}

fn decode_cloudfront_body(body: &CloudFrontBody) -> Result<Option<String>, NormalizeError> {
    if body.input_truncated {
        tracing::warn!("cloudfront truncated the request body before invoking the function");
    }
    if body.data.is_empty() {
        return Ok(None);
    }
    match body.encoding {
        BodyEncoding::Base64 => decode_base64_text(&body.data).map(Some),
        BodyEncoding::Text => Ok(Some(body.data.clone())),
    }
}

fn decode_base64_text(data: &str) -> Result<String, NormalizeError> {
    let bytes = STANDARD.decode(data.trim())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
