use std::collections::BTreeMap;

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;

use crate::event::{BodyEncoding, CloudFrontHeader};
use crate::platform::EventShape;
use crate::sink::SinkOutput;

/// Header carrying the path of a request no route matched.
pub const UNMATCHED_PATH_HEADER: &str = "x-unmatched-path";

const NOT_FOUND_HTML: &str = "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\"><title>404 Not Found</title></head><body><h1>404 Not Found</h1><p>The requested page could not be found.</p></body></html>";
const NOT_FOUND_CACHE_CONTROL: &str = "no-cache, no-store, max-age=0, must-revalidate";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// What the adapter returns to the provider runtime.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundEvent {
    CloudFront(CloudFrontResponse),
    ApiGateway(ApiGatewayResponse),
    /// A (possibly rewritten) CloudFront request handed back for the edge to fetch.
    Passthrough(Value),
}

/// Lambda@Edge generated response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFrontResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_description: Option<String>,
    pub headers: BTreeMap<String, Vec<CloudFrontHeader>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<BodyEncoding>,
}

/// API Gateway proxy integration response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl OutboundEvent {
    /// Serializes a status, header map and body into the provider's response shape.
    ///
    /// UTF-8 bodies are sent as text, anything else base64-encoded with the provider's flag set.
    pub fn from_parts(shape: EventShape, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Self {
        let (body, base64) = match std::str::from_utf8(body) {
            Ok(text) => (text.to_owned(), false),
            Err(_) => (STANDARD.encode(body), true),
        };

        match shape {
            EventShape::CloudFront => OutboundEvent::CloudFront(CloudFrontResponse {
                status: status.as_u16().to_string(),
                status_description: status.canonical_reason().map(str::to_owned),
                headers: nest_headers(headers),
                body: Some(body).filter(|body| !body.is_empty()),
                body_encoding: base64.then_some(BodyEncoding::Base64),
            }),
            EventShape::ApiGateway => {
                let (headers, multi_value_headers) = flatten_headers(headers);
                OutboundEvent::ApiGateway(ApiGatewayResponse {
                    status_code: status.as_u16(),
                    headers,
                    multi_value_headers,
                    body,
                    is_base64_encoded: base64,
                })
            }
        }
    }

    pub fn from_sink(shape: EventShape, output: &SinkOutput) -> Self {
        Self::from_parts(shape, output.status, &output.headers, &output.body)
    }

    /// Fixed 404 page for requests no route matched.
    pub fn not_found(shape: EventShape, path: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(NOT_FOUND_CACHE_CONTROL));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
        let path_value = HeaderValue::from_str(path)
            .or_else(|_| HeaderValue::from_str(&urlencoding::encode(path)))
            .unwrap_or_else(|_| HeaderValue::from_static("/"));
        headers.insert(HeaderName::from_static(UNMATCHED_PATH_HEADER), path_value);
        Self::from_parts(shape, StatusCode::NOT_FOUND, &headers, NOT_FOUND_HTML.as_bytes())
    }

    /// Fixed 500 response. `detail` is only included when error exposure is enabled.
    pub fn internal_error(shape: EventShape, detail: Option<&str>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
        Self::from_parts(
            shape,
            StatusCode::INTERNAL_SERVER_ERROR,
            &headers,
            detail.unwrap_or_default().as_bytes(),
        )
    }

    /// The HTTP status, or `None` for a request passthrough.
    pub fn status(&self) -> Option<u16> {
        match self {
            OutboundEvent::CloudFront(response) => response.status.parse().ok(),
            OutboundEvent::ApiGateway(response) => Some(response.status_code),
            OutboundEvent::Passthrough(_) => None,
        }
    }

    /// Every value of a header, matched case-insensitively.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        let name = name.to_ascii_lowercase();
        match self {
            OutboundEvent::CloudFront(response) => response
                .headers
                .get(&name)
                .map(|entries| entries.iter().map(|entry| entry.value.as_str()).collect())
                .unwrap_or_default(),
            OutboundEvent::ApiGateway(response) => match response.multi_value_headers.get(&name) {
                Some(values) => values.iter().map(String::as_str).collect(),
                None => response.headers.get(&name).map(String::as_str).into_iter().collect(),
            },
            OutboundEvent::Passthrough(_) => Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).into_iter().next()
    }

    /// The body as sent to the provider (possibly base64).
    pub fn body(&self) -> Option<&str> {
        match self {
            OutboundEvent::CloudFront(response) => response.body.as_deref(),
            OutboundEvent::ApiGateway(response) => Some(response.body.as_str()),
            OutboundEvent::Passthrough(_) => None,
        }
    }

    pub fn is_base64_encoded(&self) -> bool {
        match self {
            OutboundEvent::CloudFront(response) => {
                response.body_encoding == Some(BodyEncoding::Base64)
            }
            OutboundEvent::ApiGateway(response) => response.is_base64_encoded,
            OutboundEvent::Passthrough(_) => false,
        }
    }

    /// Decoded body bytes.
    pub fn body_bytes(&self) -> Vec<u8> {
        let body = self.body().unwrap_or_default();
        if self.is_base64_encoded() {
            STANDARD.decode(body).unwrap_or_default()
        } else {
            body.as_bytes().to_vec()
        }
    }
}

fn header_text(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}

/// `content-type: text/html` becomes `{"content-type": [{"key": "Content-Type", "value": "text/html"}]}`.
fn nest_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<CloudFrontHeader>> {
    let mut nested: BTreeMap<String, Vec<CloudFrontHeader>> = BTreeMap::new();
    for (name, value) in headers {
        nested
            .entry(name.as_str().to_owned())
            .or_default()
            .push(CloudFrontHeader::new(title_case(name.as_str()), header_text(value)));
    }
    nested
}

/// Single-valued headers go to `headers`, repeated ones (`set-cookie`, ...) to `multiValueHeaders`.
fn flatten_headers(headers: &HeaderMap) -> (BTreeMap<String, String>, BTreeMap<String, Vec<String>>) {
    let mut single = BTreeMap::new();
    let mut multi = BTreeMap::new();
    for name in headers.keys() {
        let values: Vec<String> = headers.get_all(name).iter().map(header_text).collect();
        if values.len() > 1 {
            multi.insert(name.as_str().to_owned(), values);
        } else if let Some(value) = values.into_iter().next() {
            single.insert(name.as_str().to_owned(), value);
        }
    }
    (single, multi)
}

fn title_case(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
