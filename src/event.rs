use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::platform::EventShape;

/// Lambda@Edge event envelope: `{ "Records": [ { "cf": { ... } } ] }`.
#[derive(Clone, Debug, Deserialize)]
pub struct CloudFrontEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<CloudFrontRecord>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CloudFrontRecord {
    pub cf: CloudFrontPayload,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CloudFrontPayload {
    pub config: CloudFrontConfig,
    pub request: CloudFrontRequest,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFrontConfig {
    pub distribution_domain_name: String,
    #[serde(default)]
    pub distribution_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFrontRequest {
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    pub uri: String,
    #[serde(default)]
    pub querystring: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<CloudFrontHeader>>,
    #[serde(default)]
    pub body: Option<CloudFrontBody>,
}

/// One entry of CloudFront's `{ "name": [ { "key": "Name", "value": "..." } ] }` header nesting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudFrontHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
}

impl CloudFrontHeader {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFrontBody {
    #[serde(default)]
    pub input_truncated: bool,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub encoding: BodyEncoding,
    #[serde(default)]
    pub data: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Base64,
    Text,
}

/// API Gateway REST proxy event.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayEvent {
    pub path: String,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub multi_value_headers: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub query_string_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub multi_value_query_string_parameters: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub request_context: Option<ApiGatewayRequestContext>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayRequestContext {
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
}

/// A provider invocation payload parsed according to the configured [`EventShape`].
///
/// The raw CloudFront request is kept next to the typed record so an origin rewrite can return
/// it with every field CloudFront sent.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    CloudFront {
        record: Box<CloudFrontRecord>,
        /// The untouched `Records[0].cf.request` object.
        raw_request: Value,
    },
    ApiGateway(Box<ApiGatewayEvent>),
}

impl InboundEvent {
    /// Parses a raw invocation payload.
    pub fn parse(shape: EventShape, payload: Value) -> Result<Self, NormalizeError> {
        match shape {
            EventShape::CloudFront => {
                let raw_request = payload
                    .pointer("/Records/0/cf/request")
                    .cloned()
                    .ok_or(NormalizeError::MissingRecord)?;
                let event: CloudFrontEvent = serde_json::from_value(payload)
                    .map_err(|err| NormalizeError::InvalidShape { shape, source: err })?;
                let record = event
                    .records
                    .into_iter()
                    .next()
                    .ok_or(NormalizeError::MissingRecord)?;
                Ok(InboundEvent::CloudFront {
                    record: Box::new(record),
                    raw_request,
                })
            }
            EventShape::ApiGateway => {
                let event: ApiGatewayEvent = serde_json::from_value(payload)
                    .map_err(|err| NormalizeError::InvalidShape { shape, source: err })?;
                Ok(InboundEvent::ApiGateway(Box::new(event)))
            }
        }
    }

    pub fn shape(&self) -> EventShape {
        match self {
            InboundEvent::CloudFront { .. } => EventShape::CloudFront,
            InboundEvent::ApiGateway(_) => EventShape::ApiGateway,
        }
    }

    /// Provider-assigned request id, when the event carries one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            InboundEvent::CloudFront { record, .. } => record.cf.config.request_id.as_deref(),
            InboundEvent::ApiGateway(event) => event
                .request_context
                .as_ref()
                .and_then(|context| context.request_id.as_deref()),
        }
    }
}

/// Errors raised while turning a provider payload into a [`crate::NormalizedRequest`].
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("event carries no CloudFront record")]
    MissingRecord,
    #[error("event does not match the {shape} shape: {source}")]
    InvalidShape {
        shape: EventShape,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid request url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid http method {0:?}")]
    InvalidMethod(String),
    #[error("invalid header {name:?}")]
    InvalidHeader { name: String },
    #[error("invalid base64 request body: {0}")]
    InvalidBody(#[from] base64::DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_cloudfront_record_and_keeps_raw_request() {
        let payload = json!({
            "Records": [{
                "cf": {
                    "config": { "distributionDomainName": "d111.cloudfront.net", "requestId": "abc" },
                    "request": {
                        "uri": "/about",
                        "method": "GET",
                        "querystring": "a=1",
                        "headers": { "host": [{ "key": "Host", "value": "example.com" }] },
                        "origin": { "custom": { "domainName": "origin.example.com" } }
                    }
                }
            }]
        });

        let event = InboundEvent::parse(EventShape::CloudFront, payload).expect("event");
        assert_eq!(event.shape(), EventShape::CloudFront);
        assert_eq!(event.request_id(), Some("abc"));
        match event {
            InboundEvent::CloudFront {
                record,
                raw_request,
            } => {
                assert_eq!(record.cf.request.uri, "/about");
                assert_eq!(record.cf.request.headers["host"][0].value, "example.com");
                assert_eq!(
                    raw_request["origin"]["custom"]["domainName"],
                    "origin.example.com"
                );
            }
            InboundEvent::ApiGateway(_) => panic!("expected cloudfront event"),
        }
    }

    #[test]
    fn rejects_empty_records() {
        let err = InboundEvent::parse(EventShape::CloudFront, json!({ "Records": [] }))
            .expect_err("no record");
        assert!(matches!(err, NormalizeError::MissingRecord));
    }

    #[test]
    fn rejects_gateway_event_without_path() {
        let err = InboundEvent::parse(EventShape::ApiGateway, json!({ "httpMethod": "GET" }))
            .expect_err("no path");
        assert!(matches!(
            err,
            NormalizeError::InvalidShape {
                shape: EventShape::ApiGateway,
                ..
            }
        ));
    }

    #[test]
    fn tolerates_null_gateway_collections() {
        let payload = json!({
            "path": "/",
            "httpMethod": "GET",
            "headers": null,
            "queryStringParameters": null,
            "body": null,
            "isBase64Encoded": false
        });
        let event = InboundEvent::parse(EventShape::ApiGateway, payload).expect("event");
        assert!(matches!(event, InboundEvent::ApiGateway(ref ev) if ev.headers.is_none()));
    }
}
