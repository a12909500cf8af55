use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::assets::StaticStrategy;

/// Describes which provider event format the adapter speaks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventShape {
    /// Lambda@Edge viewer/origin request events (`Records[0].cf`).
    #[default]
    CloudFront,
    /// API Gateway REST proxy events (`path`, `httpMethod`, ...).
    ApiGateway,
}

impl EventShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventShape::CloudFront => "cloudfront",
            EventShape::ApiGateway => "api-gateway",
        }
    }
}

impl fmt::Display for EventShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.eq_ignore_ascii_case("cloudfront")
            || value.eq_ignore_ascii_case("edge")
            || value.eq_ignore_ascii_case("lambda-edge")
        {
            return Ok(EventShape::CloudFront);
        }

        if value.eq_ignore_ascii_case("api-gateway")
            || value.eq_ignore_ascii_case("apigateway")
            || value.eq_ignore_ascii_case("gateway")
        {
            return Ok(EventShape::ApiGateway);
        }

        Err(value.to_owned())
    }
}

/// Provider profile selected once, when the adapter is constructed.
///
/// The event shape picks the inbound parser and the outbound serializer; the static strategy
/// decides what happens to requests the classifier marks as static.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderProfile {
    pub shape: EventShape,
    pub static_strategy: StaticStrategy,
}

impl ProviderProfile {
    pub fn new(shape: EventShape, static_strategy: StaticStrategy) -> Self {
        Self {
            shape,
            static_strategy,
        }
    }

    /// Returns `true` when the strategy can only work on CloudFront request events.
    pub fn is_consistent(&self) -> bool {
        match self.static_strategy {
            StaticStrategy::OriginRewrite { .. } => self.shape == EventShape::CloudFront,
            _ => true,
        }
    }
}

/// Per-invocation platform metadata handed through to the request handler untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlatformContext {
    pub request_id: Option<String>,
    pub invoked_function_arn: Option<String>,
    /// Deadline in milliseconds since the Unix epoch.
    pub deadline_ms: Option<u64>,
    pub xray_trace_id: Option<String>,
}

impl From<&lambda_runtime::Context> for PlatformContext {
    fn from(context: &lambda_runtime::Context) -> Self {
        Self {
            request_id: Some(context.request_id.clone()).filter(|value| !value.is_empty()),
            invoked_function_arn: Some(context.invoked_function_arn.clone())
                .filter(|value| !value.is_empty()),
            deadline_ms: Some(context.deadline).filter(|value| *value > 0),
            xray_trace_id: context.xray_trace_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_shape_aliases() {
        assert_eq!("cloudfront".parse::<EventShape>(), Ok(EventShape::CloudFront));
        assert_eq!("Edge".parse::<EventShape>(), Ok(EventShape::CloudFront));
        assert_eq!(" api-gateway ".parse::<EventShape>(), Ok(EventShape::ApiGateway));
        assert_eq!("azure".parse::<EventShape>(), Err("azure".to_owned()));
    }

    #[test]
    fn origin_rewrite_requires_cloudfront() {
        let rewrite = StaticStrategy::OriginRewrite {
            domain: "assets.s3.amazonaws.com".into(),
            region: "us-east-1".into(),
        };
        assert!(ProviderProfile::new(EventShape::CloudFront, rewrite.clone()).is_consistent());
        assert!(!ProviderProfile::new(EventShape::ApiGateway, rewrite).is_consistent());
        assert!(
            ProviderProfile::new(EventShape::ApiGateway, StaticStrategy::Disabled).is_consistent()
        );
    }
}
