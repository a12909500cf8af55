//! Edgebridge adapter crate.
//!
//! This crate runs a Rust request handler behind AWS Lambda@Edge (CloudFront) and API Gateway
//! proxy events. Each invocation is normalized into a canonical request, short-circuited when it
//! targets a pre-built static asset, and otherwise bridged through the handler's buffered
//! response sink back into the provider's response shape.

pub mod assets;
pub mod bridge;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod normalize;
pub mod observe;
pub mod platform;
pub mod response;
pub mod runtime;
pub mod sink;
pub mod static_paths;

pub use crate::assets::{AssetError, StaticAsset, StaticStrategy};
pub use crate::bridge::{ResponseBridge, detach_completion};
pub use crate::config::{AdapterConfig, AdapterConfigBuilder, ConfigError, ErrorDetail};
pub use crate::error::{EdgeBridgeError, Result};
pub use crate::event::{InboundEvent, NormalizeError};
pub use crate::handler::{
    Completion, Env, HandledRequest, HandlerError, RequestHandler, ServerMode, ServerRequestEvent,
};
pub use crate::normalize::NormalizedRequest;
pub use crate::observe::{NoopObserver, Observer, TracingObserver};
pub use crate::platform::{EventShape, PlatformContext, ProviderProfile};
pub use crate::response::OutboundEvent;
pub use crate::runtime::{EdgeAdapter, run, run_handler, serve};
pub use crate::sink::{ResponseSink, SinkError, SinkOutput, merge_headers_cookies};
pub use crate::static_paths::StaticPaths;
pub use async_trait::async_trait;
