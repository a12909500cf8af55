use thiserror::Error;

use crate::assets::AssetError;
use crate::config::ConfigError;
use crate::event::NormalizeError;
use crate::handler::HandlerError;
use crate::sink::SinkError;

pub type Result<T> = std::result::Result<T, EdgeBridgeError>;

#[derive(Debug, Error)]
pub enum EdgeBridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("request handler failed: {0}")]
    Handler(HandlerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lambda runtime error: {0}")]
    Lambda(lambda_runtime::Error),
}
