use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use dotenvy::Error as DotenvError;
use thiserror::Error;

use crate::assets::StaticStrategy;
use crate::platform::{EventShape, ProviderProfile};
use crate::static_paths::StaticPaths;

const DEFAULT_PLACEHOLDER_ORIGIN: &str = "http://localhost";
const DEFAULT_STATIC_DIR: &str = "static";
const DEFAULT_DEV_PORT: u16 = 3000;

const PROVIDER_ENV: &str = "EDGEBRIDGE_PROVIDER";
const STATIC_ENV: &str = "EDGEBRIDGE_STATIC";
const STATIC_DIR_ENV: &str = "EDGEBRIDGE_STATIC_DIR";
const BUCKET_DOMAIN_ENV: &str = "EDGEBRIDGE_STATIC_BUCKET_DOMAIN";
const BUCKET_REGION_ENV: &str = "EDGEBRIDGE_STATIC_BUCKET_REGION";
const STATIC_PATHS_ENV: &str = "EDGEBRIDGE_STATIC_PATHS";
const PLACEHOLDER_ORIGIN_ENV: &str = "EDGEBRIDGE_PLACEHOLDER_ORIGIN";
const EXPOSE_ERRORS_ENV: &str = "EDGEBRIDGE_EXPOSE_ERRORS";
const ADDR_ENV: &str = "EDGEBRIDGE_ADDR";
const PORT_ENV: &str = "PORT";

/// How much of an internal error reaches the client in a 500 response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorDetail {
    /// Empty body; details are only logged.
    #[default]
    Hidden,
    /// The stringified error becomes the body.
    Exposed,
}

/// Configuration consumed by the adapter when it is constructed.
#[derive(Clone, Debug)]
pub struct AdapterConfig {
    pub profile: ProviderProfile,
    pub static_paths: StaticPaths,
    pub placeholder_origin: String,
    pub error_detail: ErrorDetail,
    /// Listen address for the local development server.
    pub bind_addr: SocketAddr,
}

impl AdapterConfig {
    /// Loads configuration from `EDGEBRIDGE_*` environment variables, plus `PORT` for the dev
    /// server. A `.env` file in the working directory is applied first and wins over variables
    /// already present in the process.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_env_overrides()?;

        let shape = match env::var(PROVIDER_ENV) {
            Ok(value) => value
                .parse::<EventShape>()
                .map_err(ConfigError::InvalidProvider)?,
            Err(_) => EventShape::default(),
        };

        let static_strategy = static_strategy_from_env()?;

        let mut static_paths = StaticPaths::default();
        if let Ok(extra) = env::var(STATIC_PATHS_ENV) {
            for path in extra.split(',') {
                static_paths.insert(path);
            }
        }

        let mut builder = Self::builder()
            .profile(ProviderProfile::new(shape, static_strategy))
            .static_paths(static_paths)
            .bind_addr(resolve_bind_addr());

        if let Ok(origin) = env::var(PLACEHOLDER_ORIGIN_ENV) {
            builder = builder.placeholder_origin(origin);
        }

        if env::var(EXPOSE_ERRORS_ENV)
            .map(|value| is_truthy(&value))
            .unwrap_or(false)
        {
            builder = builder.error_detail(ErrorDetail::Exposed);
        }

        builder.build()
    }

    /// Returns a builder for programmatic overrides.
    pub fn builder() -> AdapterConfigBuilder {
        AdapterConfigBuilder::default()
    }

    pub fn shape(&self) -> EventShape {
        self.profile.shape
    }
}

impl Default for AdapterConfig {
    /// CloudFront events, assets read from `./static`, details hidden from clients.
    fn default() -> Self {
        Self {
            profile: ProviderProfile::default(),
            static_paths: StaticPaths::default(),
            placeholder_origin: DEFAULT_PLACEHOLDER_ORIGIN.to_owned(),
            error_detail: ErrorDetail::default(),
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_DEV_PORT),
        }
    }
}

/// Builder type for [`AdapterConfig`].
#[derive(Default, Clone, Debug)]
pub struct AdapterConfigBuilder {
    profile: Option<ProviderProfile>,
    static_paths: Option<StaticPaths>,
    placeholder_origin: Option<String>,
    error_detail: Option<ErrorDetail>,
    bind_addr: Option<SocketAddr>,
}

impl AdapterConfigBuilder {
    /// Sets the event shape and static strategy together.
    pub fn profile(mut self, profile: ProviderProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Sets the event shape, keeping the current static strategy.
    pub fn shape(mut self, shape: EventShape) -> Self {
        let mut profile = self.profile.unwrap_or_default();
        profile.shape = shape;
        self.profile = Some(profile);
        self
    }

    /// Sets the static strategy, keeping the current event shape.
    pub fn static_strategy(mut self, strategy: StaticStrategy) -> Self {
        let mut profile = self.profile.unwrap_or_default();
        profile.static_strategy = strategy;
        self.profile = Some(profile);
        self
    }

    /// Replaces the exact-path allow-list.
    pub fn static_paths(mut self, paths: StaticPaths) -> Self {
        self.static_paths = Some(paths);
        self
    }

    /// Origin used for gateway events that carry no domain name.
    pub fn placeholder_origin(mut self, origin: impl Into<String>) -> Self {
        self.placeholder_origin = Some(origin.into());
        self
    }

    pub fn error_detail(mut self, detail: ErrorDetail) -> Self {
        self.error_detail = Some(detail);
        self
    }

    /// Sets the address for the local development server.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Validates and builds the final configuration.
    pub fn build(self) -> Result<AdapterConfig, ConfigError> {
        let defaults = AdapterConfig::default();
        let profile = self.profile.unwrap_or(defaults.profile);
        if !profile.is_consistent() {
            return Err(ConfigError::IncompatibleStaticStrategy {
                strategy: profile.static_strategy.name(),
                shape: profile.shape,
            });
        }

        Ok(AdapterConfig {
            profile,
            static_paths: self.static_paths.unwrap_or(defaults.static_paths),
            placeholder_origin: self
                .placeholder_origin
                .unwrap_or(defaults.placeholder_origin),
            error_detail: self.error_detail.unwrap_or(defaults.error_detail),
            bind_addr: self.bind_addr.unwrap_or(defaults.bind_addr),
        })
    }
}

/// Errors that can occur while building [`AdapterConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid provider {0:?} (expected cloudfront or api-gateway)")]
    InvalidProvider(String),
    #[error("invalid static strategy {0:?} (expected local, origin or off)")]
    InvalidStaticStrategy(String),
    #[error("{0} must be set when static assets are served from an origin")]
    MissingBucketSetting(&'static str),
    #[error("static strategy {strategy} cannot be used with {shape} events")]
    IncompatibleStaticStrategy {
        strategy: &'static str,
        shape: EventShape,
    },
    #[error("failed to load .env overrides: {0}")]
    Dotenv(#[from] DotenvError),
}

fn load_env_overrides() -> Result<(), ConfigError> {
    match dotenvy::dotenv_override() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::Dotenv(err)),
    }
}

fn static_strategy_from_env() -> Result<StaticStrategy, ConfigError> {
    let kind = env::var(STATIC_ENV).unwrap_or_else(|_| "local".to_owned());
    match kind.trim().to_ascii_lowercase().as_str() {
        "local" | "files" => {
            let root = env::var(STATIC_DIR_ENV).unwrap_or_else(|_| DEFAULT_STATIC_DIR.to_owned());
            Ok(StaticStrategy::LocalFiles {
                root: PathBuf::from(root),
            })
        }
        "origin" | "s3" => {
            let domain = env::var(BUCKET_DOMAIN_ENV)
                .map_err(|_| ConfigError::MissingBucketSetting(BUCKET_DOMAIN_ENV))?;
            let region = env::var(BUCKET_REGION_ENV)
                .map_err(|_| ConfigError::MissingBucketSetting(BUCKET_REGION_ENV))?;
            Ok(StaticStrategy::OriginRewrite { domain, region })
        }
        "off" | "none" | "disabled" => Ok(StaticStrategy::Disabled),
        _ => Err(ConfigError::InvalidStaticStrategy(kind)),
    }
}

fn resolve_bind_addr() -> SocketAddr {
    if let Some(addr) = env::var(ADDR_ENV)
        .ok()
        .and_then(|value| value.parse::<SocketAddr>().ok())
    {
        return addr;
    }

    let port = env::var(PORT_ENV)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_DEV_PORT);
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
