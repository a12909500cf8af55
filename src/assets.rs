use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value, json};
use thiserror::Error;

const DEFAULT_STATIC_DIR: &str = "static";

/// What to do with a request the classifier marked as static. Chosen once per deployment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StaticStrategy {
    /// Read the asset from a directory shipped with the function.
    LocalFiles { root: PathBuf },
    /// Point the CloudFront request at an object-storage origin and let the edge fetch it.
    OriginRewrite { domain: String, region: String },
    /// Never short-circuit; every request goes to the request handler.
    Disabled,
}

impl Default for StaticStrategy {
    fn default() -> Self {
        Self::LocalFiles {
            root: PathBuf::from(DEFAULT_STATIC_DIR),
        }
    }
}

impl StaticStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            StaticStrategy::LocalFiles { .. } => "local",
            StaticStrategy::OriginRewrite { .. } => "origin",
            StaticStrategy::Disabled => "off",
        }
    }
}

/// An asset read from the local static directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticAsset {
    pub path: PathBuf,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

/// Errors raised while serving a static asset.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("static path {0:?} is not valid percent-encoded utf-8")]
    InvalidPath(String),
    #[error("static path {0:?} resolves outside the static root")]
    OutsideRoot(String),
    #[error("failed to read static asset {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cloudfront request is not an object and cannot be rewritten")]
    NotRewritable,
}

/// Reads `url_path` from `root`.
///
/// The decoded path must stay inside `root`, both lexically and after symlinks are resolved.
/// A missing file is an error, never an empty response.
pub async fn read_local(root: &Path, url_path: &str) -> Result<StaticAsset, AssetError> {
    let decoded = urlencoding::decode(url_path)
        .map_err(|_| AssetError::InvalidPath(url_path.to_owned()))?;
    let path = resolve_within(root, &decoded)?;

    let io_err = |source| AssetError::Io {
        path: path.clone(),
        source,
    };
    let canonical_root = tokio::fs::canonicalize(root).await.map_err(io_err)?;
    let canonical_path = tokio::fs::canonicalize(&path).await.map_err(io_err)?;
    if !canonical_path.starts_with(&canonical_root) {
        return Err(AssetError::OutsideRoot(url_path.to_owned()));
    }

    let body = tokio::fs::read(&canonical_path).await.map_err(io_err)?;
    Ok(StaticAsset {
        content_type: mime_type(&path),
        path,
        body,
    })
}

fn resolve_within(root: &Path, decoded: &str) -> Result<PathBuf, AssetError> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(decoded).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(AssetError::OutsideRoot(decoded.to_owned()));
            }
        }
    }
    Ok(resolved)
}

/// Returns a copy of the raw CloudFront request pointed at an S3 origin with no auth.
pub fn rewrite_origin(raw_request: &Value, domain: &str, region: &str) -> Result<Value, AssetError> {
    let mut request = raw_request.clone();
    let object = request.as_object_mut().ok_or(AssetError::NotRewritable)?;

    object.insert(
        "origin".to_owned(),
        json!({
            "s3": {
                "domainName": domain,
                "region": region,
                "authMethod": "none",
                "path": "",
                "customHeaders": {}
            }
        }),
    );

    let headers = object
        .entry("headers")
        .or_insert_with(|| Value::Object(Map::new()));
    if !headers.is_object() {
        *headers = Value::Object(Map::new());
    }
    if let Some(headers) = headers.as_object_mut() {
        headers.insert("host".to_owned(), json!([{ "key": "host", "value": domain }]));
    }

    Ok(request)
}

/// Looks up the Content-Type for a file by its (case-insensitive) extension.
pub fn mime_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    mime_for_extension(&extension)
}

/// Fixed extension to Content-Type table. Extensions are lowercase without the leading dot.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension {
        "3gp" => "video/3gpp",
        "3gpp" => "video/3gpp",
        "asf" => "video/x-ms-asf",
        "asx" => "video/x-ms-asf",
        "avi" => "video/x-msvideo",
        "avif" => "image/avif",
        "bmp" => "image/x-ms-bmp",
        "css" => "text/css",
        "flv" => "video/x-flv",
        "gif" => "image/gif",
        "htm" => "text/html",
        "html" => "text/html",
        "ico" => "image/x-icon",
        "jng" => "image/x-jng",
        "jpeg" => "image/jpeg",
        "jpg" => "image/jpeg",
        "js" => "application/javascript",
        "json" => "application/json",
        "kar" => "audio/midi",
        "m4a" => "audio/x-m4a",
        "m4v" => "video/x-m4v",
        "mid" => "audio/midi",
        "midi" => "audio/midi",
        "mng" => "video/x-mng",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "mpeg" => "video/mpeg",
        "mpg" => "video/mpeg",
        "ogg" => "audio/ogg",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "rar" => "application/x-rar-compressed",
        "shtml" => "text/html",
        "svg" => "image/svg+xml",
        "svgz" => "image/svg+xml",
        "tif" => "image/tiff",
        "tiff" => "image/tiff",
        "ts" => "video/mp2t",
        "txt" => "text/plain",
        "wbmp" => "image/vnd.wap.wbmp",
        "webm" => "video/webm",
        "webp" => "image/webp",
        "wmv" => "video/x-ms-wmv",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "xml" => "text/xml",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(mime)
}
