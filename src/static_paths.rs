use std::collections::BTreeSet;

use axum::http::Method;

const BUILD_PREFIX: &str = "/build/";
const ASSETS_PREFIX: &str = "/assets/";
const DATA_SUFFIX: &str = "/q-data.json";

/// Well-known root-level files emitted by the client build.
pub const DEFAULT_STATIC_PATHS: [&str; 5] = [
    "/favicon.svg",
    "/manifest.json",
    "/q-manifest.json",
    "/robots.txt",
    "/service-worker.js",
];

/// Allow-list of exact paths that are served without invoking the request handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticPaths {
    paths: BTreeSet<String>,
}

impl Default for StaticPaths {
    fn default() -> Self {
        Self {
            paths: DEFAULT_STATIC_PATHS.iter().map(|path| (*path).to_owned()).collect(),
        }
    }
}

impl StaticPaths {
    /// Creates an allow-list with no entries; prefix rules still apply.
    pub fn empty() -> Self {
        Self {
            paths: BTreeSet::new(),
        }
    }

    /// Adds an exact path. A missing leading slash is added.
    pub fn insert(&mut self, path: impl Into<String>) {
        let path = path.into();
        let path = path.trim();
        if path.is_empty() {
            return;
        }
        if path.starts_with('/') {
            self.paths.insert(path.to_owned());
        } else {
            self.paths.insert(format!("/{path}"));
        }
    }

    pub fn with(mut self, path: impl Into<String>) -> Self {
        self.insert(path);
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Classifies a request as static.
    ///
    /// Only `GET` qualifies. Prefix rules are checked first, then the exact allow-list, then
    /// the data sidecar (`<route>/q-data.json`) of an allow-listed route.
    pub fn is_static_path(&self, method: &Method, path: &str) -> bool {
        if *method != Method::GET {
            return false;
        }

        if path.starts_with(BUILD_PREFIX) || path.starts_with(ASSETS_PREFIX) {
            return true;
        }

        if self.paths.contains(path) {
            return true;
        }

        if let Some(route) = path.strip_suffix(DATA_SUFFIX) {
            let with_slash = format!("{route}/");
            if self.paths.contains(&with_slash) || self.paths.contains(route) {
                return true;
            }
        }

        false
    }
}
