//! Offline layer configuration

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{ConfigError, Result};

/// Cache namespace shared by every generation of the site.
pub const DEFAULT_NAMESPACE: &str = "nmc";

/// Version token used when the script URL carries none.
pub const DEFAULT_VERSION: &str = "dev";

/// Cache-busting query parameter on the registration URL.
pub const VERSION_PARAM: &str = "v";

/// Page query flag that triggers the escape hatch.
pub const RESET_FLAG: &str = "reset_sw";

/// Opaque build/deploy stamp identifying one cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read the `v=<token>` parameter from a worker script URL.
    pub fn from_script_url(url: &Url) -> Option<Self> {
        url.query_pairs()
            .find(|(key, _)| key == VERSION_PARAM)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(Self)
    }
}

impl Default for VersionToken {
    fn default() -> Self {
        Self(DEFAULT_VERSION.to_string())
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// When a freshly installed worker takes over.
///
/// `WaitForClients` keeps the new generation waiting until every tab served
/// by the old worker is gone, so no tab ever mixes assets from two
/// deployments. `SkipWaiting` activates right after install, which rolls
/// a deployment out on the next request at the cost of an already-open tab
/// briefly loading assets from the new generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationPolicy {
    #[default]
    WaitForClients,
    SkipWaiting,
}

/// What the dynamic-data route answers with when the network fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicDataFallback {
    /// Current generation's precached copy, marked as a fallback, else `{}`.
    #[default]
    CachedThenEmpty,
    /// Always the empty payload.
    EmptyOnly,
}

/// Caching strategy applied to a request class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Network, then cache, then offline fallback.
    NetworkFirst,
    /// Cache, then network (stored on success).
    CacheFirst,
    /// Cache immediately, refresh in the background.
    StaleWhileRevalidate,
    /// Network without runtime caching.
    NetworkOnly,
    /// Not intercepted.
    Passthrough,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::NetworkFirst => "network-first",
            Strategy::CacheFirst => "cache-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
            Strategy::NetworkOnly => "network-only",
            Strategy::Passthrough => "passthrough",
        };
        f.write_str(name)
    }
}

/// Strategy per interceptable request class.
///
/// Cross-origin and non-GET requests are not part of the table: they always
/// pass through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub navigation: Strategy,
    pub dynamic_data: Strategy,
    pub static_asset: Strategy,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            navigation: Strategy::NetworkFirst,
            dynamic_data: Strategy::NetworkOnly,
            static_asset: Strategy::StaleWhileRevalidate,
        }
    }
}

/// Path matcher for the dynamic-data resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", content = "path", rename_all = "snake_case")]
pub enum PathPattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
}

impl PathPattern {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => path == p,
            PathPattern::Prefix(p) => path.starts_with(p.as_str()),
            PathPattern::Suffix(p) => path.ends_with(p.as_str()),
        }
    }
}

/// Ordered list of same-origin paths fetched at install time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreManifest(Vec<String>);

impl CoreManifest {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(entries.into_iter().map(Into::into).collect())
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve entries against the worker scope.
    ///
    /// Order is preserved. Duplicates, unparsable entries, and entries that
    /// land on another origin are dropped.
    pub fn resolve(&self, scope: &Url) -> Vec<Url> {
        let mut resolved: Vec<Url> = Vec::with_capacity(self.0.len());
        for entry in &self.0 {
            let url = match scope.join(entry) {
                Ok(url) => url,
                Err(e) => {
                    warn!(entry = %entry, error = %e, "Skipping unparsable manifest entry");
                    continue;
                }
            };
            if url.origin() != scope.origin() {
                warn!(entry = %entry, "Skipping cross-origin manifest entry");
                continue;
            }
            if resolved.contains(&url) {
                debug!(entry = %entry, "Skipping duplicate manifest entry");
                continue;
            }
            resolved.push(url);
        }
        resolved
    }
}

impl Default for CoreManifest {
    fn default() -> Self {
        Self::new([
            "./",
            "./index.html",
            "./static/style.css",
            "./static/app.js",
            "./static/manifest.webmanifest",
            "./static/compat_lookup.json",
            "./static/icons/icon-192.png",
            "./static/icons/icon-512.png",
        ])
    }
}

/// Configuration handed to the worker at startup and to the bootstrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Cache name prefix shared by all generations.
    pub namespace: String,

    /// Version token of this deployment.
    pub version: VersionToken,

    /// Keep documents and static assets in separate partitions.
    pub split_partitions: bool,

    /// Canonical worker script, relative to the site root.
    pub script_path: String,

    /// Registration scope, relative to the site root.
    pub scope: String,

    /// Assets fetched and stored at install time.
    pub manifest: CoreManifest,

    /// Compatibility lookup data, exempt from runtime caching.
    pub dynamic_data: PathPattern,

    /// Dynamic-data behavior when the network fails.
    pub dynamic_data_fallback: DynamicDataFallback,

    /// Document served to navigations when network and cache both miss.
    pub offline_fallback: String,

    /// Match documents ignoring the query string.
    pub document_ignore_search: bool,

    /// Whether install asks for immediate activation.
    pub activation: ActivationPolicy,

    /// Strategy per request class.
    pub routes: RouteConfig,

    /// Optional timeout for the network branch of a strategy.
    pub fetch_timeout_ms: Option<u64>,

    /// Page query flag for the escape hatch.
    pub reset_flag: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            version: VersionToken::default(),
            split_partitions: false,
            script_path: "./service-worker.js".to_string(),
            scope: "./".to_string(),
            manifest: CoreManifest::default(),
            dynamic_data: PathPattern::Suffix("/compat_lookup.json".to_string()),
            dynamic_data_fallback: DynamicDataFallback::default(),
            offline_fallback: "./index.html".to_string(),
            document_ignore_search: true,
            activation: ActivationPolicy::default(),
            routes: RouteConfig::default(),
            fetch_timeout_ms: None,
            reset_flag: RESET_FLAG.to_string(),
        }
    }
}

impl OfflineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded offline config");
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() || self.namespace.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid(format!(
                "namespace {:?} must be non-empty without whitespace",
                self.namespace
            )));
        }
        if self.version.as_str().is_empty() {
            return Err(ConfigError::invalid("version token is empty"));
        }
        if !self.script_path.ends_with(".js") {
            return Err(ConfigError::invalid(format!(
                "script path {:?} is not a .js file",
                self.script_path
            )));
        }
        if self.offline_fallback.is_empty() {
            return Err(ConfigError::invalid("offline fallback path is empty"));
        }
        if self.reset_flag.is_empty() {
            return Err(ConfigError::invalid("reset flag is empty"));
        }
        Ok(())
    }

    /// Adopt the `v=<token>` of the script URL the worker was started from.
    pub fn with_script_version(mut self, script_url: &Url) -> Self {
        if let Some(version) = VersionToken::from_script_url(script_url) {
            self.version = version;
        }
        self
    }

    /// Canonical script URL relative to a site location.
    pub fn script_url(&self, base: &Url) -> Result<Url> {
        Ok(base.join(&self.script_path)?)
    }

    /// Registration scope relative to a site location.
    pub fn scope_url(&self, base: &Url) -> Result<Url> {
        Ok(base.join(&self.scope)?)
    }

    /// Offline fallback document relative to the scope.
    pub fn offline_fallback_url(&self, scope: &Url) -> Result<Url> {
        Ok(scope.join(&self.offline_fallback)?)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        crate::millis(self.fetch_timeout_ms)
    }
}
