//! Request classification and the strategy table.

use std::fmt;

use http::Method;
use nmc_common::{OfflineConfig, PathPattern, RouteConfig, Strategy};
use tracing::trace;
use url::{Origin, Url};

use crate::generation::PartitionKind;
use crate::request::Request;

/// Class of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Top-level HTML document.
    Navigation,
    /// Compatibility lookup data.
    DynamicData,
    /// Stylesheet, script, image, font, manifest.
    StaticAsset,
    /// Another origin; never intercepted.
    CrossOrigin,
    /// Not a GET; never intercepted.
    NonGet,
}

impl RequestClass {
    /// Partition a response of this class is stored in when split.
    pub fn partition_kind(self, url: &Url) -> PartitionKind {
        match self {
            RequestClass::Navigation => PartitionKind::Pages,
            _ => PartitionKind::for_url(url),
        }
    }
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestClass::Navigation => "navigation",
            RequestClass::DynamicData => "dynamic-data",
            RequestClass::StaticAsset => "static-asset",
            RequestClass::CrossOrigin => "cross-origin",
            RequestClass::NonGet => "non-get",
        };
        f.write_str(name)
    }
}

/// Maps request classes to strategies for one origin.
#[derive(Debug, Clone)]
pub struct RouteTable {
    origin: Origin,
    dynamic_data: PathPattern,
    routes: RouteConfig,
}

impl RouteTable {
    pub fn new(origin: Origin, dynamic_data: PathPattern, routes: RouteConfig) -> Self {
        Self {
            origin,
            dynamic_data,
            routes,
        }
    }

    /// Build the table for a worker running at `scope`.
    pub fn from_config(config: &OfflineConfig, scope: &Url) -> Self {
        Self::new(scope.origin(), config.dynamic_data.clone(), config.routes)
    }

    /// Classify a request. The query string plays no part.
    pub fn classify(&self, request: &Request) -> RequestClass {
        if request.method != Method::GET {
            return RequestClass::NonGet;
        }
        if request.url.origin() != self.origin {
            return RequestClass::CrossOrigin;
        }
        if self.dynamic_data.matches(request.url.path()) {
            return RequestClass::DynamicData;
        }
        if request.is_navigation() {
            return RequestClass::Navigation;
        }
        RequestClass::StaticAsset
    }

    /// Strategy for a class.
    pub fn strategy_for(&self, class: RequestClass) -> Strategy {
        match class {
            RequestClass::Navigation => self.routes.navigation,
            RequestClass::DynamicData => self.routes.dynamic_data,
            RequestClass::StaticAsset => self.routes.static_asset,
            RequestClass::CrossOrigin | RequestClass::NonGet => Strategy::Passthrough,
        }
    }

    /// Classify and pick the strategy.
    pub fn route(&self, request: &Request) -> (RequestClass, Strategy) {
        let class = self.classify(request);
        let strategy = self.strategy_for(class);
        trace!(url = %request.url, %class, %strategy, "Routed request");
        (class, strategy)
    }
}
