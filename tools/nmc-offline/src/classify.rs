//! Routing table dry run.

use http::Method;
use nmc_common::OfflineConfig;
use nmc_sw::{CacheGeneration, Request, RequestClass, RouteTable};
use serde::Serialize;
use url::Url;

/// How the worker would treat one URL.
#[derive(Debug, Serialize)]
pub struct Classification {
    pub url: String,
    pub class: String,
    pub strategy: String,
    /// Partition a successful response lands in, if any.
    pub partition: Option<String>,
}

pub struct Classifier {
    scope: Url,
    routes: RouteTable,
    generation: CacheGeneration,
}

impl Classifier {
    pub fn new(config: &OfflineConfig, site: &Url) -> anyhow::Result<Self> {
        let scope = config.scope_url(site)?;
        Ok(Self {
            routes: RouteTable::from_config(config, &scope),
            generation: CacheGeneration::from_config(config),
            scope,
        })
    }

    /// Classify `target`, resolved against the scope.
    pub fn classify(&self, target: &str, method: Method, navigate: bool) -> anyhow::Result<Classification> {
        let url = self.scope.join(target)?;
        let request = if navigate {
            Request::navigate(url.clone())
        } else {
            Request::with_method(url.clone(), method)
        };
        let (class, strategy) = self.routes.route(&request);

        // Dynamic data is never stored at runtime.
        let partition = match class {
            RequestClass::Navigation | RequestClass::StaticAsset => {
                Some(self.generation.partition(class.partition_kind(&url)))
            }
            _ => None,
        };

        Ok(Classification {
            url: url.to_string(),
            class: class.to_string(),
            strategy: strategy.to_string(),
            partition,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(config: OfflineConfig) -> Classifier {
        Classifier::new(&config, &Url::parse("https://nmc.example/nmc/").unwrap()).unwrap()
    }

    #[test]
    fn test_default_routes() {
        let c = classifier(OfflineConfig::default());

        let page = c.classify("vanco.html?bw=2", Method::GET, true).unwrap();
        assert_eq!(page.class, "navigation");
        assert_eq!(page.strategy, "network-first");
        assert_eq!(page.partition.as_deref(), Some("nmc-dev"));

        let data = c.classify("static/compat_lookup.json", Method::GET, false).unwrap();
        assert_eq!(data.class, "dynamic-data");
        assert_eq!(data.strategy, "network-only");
        assert_eq!(data.partition, None);

        let post = c.classify("compatibility.html", Method::POST, false).unwrap();
        assert_eq!(post.class, "non-get");
        assert_eq!(post.partition, None);
    }

    #[test]
    fn test_split_partitions() {
        let c = classifier(OfflineConfig {
            split_partitions: true,
            ..Default::default()
        });

        let css = c.classify("static/style.css", Method::GET, false).unwrap();
        assert_eq!(css.partition.as_deref(), Some("nmc-dev-static"));

        let cross = c
            .classify("https://cdn.jsdelivr.net/npm/bootstrap.min.css", Method::GET, false)
            .unwrap();
        assert_eq!(cross.class, "cross-origin");
        assert_eq!(cross.strategy, "passthrough");
    }
}
