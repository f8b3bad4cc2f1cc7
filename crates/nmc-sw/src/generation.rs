//! Cache generations and partition naming.
//!
//! A generation is `<namespace>-<version>`. With split partitions it owns
//! `<namespace>-<version>-pages` and `<namespace>-<version>-static`.
//! Anything else starting with `<namespace>-` belongs to an older
//! deployment.

use nmc_common::{OfflineConfig, VersionToken};
use url::Url;

/// Kind of content a partition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    /// HTML documents.
    Pages,
    /// Stylesheets, scripts, images, data files.
    Static,
}

impl PartitionKind {
    fn suffix(self) -> &'static str {
        match self {
            PartitionKind::Pages => "pages",
            PartitionKind::Static => "static",
        }
    }

    /// Guess the partition of a precached URL from its path.
    pub fn for_url(url: &Url) -> Self {
        let path = url.path();
        if path.ends_with('/') || path.ends_with(".html") || path.ends_with(".htm") {
            PartitionKind::Pages
        } else {
            PartitionKind::Static
        }
    }
}

/// The set of partitions belonging to one deployed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
    namespace: String,
    version: VersionToken,
    split: bool,
}

impl CacheGeneration {
    pub fn new(namespace: impl Into<String>, version: VersionToken, split: bool) -> Self {
        Self {
            namespace: namespace.into(),
            version,
            split,
        }
    }

    pub fn from_config(config: &OfflineConfig) -> Self {
        Self::new(
            config.namespace.clone(),
            config.version.clone(),
            config.split_partitions,
        )
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn version(&self) -> &VersionToken {
        &self.version
    }

    /// `<namespace>-<version>`.
    pub fn base_name(&self) -> String {
        format!("{}-{}", self.namespace, self.version)
    }

    /// Name of the partition holding `kind`.
    pub fn partition(&self, kind: PartitionKind) -> String {
        if self.split {
            format!("{}-{}", self.base_name(), kind.suffix())
        } else {
            self.base_name()
        }
    }

    /// Every partition name of this generation, lookup order.
    pub fn partitions(&self) -> Vec<String> {
        if self.split {
            vec![
                self.partition(PartitionKind::Pages),
                self.partition(PartitionKind::Static),
            ]
        } else {
            vec![self.base_name()]
        }
    }

    pub fn owns(&self, name: &str) -> bool {
        self.partitions().iter().any(|p| p == name)
    }

    /// Whether `name` is in this generation's namespace.
    pub fn shares_namespace(&self, name: &str) -> bool {
        name.strip_prefix(self.namespace.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// A partition left behind by another generation of this namespace.
    pub fn is_stale(&self, name: &str) -> bool {
        self.shares_namespace(name) && !self.owns(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation(version: &str, split: bool) -> CacheGeneration {
        CacheGeneration::new("ns", VersionToken::new(version), split)
    }

    #[test]
    fn test_single_partition_naming() {
        let gen = generation("v2", false);
        assert_eq!(gen.partitions(), vec!["ns-v2"]);
        assert_eq!(gen.partition(PartitionKind::Pages), "ns-v2");
        assert_eq!(gen.partition(PartitionKind::Static), "ns-v2");
    }

    #[test]
    fn test_split_partition_naming() {
        let gen = generation("v2", true);
        assert_eq!(gen.partitions(), vec!["ns-v2-pages", "ns-v2-static"]);
        assert!(gen.owns("ns-v2-static"));
        assert!(!gen.owns("ns-v2"));
    }

    #[test]
    fn test_staleness_uses_namespace_prefix() {
        let gen = generation("v2", false);
        assert!(gen.is_stale("ns-v1"));
        assert!(gen.is_stale("ns-v1-pages"));
        assert!(gen.is_stale("ns-v20"));
        assert!(!gen.is_stale("ns-v2"));
        assert!(!gen.is_stale("other-x"));
        assert!(!gen.is_stale("nsx-v1"));
        assert!(!gen.is_stale("ns"));
    }

    #[test]
    fn test_partition_kind_for_url() {
        let kind = |s: &str| PartitionKind::for_url(&Url::parse(s).unwrap());
        assert_eq!(kind("https://example.com/nmc/"), PartitionKind::Pages);
        assert_eq!(kind("https://example.com/nmc/index.html"), PartitionKind::Pages);
        assert_eq!(kind("https://example.com/nmc/static/app.js"), PartitionKind::Static);
        assert_eq!(
            kind("https://example.com/nmc/static/compat_lookup.json"),
            PartitionKind::Static
        );
    }
}
