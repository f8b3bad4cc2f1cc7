//! Operator CLI for the NMC offline layer.
//!
//! ## Usage
//!
//! ```bash
//! # Print the resolved configuration
//! nmc-offline config --config config/nmc-offline.json --site https://nmc.example/nmc/
//!
//! # Show how the worker routes a few URLs
//! nmc-offline classify --site https://nmc.example/nmc/ --navigate vanco.html?bw=1.2
//!
//! # Precache against a live origin and print the install report
//! nmc-offline precache --site https://nmc.example/nmc/ --token 2025-11-27-02
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use http::Method;
use nmc_common::{init_logging, LogConfig, LogFormat, OfflineConfig, VERSION_PARAM};
use nmc_sw::{CacheGeneration, CacheLifecycleManager, CacheStorage, Clients, HttpFetcher, HttpFetcherConfig};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

mod classify;

use classify::Classifier;

#[derive(Parser)]
#[command(name = "nmc-offline")]
#[command(about = "Inspect and exercise the NMC offline cache layer", version)]
struct Cli {
    /// Offline config JSON; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `nmc_sw=debug`; `RUST_LOG` otherwise
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved configuration as JSON
    Config {
        /// Site location used to resolve script, scope and fallback URLs
        #[arg(long)]
        site: Option<Url>,
    },

    /// Print class, strategy and partition for URLs
    Classify {
        /// Site location the worker is registered from
        #[arg(long)]
        site: Url,
        /// Treat every URL as a top-level navigation
        #[arg(long)]
        navigate: bool,
        /// Request method
        #[arg(long, default_value = "GET")]
        method: Method,
        /// URLs, absolute or relative to the scope
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Run an install against a live origin and print the report
    Precache {
        /// Site location the worker is registered from
        #[arg(long)]
        site: Url,
        /// Version token, as passed in `v=` on the script URL
        #[arg(long)]
        token: Option<String>,
        /// Per-request transport timeout in milliseconds
        #[arg(long, default_value = "30000")]
        timeout_ms: u64,
        /// Fail when any manifest entry was skipped
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Serialize)]
struct ResolvedConfig<'a> {
    config: &'a OfflineConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    urls: Option<ResolvedUrls>,
    generation: String,
    partitions: Vec<String>,
}

#[derive(Serialize)]
struct ResolvedUrls {
    script: String,
    scope: String,
    offline_fallback: String,
    manifest: Vec<String>,
}

fn load_config(path: Option<&PathBuf>) -> Result<OfflineConfig> {
    match path {
        Some(path) => OfflineConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        None => {
            debug!("No config file, using defaults");
            Ok(OfflineConfig::default())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_config(config: &OfflineConfig, site: Option<&Url>) -> Result<()> {
    let urls = match site {
        Some(site) => {
            let scope = config.scope_url(site)?;
            Some(ResolvedUrls {
                script: config.script_url(site)?.to_string(),
                offline_fallback: config.offline_fallback_url(&scope)?.to_string(),
                manifest: config
                    .manifest
                    .resolve(&scope)
                    .iter()
                    .map(Url::to_string)
                    .collect(),
                scope: scope.to_string(),
            })
        }
        None => None,
    };
    let generation = CacheGeneration::from_config(config);
    print_json(&ResolvedConfig {
        config,
        urls,
        generation: generation.base_name(),
        partitions: generation.partitions(),
    })
}

async fn precache(
    config: OfflineConfig,
    site: &Url,
    version: Option<&str>,
    timeout: Duration,
    strict: bool,
) -> Result<()> {
    let mut script = config.script_url(site)?;
    if let Some(version) = version {
        script.query_pairs_mut().append_pair(VERSION_PARAM, version);
    }

    let fetcher = HttpFetcher::new(HttpFetcherConfig {
        timeout,
        ..Default::default()
    })
    .context("building HTTP client")?;
    let (worker, _events) = CacheLifecycleManager::new(
        config,
        script,
        CacheStorage::shared(),
        Clients::shared(),
        Arc::new(fetcher),
    )?;

    info!(script = %worker.script_url(), "Precaching");
    let report = worker.install().await?;
    print_json(&report)?;

    if strict && !report.skipped.is_empty() {
        bail!("{} manifest entries could not be precached", report.skipped.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut log_config = LogConfig::cli().with_format(cli.log_format);
    if let Some(filter) = cli.log_level.as_deref() {
        log_config = log_config.with_filter(filter);
    }
    init_logging(log_config);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Config { site } => show_config(&config, site.as_ref())?,

        Commands::Classify {
            site,
            navigate,
            method,
            urls,
        } => {
            let classifier = Classifier::new(&config, &site)?;
            let rows = urls
                .iter()
                .map(|target| classifier.classify(target, method.clone(), navigate))
                .collect::<Result<Vec<_>>>()?;
            print_json(&rows)?;
        }

        Commands::Precache {
            site,
            token,
            timeout_ms,
            strict,
        } => {
            precache(
                config,
                &site,
                token.as_deref(),
                Duration::from_millis(timeout_ms),
                strict,
            )
            .await?
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_classify() {
        let cli = Cli::try_parse_from([
            "nmc-offline",
            "classify",
            "--site",
            "https://nmc.example/nmc/",
            "--method",
            "POST",
            "compatibility.html",
        ])
        .unwrap();

        match cli.command {
            Commands::Classify { method, urls, navigate, .. } => {
                assert_eq!(method, Method::POST);
                assert_eq!(urls, vec!["compatibility.html"]);
                assert!(!navigate);
            }
            _ => panic!("expected classify"),
        }
    }

    #[test]
    fn test_classify_requires_urls() {
        assert!(Cli::try_parse_from([
            "nmc-offline",
            "classify",
            "--site",
            "https://nmc.example/nmc/",
        ])
        .is_err());
    }

    #[test]
    fn test_global_log_format() {
        let cli = Cli::try_parse_from(["nmc-offline", "config", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
