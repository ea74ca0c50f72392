//! Runtime configuration, read once from the environment (and `.env`).

use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEFAULT_CITIES: &[&str] = &[
    "Paris",
    "Lyon",
    "Marseille",
    "Toulouse",
    "Nice",
    "Nantes",
    "Strasbourg",
    "Montpellier",
    "Bordeaux",
    "Lille",
];

/// Result Pager limits.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Stop paging once this many distinct hits are accumulated
    pub target_count: usize,
    /// Upper bound on "more results" rounds
    pub max_iterations: usize,
    /// Hard cap on the returned hit list
    pub result_cap: usize,
}

/// Site Crawler and browser timing.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub max_attempts: u32,
    pub navigation_timeout: Duration,
    /// Upper bound for every readiness wait (after navigation or a click)
    pub settle_timeout: Duration,
    pub max_concurrent_sites: usize,
    pub headless: bool,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct SheetConfig {
    pub credentials_path: String,
    pub sheet_id: Option<String>,
    pub sheet_name: String,
    pub sync_cron: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub default_query: String,
    pub default_trade: String,
    pub cities: Vec<String>,
    pub search: SearchConfig,
    pub crawl: CrawlConfig,
    pub storage: StorageConfig,
    pub sheet: SheetConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = get("DATABASE_URL").context("DATABASE_URL must be set")?;

        let cities = get("CITIES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| DEFAULT_CITIES.iter().map(|c| c.to_string()).collect());

        let bucket = get("S3_BUCKET").unwrap_or_else(|| "prospects".to_string());
        let endpoint = get("S3_ENDPOINT");
        let public_base_url = get("S3_PUBLIC_BASE_URL")
            .unwrap_or_else(|| match &endpoint {
                Some(ep) => format!("{}/{}", ep.trim_end_matches('/'), bucket),
                None => format!("https://{}.s3.amazonaws.com", bucket),
            })
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3002".to_string()),
            database_url,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 5),
            default_query: get("DEFAULT_QUERY")
                .unwrap_or_else(|| "Installateur vidéosurveillance Paris".to_string()),
            default_trade: get("DEFAULT_TRADE")
                .unwrap_or_else(|| "Installateur vidéosurveillance".to_string()),
            cities,
            search: SearchConfig {
                target_count: parse_or(&get, "SEARCH_TARGET_COUNT", 200),
                max_iterations: parse_or(&get, "SEARCH_MAX_ITERATIONS", 5),
                result_cap: parse_or(&get, "SEARCH_RESULT_CAP", 200),
            },
            crawl: CrawlConfig {
                max_attempts: parse_or::<u32, _>(&get, "CRAWL_MAX_ATTEMPTS", 3).max(1),
                navigation_timeout: Duration::from_secs(parse_or(&get, "NAVIGATION_TIMEOUT_SECS", 60)),
                settle_timeout: Duration::from_millis(parse_or(&get, "SETTLE_TIMEOUT_MS", 3000)),
                max_concurrent_sites: parse_or::<usize, _>(&get, "MAX_CONCURRENT_SITES", 8).max(1),
                headless: parse_or(&get, "CHROME_HEADLESS", true),
            },
            storage: StorageConfig {
                bucket,
                endpoint,
                public_base_url,
            },
            sheet: SheetConfig {
                credentials_path: get("GOOGLE_CREDENTIALS_PATH")
                    .unwrap_or_else(|| "config/google_credentials.json".to_string()),
                sheet_id: get("SHEET_ID"),
                sheet_name: get("SHEET_NAME").unwrap_or_else(|| "Sheet1".to_string()),
                sync_cron: get("SYNC_CRON"),
            },
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("⚠️ Invalid value for {}: {:?}, using default {}", key, raw, default);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/leads")]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3002");
        assert_eq!(config.search.max_iterations, 5);
        assert_eq!(config.search.result_cap, 200);
        assert_eq!(config.crawl.max_attempts, 3);
        assert_eq!(config.crawl.settle_timeout, Duration::from_millis(3000));
        assert_eq!(config.cities.len(), DEFAULT_CITIES.len());
        assert_eq!(config.storage.public_base_url, "https://prospects.s3.amazonaws.com");
        assert!(config.sheet.sheet_id.is_none());
    }

    #[test]
    fn test_database_url_required() {
        assert!(config_from(&[]).is_err());
    }

    #[test]
    fn test_invalid_number_falls_back() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/leads"),
            ("MAX_CONCURRENT_SITES", "lots"),
            ("CRAWL_MAX_ATTEMPTS", "0"),
        ])
        .unwrap();
        assert_eq!(config.crawl.max_concurrent_sites, 8);
        assert_eq!(config.crawl.max_attempts, 1);
    }

    #[test]
    fn test_cities_and_minio_endpoint() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/leads"),
            ("CITIES", "Rennes, Brest,,"),
            ("S3_ENDPOINT", "http://minio:9000/"),
            ("S3_BUCKET", "logos"),
        ])
        .unwrap();
        assert_eq!(config.cities, vec!["Rennes", "Brest"]);
        assert_eq!(config.storage.public_base_url, "http://minio:9000/logos");
    }
}
