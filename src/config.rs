//! Crawler configuration, read from the environment with typed defaults.
//!
//! Mirrors the donor crate's `CrawlConfig` pattern (a plain struct with
//! `with_*` builder methods and an `impl Default`) but sources values from
//! `env::var` rather than a fluent required-field builder, since every field
//! here is optional per SPEC_FULL.md §6.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub max_workers: usize,
    pub cache_ttl_secs: u64,
    pub insecure_ssl: bool,
    pub insecure_hosts: Vec<String>,
    pub chrome_path: Option<PathBuf>,
    pub db_path: PathBuf,
    pub cert_dir: PathBuf,
    pub min_marathon_interval_secs: u64,
    pub min_participant_gap_secs: f64,
    pub participant_gap_jitter_secs: f64,
    pub image_workers: usize,
    pub tick_ms: u64,
    pub adaptive: bool,
    pub skip_init: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_workers: 24,
            cache_ttl_secs: 30,
            insecure_ssl: false,
            insecure_hosts: Vec::new(),
            chrome_path: None,
            db_path: PathBuf::from("./data/marathon.db"),
            cert_dir: PathBuf::from("./static/certs"),
            min_marathon_interval_secs: 5,
            min_participant_gap_secs: 3.0,
            participant_gap_jitter_secs: 2.0,
            image_workers: 3,
            tick_ms: 100,
            adaptive: false,
            skip_init: false,
        }
    }
}

impl CrawlerConfig {
    /// Build a config from the environment, falling back to defaults for any
    /// variable that is unset or fails to parse.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_workers: env_usize("CRAWLER_MAX_WORKERS", defaults.max_workers),
            cache_ttl_secs: env_u64("CRAWLER_CACHE_TTL", defaults.cache_ttl_secs),
            insecure_ssl: env_bool("INSECURE_SSL", defaults.insecure_ssl),
            insecure_hosts: std::env::var("INSECURE_HOSTS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect())
                .unwrap_or(defaults.insecure_hosts),
            chrome_path: std::env::var("CHROME_PATH").ok().map(PathBuf::from),
            db_path: std::env::var("CRAWLER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            cert_dir: std::env::var("CRAWLER_CERT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cert_dir),
            min_marathon_interval_secs: env_u64(
                "CRAWLER_MIN_MARATHON_INTERVAL",
                defaults.min_marathon_interval_secs,
            ),
            min_participant_gap_secs: env_f64(
                "CRAWLER_MIN_PARTICIPANT_GAP",
                defaults.min_participant_gap_secs,
            ),
            participant_gap_jitter_secs: env_f64(
                "CRAWLER_PARTICIPANT_GAP_JITTER",
                defaults.participant_gap_jitter_secs,
            ),
            image_workers: env_usize("CRAWLER_IMAGE_WORKERS", defaults.image_workers),
            tick_ms: env_u64("CRAWLER_TICK_MS", defaults.tick_ms),
            adaptive: defaults.adaptive,
            skip_init: defaults.skip_init,
        }
    }

    #[must_use]
    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    #[must_use]
    pub fn with_skip_init(mut self, skip_init: bool) -> Self {
        self.skip_init = skip_init;
        self
    }

    /// True if `host` should skip TLS verification, either because it's
    /// globally disabled or because it matches a configured suffix.
    #[must_use]
    pub fn verify_for_host(&self, host: &str) -> bool {
        if self.insecure_ssl {
            return false;
        }
        let host = host.to_lowercase();
        !self.insecure_hosts.iter().any(|suffix| host.ends_with(suffix.as_str()))
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}
