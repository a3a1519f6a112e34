//! Configuration loaded once at startup from the process environment.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_CACHE_TTL_HOURS: u64 = 168;
const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 5 * 1024 * 1024 * 1024;
const DEFAULT_MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_MAX_TOTAL_BYTES: u64 = 1024 * 1024 * 1024;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Main configuration structure
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Nexus Mods API key. Absence surfaces as `NotConfigured` when the
    /// registry client is constructed, not here.
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Port the hosting HTTP surface listens on.
    pub listen_port: u16,

    /// Root directory for the cache database and scratch storage.
    pub data_dir: PathBuf,

    /// TTL applied to cached analysis reports.
    pub cache_ttl_hours: u64,

    /// Maximum size of a single archive download.
    pub max_download_bytes: u64,

    /// Maximum size of a single extracted file.
    pub max_extracted_file_bytes: u64,

    /// Maximum total size of an extracted tree.
    pub max_extracted_total_bytes: u64,

    /// First retry delay for transient registry failures.
    pub initial_backoff_ms: u64,

    /// Cap on the retry delay.
    pub max_backoff_ms: u64,

    /// Retry attempts for transient registry failures.
    pub max_retries: u32,

    /// Allowed CORS origins for the hosting HTTP surface.
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            listen_port: DEFAULT_PORT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            cache_ttl_hours: DEFAULT_CACHE_TTL_HOURS,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            max_extracted_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_extracted_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            cors_origins: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// documented defaults for everything except the API key.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Self {
            api_key: read("NEXUS_API_KEY"),
            listen_port: parse_or("MODSCOPE_PORT", defaults.listen_port),
            data_dir: read("MODSCOPE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cache_ttl_hours: parse_or("MODSCOPE_CACHE_TTL_HOURS", defaults.cache_ttl_hours),
            max_download_bytes: parse_or("MODSCOPE_MAX_DOWNLOAD_BYTES", defaults.max_download_bytes),
            max_extracted_file_bytes: parse_or(
                "MODSCOPE_MAX_FILE_BYTES",
                defaults.max_extracted_file_bytes,
            ),
            max_extracted_total_bytes: parse_or(
                "MODSCOPE_MAX_TOTAL_BYTES",
                defaults.max_extracted_total_bytes,
            ),
            initial_backoff_ms: parse_or("MODSCOPE_INITIAL_BACKOFF_MS", defaults.initial_backoff_ms),
            max_backoff_ms: parse_or("MODSCOPE_MAX_BACKOFF_MS", defaults.max_backoff_ms),
            max_retries: parse_or("MODSCOPE_MAX_RETRIES", defaults.max_retries),
            cors_origins: read("MODSCOPE_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 3600)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Path of the cache database under the data directory.
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }

    /// Scratch root for in-flight downloads.
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    /// Scratch root for extracted trees.
    pub fn extracted_dir(&self) -> PathBuf {
        self.data_dir.join("extracted")
    }
}

fn read(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    read(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
