//! Scraper configuration loaded from a TOML file.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! The defaults match the quota NIST publishes (5 requests per 30 seconds)
//! and the directory layout the scraped data has always used.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::request::SpectrumType;
use crate::{Error, Result};

// Upper bounds keep the window arithmetic (`Instant + Duration`,
// `TimeDelta::minutes`) far from overflow.
const MAX_RATE_WINDOW_SECS: u64 = 86_400;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 3_600;
const MAX_BREAKER_WINDOW_MINUTES: i64 = 525_600;
const MAX_RESTART_DELAY_SECS: u64 = 86_400;

pub const DEFAULT_CONFIG_PATH: &str = "scrap.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScrapConfig {
    pub source: SourceConfig,
    pub rate_limit: RateLimitConfig,
    pub search: SearchConfig,
    pub storage: StorageConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://webbook.nist.gov/cgi/cbook.cgi".into(),
            request_timeout_secs: 60,
            user_agent: concat!("nist-scrap/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// At most `max_requests` requests in any trailing `window_secs` window.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_secs: 30,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Flags sent with every formula search, plus the spectrum kinds to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub allow_other: bool,
    pub allow_extra: bool,
    pub match_isotopes: bool,
    pub exclude_ions: bool,
    pub spectrum_types: Vec<SpectrumType>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            allow_other: true,
            allow_extra: false,
            match_isotopes: true,
            exclude_ions: false,
            spectrum_types: vec![SpectrumType::Ir],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub manifest: PathBuf,
    pub spectra_dir: PathBuf,
    pub structure_dir: PathBuf,
    pub done_formulae: PathBuf,
    pub done_ids: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            manifest: "species.txt".into(),
            spectra_dir: "jdx".into(),
            structure_dir: "mol".into(),
            done_formulae: "done_formulae.txt".into(),
            done_ids: "done_IDs.txt".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub log_file: PathBuf,
    pub restart_delay_secs: u64,
    pub max_restarts: u32,
    /// Trip the breaker once this many failures land inside `window_minutes`.
    pub max_failures: usize,
    pub window_minutes: i64,
    /// Case-insensitive substrings that mark a run as failed whatever its exit status.
    pub failure_signatures: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            log_file: "scraping_output.log".into(),
            restart_delay_secs: 60,
            max_restarts: 10_000,
            max_failures: 20,
            window_minutes: 25,
            failure_signatures: default_failure_signatures(),
        }
    }
}

fn default_failure_signatures() -> Vec<String> {
    [
        "Connection refused",
        "Connection reset by peer",
        "timeout",
        "timed out",
        "Too many requests",
        "rate limit",
        "HTTPError",
        "SSLError",
        "ConnectionError",
        "Max retries exceeded",
        "ChunkedEncodingError",
        "ReadTimeout",
        "ConnectTimeout",
        "error sending request",
        "error decoding response body",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl ScrapConfig {
    /// Loads the config at `path`, falling back to defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str::<ScrapConfig>(&contents)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_requests == 0 {
            return Err(Error::ConfigInvalid(
                "rate_limit.max_requests must be at least 1".into(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(Error::ConfigInvalid(
                "rate_limit.window_secs must be at least 1".into(),
            ));
        }
        if self.supervisor.max_failures == 0 {
            return Err(Error::ConfigInvalid(
                "supervisor.max_failures must be at least 1".into(),
            ));
        }
        if self.rate_limit.window_secs > MAX_RATE_WINDOW_SECS {
            return Err(Error::ConfigInvalid(format!(
                "rate_limit.window_secs must be at most {MAX_RATE_WINDOW_SECS}"
            )));
        }
        if self.source.request_timeout_secs == 0 {
            return Err(Error::ConfigInvalid(
                "source.request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.source.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(Error::ConfigInvalid(format!(
                "source.request_timeout_secs must be at most {MAX_REQUEST_TIMEOUT_SECS}"
            )));
        }
        if self.supervisor.window_minutes <= 0 {
            return Err(Error::ConfigInvalid(
                "supervisor.window_minutes must be positive".into(),
            ));
        }
        if self.supervisor.window_minutes > MAX_BREAKER_WINDOW_MINUTES {
            return Err(Error::ConfigInvalid(format!(
                "supervisor.window_minutes must be at most {MAX_BREAKER_WINDOW_MINUTES}"
            )));
        }
        if self.supervisor.restart_delay_secs > MAX_RESTART_DELAY_SECS {
            return Err(Error::ConfigInvalid(format!(
                "supervisor.restart_delay_secs must be at most {MAX_RESTART_DELAY_SECS}"
            )));
        }
        Ok(())
    }
}
