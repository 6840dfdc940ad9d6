//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Only `remote.base_url` is required; every other section may be omitted.

use arena_session::SessionConfig;
use pacing::PacingPolicy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use transport::{HeaderInjection, HttpSettings, RetryPolicy};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub pacing: PacingPolicy,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub admin: Option<AdminConfig>,
}

/// Remote game service
#[derive(Debug, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Static client-identification headers sent with every request.
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// Worker pool settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub accounts_file: PathBuf,
    /// Maximum number of concurrently running session units.
    pub concurrency: usize,
    pub start_stagger_ms: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            accounts_file: PathBuf::from("accounts.json"),
            concurrency: 4,
            start_stagger_ms: 300,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Status aggregator settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub history_file: PathBuf,
    /// Messages kept per unit in the in-memory rolling history.
    pub history_depth: usize,
    /// Redraw the consolidated view on stdout after every status line.
    pub live_view: bool,
    /// Terminal width used for truncating live-view lines.
    pub width: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            history_file: PathBuf::from("arena-history.log"),
            history_depth: 100,
            live_view: true,
            width: 120,
        }
    }
}

/// Optional health/metrics listener
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Upper bound for `pool.start_stagger_ms`.
const MAX_START_STAGGER_MS: u64 = 60_000;

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    64
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("ARENA_BASE_URL") {
            config.remote.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let invalid = |msg: String| Err(common::Error::Config(msg));

        let url = &self.remote.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return invalid(format!("base_url must start with http:// or https://, got: {url}"));
        }
        if self.remote.connect_timeout_secs == 0 || self.remote.read_timeout_secs == 0 {
            return invalid("remote timeouts must be greater than 0".into());
        }
        let max = SessionConfig::MAX_DELAY_SECS;
        for (name, value) in [
            ("remote.connect_timeout_secs", self.remote.connect_timeout_secs),
            ("remote.read_timeout_secs", self.remote.read_timeout_secs),
            ("pool.shutdown_timeout_secs", self.pool.shutdown_timeout_secs),
        ] {
            if value > max {
                return invalid(format!("{name} must be at most {max}, got {value}"));
            }
        }
        if self.pool.start_stagger_ms > MAX_START_STAGGER_MS {
            return invalid(format!(
                "pool.start_stagger_ms must be at most {MAX_START_STAGGER_MS}, got {}",
                self.pool.start_stagger_ms
            ));
        }
        if self.pool.concurrency == 0 {
            return invalid("pool.concurrency must be greater than 0".into());
        }
        if self.pool.shutdown_timeout_secs == 0 {
            return invalid("pool.shutdown_timeout_secs must be greater than 0".into());
        }
        if self.status.history_depth == 0 {
            return invalid("status.history_depth must be greater than 0".into());
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier > 0.0) {
            return invalid("retry.multiplier must be greater than 0".into());
        }
        if !(self.retry.base_delay_secs.is_finite()
            && self.retry.base_delay_secs >= 0.0
            && self.retry.base_delay_secs <= max as f64)
        {
            return invalid(format!("retry.base_delay_secs must be between 0 and {max}"));
        }
        for (name, range) in [
            ("pacing.global_spacing_secs", &self.pacing.global_spacing),
            ("pacing.account_spacing_secs", &self.pacing.account_spacing),
            ("pacing.jitter_secs", &self.pacing.jitter),
            ("pacing.cooldown_secs", &self.pacing.cooldown),
        ] {
            if range.max() > Duration::from_secs(max) {
                return invalid(format!("{name} must be at most {max}"));
            }
        }
        if let Some(admin) = &self.admin
            && admin.max_connections == 0
        {
            return invalid("admin.max_connections must be greater than 0".into());
        }
        self.session.validate().map_err(common::Error::Config)
    }

    /// Transport settings for the `[remote]` section.
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(self.remote.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.remote.read_timeout_secs),
            headers: self.remote.headers.clone(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.pool.shutdown_timeout_secs)
    }

    pub fn start_stagger(&self) -> Duration {
        Duration::from_millis(self.pool.start_stagger_ms)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("arena-runner.toml")
    }
}
