use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "parley.toml",
    "config/parley.toml",
    "crates/config/parley.toml",
    "../parley.toml",
    "../config/parley.toml",
    "../crates/config/parley.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://parley.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Shared broker settings. Without a usable URL the instance runs alone with
/// an in-process bus and cache.
///
/// ```
/// use parley_config::RedisConfig;
///
/// let redis = RedisConfig { url: Some("  ".into()) };
/// assert!(redis.endpoint().is_none());
/// assert_eq!(
///     RedisConfig::default().endpoint(),
///     Some("redis://127.0.0.1:6379")
/// );
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub url: Option<String>,
}

impl RedisConfig {
    pub fn endpoint(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: Some("redis://127.0.0.1:6379".to_string()),
        }
    }
}

/// How message positions are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SequencerKind {
    /// Highest persisted position plus one, guarded by the store's uniqueness constraint.
    #[default]
    Store,
    /// Atomic counter in Redis.
    Redis,
}

impl SequencerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequencerKind::Store => "store",
            SequencerKind::Redis => "redis",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default = "FanoutConfig::default_cache_window")]
    pub cache_window: usize,
    #[serde(default = "FanoutConfig::default_reorder_window_ms")]
    pub reorder_window_ms: u64,
    #[serde(default = "FanoutConfig::default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "FanoutConfig::default_history_page_limit")]
    pub history_page_limit: i64,
    #[serde(default)]
    pub sequencer: SequencerKind,
}

impl FanoutConfig {
    const fn default_cache_window() -> usize {
        1000
    }

    const fn default_reorder_window_ms() -> u64 {
        250
    }

    const fn default_outbound_buffer() -> usize {
        256
    }

    const fn default_history_page_limit() -> i64 {
        200
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            cache_window: Self::default_cache_window(),
            reorder_window_ms: Self::default_reorder_window_ms(),
            outbound_buffer: Self::default_outbound_buffer(),
            history_page_limit: Self::default_history_page_limit(),
            sequencer: SequencerKind::default(),
        }
    }
}

/// Where user profiles are resolved.
///
/// ```
/// use parley_config::IdentityConfig;
///
/// let identity = IdentityConfig::default();
/// assert!(identity.base_url.is_none());
/// assert_eq!(identity.request_timeout_seconds, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "IdentityConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl IdentityConfig {
    const fn default_request_timeout() -> u64 {
        5
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use parley_config::load;
///
/// std::env::remove_var("PARLEY_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// assert_eq!(config.fanout.cache_window, 1000);
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default("fanout.instance_id", defaults.fanout.instance_id.clone())?
        .set_default(
            "fanout.cache_window",
            i64::try_from(defaults.fanout.cache_window).unwrap_or(i64::MAX),
        )?
        .set_default(
            "fanout.reorder_window_ms",
            i64::try_from(defaults.fanout.reorder_window_ms).unwrap_or(i64::MAX),
        )?
        .set_default(
            "fanout.outbound_buffer",
            i64::try_from(defaults.fanout.outbound_buffer).unwrap_or(i64::MAX),
        )?
        .set_default(
            "fanout.history_page_limit",
            defaults.fanout.history_page_limit,
        )?
        .set_default("fanout.sequencer", defaults.fanout.sequencer.as_str())?
        .set_default(
            "identity.request_timeout_seconds",
            i64::try_from(defaults.identity.request_timeout_seconds).unwrap_or(i64::MAX),
        )?;

    if let Some(url) = defaults.redis.url.clone() {
        builder = builder.set_default("redis.url", url)?;
    }

    let environment_overrides = config::Environment::with_prefix("PARLEY").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("PARLEY_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via PARLEY_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    config.fanout.cache_window = config.fanout.cache_window.max(1);
    config.fanout.outbound_buffer = config.fanout.outbound_buffer.max(1);
    config.fanout.history_page_limit = config.fanout.history_page_limit.max(1);

    debug!(?config, "loaded backend configuration");
    Ok(config)
}
