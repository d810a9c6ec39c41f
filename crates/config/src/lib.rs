use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "vlant.toml",
    "config/vlant.toml",
    "../vlant.toml",
    "../config/vlant.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub realtime: RealtimeConfig,
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
            port: 5000,
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
            url: "sqlite://vlant.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Tunables for the realtime core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Interval between `statsUpdate` broadcasts, in seconds.
    #[serde(default = "RealtimeConfig::default_stats_interval")]
    pub stats_interval_seconds: u64,
    /// Per-connection outbound event buffer. Events beyond this are dropped
    /// rather than applying backpressure to other connections.
    #[serde(default = "RealtimeConfig::default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl RealtimeConfig {
    const fn default_stats_interval() -> u64 {
        2
    }

    const fn default_outbound_buffer() -> usize {
        64
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            stats_interval_seconds: Self::default_stats_interval(),
            outbound_buffer: Self::default_outbound_buffer(),
        }
    }
}

/// Load the application configuration by combining defaults, an optional
/// TOML file, and `VLANT`-prefixed environment overrides.
///
/// ```
/// std::env::remove_var("VLANT_CONFIG");
///
/// let config = vlant_config::load().expect("configuration should load with defaults");
/// assert_eq!(config.realtime.stats_interval_seconds, 2);
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder();
    builder = builder
        .set_default("http.address", defaults.http.address.clone())
        .unwrap()
        .set_default("http.port", i64::from(defaults.http.port))
        .unwrap()
        .set_default("database.url", defaults.database.url.clone())
        .unwrap()
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )
        .unwrap()
        .set_default(
            "realtime.stats_interval_seconds",
            i64::try_from(defaults.realtime.stats_interval_seconds).unwrap_or(i64::MAX),
        )
        .unwrap()
        .set_default(
            "realtime.outbound_buffer",
            i64::try_from(defaults.realtime.outbound_buffer).unwrap_or(i64::MAX),
        )
        .unwrap();

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("VLANT_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via VLANT_CONFIG");
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

    builder = builder.add_source(config::Environment::with_prefix("VLANT").separator("__"));

    let cfg = builder.build().context("unable to build configuration")?;
    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    debug!(?config, "loaded backend configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_local_development() {
        let config = AppConfig::default();
        assert_eq!(config.http.port, 5000);
        assert_eq!(config.realtime.stats_interval_seconds, 2);
        assert!(config.database.url.starts_with("sqlite://"));
    }

    #[test]
    fn load_falls_back_to_defaults() {
        std::env::remove_var("VLANT_CONFIG");
        let config = load().expect("defaults should always load");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.realtime.outbound_buffer, 64);
    }
}
