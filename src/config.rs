use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/bessmon.yaml";

/// Top-level configuration for the bessmon API.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Root directory holding one sub-directory of CSV files per device.
    #[serde(default = "AppConfig::default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub api: ApiLimits,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl AppConfig {
    fn default_data_dir() -> PathBuf {
        PathBuf::from("../data/energy_hackathon_data/BESS")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            http: HttpConfig::default(),
            alignment: AlignmentConfig::default(),
            api: ApiLimits::default(),
            stream: StreamConfig::default(),
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_bind")]
    pub bind: String,
    #[serde(default = "HttpConfig::default_static_dir")]
    pub static_dir: String,
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

impl HttpConfig {
    fn default_bind() -> String {
        "0.0.0.0:8002".to_string()
    }

    fn default_static_dir() -> String {
        "dashboard/dist".to_string()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            static_dir: Self::default_static_dir(),
            cors_permissive: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Knobs for window discovery, loading and the time join.
#[derive(Debug, Clone, Deserialize)]
pub struct AlignmentConfig {
    /// Maximum distance between a row and the sample merged into it.
    #[serde(default = "AlignmentConfig::default_tolerance", with = "humantime_serde")]
    pub tolerance: Duration,
    /// Rows kept in a unified table (first rows in time order).
    #[serde(default = "AlignmentConfig::default_max_unified_records")]
    pub max_unified_records: usize,
    /// Per-metric cap applied after window filtering.
    #[serde(default = "AlignmentConfig::default_max_series_records")]
    pub max_series_records: usize,
    /// Rows read from the head of each file when the window is discovered.
    #[serde(default = "AlignmentConfig::default_prefix_read_rows")]
    pub prefix_read_rows: usize,
    /// Window sampling reads five times this many rows per core metric.
    #[serde(default = "AlignmentConfig::default_window_sample_size")]
    pub window_sample_size: usize,
}

impl AlignmentConfig {
    const fn default_tolerance() -> Duration {
        Duration::from_secs(10 * 60)
    }

    const fn default_max_unified_records() -> usize {
        1_000
    }

    const fn default_max_series_records() -> usize {
        2_000
    }

    const fn default_prefix_read_rows() -> usize {
        2_000
    }

    const fn default_window_sample_size() -> usize {
        1_000
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            tolerance: Self::default_tolerance(),
            max_unified_records: Self::default_max_unified_records(),
            max_series_records: Self::default_max_series_records(),
            prefix_read_rows: Self::default_prefix_read_rows(),
            window_sample_size: Self::default_window_sample_size(),
        }
    }
}

/// Paging bounds for the read endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiLimits {
    #[serde(default = "ApiLimits::default_batch_size")]
    pub default_batch_size: usize,
    #[serde(default = "ApiLimits::default_max_batch_size")]
    pub max_batch_size: usize,
}

impl ApiLimits {
    const fn default_batch_size() -> usize {
        100
    }

    const fn default_max_batch_size() -> usize {
        1_000
    }
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            default_batch_size: Self::default_batch_size(),
            max_batch_size: Self::default_max_batch_size(),
        }
    }
}

/// Pacing of the row stream.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "StreamConfig::default_interval", with = "humantime_serde")]
    pub default_interval: Duration,
    #[serde(default = "StreamConfig::default_min_interval", with = "humantime_serde")]
    pub min_interval: Duration,
    #[serde(default = "StreamConfig::default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,
}

impl StreamConfig {
    const fn default_interval() -> Duration {
        Duration::from_secs(2)
    }

    const fn default_min_interval() -> Duration {
        Duration::from_millis(100)
    }

    const fn default_max_interval() -> Duration {
        Duration::from_secs(10)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_interval: Self::default_interval(),
            min_interval: Self::default_min_interval(),
            max_interval: Self::default_max_interval(),
        }
    }
}

/// Load configuration from a YAML file, falling back to defaults + env overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let target_path = if let Some(path) = path {
        path.to_path_buf()
    } else if let Ok(env_path) = env::var("BESSMON_CONFIG") {
        PathBuf::from(env_path)
    } else {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    };

    let mut config = match try_parse_file(&target_path)? {
        Some(cfg) => {
            info!(path = %target_path.display(), "loaded configuration");
            cfg
        }
        None => {
            warn!(path = %target_path.display(), "config file not found; using built-in defaults");
            AppConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

fn try_parse_file(path: &Path) -> Result<Option<AppConfig>> {
    match fs::read_to_string(path) {
        Ok(raw) => parse_str(&raw)
            .with_context(|| format!("failed to parse YAML config at {}", path.display()))
            .map(Some),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file at {}", path.display()))
        }
    }
}

/// Parse and validate a YAML document without touching the environment.
pub fn parse_str(raw: &str) -> Result<AppConfig> {
    let config: AppConfig = serde_yaml::from_str(raw)?;
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    match env::var("BESSMON_DATA_DIR") {
        Ok(dir) => {
            if dir.trim().is_empty() {
                bail!("Environment variable BESSMON_DATA_DIR is set but empty.");
            }
            config.data_dir = PathBuf::from(dir);
        }
        Err(env::VarError::NotPresent) => {}
        Err(err) => return Err(err.into()),
    };

    if let Ok(bind) = env::var("BESSMON_BIND") {
        if !bind.trim().is_empty() {
            config.http.bind = bind;
        }
    }

    Ok(())
}

fn validate(config: &AppConfig) -> Result<()> {
    let alignment = &config.alignment;
    if alignment.tolerance.is_zero() {
        bail!("alignment.tolerance must be greater than zero");
    }
    for (name, value) in [
        ("alignment.max_unified_records", alignment.max_unified_records),
        ("alignment.max_series_records", alignment.max_series_records),
        ("alignment.prefix_read_rows", alignment.prefix_read_rows),
        ("alignment.window_sample_size", alignment.window_sample_size),
        ("api.default_batch_size", config.api.default_batch_size),
        ("api.max_batch_size", config.api.max_batch_size),
    ] {
        if value == 0 {
            bail!("{name} must be greater than zero");
        }
    }
    if config.api.default_batch_size > config.api.max_batch_size {
        bail!("api.default_batch_size must not exceed api.max_batch_size");
    }

    let stream = &config.stream;
    if stream.min_interval.is_zero()
        || stream.min_interval > stream.default_interval
        || stream.default_interval > stream.max_interval
    {
        bail!("stream intervals must satisfy 0 < min_interval <= default_interval <= max_interval");
    }
    Ok(())
}
