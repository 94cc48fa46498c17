use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `COURIER__` and an optional `courier.toml` file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub frequency: FrequencyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Queue processor cadence and fan-out bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum due messages fetched per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum concurrent delivery tasks.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

/// Platform-default per-contact frequency caps, used when no
/// contact-specific record exists yet.
#[derive(Debug, Clone, Deserialize)]
pub struct FrequencyConfig {
    #[serde(default = "default_max_per_day")]
    pub max_per_day: u32,
    #[serde(default = "default_max_per_week")]
    pub max_per_week: u32,
    #[serde(default = "default_max_per_month")]
    pub max_per_month: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "courier-01".to_string()
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_batch_size() -> usize {
    50
}
fn default_max_concurrency() -> usize {
    8
}
fn default_max_per_day() -> u32 {
    5
}
fn default_max_per_week() -> u32 {
    20
}
fn default_max_per_month() -> u32 {
    50
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            queue: QueueConfig::default(),
            frequency: FrequencyConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            max_per_day: default_max_per_day(),
            max_per_week: default_max_per_week(),
            max_per_month: default_max_per_month(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("courier").required(false))
            .add_source(
                config::Environment::with_prefix("COURIER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
