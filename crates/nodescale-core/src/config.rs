//! nodescale.toml configuration.
//!
//! Every section and field is optional; an empty file yields the defaults.
//! Durations are written as strings with a unit suffix (`"30s"`, `"2m"`,
//! `"1h"`) and are validated when the file is loaded.
//!
//! ```toml
//! [scale_down]
//! utilization_threshold = 0.5
//! simulation_timeout = "30s"
//!
//! [estimator]
//! max_nodes_per_scale_up = 1000
//! max_binpacking_time = "5m"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::taints::TaintConfig;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerConfig {
    pub cluster: ClusterConfig,
    pub scale_down: ScaleDownConfig,
    pub estimator: EstimatorConfig,
    pub taints: TaintsConfig,
    pub template: TemplateConfig,
    pub instance_cache: InstanceCacheConfig,
    pub logs: LogsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// 0 means unlimited.
    pub max_nodes_total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleDownConfig {
    pub enabled: bool,
    /// Nodes with both CPU and memory utilization below this are candidates.
    pub utilization_threshold: f64,
    pub skip_nodes_with_system_pods: bool,
    pub skip_nodes_with_local_storage: bool,
    /// Replica floor for replicated pods when controller lookups are available.
    pub min_replica_count: i32,
    /// Commit each successful removal simulation so later candidates see it.
    pub persist_successful_simulations: bool,
    pub simulation_timeout: String,
}

impl Default for ScaleDownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            utilization_threshold: 0.5,
            skip_nodes_with_system_pods: true,
            skip_nodes_with_local_storage: true,
            min_replica_count: 0,
            persist_successful_simulations: false,
            simulation_timeout: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub max_nodes_per_scale_up: i64,
    pub max_binpacking_time: String,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_nodes_per_scale_up: 1000,
            max_binpacking_time: "5m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaintsConfig {
    pub startup_taints: Vec<String>,
    pub status_taints: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Put pods for every daemon set onto templates, not only critical ones.
    pub force_daemon_sets: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceCacheConfig {
    pub refresh_interval: String,
    pub freshness_threshold: String,
}

impl Default for InstanceCacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: "2m".to_string(),
            freshness_threshold: "5m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub max_items: usize,
    pub item_lifetime: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            max_items: 50,
            item_lifetime: "15m".to_string(),
        }
    }
}

impl AutoscalerConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: AutoscalerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        duration_field("scale_down.simulation_timeout", &self.scale_down.simulation_timeout)?;
        duration_field("estimator.max_binpacking_time", &self.estimator.max_binpacking_time)?;
        duration_field(
            "instance_cache.refresh_interval",
            &self.instance_cache.refresh_interval,
        )?;
        duration_field(
            "instance_cache.freshness_threshold",
            &self.instance_cache.freshness_threshold,
        )?;
        duration_field("logs.item_lifetime", &self.logs.item_lifetime)?;

        let threshold = self.scale_down.utilization_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid {
                field: "scale_down.utilization_threshold",
                reason: format!("{threshold} is outside [0, 1]"),
            });
        }
        if self.logs.max_items == 0 {
            return Err(ConfigError::Invalid {
                field: "logs.max_items",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn simulation_timeout(&self) -> Duration {
        parse_duration(&self.scale_down.simulation_timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn max_binpacking_time(&self) -> Duration {
        parse_duration(&self.estimator.max_binpacking_time).unwrap_or(Duration::from_secs(300))
    }

    pub fn instance_refresh_interval(&self) -> Duration {
        parse_duration(&self.instance_cache.refresh_interval).unwrap_or(Duration::from_secs(120))
    }

    pub fn instance_freshness_threshold(&self) -> Duration {
        parse_duration(&self.instance_cache.freshness_threshold)
            .unwrap_or(Duration::from_secs(300))
    }

    pub fn log_item_lifetime(&self) -> Duration {
        parse_duration(&self.logs.item_lifetime).unwrap_or(Duration::from_secs(15 * 60))
    }

    pub fn taint_config(&self) -> TaintConfig {
        TaintConfig::new(
            self.taints.startup_taints.iter().cloned(),
            self.taints.status_taints.iter().cloned(),
        )
    }
}

fn duration_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

/// Parse `"500ms"`, `"30s"`, `"5m"`, `"1h"` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
