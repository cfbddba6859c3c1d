//! fleet.toml configuration parser.
//!
//! Every operational parameter of the controller lives here and is read
//! once at startup. Sections default individually, so a minimal file
//! only needs the values that differ from the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub scoring: ScoringConfig,
    pub thresholds: ThresholdConfig,
    pub pool: PoolConfig,
    pub metrics: MetricsConfig,
    pub controller: ControllerConfig,
    pub route_table: RouteTableConfig,
}

/// Where the load balancer listens and where workers are reachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub listen_port: u16,
}

/// Score coefficients and normalization constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Weight of the averaged CPU and memory percentage.
    pub coefficient_x: f64,
    /// Weight of the busy thread count.
    pub coefficient_y: f64,
    /// Weight of the normalized processing time.
    pub coefficient_z: f64,
    /// Processing time ceiling used for normalization.
    pub max_processing_ms: u64,
    /// Floor applied to scores before inverting them into weights.
    pub min_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub scale_up: f64,
    pub scale_down: f64,
    /// Mean fleet score above which one worker is added.
    pub scale_up_average: f64,
    /// A draining worker is destroyed once its busy threads drop below this.
    pub drain_safe: u32,
}

/// How new workers are named, addressed and created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub name_prefix: String,
    /// Route port of worker `n` is `base_port + n`.
    pub base_port: u16,
    pub initial_workers: u32,
    /// Image the backend starts workers from.
    pub template: String,
    /// Memory limit per worker, e.g. "1g", "512m" or plain bytes.
    pub memory_limit: String,
    /// Command override passed to the backend, empty for the image default.
    pub command: String,
    /// Port the worker listens on inside its instance.
    pub container_port: u16,
    /// Container CLI used by the backend.
    pub runtime: String,
    /// Compare the pool with the backend at the start of each cycle.
    pub reconcile: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Directory holding one stats file per worker, named after the worker.
    pub dir: PathBuf,
    /// Fixed delay between polls for a complete sample.
    pub retry_interval: String,
    /// Give up on a worker's sample after this long.
    pub sample_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Pause between control cycles.
    pub cycle_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTableConfig {
    /// Load balancer config file that is rewritten on every change.
    pub config_path: PathBuf,
    /// Optional header template; the built-in HAProxy header is used otherwise.
    pub template_path: Option<PathBuf>,
    pub reload_command: Vec<String>,
    /// Optional command whose output is logged after a reload.
    pub status_command: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            listen_port: 80,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            coefficient_x: 2.0,
            coefficient_y: 1.0,
            coefficient_z: 1.0,
            max_processing_ms: 500,
            min_score: 0.001,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            scale_up: 40.0,
            scale_down: 10.0,
            scale_up_average: 40.0,
            drain_safe: 4,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name_prefix: "app".to_string(),
            base_port: 8010,
            initial_workers: 1,
            template: "httpd".to_string(),
            memory_limit: "1g".to_string(),
            command: String::new(),
            container_port: 80,
            runtime: "docker".to_string(),
            reconcile: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/fleetscale/metrics"),
            retry_interval: "1s".to_string(),
            sample_timeout: "30s".to_string(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: "1s".to_string(),
        }
    }
}

impl Default for RouteTableConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/haproxy/haproxy.cfg"),
            template_path: None,
            reload_command: vec![
                "service".to_string(),
                "haproxy".to_string(),
                "restart".to_string(),
            ],
            status_command: None,
        }
    }
}

impl FleetConfig {
    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content)?;
        debug!(?path, "config loaded");
        Ok(config)
    }

    /// Parse and validate config text.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the controller cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let t = &self.thresholds;
        let s = &self.scoring;

        if self.server.address.trim().is_empty() {
            return invalid("server.address must not be empty");
        }
        for (name, value) in [
            ("thresholds.scale_up", t.scale_up),
            ("thresholds.scale_down", t.scale_down),
            ("thresholds.scale_up_average", t.scale_up_average),
        ] {
            if !value.is_finite() {
                return invalid(format!("{name} must be a finite number"));
            }
        }
        if t.scale_up <= t.scale_down {
            return invalid(format!(
                "thresholds.scale_up ({}) must be greater than thresholds.scale_down ({})",
                t.scale_up, t.scale_down
            ));
        }
        for (name, value) in [
            ("scoring.coefficient_x", s.coefficient_x),
            ("scoring.coefficient_y", s.coefficient_y),
            ("scoring.coefficient_z", s.coefficient_z),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("{name} must be a non-negative number"));
            }
        }
        if s.max_processing_ms == 0 {
            return invalid("scoring.max_processing_ms must be positive");
        }
        if !s.min_score.is_finite() || s.min_score <= 0.0 {
            return invalid("scoring.min_score must be positive");
        }

        let p = &self.pool;
        if p.name_prefix.is_empty() {
            return invalid("pool.name_prefix must not be empty");
        }
        if p.initial_workers == 0 {
            return invalid("pool.initial_workers must be at least 1");
        }
        if u32::from(p.base_port).saturating_add(p.initial_workers) > u32::from(u16::MAX) {
            return invalid("pool.base_port leaves no room for the initial workers");
        }
        if p.template.trim().is_empty() {
            return invalid("pool.template must not be empty");
        }
        if parse_size(&p.memory_limit).is_none() {
            return invalid(format!("pool.memory_limit {:?} is not a size", p.memory_limit));
        }

        for (name, value) in [
            ("metrics.retry_interval", &self.metrics.retry_interval),
            ("metrics.sample_timeout", &self.metrics.sample_timeout),
            ("controller.cycle_interval", &self.controller.cycle_interval),
        ] {
            if parse_duration(value).is_some_and(|d| d > MAX_DURATION) {
                return invalid(format!("{name} {value:?} exceeds 24h"));
            }
        }

        let retry = parse_duration(&self.metrics.retry_interval).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "metrics.retry_interval {:?} is not a duration",
                self.metrics.retry_interval
            ))
        })?;
        let timeout = parse_duration(&self.metrics.sample_timeout).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "metrics.sample_timeout {:?} is not a duration",
                self.metrics.sample_timeout
            ))
        })?;
        if retry.is_zero() {
            return invalid("metrics.retry_interval must be positive");
        }
        if timeout < retry {
            return invalid("metrics.sample_timeout must not be shorter than metrics.retry_interval");
        }
        if parse_duration(&self.controller.cycle_interval).is_none() {
            return invalid(format!(
                "controller.cycle_interval {:?} is not a duration",
                self.controller.cycle_interval
            ));
        }

        if self.route_table.reload_command.is_empty() {
            return invalid("route_table.reload_command must not be empty");
        }
        if self
            .route_table
            .status_command
            .as_ref()
            .is_some_and(|c| c.is_empty())
        {
            return invalid("route_table.status_command must not be empty when set");
        }

        Ok(())
    }
}

impl PoolConfig {
    pub fn memory_limit_bytes(&self) -> u64 {
        parse_size(&self.memory_limit).unwrap_or(1 << 30)
    }
}

impl MetricsConfig {
    pub fn retry_interval(&self) -> Duration {
        parse_duration(&self.retry_interval).unwrap_or(Duration::from_secs(1))
    }

    pub fn sample_timeout(&self) -> Duration {
        parse_duration(&self.sample_timeout).unwrap_or(Duration::from_secs(30))
    }
}

impl ControllerConfig {
    pub fn cycle_interval(&self) -> Duration {
        parse_duration(&self.cycle_interval).unwrap_or(Duration::from_secs(1))
    }
}

/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

fn invalid<T>(msg: impl Into<String>) -> ConfigResult<T> {
    Err(ConfigError::Invalid(msg.into()))
}

/// Parse a duration string like "5s", "500ms", "1m".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Parse a memory size like "512m", "1g", "64k" or plain bytes.
///
/// Suffixes are binary multiples, as container runtimes read them.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_ascii_lowercase();
    let s = s.strip_suffix('b').unwrap_or(&s);
    let (digits, multiplier) = match s.chars().last()? {
        'k' => (&s[..s.len() - 1], 1u64 << 10),
        'm' => (&s[..s.len() - 1], 1 << 20),
        'g' => (&s[..s.len() - 1], 1 << 30),
        _ => (s, 1),
    };
    let value = digits.trim().parse::<u64>().ok()?;
    match value.checked_mul(multiplier) {
        Some(0) | None => None,
        Some(bytes) => Some(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        FleetConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_minimal() {
        let config = FleetConfig::parse(
            r#"
[server]
address = "192.168.1.5"
"#,
        )
        .unwrap();
        assert_eq!(config.server.address, "192.168.1.5");
        assert_eq!(config.pool.base_port, 8010);
        assert_eq!(config.thresholds.drain_safe, 4);
    }

    #[test]
    fn parse_full() {
        let config = FleetConfig::parse(
            r#"
[server]
address = "10.0.0.2"
listen_port = 8080

[scoring]
coefficient_x = 3.0
coefficient_y = 0.5
coefficient_z = 2.0
max_processing_ms = 1000

[thresholds]
scale_up = 60.0
scale_down = 5.0
scale_up_average = 50.0
drain_safe = 2

[pool]
name_prefix = "web"
base_port = 9000
initial_workers = 2
template = "httpd_final"
memory_limit = "512m"

[metrics]
dir = "/tmp/stats"
retry_interval = "250ms"
sample_timeout = "10s"

[route_table]
config_path = "/tmp/haproxy.cfg"
reload_command = ["systemctl", "reload", "haproxy"]
status_command = ["systemctl", "is-active", "haproxy"]
"#,
        )
        .unwrap();

        assert_eq!(config.server.listen_port, 8080);
        assert_eq!(config.scoring.coefficient_x, 3.0);
        assert_eq!(config.thresholds.scale_up, 60.0);
        assert_eq!(config.pool.name_prefix, "web");
        assert_eq!(config.pool.memory_limit_bytes(), 512 * 1024 * 1024);
        assert_eq!(config.metrics.retry_interval(), Duration::from_millis(250));
        assert_eq!(config.metrics.sample_timeout(), Duration::from_secs(10));
        assert_eq!(config.route_table.reload_command[0], "systemctl");
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let err = FleetConfig::parse(
            r#"
[thresholds]
scale_up = 10.0
scale_down = 10.0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("scale_up"));
    }

    #[test]
    fn rejects_negative_coefficient() {
        let mut config = FleetConfig::default();
        config.scoring.coefficient_y = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_processing_ceiling() {
        let mut config = FleetConfig::default();
        config.scoring.max_processing_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_timeout_shorter_than_retry() {
        let mut config = FleetConfig::default();
        config.metrics.retry_interval = "5s".to_string();
        config.metrics.sample_timeout = "1s".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_reload_command() {
        let mut config = FleetConfig::default();
        config.route_table.reload_command.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_port_overflow() {
        let mut config = FleetConfig::default();
        config.pool.base_port = u16::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn huge_minute_count_is_invalid_not_a_panic() {
        let err = FleetConfig::parse("[controller]\ncycle_interval = \"400000000000000000m\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(parse_duration("400000000000000000m"), None);
    }

    #[test]
    fn rejects_durations_over_a_day() {
        let err = FleetConfig::parse("[metrics]\nsample_timeout = \"1441m\"\n").unwrap_err();
        assert!(err.to_string().contains("metrics.sample_timeout"));

        let mut config = FleetConfig::default();
        config.controller.cycle_interval = "86400s".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = FleetConfig::parse("[thresholds\nscale_up = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_reports_missing_path() {
        let err = FleetConfig::from_file(Path::new("/nonexistent/fleet.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn from_file_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(&path, "[pool]\ninitial_workers = 3\n").unwrap();

        let config = FleetConfig::from_file(&path).unwrap();
        assert_eq!(config.pool.initial_workers, 3);
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn parse_size_values() {
        assert_eq!(parse_size("1g"), Some(1 << 30));
        assert_eq!(parse_size("512m"), Some(512 << 20));
        assert_eq!(parse_size("64KB"), Some(64 << 10));
        assert_eq!(parse_size("1000000000"), Some(1_000_000_000));
        assert_eq!(parse_size("0"), None);
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size(""), None);
    }
}
