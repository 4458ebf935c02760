use std::path::Path;

use fabric_emu::EmulationConfig;
use serde::{Deserialize, Serialize};

/// Errors loading or checking a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Emulation(#[from] fabric_emu::Error),
    #[error("invalid workload: {0}")]
    Workload(String),
}

/// Emulator run configuration: the fabric plus the traffic thrown at it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Timeslots to emulate (overridden by `--timeslots`).
    #[serde(default = "default_timeslots")]
    pub timeslots: u64,

    #[serde(default)]
    pub emulation: EmulationConfig,

    #[serde(default)]
    pub workload: WorkloadConfig,
}

fn default_timeslots() -> u64 {
    100_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeslots: default_timeslots(),
            emulation: EmulationConfig::default(),
            workload: WorkloadConfig::default(),
        }
    }
}

/// Stress-test traffic: every endpoint issues requests as a Poisson process,
/// each to a uniformly random other endpoint, and the request rate doubles
/// (by default) every `rate_increase_gap` timeslots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Mean timeslots between two requests of one endpoint.
    pub mean_gap: f64,
    /// MTUs per request.
    pub flow_size: u32,
    /// The mean gap is divided by this every `rate_increase_gap` timeslots.
    pub rate_increase_factor: f64,
    /// 0 keeps the rate constant.
    pub rate_increase_gap: u64,
    /// The mean gap never drops below this.
    pub min_mean_gap: f64,
    /// Requests waiting for room in the emulation; later arrivals are refused.
    pub max_pending: usize,
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            mean_gap: 250.0,
            flow_size: 10,
            rate_increase_factor: 2.0,
            rate_increase_gap: 20_000,
            min_mean_gap: 8.0,
            max_pending: 4096,
            seed: 1,
        }
    }
}

const CONFIG_TEMPLATE: &str = include_str!("config_template.toml");

impl Config {
    /// A commented config file holding the defaults.
    pub fn generate_config_text() -> &'static str {
        CONFIG_TEMPLATE
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.emulation.validate()?;
        let w = &self.workload;
        if !(w.mean_gap > 0.0) || !(w.min_mean_gap > 0.0) {
            return Err(ConfigError::Workload("mean gaps must be positive".into()));
        }
        let room = self.emulation.packet_pool_size.min(self.emulation.packet_ring_size);
        if w.flow_size == 0 || w.flow_size > room {
            return Err(ConfigError::Workload(format!(
                "flow_size {} must be between 1 and {room} (pool and ring size)",
                w.flow_size
            )));
        }
        if w.max_pending == 0 {
            return Err(ConfigError::Workload("max_pending must be non-zero".into()));
        }
        if w.rate_increase_factor < 1.0 {
            return Err(ConfigError::Workload(format!(
                "rate_increase_factor {} would slow traffic down",
                w.rate_increase_factor
            )));
        }
        if self.emulation.num_endpoints() < 2 {
            return Err(ConfigError::Workload("need at least two endpoints".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_emu::RouterPolicy;

    #[test]
    fn template_matches_defaults() {
        let config = Config::from_toml(Config::generate_config_text()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config = Config::from_toml(
            r#"
            timeslots = 50

            [emulation]
            racks = 2
            endpoints_per_rack = 8
            cores = 2

            [emulation.router]
            policy = "red"
            min_th = 10
            max_th = 40
            ecn = true
            "#,
        )
        .unwrap();
        assert_eq!(config.timeslots, 50);
        assert_eq!(config.emulation.racks, 2);
        match &config.emulation.router {
            RouterPolicy::Red(red) => {
                assert_eq!((red.min_th, red.max_th, red.ecn), (10, 40, true));
                assert_eq!(red.max_p, 0.05);
            }
            other => panic!("unexpected policy {other:?}"),
        }
        assert_eq!(config.workload, WorkloadConfig::default());
    }

    #[test]
    fn invalid_emulation_is_rejected() {
        let err = Config::from_toml("[emulation]\ncores = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Emulation(_)));
    }

    #[test]
    fn flow_larger_than_ring_is_rejected() {
        let err = Config::from_toml(
            "[emulation]\nendpoints_per_rack = 4\npacket_ring_size = 8\n[workload]\nflow_size = 9\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Workload(_)));
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        let err = Config::from_toml("[emulation.router]\npolicy = \"codel\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
