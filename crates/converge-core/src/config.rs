use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::convergence::StabilityCriteria;

pub const CONFIG_VERSION: u32 = 1;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfigInput {
    pub version: u32,
    pub nodes: Vec<String>,
    pub stable_duration_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub min_peers: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
    pub version: u32,
    pub nodes: Vec<String>,
    pub criteria: StabilityCriteria,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            nodes: Vec::new(),
            criteria: StabilityCriteria::default(),
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(120),
        }
    }
}

impl ConvergenceConfigInput {
    /// Parses raw TOML without resolving defaults; empty input is all defaults.
    pub fn parse(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(input).map_err(|e| format!("Invalid config TOML: {}", e))
    }

    pub fn resolve(self) -> Result<ConvergenceConfig, String> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(format!("Unsupported config version {}", version));
        }

        let defaults = ConvergenceConfig::default();
        let criteria = StabilityCriteria {
            min_peers: self.min_peers.unwrap_or(defaults.criteria.min_peers),
            stable_duration: self
                .stable_duration_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.criteria.stable_duration),
        };
        let poll_interval = self
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval)
            .max(MIN_POLL_INTERVAL);
        let timeout = self
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        let mut seen = HashSet::new();
        let nodes = self
            .nodes
            .into_iter()
            .map(|node| node.trim().to_string())
            .filter(|node| !node.is_empty() && seen.insert(node.clone()))
            .collect();

        Ok(ConvergenceConfig {
            version,
            nodes,
            criteria,
            poll_interval,
            timeout,
        })
    }
}

impl ConvergenceConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        ConvergenceConfigInput::parse(input)?.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml_config_basic() {
        let toml = r#"
            version = 1
            nodes = ["n1", "n2", "n3"]
            stable_duration_secs = 20
            poll_interval_ms = 500
            min_peers = 2
            timeout_secs = 60
        "#;

        let cfg = ConvergenceConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.nodes, vec!["n1", "n2", "n3"]);
        assert_eq!(cfg.criteria.stable_duration, Duration::from_secs(20));
        assert_eq!(cfg.criteria.min_peers, 2);
        assert_eq!(cfg.poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.timeout, Duration::from_secs(60));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = ConvergenceConfig::from_toml_str("  \n").unwrap();
        assert!(cfg.nodes.is_empty());
        assert_eq!(cfg.criteria, StabilityCriteria::default());
        assert_eq!(cfg.poll_interval, Duration::from_secs(3));
        assert_eq!(cfg.timeout, Duration::from_secs(120));
    }

    #[test]
    fn nodes_are_trimmed_and_deduplicated() {
        let toml = r#"nodes = [" n1 ", "", "n2", "n1"]"#;
        let cfg = ConvergenceConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.nodes, vec!["n1", "n2"]);
    }

    #[test]
    fn poll_interval_is_clamped() {
        let cfg = ConvergenceConfig::from_toml_str("poll_interval_ms = 0").unwrap();
        assert_eq!(cfg.poll_interval, MIN_POLL_INTERVAL);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let err = ConvergenceConfig::from_toml_str("version = 7").unwrap_err();
        assert!(err.contains("Unsupported config version 7"));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let err = ConvergenceConfig::from_toml_str("nodes = [").unwrap_err();
        assert!(err.starts_with("Invalid config TOML"));
    }
}
