//! `consistent-hashring` policy configuration.
//!
//! The policy is configured with JSON of the form
//! `{"replicationFactor": 100, "spread": 1}`. Zero or absent fields fall
//! back to the defaults.

use std::collections::BTreeMap;

use corelib::DEFAULT_REPLICATION_FACTOR;
use serde::{Deserialize, Serialize};

use crate::error::{BalancerError, Result};

/// Name the policy is registered under.
pub const BALANCER_NAME: &str = "consistent-hashring";

/// Owners considered per pick when the configuration does not say otherwise.
pub const DEFAULT_SPREAD: u8 = 1;

/// Service config selecting the policy with default settings.
pub const DEFAULT_SERVICE_CONFIG_JSON: &str =
    r#"{"loadBalancingConfig":[{"consistent-hashring":{"replicationFactor":100,"spread":1}}]}"#;

/// Policy settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancerConfig {
    /// Virtual nodes per ring member.
    #[serde(default, skip_serializing_if = "is_zero_u16")]
    pub replication_factor: u16,
    /// Number of nearest owners a pick chooses among.
    #[serde(default, skip_serializing_if = "is_zero_u8")]
    pub spread: u8,
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}

fn is_zero_u8(v: &u8) -> bool {
    *v == 0
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            spread: DEFAULT_SPREAD,
        }
    }
}

#[derive(Serialize)]
struct ServiceConfig<'a> {
    #[serde(rename = "loadBalancingConfig")]
    load_balancing_config: Vec<BTreeMap<&'static str, &'a BalancerConfig>>,
}

impl BalancerConfig {
    pub fn new(replication_factor: u16, spread: u8) -> Self {
        Self {
            replication_factor,
            spread,
        }
        .with_defaults()
    }

    /// Replace zero fields with their defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.replication_factor == 0 {
            self.replication_factor = DEFAULT_REPLICATION_FACTOR;
        }
        if self.spread == 0 {
            self.spread = DEFAULT_SPREAD;
        }
        self
    }

    /// Parse policy JSON, applying defaults.
    pub fn parse(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            BalancerError::InvalidConfig(format!("unable to parse policy config {json}: {e}"))
        })?;
        Ok(config.with_defaults())
    }

    /// Service config JSON selecting this policy with these settings.
    pub fn service_config_json(&self) -> Result<String> {
        let config = ServiceConfig {
            load_balancing_config: vec![BTreeMap::from([(BALANCER_NAME, self)])],
        };
        serde_json::to_string(&config).map_err(|e| BalancerError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let config = BalancerConfig::parse(r#"{"replicationFactor": 20, "spread": 3}"#).unwrap();
        assert_eq!(config, BalancerConfig::new(20, 3));
    }

    #[test]
    fn test_parse_applies_defaults() {
        assert_eq!(BalancerConfig::parse("{}").unwrap(), BalancerConfig::default());

        let config = BalancerConfig::parse(r#"{"replicationFactor": 0, "spread": 2}"#).unwrap();
        assert_eq!(config.replication_factor, DEFAULT_REPLICATION_FACTOR);
        assert_eq!(config.spread, 2);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            BalancerConfig::parse(r#"{"replicationFactor": "many"}"#),
            Err(BalancerError::InvalidConfig(_))
        ));
        assert!(matches!(
            BalancerConfig::parse("not json"),
            Err(BalancerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_service_config() {
        assert_eq!(
            BalancerConfig::default().service_config_json().unwrap(),
            DEFAULT_SERVICE_CONFIG_JSON
        );
    }

    #[test]
    fn test_service_config_json() {
        let json = BalancerConfig::new(20, 3).service_config_json().unwrap();
        assert_eq!(
            json,
            r#"{"loadBalancingConfig":[{"consistent-hashring":{"replicationFactor":20,"spread":3}}]}"#
        );
    }
}
