//! Configuration types for the NAT outbound handler
//!
//! These structures mirror the JSON surface consumed from the platform's
//! config loader. They are validated and compiled into the typed runtime
//! representation (`rules::NatRule` etc.) by [`NatOutboundConfig::build`];
//! nothing downstream ever sees a raw string again.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::addr;
use crate::endpoint::Network;
use crate::error::ConfigError;
use crate::rules::{DestMatcher, NatRule, PortMapping, PortSpec, RealTarget, VirtualRange};
use crate::session::{SessionLimits, SessionTimeouts};

/// Root NAT outbound configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NatOutboundConfig {
    /// Identifier of the site this handler runs in
    pub site_id: String,

    /// Virtual/real subnet pairs
    #[serde(default)]
    pub virtual_ranges: Vec<VirtualRangeConfig>,

    /// Explicit translation rules, evaluated in order before the ranges
    #[serde(default)]
    pub rules: Vec<NatRuleConfig>,

    /// Session timeouts, in seconds
    #[serde(default)]
    pub session_timeout: SessionTimeoutConfig,

    /// Session table resource limits
    #[serde(default)]
    pub resource_limits: ResourceLimitsConfig,
}

/// A virtual IP range advertised by a site
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualRangeConfig {
    /// Virtual network in CIDR notation
    pub virtual_network: String,
    /// Real network in CIDR notation
    pub real_network: String,
    /// Accept IPv6 destinations carrying embedded IPv4 addresses
    #[serde(default)]
    pub ipv6_enabled: bool,
    /// IPv6 prefix carrying the embedded addresses
    #[serde(default)]
    pub ipv6_prefix: String,
}

/// A single NAT rule
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NatRuleConfig {
    /// Identifier used in logs; generated when empty
    #[serde(default)]
    pub rule_id: String,
    /// Comma-separated list of sites the rule applies to
    #[serde(default)]
    pub source_site: String,
    /// Virtual destination: IP, CIDR, or IPv6-embedded-IPv4 form
    pub virtual_destination: String,
    /// Real destination: IP, CIDR, or empty for pass-through
    #[serde(default)]
    pub real_destination: String,
    /// Comma-separated protocol list ("tcp", "udp"); empty matches both
    #[serde(default)]
    pub protocol: String,
    /// Optional port remapping
    #[serde(default)]
    pub port_mapping: Option<PortMappingConfig>,
}

/// Port remapping of a rule
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMappingConfig {
    /// Ports the mapping applies to: a port, a dash range, or empty/"any"
    #[serde(default)]
    pub original_port: String,
    /// Port the destination is rewritten to
    #[serde(default)]
    pub translated_port: String,
}

/// Session timeout configuration, in seconds
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTimeoutConfig {
    /// Idle timeout for TCP sessions
    #[serde(default = "default_tcp_timeout")]
    pub tcp_timeout: u32,
    /// Idle timeout for UDP sessions
    #[serde(default = "default_udp_timeout")]
    pub udp_timeout: u32,
    /// Interval between expiry sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u32,
}

impl Default for SessionTimeoutConfig {
    fn default() -> Self {
        Self {
            tcp_timeout: default_tcp_timeout(),
            udp_timeout: default_udp_timeout(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

/// Session table resource limits
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimitsConfig {
    /// Maximum concurrently tracked sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    /// Memory budget for session records, in MiB
    #[serde(default = "default_max_memory_mb", rename = "maxMemoryMB")]
    pub max_memory_mb: u32,
    /// Occupancy fraction above which the sweeper reports pressure
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold: f64,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_memory_mb: default_max_memory_mb(),
            cleanup_threshold: default_cleanup_threshold(),
        }
    }
}

const fn default_tcp_timeout() -> u32 {
    300
}

const fn default_udp_timeout() -> u32 {
    60
}

const fn default_cleanup_interval() -> u32 {
    30
}

const fn default_max_sessions() -> u32 {
    10_000
}

const fn default_max_memory_mb() -> u32 {
    100
}

const fn default_cleanup_threshold() -> f64 {
    0.8
}

/// Validated, typed runtime configuration
#[derive(Debug)]
pub struct NatRuntime {
    /// Site identifier
    pub site_id: String,
    /// Compiled rules, in configuration order
    pub rules: Vec<NatRule>,
    /// Compiled ranges, in configuration order
    pub ranges: Vec<VirtualRange>,
    /// Session timeouts
    pub timeouts: SessionTimeouts,
    /// Session table limits
    pub limits: SessionLimits,
}

impl NatOutboundConfig {
    /// Validate the configuration without keeping the compiled form
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build().map(drop)
    }

    /// Compile the configuration into its typed runtime form
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required field is missing or any
    /// address, port, protocol, or limit fails to parse.
    pub fn build(&self) -> Result<NatRuntime, ConfigError> {
        if self.site_id.trim().is_empty() {
            return Err(ConfigError::validation("siteId is required"));
        }

        let mut ranges = Vec::with_capacity(self.virtual_ranges.len());
        for (i, range) in self.virtual_ranges.iter().enumerate() {
            ranges.push(range.build().map_err(|e| {
                ConfigError::validation(format!("virtualRanges[{i}]: {e}"))
            })?);
        }

        let mut rules = Vec::with_capacity(self.rules.len());
        for (i, rule) in self.rules.iter().enumerate() {
            rules.push(rule.build(i).map_err(|e| {
                ConfigError::validation(format!("rules[{i}]: {e}"))
            })?);
        }

        let timeouts = self.session_timeout.build()?;
        let limits = self.resource_limits.build()?;

        Ok(NatRuntime {
            site_id: self.site_id.trim().to_string(),
            rules,
            ranges,
            timeouts,
            limits,
        })
    }
}

impl VirtualRangeConfig {
    fn build(&self) -> Result<VirtualRange, ConfigError> {
        if self.virtual_network.trim().is_empty() || self.real_network.trim().is_empty() {
            return Err(ConfigError::validation(
                "both virtualNetwork and realNetwork are required",
            ));
        }
        let virtual_network = addr::parse_cidr(&self.virtual_network)?;
        let real_network = addr::parse_cidr(&self.real_network)?;

        let ipv6_prefix: Option<ipnet::Ipv6Net> = if self.ipv6_prefix.trim().is_empty() {
            None
        } else {
            let prefix = self.ipv6_prefix.trim().parse().map_err(|_| {
                ConfigError::validation(format!(
                    "ipv6Prefix is not a valid IPv6 CIDR: {}",
                    self.ipv6_prefix
                ))
            })?;
            Some(prefix)
        };
        if self.ipv6_enabled {
            match &ipv6_prefix {
                None => {
                    return Err(ConfigError::validation(
                        "ipv6Enabled requires an ipv6Prefix",
                    ));
                }
                Some(prefix) => {
                    if prefix.prefix_len() > 96 {
                        return Err(ConfigError::validation(
                            "ipv6Prefix must be at most /96 to carry an embedded IPv4",
                        ));
                    }
                }
            }
        }

        Ok(VirtualRange {
            virtual_network,
            real_network,
            ipv6_enabled: self.ipv6_enabled,
            ipv6_prefix,
        })
    }
}

impl NatRuleConfig {
    fn build(&self, index: usize) -> Result<NatRule, ConfigError> {
        if self.virtual_destination.trim().is_empty() {
            return Err(ConfigError::validation("virtualDestination is required"));
        }

        let rule_id = if self.rule_id.trim().is_empty() {
            format!("rule-{index}")
        } else {
            self.rule_id.trim().to_string()
        };

        let port_mapping = match &self.port_mapping {
            None => None,
            Some(pm) => Some(PortMapping::new(
                PortSpec::parse(&pm.original_port)?,
                PortSpec::parse(&pm.translated_port)?,
            )),
        };

        Ok(NatRule {
            rule_id,
            source_site: parse_site_list(&self.source_site),
            virtual_destination: DestMatcher::parse(&self.virtual_destination)?,
            real_destination: RealTarget::parse(&self.real_destination)?,
            protocols: parse_protocol_list(&self.protocol)?,
            port_mapping,
        })
    }
}

impl SessionTimeoutConfig {
    fn build(&self) -> Result<SessionTimeouts, ConfigError> {
        if self.tcp_timeout == 0 || self.udp_timeout == 0 || self.cleanup_interval == 0 {
            return Err(ConfigError::validation(
                "sessionTimeout values must be greater than 0",
            ));
        }
        Ok(SessionTimeouts {
            tcp: Duration::from_secs(u64::from(self.tcp_timeout)),
            udp: Duration::from_secs(u64::from(self.udp_timeout)),
            sweep_interval: Duration::from_secs(u64::from(self.cleanup_interval)),
        })
    }
}

impl ResourceLimitsConfig {
    fn build(&self) -> Result<SessionLimits, ConfigError> {
        if !(0.0..=1.0).contains(&self.cleanup_threshold) {
            return Err(ConfigError::validation(format!(
                "cleanupThreshold must lie in [0.0, 1.0], got {}",
                self.cleanup_threshold
            )));
        }
        Ok(SessionLimits {
            max_sessions: u64::from(self.max_sessions),
            max_memory_mb: u64::from(self.max_memory_mb),
            evict_threshold: self.cleanup_threshold,
        })
    }
}

/// Split a comma-separated site list into lowercase trimmed tokens
fn parse_site_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Parse a comma-separated protocol list; empty matches every protocol
fn parse_protocol_list(s: &str) -> Result<Vec<Network>, ConfigError> {
    let mut protocols = Vec::new();
    for token in s.split(',') {
        let token = token.trim().to_ascii_lowercase();
        match token.as_str() {
            "" => {}
            "tcp" => protocols.push(Network::Tcp),
            "udp" => protocols.push(Network::Udp),
            other => {
                return Err(ConfigError::validation(format!(
                    "unknown protocol '{other}' (expected tcp or udp)"
                )));
            }
        }
    }
    protocols.dedup();
    Ok(protocols)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(site_id: &str) -> NatOutboundConfig {
        NatOutboundConfig {
            site_id: site_id.to_string(),
            virtual_ranges: vec![],
            rules: vec![],
            session_timeout: SessionTimeoutConfig::default(),
            resource_limits: ResourceLimitsConfig::default(),
        }
    }

    #[test]
    fn test_missing_site_id_rejected() {
        assert!(minimal("").validate().is_err());
        assert!(minimal("  ").validate().is_err());
        assert!(minimal("site-b").validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let runtime = minimal("site-b").build().unwrap();
        assert_eq!(runtime.timeouts.tcp, Duration::from_secs(300));
        assert_eq!(runtime.timeouts.udp, Duration::from_secs(60));
        assert_eq!(runtime.timeouts.sweep_interval, Duration::from_secs(30));
        assert_eq!(runtime.limits.max_sessions, 10_000);
        assert_eq!(runtime.limits.max_memory_mb, 100);
        assert!((runtime.limits.evict_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_range_validation() {
        let mut config = minimal("site-b");
        config.virtual_ranges.push(VirtualRangeConfig {
            virtual_network: "240.2.2.0/24".to_string(),
            real_network: "192.168.1.0/24".to_string(),
            ipv6_enabled: false,
            ipv6_prefix: String::new(),
        });
        assert!(config.validate().is_ok());

        config.virtual_ranges[0].real_network = String::new();
        assert!(config.validate().is_err());

        config.virtual_ranges[0].real_network = "not-a-cidr".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_range_ipv6_requires_prefix() {
        let mut config = minimal("site-b");
        config.virtual_ranges.push(VirtualRangeConfig {
            virtual_network: "64:ff9b:1111::/96".to_string(),
            real_network: "192.168.1.0/24".to_string(),
            ipv6_enabled: true,
            ipv6_prefix: String::new(),
        });
        assert!(config.validate().is_err());

        config.virtual_ranges[0].ipv6_prefix = "64:ff9b:1111::/96".to_string();
        assert!(config.validate().is_ok());

        // Too narrow to carry 32 embedded bits
        config.virtual_ranges[0].ipv6_prefix = "64:ff9b:1111::/112".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rule_validation() {
        let mut config = minimal("site-b");
        config.rules.push(NatRuleConfig {
            rule_id: String::new(),
            source_site: "Site-A, site-b".to_string(),
            virtual_destination: "240.2.2.20".to_string(),
            real_destination: "192.168.1.20".to_string(),
            protocol: "tcp".to_string(),
            port_mapping: Some(PortMappingConfig {
                original_port: "8080".to_string(),
                translated_port: "80".to_string(),
            }),
        });

        let runtime = config.build().unwrap();
        assert_eq!(runtime.rules.len(), 1);
        // Generated id and lowercased site tokens
        assert_eq!(runtime.rules[0].rule_id, "rule-0");
        assert_eq!(runtime.rules[0].source_site, vec!["site-a", "site-b"]);

        config.rules[0].virtual_destination = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rule_rejects_bad_protocol() {
        let mut config = minimal("site-b");
        config.rules.push(NatRuleConfig {
            rule_id: "r1".to_string(),
            source_site: String::new(),
            virtual_destination: "240.2.2.20".to_string(),
            real_destination: String::new(),
            protocol: "icmp".to_string(),
            port_mapping: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_bounds() {
        let mut config = minimal("site-b");
        config.resource_limits.cleanup_threshold = 1.5;
        assert!(config.validate().is_err());
        config.resource_limits.cleanup_threshold = -0.1;
        assert!(config.validate().is_err());
        config.resource_limits.cleanup_threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = minimal("site-b");
        config.session_timeout.cleanup_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_protocol_list_parsing() {
        assert_eq!(parse_protocol_list("").unwrap(), vec![]);
        assert_eq!(parse_protocol_list("tcp").unwrap(), vec![Network::Tcp]);
        assert_eq!(
            parse_protocol_list("tcp,udp").unwrap(),
            vec![Network::Tcp, Network::Udp]
        );
        assert_eq!(
            parse_protocol_list("UDP, TCP").unwrap(),
            vec![Network::Udp, Network::Tcp]
        );
        assert!(parse_protocol_list("sctp").is_err());
    }
}
