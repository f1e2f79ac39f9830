//! NAT rule resolution
//!
//! The engine decides whether an outbound destination is virtual traffic
//! that needs translation. Explicit rules are checked first, in
//! configuration order; virtual ranges come after, so specific
//! port/protocol/site constraints always win over subnet-wide mappings.
//! Resolution is a pure function of the configuration and the destination.

use std::net::Ipv4Addr;

use tracing::trace;

use super::types::{DestMatcher, NatRule, RealTarget, VirtualRange, DYNAMIC_RULE_PREFIX};
use crate::endpoint::Endpoint;

/// A matched rule together with per-destination context derived while
/// matching
#[derive(Debug, Clone)]
pub struct ResolvedRule {
    /// The matched (or synthesized) rule
    pub rule: NatRule,
    /// The destination's embedded IPv4, when the match derived one
    pub embedded_v4: Option<Ipv4Addr>,
}

/// Rule and range matching engine
///
/// Immutable after construction; safe to share across flow tasks.
#[derive(Debug)]
pub struct RuleEngine {
    site_id: String,
    rules: Vec<NatRule>,
    ranges: Vec<VirtualRange>,
}

impl RuleEngine {
    /// Create an engine over validated rules and ranges
    #[must_use]
    pub fn new(site_id: impl Into<String>, rules: Vec<NatRule>, ranges: Vec<VirtualRange>) -> Self {
        Self {
            site_id: site_id.into(),
            rules,
            ranges,
        }
    }

    /// The configured site identifier
    #[must_use]
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Resolve a destination to the first matching rule
    ///
    /// Returns `None` when the destination is not virtual traffic (or is not
    /// an IP), in which case the flow is handled as a normal outbound.
    #[must_use]
    pub fn resolve(&self, dest: &Endpoint) -> Option<ResolvedRule> {
        let ip = dest.ip()?;

        for rule in &self.rules {
            let outcome = rule.virtual_destination.matches(&ip);
            if !outcome.matched() {
                continue;
            }
            if !Self::matches_protocol(rule, dest) {
                continue;
            }
            if !Self::matches_port(rule, dest.port) {
                continue;
            }
            if !self.matches_site(rule) {
                continue;
            }
            trace!(rule_id = %rule.rule_id, %dest, "NAT rule matched");
            return Some(ResolvedRule {
                embedded_v4: outcome.embedded(),
                rule: rule.clone(),
            });
        }

        for range in &self.ranges {
            let outcome = range.matches(&ip);
            if !outcome.matched() {
                continue;
            }
            trace!(virtual_network = %range.virtual_network, %dest, "Virtual range matched");
            return Some(ResolvedRule {
                embedded_v4: outcome.embedded(),
                rule: Self::synthesize_range_rule(range, &ip),
            });
        }

        None
    }

    /// Build the transient rule for a range match
    ///
    /// Structurally identical to a configured rule; telemetry can recognize
    /// it by the id prefix.
    fn synthesize_range_rule(range: &VirtualRange, ip: &std::net::IpAddr) -> NatRule {
        NatRule {
            rule_id: format!("{DYNAMIC_RULE_PREFIX}{}", range.virtual_network),
            source_site: Vec::new(),
            virtual_destination: DestMatcher::Ip(*ip),
            real_destination: RealTarget::Cidr(range.real_network),
            protocols: Vec::new(),
            port_mapping: None,
        }
    }

    /// Rule protocol list is empty, or names the flow's network
    fn matches_protocol(rule: &NatRule, dest: &Endpoint) -> bool {
        rule.protocols.is_empty() || rule.protocols.contains(&dest.network)
    }

    /// Rule has no port mapping, or the flow's port lies in its original
    /// port specification
    fn matches_port(rule: &NatRule, port: u16) -> bool {
        rule.port_mapping
            .as_ref()
            .map_or(true, |pm| pm.original.contains(port))
    }

    /// Rule site list is empty, no site is configured, or the configured
    /// site appears in the list (case-insensitive)
    fn matches_site(&self, rule: &NatRule) -> bool {
        if rule.source_site.is_empty() || self.site_id.is_empty() {
            return true;
        }
        let site = self.site_id.to_ascii_lowercase();
        rule.source_site.iter().any(|s| *s == site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Network;
    use crate::rules::types::{DestMatcher, PortMapping, PortSpec};

    fn literal_rule(id: &str, virt: &str, real: &str) -> NatRule {
        NatRule {
            rule_id: id.to_string(),
            source_site: vec![],
            virtual_destination: DestMatcher::parse(virt).unwrap(),
            real_destination: RealTarget::parse(real).unwrap(),
            protocols: vec![],
            port_mapping: None,
        }
    }

    fn tcp_dest(addr: &str, port: u16) -> Endpoint {
        Endpoint::tcp(addr.parse().unwrap(), port)
    }

    #[test]
    fn test_resolve_literal_rule() {
        let engine = RuleEngine::new(
            "site-b",
            vec![literal_rule("r1", "240.2.2.20", "192.168.1.20")],
            vec![],
        );

        let resolved = engine.resolve(&tcp_dest("240.2.2.20", 80)).unwrap();
        assert_eq!(resolved.rule.rule_id, "r1");
        assert!(!resolved.rule.is_dynamic());

        assert!(engine.resolve(&tcp_dest("240.2.2.21", 80)).is_none());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let engine = RuleEngine::new(
            "site-b",
            vec![
                literal_rule("first", "240.2.2.0/24", "192.168.1.0/24"),
                literal_rule("second", "240.2.2.20", "192.168.1.20"),
            ],
            vec![],
        );

        // First match wins in declaration order, on every invocation.
        for _ in 0..3 {
            let resolved = engine.resolve(&tcp_dest("240.2.2.20", 80)).unwrap();
            assert_eq!(resolved.rule.rule_id, "first");
        }
    }

    #[test]
    fn test_rules_precede_ranges() {
        let mut rule = literal_rule("explicit", "240.2.2.20", "192.168.1.20");
        rule.port_mapping = Some(PortMapping::new(
            PortSpec::Single(8080),
            PortSpec::Single(80),
        ));
        let engine = RuleEngine::new(
            "site-b",
            vec![rule],
            vec![VirtualRange {
                virtual_network: "240.2.2.0/24".parse().unwrap(),
                real_network: "192.168.1.0/24".parse().unwrap(),
                ipv6_enabled: false,
                ipv6_prefix: None,
            }],
        );

        // Port admitted by the rule: the explicit rule wins.
        let resolved = engine.resolve(&tcp_dest("240.2.2.20", 8080)).unwrap();
        assert_eq!(resolved.rule.rule_id, "explicit");

        // Port outside the rule's mapping: falls through to the range.
        let resolved = engine.resolve(&tcp_dest("240.2.2.20", 443)).unwrap();
        assert!(resolved.rule.is_dynamic());
    }

    #[test]
    fn test_protocol_filter() {
        let mut rule = literal_rule("tcp-only", "240.2.2.20", "192.168.1.20");
        rule.protocols = vec![Network::Tcp];
        let engine = RuleEngine::new("site-b", vec![rule], vec![]);

        assert!(engine.resolve(&tcp_dest("240.2.2.20", 53)).is_some());
        let udp = Endpoint::udp("240.2.2.20".parse().unwrap(), 53);
        assert!(engine.resolve(&udp).is_none());
    }

    #[test]
    fn test_site_filter() {
        let mut rule = literal_rule("scoped", "240.2.2.20", "192.168.1.20");
        rule.source_site = vec!["site-a".to_string(), "site-c".to_string()];

        let engine = RuleEngine::new("site-b", vec![rule.clone()], vec![]);
        assert!(engine.resolve(&tcp_dest("240.2.2.20", 80)).is_none());

        // Case-insensitive match against the configured site
        let engine = RuleEngine::new("SITE-A", vec![rule.clone()], vec![]);
        assert!(engine.resolve(&tcp_dest("240.2.2.20", 80)).is_some());

        // Empty configured site matches every rule
        let engine = RuleEngine::new("", vec![rule], vec![]);
        assert!(engine.resolve(&tcp_dest("240.2.2.20", 80)).is_some());
    }

    #[test]
    fn test_range_synthesizes_dynamic_rule() {
        let engine = RuleEngine::new(
            "site-b",
            vec![],
            vec![VirtualRange {
                virtual_network: "240.2.2.0/24".parse().unwrap(),
                real_network: "192.168.1.0/24".parse().unwrap(),
                ipv6_enabled: false,
                ipv6_prefix: None,
            }],
        );

        let resolved = engine.resolve(&tcp_dest("240.2.2.77", 443)).unwrap();
        assert_eq!(resolved.rule.rule_id, "dynamic-range-240.2.2.0/24");
        assert!(resolved.rule.is_dynamic());
        assert!(resolved.rule.port_mapping.is_none());
        assert_eq!(
            resolved.rule.real_destination,
            RealTarget::Cidr("192.168.1.0/24".parse().unwrap())
        );
    }

    #[test]
    fn test_domain_destination_never_resolves() {
        let engine = RuleEngine::new(
            "site-b",
            vec![literal_rule("r1", "240.2.2.20", "192.168.1.20")],
            vec![],
        );
        let dest = Endpoint::new("example.com".parse().unwrap(), 80, Network::Tcp);
        assert!(engine.resolve(&dest).is_none());
    }
}
