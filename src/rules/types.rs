//! Core rule types for the NAT engine
//!
//! This module defines the runtime (post-validation) representation of NAT
//! rules and virtual ranges:
//! - [`DestMatcher`]: how a rule's virtual destination is matched
//! - [`RealTarget`]: what the destination is rewritten to
//! - [`PortSpec`] / [`PortMapping`]: port matching and remapping
//! - [`NatRule`]: a single translation rule
//! - [`VirtualRange`]: a subnet-wide virtual/real mapping
//!
//! All of these are built once from configuration and immutable afterwards.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::addr;
use crate::endpoint::Network;
use crate::error::AddressError;

/// Prefix of rule ids synthesized for range matches
pub const DYNAMIC_RULE_PREFIX: &str = "dynamic-range-";

/// Outcome of matching a destination against a rule or range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DestMatch {
    /// Destination does not match
    No,
    /// Destination matches
    Yes,
    /// Destination matches and carries this embedded IPv4
    YesEmbedded(Ipv4Addr),
}

impl DestMatch {
    pub(crate) const fn matched(self) -> bool {
        !matches!(self, Self::No)
    }

    pub(crate) const fn embedded(self) -> Option<Ipv4Addr> {
        match self {
            Self::YesEmbedded(v4) => Some(v4),
            _ => None,
        }
    }
}

/// Matcher for a rule's virtual destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestMatcher {
    /// Exact address equality
    Ip(IpAddr),
    /// CIDR containment
    Cidr(IpNet),
    /// IPv6 prefix with an embedded IPv4 address or network, written as
    /// `prefix::a.b.c.d` or `prefix::a.b.c.0/len`
    EmbeddedV4 {
        /// The enclosing IPv6 prefix, compared over its upper 96 bits
        prefix: Ipv6Addr,
        /// The embedded IPv4 target
        v4: V4Target,
    },
}

/// Embedded IPv4 target of an [`DestMatcher::EmbeddedV4`] matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum V4Target {
    /// Single address
    Ip(Ipv4Addr),
    /// Network containment
    Cidr(Ipv4Net),
}

impl DestMatcher {
    /// Parse a virtual destination from its configuration string
    ///
    /// Accepts an IP literal, a CIDR, or the embedded form described on the
    /// type.
    ///
    /// # Errors
    ///
    /// Returns `AddressError` when the string fits none of the forms.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::invalid_address("empty virtual destination"));
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::Ip(ip));
        }
        if s.contains(':') && s.contains('.') {
            // prefix::v4 where the v4 part may carry a prefix length
            let (head, v4_part) = s
                .rsplit_once("::")
                .ok_or_else(|| AddressError::invalid_address(s))?;
            let prefix: Ipv6Addr = format!("{head}::")
                .parse()
                .map_err(|_| AddressError::invalid_address(s))?;
            let v4 = if v4_part.contains('/') {
                V4Target::Cidr(
                    v4_part
                        .parse()
                        .map_err(|_| AddressError::invalid_cidr(v4_part))?,
                )
            } else {
                V4Target::Ip(
                    v4_part
                        .parse()
                        .map_err(|_| AddressError::invalid_address(v4_part))?,
                )
            };
            return Ok(Self::EmbeddedV4 { prefix, v4 });
        }
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(Self::Cidr(net));
        }
        Err(AddressError::invalid_address(s))
    }

    /// Match a destination address against this matcher
    pub(crate) fn matches(&self, ip: &IpAddr) -> DestMatch {
        match self {
            Self::Ip(m) => {
                if m == ip {
                    DestMatch::Yes
                } else {
                    DestMatch::No
                }
            }
            Self::Cidr(net) => {
                if addr::contains_ip(net, ip) {
                    DestMatch::Yes
                } else {
                    DestMatch::No
                }
            }
            Self::EmbeddedV4 { prefix, v4 } => {
                let IpAddr::V6(v6) = ip else {
                    return DestMatch::No;
                };
                if v6.segments()[..6] != prefix.segments()[..6] {
                    return DestMatch::No;
                }
                let embedded = Ipv4Addr::from(u128::from(*v6) as u32);
                let hit = match v4 {
                    V4Target::Ip(target) => *target == embedded,
                    V4Target::Cidr(net) => net.contains(&embedded),
                };
                if hit {
                    DestMatch::YesEmbedded(embedded)
                } else {
                    DestMatch::No
                }
            }
        }
    }
}

impl fmt::Display for DestMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "{ip}"),
            Self::Cidr(net) => write!(f, "{net}"),
            Self::EmbeddedV4 { prefix, v4 } => {
                let head = prefix.to_string();
                let head = head.trim_end_matches(':');
                match v4 {
                    V4Target::Ip(ip) => write!(f, "{head}::{ip}"),
                    V4Target::Cidr(net) => write!(f, "{head}::{net}"),
                }
            }
        }
    }
}

/// What a matched destination is rewritten to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealTarget {
    /// Keep the destination address unchanged
    Unspecified,
    /// Rewrite to this literal address
    Ip(IpAddr),
    /// Rewrite into this network, preserving the destination's host bits
    Cidr(IpNet),
}

impl RealTarget {
    /// Parse a real destination from its configuration string
    ///
    /// An empty string means the destination address passes through.
    ///
    /// # Errors
    ///
    /// Returns `AddressError` when the string is neither empty, an IP
    /// literal, nor a CIDR.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::Unspecified);
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::Ip(ip));
        }
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(Self::Cidr(net));
        }
        Err(AddressError::invalid_address(s))
    }
}

/// Port specification: a single port, an inclusive range, or any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    /// Matches every port
    Any,
    /// Matches exactly one port
    Single(u16),
    /// Matches an inclusive dash-delimited range
    Range(u16, u16),
}

impl PortSpec {
    /// Parse a port specification
    ///
    /// Empty strings and `"any"` (case-insensitive) match every port.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::InvalidPort` for malformed ports or an
    /// inverted range.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("any") {
            return Ok(Self::Any);
        }
        if let Some((start, end)) = s.split_once('-') {
            let start: u16 = start
                .trim()
                .parse()
                .map_err(|_| AddressError::invalid_port(s))?;
            let end: u16 = end
                .trim()
                .parse()
                .map_err(|_| AddressError::invalid_port(s))?;
            if start > end {
                return Err(AddressError::invalid_port(s));
            }
            return Ok(Self::Range(start, end));
        }
        s.parse()
            .map(Self::Single)
            .map_err(|_| AddressError::invalid_port(s))
    }

    /// Check whether `port` lies in this specification
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        match self {
            Self::Any => true,
            Self::Single(p) => *p == port,
            Self::Range(start, end) => *start <= port && port <= *end,
        }
    }

    /// The first concrete port of this specification, if any
    #[must_use]
    pub const fn first(&self) -> Option<u16> {
        match self {
            Self::Any => None,
            Self::Single(p) => Some(*p),
            Self::Range(start, _) => Some(*start),
        }
    }
}

/// Port remapping attached to a rule
///
/// The mapping is uniform: every original port admitted by `original` is
/// rewritten to the first concrete port of `translated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Ports the mapping applies to
    pub original: PortSpec,
    /// Port the destination is rewritten to
    pub translated: PortSpec,
}

impl PortMapping {
    /// Create a port mapping
    #[must_use]
    pub const fn new(original: PortSpec, translated: PortSpec) -> Self {
        Self {
            original,
            translated,
        }
    }

    /// Apply the mapping to a destination port
    ///
    /// Ports outside `original` pass through unchanged, as does everything
    /// when `translated` names no concrete port.
    #[must_use]
    pub fn map_port(&self, port: u16) -> u16 {
        match self.translated.first() {
            Some(translated) if self.original.contains(port) => translated,
            _ => port,
        }
    }
}

/// A single NAT translation rule
///
/// Rules are evaluated in configuration order; the first full match wins and
/// explicit rules always precede range-derived ones.
#[derive(Debug, Clone)]
pub struct NatRule {
    /// Identifier used in logs and telemetry
    pub rule_id: String,
    /// Sites the rule applies to, lowercased; empty means every site
    pub source_site: Vec<String>,
    /// Virtual destination matcher
    pub virtual_destination: DestMatcher,
    /// Real destination target
    pub real_destination: RealTarget,
    /// Transport networks the rule applies to; empty means both
    pub protocols: Vec<Network>,
    /// Optional port remapping
    pub port_mapping: Option<PortMapping>,
}

impl NatRule {
    /// Whether this rule was synthesized from a virtual range match
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.rule_id.starts_with(DYNAMIC_RULE_PREFIX)
    }
}

/// A virtual/real subnet pair advertised by a site
#[derive(Debug, Clone)]
pub struct VirtualRange {
    /// The neutral virtual network routed between sites
    pub virtual_network: IpNet,
    /// The real network it maps onto
    pub real_network: IpNet,
    /// Whether IPv6 destinations with embedded IPv4 are accepted
    pub ipv6_enabled: bool,
    /// The IPv6 prefix carrying embedded IPv4 addresses
    pub ipv6_prefix: Option<Ipv6Net>,
}

impl VirtualRange {
    /// Match a destination address against this range
    ///
    /// IPv6 destinations never match unless `ipv6_enabled` is set.
    pub(crate) fn matches(&self, ip: &IpAddr) -> DestMatch {
        if let IpAddr::V6(v6) = ip {
            if !self.ipv6_enabled {
                return DestMatch::No;
            }
            if let Some(prefix) = &self.ipv6_prefix {
                if let Some(v4) = addr::embedded_v4_in_prefix(v6, prefix) {
                    if addr::contains_ip(&self.real_network, &IpAddr::V4(v4)) {
                        return DestMatch::YesEmbedded(v4);
                    }
                }
            }
        }
        if addr::contains_ip(&self.virtual_network, ip) {
            return DestMatch::Yes;
        }
        DestMatch::No
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dest_matcher_parse_forms() {
        assert!(matches!(
            DestMatcher::parse("240.2.2.20").unwrap(),
            DestMatcher::Ip(_)
        ));
        assert!(matches!(
            DestMatcher::parse("240.2.2.0/24").unwrap(),
            DestMatcher::Cidr(_)
        ));
        // A fully dotted IPv6 literal parses as a plain address
        assert!(matches!(
            DestMatcher::parse("64:ff9b:1111::192.168.1.100").unwrap(),
            DestMatcher::Ip(_)
        ));
        // With a prefix length it becomes an embedded network matcher
        assert!(matches!(
            DestMatcher::parse("64:ff9b:1111::192.168.1.0/24").unwrap(),
            DestMatcher::EmbeddedV4 {
                v4: V4Target::Cidr(_),
                ..
            }
        ));
        assert!(DestMatcher::parse("").is_err());
        assert!(DestMatcher::parse("not-an-address").is_err());
    }

    #[test]
    fn test_dest_matcher_exact_and_cidr() {
        let m = DestMatcher::parse("240.2.2.20").unwrap();
        assert!(m.matches(&"240.2.2.20".parse().unwrap()).matched());
        assert!(!m.matches(&"240.2.2.21".parse().unwrap()).matched());

        let m = DestMatcher::parse("240.2.2.0/24").unwrap();
        assert!(m.matches(&"240.2.2.77".parse().unwrap()).matched());
        assert!(!m.matches(&"240.2.3.1".parse().unwrap()).matched());
        // Mixed family
        assert!(!m.matches(&"64:ff9b::c0a8:164".parse().unwrap()).matched());
    }

    #[test]
    fn test_dest_matcher_embedded() {
        let m = DestMatcher::parse("64:ff9b:1111::192.168.1.0/24").unwrap();

        let hit = m.matches(&"64:ff9b:1111::c0a8:164".parse().unwrap());
        assert_eq!(hit.embedded(), Some(Ipv4Addr::new(192, 168, 1, 100)));

        // Embedded address outside the v4 network
        assert!(!m.matches(&"64:ff9b:1111::c0a8:264".parse().unwrap()).matched());
        // Wrong IPv6 prefix
        assert!(!m.matches(&"2001:db8::c0a8:164".parse().unwrap()).matched());
        // IPv4 destination never matches an embedded matcher
        assert!(!m.matches(&"192.168.1.100".parse().unwrap()).matched());
    }

    #[test]
    fn test_port_spec() {
        assert_eq!(PortSpec::parse("").unwrap(), PortSpec::Any);
        assert_eq!(PortSpec::parse("any").unwrap(), PortSpec::Any);
        assert_eq!(PortSpec::parse("8080").unwrap(), PortSpec::Single(8080));
        assert_eq!(
            PortSpec::parse("8000-8080").unwrap(),
            PortSpec::Range(8000, 8080)
        );
        assert!(PortSpec::parse("8080-8000").is_err());
        assert!(PortSpec::parse("http").is_err());
        assert!(PortSpec::parse("70000").is_err());

        let range = PortSpec::Range(8000, 8080);
        assert!(range.contains(8000));
        assert!(range.contains(8080));
        assert!(!range.contains(7999));
        assert!(!range.contains(8081));
    }

    #[test]
    fn test_port_mapping_uniform() {
        let pm = PortMapping::new(PortSpec::parse("8080").unwrap(), PortSpec::Single(80));
        assert_eq!(pm.map_port(8080), 80);
        assert_eq!(pm.map_port(8081), 8081);

        // Any input in a range maps to the same translated port
        let pm = PortMapping::new(PortSpec::Range(8000, 8080), PortSpec::Single(80));
        assert_eq!(pm.map_port(8000), 80);
        assert_eq!(pm.map_port(8080), 80);
        assert_eq!(pm.map_port(8500), 8500);

        // Empty original port always maps
        let pm = PortMapping::new(PortSpec::Any, PortSpec::Single(443));
        assert_eq!(pm.map_port(12345), 443);
    }

    #[test]
    fn test_virtual_range_matching() {
        let range = VirtualRange {
            virtual_network: "240.2.2.0/24".parse().unwrap(),
            real_network: "192.168.1.0/24".parse().unwrap(),
            ipv6_enabled: false,
            ipv6_prefix: None,
        };
        assert!(range.matches(&"240.2.2.77".parse().unwrap()).matched());
        assert!(!range.matches(&"240.2.3.77".parse().unwrap()).matched());
    }

    #[test]
    fn test_virtual_range_ipv6_disabled_never_matches_v6() {
        let range = VirtualRange {
            virtual_network: "64:ff9b:1111::/96".parse().unwrap(),
            real_network: "192.168.1.0/24".parse().unwrap(),
            ipv6_enabled: false,
            ipv6_prefix: Some("64:ff9b:1111::/96".parse().unwrap()),
        };
        // Inside the virtual network, but IPv6 handling is disabled
        assert!(!range.matches(&"64:ff9b:1111::c0a8:164".parse().unwrap()).matched());
    }

    #[test]
    fn test_virtual_range_embedded() {
        let range = VirtualRange {
            virtual_network: "64:ff9b:1111::/96".parse().unwrap(),
            real_network: "192.168.1.0/24".parse().unwrap(),
            ipv6_enabled: true,
            ipv6_prefix: Some("64:ff9b:1111::/96".parse().unwrap()),
        };
        let hit = range.matches(&"64:ff9b:1111::c0a8:164".parse().unwrap());
        assert_eq!(hit.embedded(), Some(Ipv4Addr::new(192, 168, 1, 100)));

        // Embedded address outside the real network falls back to plain
        // virtual-network containment, which still holds here.
        let hit = range.matches(&"64:ff9b:1111::a00:1".parse().unwrap());
        assert!(hit.matched());
        assert_eq!(hit.embedded(), None);
    }

    #[test]
    fn test_dynamic_rule_id() {
        let rule = NatRule {
            rule_id: format!("{DYNAMIC_RULE_PREFIX}240.2.2.0/24"),
            source_site: vec![],
            virtual_destination: DestMatcher::parse("240.2.2.77").unwrap(),
            real_destination: RealTarget::parse("192.168.1.0/24").unwrap(),
            protocols: vec![],
            port_mapping: None,
        };
        assert!(rule.is_dynamic());
    }
}
