//! Flow endpoint types
//!
//! An [`Endpoint`] is the immutable `(address, port, network)` triple that
//! identifies one side of a forwarded flow. Targets handed in by the
//! dispatcher may be IP literals or domain names; the NAT path only accepts
//! IPs, while the pass-through dialer can resolve domains.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Transport network of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    /// TCP byte stream
    #[serde(rename = "tcp")]
    Tcp,
    /// UDP datagram flow (carried as a byte pipe after demultiplexing)
    #[serde(rename = "udp")]
    Udp,
}

impl Network {
    /// Lowercase protocol name, as used in rule protocol lists
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination address: an IP literal or a domain name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// IPv4 or IPv6 address
    Ip(IpAddr),
    /// Domain name, resolved by the dialer
    Domain(String),
}

impl Address {
    /// The IP address, if this is an IP target
    #[must_use]
    pub const fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::Ip(ip) => Some(*ip),
            Self::Domain(_) => None,
        }
    }

    /// Whether this is an IP target
    #[must_use]
    pub const fn is_ip(&self) -> bool {
        matches!(self, Self::Ip(_))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "{ip}"),
            Self::Domain(d) => f.write_str(d),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Self::Ip(ip)
    }
}

impl std::str::FromStr for Address {
    type Err = std::convert::Infallible;

    /// Parses an IP literal, falling back to a domain name
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(s.parse::<IpAddr>().map_or_else(|_| Self::Domain(s.to_string()), Self::Ip))
    }
}

/// One side of a flow: address, port, and transport network
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Destination address
    pub address: Address,
    /// Destination port
    pub port: u16,
    /// Transport network
    pub network: Network,
}

impl Endpoint {
    /// Create a new endpoint
    #[must_use]
    pub const fn new(address: Address, port: u16, network: Network) -> Self {
        Self {
            address,
            port,
            network,
        }
    }

    /// Create a TCP endpoint for an IP address
    #[must_use]
    pub const fn tcp(ip: IpAddr, port: u16) -> Self {
        Self::new(Address::Ip(ip), port, Network::Tcp)
    }

    /// Create a UDP endpoint for an IP address
    #[must_use]
    pub const fn udp(ip: IpAddr, port: u16) -> Self {
        Self::new(Address::Ip(ip), port, Network::Udp)
    }

    /// The IP address, if this endpoint targets an IP
    #[must_use]
    pub const fn ip(&self) -> Option<IpAddr> {
        self.address.ip()
    }

    /// Replace the address, keeping port and network
    #[must_use]
    pub fn with_address(&self, address: Address) -> Self {
        Self {
            address,
            port: self.port,
            network: self.network,
        }
    }

    /// Replace the port, keeping address and network
    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            address: self.address.clone(),
            port,
            network: self.network,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Address::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]:{}", self.port),
            addr => write!(f, "{addr}:{}", self.port),
        }
    }
}
