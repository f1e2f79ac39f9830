//! Destination NAT transformation
//!
//! Rewrites a matched virtual destination to its real endpoint. The return
//! path needs no rewriting here: the dialed socket's own source address
//! provides the reverse mapping, and the session record keeps the virtual
//! view for anything that reports the apparent endpoint. This handler is a
//! byte pipe after the rewrite; it never rewrites addresses inside the
//! stream.

use std::net::IpAddr;

use tracing::trace;

use crate::addr;
use crate::endpoint::{Address, Endpoint};
use crate::error::FlowError;
use crate::rules::{RealTarget, ResolvedRule};

/// Apply destination NAT to a flow destination
///
/// The real address is chosen in order of precedence:
/// 1. the IPv4 embedded in an IPv6 destination,
/// 2. the rule's real destination (a literal, or a network that the
///    destination's host bits are grafted onto),
/// 3. the destination address unchanged.
///
/// Port remapping applies afterwards; the transport network is preserved.
///
/// # Errors
///
/// Returns `FlowError::InvalidAddress` when the rule's real network cannot
/// accept the destination (address family mismatch).
pub fn dnat(dest: &Endpoint, resolved: &ResolvedRule) -> Result<Endpoint, FlowError> {
    let ip = match dest.ip() {
        Some(ip) => ip,
        None => return Err(FlowError::UnsupportedAddress(dest.address.to_string())),
    };

    let real_ip: IpAddr = if let Some(v4) = resolved.embedded_v4 {
        IpAddr::V4(v4)
    } else if let Some(v4) = embedded_of(&ip) {
        IpAddr::V4(v4)
    } else {
        match resolved.rule.real_destination {
            RealTarget::Ip(real) => real,
            RealTarget::Cidr(net) => addr::rebase_ip(ip, &net)?,
            RealTarget::Unspecified => ip,
        }
    };

    let port = resolved
        .rule
        .port_mapping
        .as_ref()
        .map_or(dest.port, |pm| pm.map_port(dest.port));

    let real = Endpoint::new(Address::Ip(real_ip), port, dest.network);
    trace!(%dest, %real, rule_id = %resolved.rule.rule_id, "DNAT applied");
    Ok(real)
}

/// Embedded IPv4 of an IPv6 destination, if its textual form carries one
fn embedded_of(ip: &IpAddr) -> Option<std::net::Ipv4Addr> {
    match ip {
        IpAddr::V6(v6) => addr::extract_embedded_v4(&v6.to_string()),
        IpAddr::V4(_) => None,
    }
}
