//! Address classification and translation primitives
//!
//! This module provides the address-level building blocks for NAT matching:
//! CIDR parsing and containment, extraction of IPv4 addresses embedded in
//! IPv6 literals (RFC 6052), and host-bit grafting used when a destination
//! is mapped into a different network.
//!
//! # Embedded IPv4 forms
//!
//! Two textual forms are recognized by [`extract_embedded_v4`]:
//!
//! 1. Mixed notation: any hextet that literally contains a dot, e.g.
//!    `64:ff9b:1111::192.168.1.100`.
//! 2. Compressed hex notation: the last two hextets after the double colon
//!    encode the IPv4 as two 16-bit groups, e.g. `64:ff9b::c0a8:164` for
//!    `192.168.1.100`. The first group must be four hex digits; the second
//!    group may be one to four digits and is zero-extended to its natural
//!    16-bit width.
//!
//! The compressed-hex decoder is a heuristic: addresses that do not follow
//! the trailing two-hextet convention return `None` rather than a guess.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv6Net};

use crate::error::AddressError;

/// Address family classification for NAT matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrKind {
    /// Plain IPv4 address
    V4,
    /// IPv6 address with no recognizable embedded IPv4
    V6,
    /// IPv6 address carrying an embedded IPv4 in one of the supported forms
    V6EmbeddedV4,
}

/// Parse a CIDR network
///
/// # Errors
///
/// Returns `AddressError::InvalidCidr` on syntactic error.
pub fn parse_cidr(s: &str) -> Result<IpNet, AddressError> {
    s.trim()
        .parse::<IpNet>()
        .map_err(|_| AddressError::invalid_cidr(s))
}

/// Check whether `ip` lies inside `network`
///
/// Uses bitwise prefix comparison; mixed address families never match.
#[must_use]
pub fn contains_ip(network: &IpNet, ip: &IpAddr) -> bool {
    match (network, ip) {
        (IpNet::V4(net), IpAddr::V4(v4)) => net.contains(v4),
        (IpNet::V6(net), IpAddr::V6(v6)) => net.contains(v6),
        _ => false,
    }
}

/// Classify an address for NAT matching
#[must_use]
pub fn classify(addr: &IpAddr) -> AddrKind {
    match addr {
        IpAddr::V4(_) => AddrKind::V4,
        IpAddr::V6(v6) => {
            if extract_embedded_v4(&v6.to_string()).is_some() {
                AddrKind::V6EmbeddedV4
            } else {
                AddrKind::V6
            }
        }
    }
}

/// Extract an embedded IPv4 address from an IPv6 literal
///
/// Recognizes the mixed and compressed-hex forms described in the module
/// docs. Returns `None` for inputs outside those forms.
#[must_use]
pub fn extract_embedded_v4(addr: &str) -> Option<Ipv4Addr> {
    let s = addr.trim().trim_start_matches('[').trim_end_matches(']');

    // Mixed notation: the dotted hextet is the embedded IPv4.
    if s.contains(':') && s.contains('.') {
        return s
            .split(':')
            .find(|part| part.contains('.'))
            .and_then(|part| part.parse().ok());
    }

    // Compressed hex notation: decode the two groups after the final "::".
    let (_, tail) = s.rsplit_once("::")?;
    decode_trailing_hextets(tail)
}

/// Decode the trailing hextet groups of a compressed IPv6 literal
fn decode_trailing_hextets(tail: &str) -> Option<Ipv4Addr> {
    let groups: Vec<&str> = tail.split(':').collect();

    let is_hex = |g: &str| !g.is_empty() && g.bytes().all(|b| b.is_ascii_hexdigit());

    match groups.len() {
        2 => {
            let (hi, lo) = (groups[0], groups[1]);
            // The leading group carries the first two octets and must be a
            // full hextet; the trailing group is zero-extended to 16 bits.
            if hi.len() != 4 || lo.len() > 4 || !is_hex(hi) || !is_hex(lo) {
                return None;
            }
            let hi = u16::from_str_radix(hi, 16).ok()?;
            let lo = u16::from_str_radix(lo, 16).ok()?;
            let [a, b] = hi.to_be_bytes();
            let [c, d] = lo.to_be_bytes();
            Some(Ipv4Addr::new(a, b, c, d))
        }
        n if n >= 4 => {
            // One octet per hextet, e.g. ::c0:a8:1:64 for 192.168.1.100.
            let mut octets = [0u8; 4];
            for (octet, group) in octets.iter_mut().zip(groups[..4].iter().copied()) {
                if !is_hex(group) {
                    return None;
                }
                *octet = u8::from_str_radix(group, 16).ok()?;
            }
            Some(octets.into())
        }
        _ => None,
    }
}

/// Extract the IPv4 address embedded in the low 32 bits of `addr`, provided
/// `addr` lies inside `prefix`
///
/// This is the exact (non-heuristic) counterpart of [`extract_embedded_v4`]
/// used when the enclosing prefix is known from configuration. The prefix
/// length must be at most 96 bits so the embedded address is not truncated.
#[must_use]
pub fn embedded_v4_in_prefix(addr: &Ipv6Addr, prefix: &Ipv6Net) -> Option<Ipv4Addr> {
    if prefix.prefix_len() > 96 || !prefix.contains(addr) {
        return None;
    }
    let low = u128::from(*addr) as u32;
    Some(Ipv4Addr::from(low))
}

/// Embed an IPv4 address into the low 32 bits of `prefix`
#[must_use]
pub fn embed_v4(v4: Ipv4Addr, prefix: &Ipv6Net) -> Ipv6Addr {
    let upper = u128::from(prefix.network()) & !u128::from(u32::MAX);
    Ipv6Addr::from(upper | u128::from(u32::from(v4)))
}

/// Graft the host bits of `ip` onto `network`
///
/// Used when a destination maps into a real network of the same size: the
/// network bits come from `network`, the host bits from `ip`.
///
/// # Errors
///
/// Returns `AddressError::FamilyMismatch` when `ip` and `network` belong to
/// different address families.
pub fn rebase_ip(ip: IpAddr, network: &IpNet) -> Result<IpAddr, AddressError> {
    match (ip, network) {
        (IpAddr::V4(v4), IpNet::V4(net)) => {
            let host = u32::from(v4) & !u32::from(net.netmask());
            Ok(IpAddr::V4(Ipv4Addr::from(u32::from(net.network()) | host)))
        }
        (IpAddr::V6(v6), IpNet::V6(net)) => {
            let host = u128::from(v6) & !u128::from(net.netmask());
            Ok(IpAddr::V6(Ipv6Addr::from(u128::from(net.network()) | host)))
        }
        _ => Err(AddressError::FamilyMismatch {
            addr: ip.to_string(),
            network: network.to_string(),
        }),
    }
}
