//! NAT rule matching
//!
//! Runtime rule types and the resolution engine. Rules and ranges are built
//! from configuration at startup and immutable afterwards; see
//! [`crate::config`] for the JSON surface they are parsed from.

pub mod engine;
pub mod types;

pub use engine::{ResolvedRule, RuleEngine};
pub use types::{
    DestMatcher, NatRule, PortMapping, PortSpec, RealTarget, V4Target, VirtualRange,
    DYNAMIC_RULE_PREFIX,
};
