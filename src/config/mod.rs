//! Configuration types and loading
//!
//! The JSON surface consumed from the platform's config loader, its
//! validation, and compilation into the typed runtime form.

pub mod loader;
pub mod types;

pub use loader::{load_config, load_config_str};
pub use types::{
    NatOutboundConfig, NatRuleConfig, NatRuntime, PortMappingConfig, ResourceLimitsConfig,
    SessionTimeoutConfig, VirtualRangeConfig,
};
