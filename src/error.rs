//! Error types for nat-router
//!
//! Errors are categorized by subsystem: configuration errors surface once at
//! startup, address errors at rule build or transform time, and flow errors
//! per forwarded connection.

use std::io;

use thiserror::Error;

use crate::endpoint::Endpoint;

/// Top-level error type for nat-router
#[derive(Debug, Error)]
pub enum NatError {
    /// Configuration errors (parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Address parsing and translation errors
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// Per-flow processing errors
    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NatError {
    /// Check if this error is recoverable (the operation can be retried)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Address(_) => false,
            Self::Flow(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
///
/// Raised only while loading or validating configuration; they fail startup
/// and are never produced on the per-flow path.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Invalid address or CIDR in a rule or range
    #[error("Configuration address error: {0}")]
    Address(#[from] AddressError),

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are not recoverable without operator intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }
}

/// Address parsing and translation errors
#[derive(Debug, Error)]
pub enum AddressError {
    /// Invalid CIDR notation
    #[error("Invalid CIDR notation: {0}")]
    InvalidCidr(String),

    /// Invalid IP address literal
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid port or port range specification
    #[error("Invalid port specification: {0}")]
    InvalidPort(String),

    /// Address families cannot be combined for the requested mapping
    #[error("Address family mismatch: cannot map {addr} into {network}")]
    FamilyMismatch { addr: String, network: String },
}

impl AddressError {
    /// Create an invalid CIDR error
    pub fn invalid_cidr(s: impl Into<String>) -> Self {
        Self::InvalidCidr(s.into())
    }

    /// Create an invalid address error
    pub fn invalid_address(s: impl Into<String>) -> Self {
        Self::InvalidAddress(s.into())
    }

    /// Create an invalid port error
    pub fn invalid_port(s: impl Into<String>) -> Self {
        Self::InvalidPort(s.into())
    }
}

/// Per-flow processing errors
///
/// These return from `NatHandler::process` to the dispatcher; the flow they
/// belong to is torn down before they surface.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The ambient flow context carries no destination
    #[error("no destination specified for flow")]
    NoDestination,

    /// Destination is not an IP address
    #[error("destination '{0}' is not an IP address")]
    UnsupportedAddress(String),

    /// Rule or destination resolved to an unusable real address
    #[error("invalid real destination: {0}")]
    InvalidAddress(#[from] AddressError),

    /// All dial attempts exhausted
    #[error("failed to dial {dest} after {attempts} attempts: {reason}")]
    DialFailed {
        dest: Endpoint,
        attempts: u32,
        reason: String,
    },

    /// Session table cannot admit the flow even after eviction
    #[error("session table exhausted (capacity {capacity})")]
    SessionTableFull { capacity: u64 },

    /// I/O error during bidirectional streaming
    #[error("data transfer error: {0}")]
    Transfer(#[source] io::Error),

    /// The ambient flow context was cancelled
    #[error("flow cancelled")]
    Cancelled,
}

impl FlowError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NoDestination | Self::UnsupportedAddress(_) | Self::InvalidAddress(_) => false,
            Self::DialFailed { .. } | Self::SessionTableFull { .. } => true,
            Self::Transfer(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
            ),
            Self::Cancelled => false,
        }
    }

    /// Create a dial failure error
    pub fn dial_failed(dest: Endpoint, attempts: u32, reason: impl Into<String>) -> Self {
        Self::DialFailed {
            dest,
            attempts,
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with `NatError`
pub type Result<T> = std::result::Result<T, NatError>;
