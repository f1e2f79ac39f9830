//! NAT session management
//!
//! Session records, the concurrent session table, and its timeout and
//! resource-limit configuration.

pub mod table;

pub use table::{Direction, NatSession, SessionLimits, SessionTable, SessionTimeouts};
