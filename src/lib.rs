//! nat-router: bidirectional NAT outbound handler
//!
//! Lets two sites with overlapping private address spaces communicate over
//! a shared tunnel by interposing a neutral virtual address range. Traffic
//! addressed to a virtual IP is rewritten to the corresponding real address
//! before dialing (DNAT); return traffic rides the dialed socket back, so
//! the remote peer observes the gateway's own source address (SNAT).
//!
//! # Architecture
//!
//! ```text
//! dispatcher → NatHandler::process(flow)
//!                 ├─ RuleEngine: rules first, then virtual ranges
//!                 ├─ DNAT: virtual destination → real endpoint
//!                 ├─ SessionTable: create / touch / LRU-evict / sweep
//!                 └─ relay: upstream ⇄ dialed connection
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use nat_router::config::load_config;
//! use nat_router::endpoint::Endpoint;
//! use nat_router::flow::Flow;
//! use nat_router::outbound::{DirectDialer, NatHandler};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/nat-router/nat.json")?;
//! let handler = NatHandler::new(&config)?;
//! let dialer = DirectDialer::new();
//!
//! # let (upstream, _peer) = tokio::io::duplex(64);
//! # let (reader, writer) = tokio::io::split(upstream);
//! let dest = Endpoint::tcp("240.2.2.20".parse()?, 80);
//! let flow = Flow::new(Some(dest), reader, writer);
//! handler.process(flow, &dialer).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`addr`]: CIDR and embedded-IPv4 address primitives
//! - [`config`]: configuration surface and loading
//! - [`endpoint`]: flow endpoint types
//! - [`error`]: error hierarchy
//! - [`flow`]: per-flow context
//! - [`io`]: bidirectional copy
//! - [`outbound`]: dialer abstraction and the NAT handler
//! - [`rules`]: rule types and the matching engine
//! - [`session`]: session table with LRU eviction and TTL sweep
//! - [`stats`]: observability counters
//! - [`transform`]: destination NAT rewriting

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod addr;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod flow;
pub mod io;
pub mod outbound;
pub mod rules;
pub mod session;
pub mod stats;
pub mod transform;

// Re-export commonly used types at the crate root
pub use config::{load_config, load_config_str, NatOutboundConfig};
pub use endpoint::{Address, Endpoint, Network};
pub use error::{AddressError, ConfigError, FlowError, NatError, Result};
pub use flow::Flow;
pub use outbound::{BoxedStream, Dialer, DirectDialer, NatHandler, ProxyStream};
pub use rules::{NatRule, ResolvedRule, RuleEngine, VirtualRange};
pub use session::{Direction, NatSession, SessionLimits, SessionTable, SessionTimeouts};
pub use stats::{NatStats, NatStatsSnapshot};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
