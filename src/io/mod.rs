//! I/O utilities for nat-router
//!
//! Bidirectional copy between a flow's upstream halves and the dialed
//! remote connection.

pub mod copy;

pub use copy::{pipe_bidirectional, PipeResult};

/// Buffer size for each copy direction
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
