//! Connection lifecycle management
//!
//! Provides [`ConnectionManager`], which keeps at most one primary connection
//! per agent, publishes statuses, reconnects with backoff and sweeps for
//! silent peers.
//!
//! # Module Structure
//!
//! - `connection_manager` - Public handle
//! - `connection` - Registry records and snapshots
//! - `commands` - Command protocol for the event loop
//! - `background` - The event loop itself

mod background;
mod commands;
mod connection;
mod connection_manager;

pub use connection::{ConnectionInfo, ConnectionSnapshot};
pub use connection_manager::ConnectionManager;
