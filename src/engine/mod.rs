//! Engine-specific HA management.
//!
//! [`manager::EngineManager`] is the contract the HA loop drives;
//! [`consensus::ConsensusManager`] implements it for engines that run
//! their own leader election.  Engine access goes through the
//! [`connection`] traits so managers can be tested without a database.

pub mod connection;
pub mod consensus;
pub mod manager;
pub mod membership;
pub mod mysql;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{EngineConnection, EngineConnector, RowMap};
pub use consensus::ConsensusManager;
pub use manager::{EngineCapabilities, EngineManager, Role};
pub use mysql::{MySqlConnection, MySqlConnector};
