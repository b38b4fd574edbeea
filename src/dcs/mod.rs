//! Distributed configuration store.
//!
//! The store keeps the leader lease, the HA config record, the failover
//! intent and the member roster.  [`backend::StoreBackend`] abstracts the
//! raw object access; [`store::ConfigurationStore`] decodes it into a
//! [`types::Cluster`] snapshot and owns the conditional write path.

pub mod backend;
pub mod kubernetes;
pub mod lease;
pub mod memory;
pub mod store;
pub mod types;

pub use lease::LeaderRecord;
pub use store::{ConfigurationStore, StoreSettings};
pub use types::{Cluster, ClusterConfig, Failover, Leader, Member};
