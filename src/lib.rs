//! HA sidecar library: coordination core for a database HA agent.
//!
//! This crate provides the pieces an HA loop is built from: a
//! Kubernetes-backed configuration store holding the leader lease, the
//! failover intent and the member roster, and engine managers that
//! inspect and steer a database's own replication or consensus layer.

use std::collections::BTreeMap;
use std::sync::Arc;

pub mod config;
pub mod dcs;
pub mod engine;
pub mod errors;
pub mod metrics;

use crate::config::Config;
use crate::dcs::backend::{ProcessRecord, StoreBackend};
use crate::dcs::kubernetes::KubernetesBackend;
use crate::dcs::memory::MemoryBackend;
use crate::dcs::{ConfigurationStore, StoreSettings};
use crate::engine::{ConsensusManager, EngineManager, MySqlConnection, MySqlConnector};

/// Shared state for one sidecar process.
pub struct HaContext {
    /// Validated configuration.
    pub config: Config,
    /// Configuration store client and cached snapshot.
    pub store: Arc<ConfigurationStore>,
    /// Manager for the local engine.
    pub engine: Arc<dyn EngineManager>,
}

impl HaContext {
    /// Wire up the configured store backend and engine manager.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let backend: Arc<dyn StoreBackend> = match config.dcs.backend.as_str() {
            "memory" => Arc::new(standalone_backend(&config)),
            _ => Arc::new(KubernetesBackend::new(&config).await?),
        };
        let store = Arc::new(ConfigurationStore::new(
            backend,
            StoreSettings::from_config(&config),
        ));
        let engine = Self::engine_manager(&config);
        Ok(Self {
            config,
            store,
            engine,
        })
    }

    fn engine_manager(config: &Config) -> Arc<dyn EngineManager> {
        let local = Arc::new(MySqlConnection::local(&config.engine));
        let connector = Arc::new(MySqlConnector::new(config.engine.clone()));
        Arc::new(ConsensusManager::new(
            config.node.member_name.clone(),
            local,
            connector,
            std::time::Duration::from_secs(config.engine.query_timeout_secs),
        ))
    }
}

/// Single-node in-process store: the cluster object exists and the roster
/// holds only this member.
fn standalone_backend(config: &Config) -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.put_cluster_object(&config.node.cluster_name);
    backend.put_member(ProcessRecord {
        name: config.node.member_name.clone(),
        address: config.engine.host.clone(),
        role: String::new(),
        labels: BTreeMap::new(),
    });
    backend
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.node.member_name = "pod-0".to_string();
        config.node.cluster_name = "mycluster".to_string();
        config.dcs.backend = "memory".to_string();
        config
    }

    #[tokio::test]
    async fn test_memory_context_bootstraps() {
        let ctx = HaContext::from_config(memory_config()).await.unwrap();
        assert_eq!(ctx.engine.member_name(), "pod-0");

        ctx.store.init("sys-1", None).await.unwrap();
        let cluster = ctx.store.refresh().await.unwrap();
        assert_eq!(cluster.sys_id, "sys-1");
        assert_eq!(cluster.member_names(), vec!["pod-0"]);
        assert_eq!(cluster.leader.as_ref().unwrap().name(), "pod-0");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = memory_config();
        config.node.member_name.clear();
        assert!(HaContext::from_config(config).await.is_err());
    }
}
