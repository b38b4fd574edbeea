//! MySQL-protocol engine connections.
//!
//! Uses `sqlx` pools created lazily, so constructing a connection never
//! blocks and an unreachable engine surfaces as a query error.  Queries
//! and statements go through the text protocol: administrative `call`
//! statements cannot be prepared.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Executor, Row};
use tracing::debug;

use super::connection::{EngineConnection, EngineConnector, RowMap};
use crate::config::EngineConfig;
use crate::dcs::Member;

pub struct MySqlConnection {
    pool: MySqlPool,
}

impl MySqlConnection {
    pub fn lazy(options: MySqlConnectOptions, max_connections: u32, acquire_timeout: Duration) -> Self {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy_with(options);
        Self { pool }
    }

    /// Connection to the engine on this node.
    pub fn local(config: &EngineConfig) -> Self {
        let options = base_options(config).host(&config.host);
        Self::lazy(
            options,
            config.max_connections,
            Duration::from_secs(config.query_timeout_secs),
        )
    }
}

fn base_options(config: &EngineConfig) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .port(config.port)
        .username(&config.username);
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    if !config.database.is_empty() {
        options = options.database(&config.database);
    }
    options
}

/// Decode every column as text; numeric columns are rendered in decimal.
fn row_to_map(row: &MySqlRow) -> RowMap {
    let mut map = RowMap::new();
    for column in row.columns() {
        let i = column.ordinal();
        let value = row
            .try_get::<Option<String>, _>(i)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<i64>, _>(i)
                    .ok()
                    .flatten()
                    .map(|v| v.to_string())
            })
            .or_else(|| {
                row.try_get::<Option<u64>, _>(i)
                    .ok()
                    .flatten()
                    .map(|v| v.to_string())
            })
            .unwrap_or_default();
        map.insert(column.name(), value);
    }
    map
}

impl EngineConnection for MySqlConnection {
    fn query_rows(
        &self,
        sql: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<RowMap>>> + Send + '_>> {
        let sql = sql.to_string();
        Box::pin(async move {
            let rows = self.pool.fetch_all(sql.as_str()).await?;
            Ok(rows.iter().map(row_to_map).collect())
        })
    }

    fn execute(&self, sql: &str) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>> {
        let sql = sql.to_string();
        Box::pin(async move {
            let result = self.pool.execute(sql.as_str()).await?;
            Ok(result.rows_affected())
        })
    }
}

/// Opens pooled connections to peers by their store-reported address.
/// One pool per member: a member that comes back on a new address gets a
/// fresh pool and the old one is dropped.
pub struct MySqlConnector {
    config: EngineConfig,
    pools: Mutex<HashMap<String, PeerPool>>,
}

struct PeerPool {
    address: String,
    conn: Arc<MySqlConnection>,
}

impl MySqlConnector {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn open(&self, address: &str) -> Arc<MySqlConnection> {
        Arc::new(MySqlConnection::lazy(
            base_options(&self.config).host(address),
            self.config.max_connections,
            Duration::from_secs(self.config.query_timeout_secs),
        ))
    }
}

impl EngineConnector for MySqlConnector {
    fn connect(&self, member: &Member) -> anyhow::Result<Arc<dyn EngineConnection>> {
        if member.address.is_empty() {
            anyhow::bail!("member {} has no address", member.name);
        }
        let mut pools = self.pools.lock().expect("mutex poisoned");
        if let Some(peer) = pools.get(&member.name) {
            if peer.address == member.address {
                return Ok(peer.conn.clone());
            }
            debug!(
                "Member {} moved from {} to {}, replacing engine pool",
                member.name, peer.address, member.address
            );
        } else {
            debug!("Opening engine pool to {} ({})", member.name, member.address);
        }
        let conn = self.open(&member.address);
        pools.insert(
            member.name.clone(),
            PeerPool {
                address: member.address.clone(),
                conn: conn.clone(),
            },
        );
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, address: &str) -> Member {
        Member {
            address: address.to_string(),
            ..Member::new(name)
        }
    }

    fn same(a: &Arc<dyn EngineConnection>, b: &Arc<dyn EngineConnection>) -> bool {
        std::ptr::eq(
            Arc::as_ptr(a) as *const (),
            Arc::as_ptr(b) as *const (),
        )
    }

    #[tokio::test]
    async fn test_connect_reuses_pool_per_member() {
        let connector = MySqlConnector::new(EngineConfig::default());
        let a = connector.connect(&member("pod-1", "10.0.0.2")).unwrap();
        let b = connector.connect(&member("pod-1", "10.0.0.2")).unwrap();
        assert!(same(&a, &b));

        connector.connect(&member("pod-2", "10.0.0.3")).unwrap();
        assert_eq!(connector.pools.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_replaces_pool_when_address_changes() {
        let connector = MySqlConnector::new(EngineConfig::default());
        let old = connector.connect(&member("pod-1", "10.0.0.2")).unwrap();
        let new = connector.connect(&member("pod-1", "10.0.0.9")).unwrap();
        assert!(!same(&old, &new));

        let pools = connector.pools.lock().unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools["pod-1"].address, "10.0.0.9");
    }

    #[test]
    fn test_connect_requires_address() {
        let connector = MySqlConnector::new(EngineConfig::default());
        assert!(connector.connect(&Member::new("pod-1")).is_err());
    }
}
