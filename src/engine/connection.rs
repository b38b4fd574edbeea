//! Engine connection contract.
//!
//! The HA manager only needs three things from a database driver: run a
//! query and get rows back as strings, run a statement, and open a
//! connection to a peer.  Driver errors are returned as `anyhow::Error`;
//! the manager attaches the query or statement text when it turns them
//! into [`crate::errors::HaError`]s.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::dcs::Member;

/// One result row, column names normalized to upper case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowMap {
    values: BTreeMap<String, String>,
}

impl RowMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut row = Self::new();
        for (k, v) in pairs {
            row.insert(k.as_ref(), v);
        }
        row
    }

    pub fn insert(&mut self, column: &str, value: impl Into<String>) {
        self.values.insert(column.to_ascii_uppercase(), value.into());
    }

    /// Value of `column`, or `""` when absent or NULL.
    pub fn get_string(&self, column: &str) -> &str {
        self.values
            .get(&column.to_ascii_uppercase())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Async engine connection.
pub trait EngineConnection: Send + Sync + 'static {
    /// Run a query and return every row.
    fn query_rows(
        &self,
        sql: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<RowMap>>> + Send + '_>>;

    /// Run a statement, returning the number of affected rows.
    fn execute(&self, sql: &str) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>>;
}

/// Opens connections to peer engines.
pub trait EngineConnector: Send + Sync + 'static {
    /// Connection to `member`'s engine.  Connecting is lazy: failures to
    /// reach the peer show up on first use.
    fn connect(&self, member: &Member) -> anyhow::Result<Arc<dyn EngineConnection>>;
}
