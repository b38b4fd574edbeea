//! HA error types.
//!
//! Every public store or engine operation returns one variant of
//! [`HaError`].  I/O variants keep the underlying cause as their source so
//! it can be logged, while the variant itself tells the caller which retry
//! policy applies.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate.
pub type HaResult<T> = Result<T, HaError>;

/// Coordination errors surfaced to the caller.
#[derive(Debug, Error)]
pub enum HaError {
    /// A mandatory store read (listing, cluster object, config record) failed.
    #[error("store read failed: {context}")]
    StoreRead {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// A store write failed.
    #[error("store write failed: {context}")]
    StoreWrite {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// A conditional write was rejected because the stored version moved.
    #[error("version conflict on {object}: expected version {expected}")]
    VersionConflict { object: String, expected: String },

    /// The engine could not be queried.
    #[error("engine query failed: {query}")]
    EngineQuery {
        query: String,
        #[source]
        source: anyhow::Error,
    },

    /// An administrative statement failed.  Carries the literal statement.
    #[error("error executing {command}")]
    EngineCommand {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    /// No connection to the current leader could be resolved.
    #[error("no leader connection: {reason}")]
    NoLeader { reason: String },

    /// The member's address is not present in the engine membership list.
    #[error("address of member {member} not found in cluster membership")]
    AddressResolution { member: String },

    /// Remote execution against a member failed.
    #[error("exec on member {member} failed")]
    Exec {
        member: String,
        #[source]
        source: anyhow::Error,
    },

    /// The operation did not finish within its deadline.
    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },

    /// A bootstrap prerequisite does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HaError {
    pub fn store_read(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        HaError::StoreRead {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn store_write(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        HaError::StoreWrite {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn engine_query(query: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        HaError::EngineQuery {
            query: query.into(),
            source: source.into(),
        }
    }

    pub fn engine_command(command: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        HaError::EngineCommand {
            command: command.into(),
            source: source.into(),
        }
    }

    /// Short stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HaError::StoreRead { .. } => "store_read",
            HaError::StoreWrite { .. } => "store_write",
            HaError::VersionConflict { .. } => "version_conflict",
            HaError::EngineQuery { .. } => "engine_query",
            HaError::EngineCommand { .. } => "engine_command",
            HaError::NoLeader { .. } => "no_leader",
            HaError::AddressResolution { .. } => "address_resolution",
            HaError::Exec { .. } => "exec",
            HaError::Timeout { .. } => "timeout",
            HaError::NotFound { .. } => "not_found",
            HaError::Config(_) => "config",
        }
    }

    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HaError::StoreRead { .. }
                | HaError::StoreWrite { .. }
                | HaError::EngineQuery { .. }
                | HaError::NoLeader { .. }
                | HaError::Exec { .. }
                | HaError::Timeout { .. }
        )
    }
}

/// Run `fut` with a deadline.  An elapsed deadline drops the in-flight I/O
/// and yields [`HaError::Timeout`]; errors from `fut` pass through as-is.
pub async fn with_deadline<T, F>(operation: &'static str, limit: Duration, fut: F) -> HaResult<T>
where
    F: Future<Output = HaResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(HaError::Timeout { operation, limit }),
    }
}
