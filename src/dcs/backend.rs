//! Raw store backend trait.
//!
//! A backend only knows how to read and write annotated objects; decoding
//! them into a [`super::types::Cluster`] is the job of
//! [`super::store::ConfigurationStore`].  Backends map their native
//! failures onto [`HaError`]: missing objects become `NotFound`, rejected
//! conditional writes become `VersionConflict`.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::errors::{HaError, HaResult};

/// An annotated object: the cluster object or an auxiliary record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreObject {
    pub name: String,
    /// Opaque CAS token.
    pub version: String,
    pub annotations: BTreeMap<String, String>,
}

/// A member-carrying process record (a pod in Kubernetes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub name: String,
    pub address: String,
    pub role: String,
    pub labels: BTreeMap<String, String>,
}

/// Captured output of a completed remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Async store backend contract.
pub trait StoreBackend: Send + Sync + 'static {
    /// Fetch the cluster object; `Ok(None)` if it does not exist.
    fn get_cluster_object(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = HaResult<Option<StoreObject>>> + Send + '_>>;

    /// Merge `annotations` into the cluster object and return the new
    /// version.  With `expected_version` set the write only succeeds if the
    /// stored version still matches.
    fn patch_cluster_annotations(
        &self,
        name: &str,
        annotations: BTreeMap<String, String>,
        expected_version: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = HaResult<String>> + Send + '_>>;

    /// List auxiliary records.
    fn list_records(&self) -> Pin<Box<dyn Future<Output = HaResult<Vec<StoreObject>>> + Send + '_>>;

    /// Create or update an auxiliary record, returning its new version.
    fn apply_record(
        &self,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = HaResult<String>> + Send + '_>>;

    /// Delete an auxiliary record.  Deleting an absent record succeeds.
    fn delete_record(
        &self,
        name: &str,
        expected_version: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = HaResult<()>> + Send + '_>>;

    /// List member process records.
    fn list_members(
        &self,
    ) -> Pin<Box<dyn Future<Output = HaResult<Vec<ProcessRecord>>> + Send + '_>>;

    /// Run `command` on `member` and wait for it to complete.
    fn exec(
        &self,
        member: &str,
        command: &str,
    ) -> Pin<Box<dyn Future<Output = HaResult<ExecOutput>> + Send + '_>>;
}

/// Build a `VersionConflict` error.
pub(crate) fn conflict(object: &str, expected: &str) -> HaError {
    HaError::VersionConflict {
        object: object.to_string(),
        expected: expected.to_string(),
    }
}
