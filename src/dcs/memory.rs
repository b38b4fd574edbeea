//! In-memory store backend.
//!
//! Keeps every object in memory with no persistence.  Useful for testing
//! and single-process development.  Uses `RwLock<Inner>` for thread-safe
//! access and a monotonically increasing counter for version tokens, so
//! conditional writes behave like the real store.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use std::time::Duration;

use super::backend::{conflict, ExecOutput, ProcessRecord, StoreBackend, StoreObject};
use crate::errors::{HaError, HaResult};

#[derive(Debug, Default)]
struct Inner {
    cluster_objects: HashMap<String, StoreObject>,
    records: BTreeMap<String, StoreObject>,
    members: Vec<ProcessRecord>,
    exec_responses: HashMap<String, Result<ExecOutput, String>>,
    next_version: u64,
    fail_reads: bool,
    fail_writes: bool,
    latency: Option<Duration>,
}

impl Inner {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Create (or reset) an empty cluster object.
    pub fn put_cluster_object(&self, name: &str) {
        let mut inner = self.inner.write().expect("rwlock poisoned");
        let version = inner.bump();
        inner.cluster_objects.insert(
            name.to_string(),
            StoreObject {
                name: name.to_string(),
                version,
                annotations: BTreeMap::new(),
            },
        );
    }

    pub fn put_member(&self, record: ProcessRecord) {
        let mut inner = self.inner.write().expect("rwlock poisoned");
        inner.members.retain(|m| m.name != record.name);
        inner.members.push(record);
    }

    pub fn remove_member(&self, name: &str) {
        let mut inner = self.inner.write().expect("rwlock poisoned");
        inner.members.retain(|m| m.name != name);
    }

    /// Canned response for `exec` on `member`; `Err` simulates a failed stream.
    pub fn set_exec_response(&self, member: &str, response: Result<ExecOutput, String>) {
        let mut inner = self.inner.write().expect("rwlock poisoned");
        inner.exec_responses.insert(member.to_string(), response);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.inner.write().expect("rwlock poisoned").fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.write().expect("rwlock poisoned").fail_writes = fail;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner.write().expect("rwlock poisoned").latency = latency;
    }

    pub fn cluster_object(&self, name: &str) -> Option<StoreObject> {
        let inner = self.inner.read().expect("rwlock poisoned");
        inner.cluster_objects.get(name).cloned()
    }

    pub fn record(&self, name: &str) -> Option<StoreObject> {
        let inner = self.inner.read().expect("rwlock poisoned");
        inner.records.get(name).cloned()
    }

    async fn pause(&self) {
        let latency = self.inner.read().expect("rwlock poisoned").latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_read(inner: &Inner, what: &str) -> HaResult<()> {
        if inner.fail_reads {
            return Err(HaError::store_read(
                what.to_string(),
                anyhow::anyhow!("memory backend: reads disabled"),
            ));
        }
        Ok(())
    }

    fn check_write(inner: &Inner, what: &str) -> HaResult<()> {
        if inner.fail_writes {
            return Err(HaError::store_write(
                what.to_string(),
                anyhow::anyhow!("memory backend: writes disabled"),
            ));
        }
        Ok(())
    }
}

impl StoreBackend for MemoryBackend {
    fn get_cluster_object(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = HaResult<Option<StoreObject>>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            self.pause().await;
            let inner = self.inner.read().expect("rwlock poisoned");
            Self::check_read(&inner, "get cluster object")?;
            Ok(inner.cluster_objects.get(&name).cloned())
        })
    }

    fn patch_cluster_annotations(
        &self,
        name: &str,
        annotations: BTreeMap<String, String>,
        expected_version: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = HaResult<String>> + Send + '_>> {
        let name = name.to_string();
        let expected_version = expected_version.map(str::to_string);
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.inner.write().expect("rwlock poisoned");
            Self::check_write(&inner, "patch cluster object")?;
            let current = match inner.cluster_objects.get(&name) {
                Some(obj) => obj.version.clone(),
                None => {
                    return Err(HaError::NotFound {
                        kind: "cluster object",
                        name,
                    })
                }
            };
            if let Some(expected) = expected_version {
                if expected != current {
                    return Err(conflict(&name, &expected));
                }
            }
            let version = inner.bump();
            if let Some(obj) = inner.cluster_objects.get_mut(&name) {
                obj.annotations.extend(annotations);
                obj.version = version.clone();
            }
            Ok(version)
        })
    }

    fn list_records(
        &self,
    ) -> Pin<Box<dyn Future<Output = HaResult<Vec<StoreObject>>> + Send + '_>> {
        Box::pin(async move {
            self.pause().await;
            let inner = self.inner.read().expect("rwlock poisoned");
            Self::check_read(&inner, "list records")?;
            Ok(inner.records.values().cloned().collect())
        })
    }

    fn apply_record(
        &self,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = HaResult<String>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.inner.write().expect("rwlock poisoned");
            Self::check_write(&inner, "apply record")?;
            let version = inner.bump();
            let record = inner
                .records
                .entry(name.clone())
                .or_insert_with(|| StoreObject {
                    name,
                    version: String::new(),
                    annotations: BTreeMap::new(),
                });
            record.annotations.extend(annotations);
            record.version = version.clone();
            Ok(version)
        })
    }

    fn delete_record(
        &self,
        name: &str,
        expected_version: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = HaResult<()>> + Send + '_>> {
        let name = name.to_string();
        let expected_version = expected_version.map(str::to_string);
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.inner.write().expect("rwlock poisoned");
            Self::check_write(&inner, "delete record")?;
            let current = match inner.records.get(&name) {
                Some(record) => record.version.clone(),
                None => return Ok(()),
            };
            if let Some(expected) = expected_version {
                if expected != current {
                    return Err(conflict(&name, &expected));
                }
            }
            inner.records.remove(&name);
            Ok(())
        })
    }

    fn list_members(
        &self,
    ) -> Pin<Box<dyn Future<Output = HaResult<Vec<ProcessRecord>>> + Send + '_>> {
        Box::pin(async move {
            self.pause().await;
            let inner = self.inner.read().expect("rwlock poisoned");
            Self::check_read(&inner, "list members")?;
            Ok(inner.members.clone())
        })
    }

    fn exec(
        &self,
        member: &str,
        command: &str,
    ) -> Pin<Box<dyn Future<Output = HaResult<ExecOutput>> + Send + '_>> {
        let member = member.to_string();
        let command = command.to_string();
        Box::pin(async move {
            self.pause().await;
            let inner = self.inner.read().expect("rwlock poisoned");
            if !inner.members.iter().any(|m| m.name == member) {
                return Err(HaError::Exec {
                    source: anyhow::anyhow!("no such member"),
                    member,
                });
            }
            match inner.exec_responses.get(&member) {
                Some(Ok(output)) => Ok(output.clone()),
                Some(Err(reason)) => Err(HaError::Exec {
                    source: anyhow::anyhow!("{reason} (command: {command})"),
                    member,
                }),
                None => Ok(ExecOutput::default()),
            }
        })
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}
