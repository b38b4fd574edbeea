//! Distributed configuration store.
//!
//! [`ConfigurationStore`] turns raw backend objects into a typed
//! [`Cluster`] snapshot and owns every write of coordination state.  The
//! last snapshot is cached; accessors never trigger I/O, so a caller sees
//! exactly as much staleness as its refresh cadence allows.
//!
//! Leadership writes are conditioned on the version token of the snapshot
//! the decision was made from.  The only unconditional write is the
//! one-time lease bootstrap in [`ConfigurationStore::init`].

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use super::backend::{ExecOutput, ProcessRecord, StoreBackend, StoreObject};
use super::lease::LeaderRecord;
use super::types::{
    Cluster, ClusterConfig, Failover, Leader, Member, CONFIG_SUFFIX, EXTRA_SUFFIX,
    FAILOVER_SUFFIX, SYS_ID,
};
use crate::config::Config;
use crate::errors::{with_deadline, HaError, HaResult};
use crate::metrics::{DCS_REFRESH_DURATION_SECONDS, DCS_REFRESH_TOTAL, LEASE_WRITES_TOTAL};

/// Static settings of a store instance.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub cluster_name: String,
    pub component_name: String,
    pub member_name: String,
    pub ttl: i64,
    pub max_lag_on_failover: i64,
    pub request_timeout: Duration,
}

impl StoreSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cluster_name: config.node.cluster_name.clone(),
            component_name: config.component_name().to_string(),
            member_name: config.node.member_name.clone(),
            ttl: config.dcs.ttl,
            max_lag_on_failover: config.dcs.max_lag_on_failover,
            request_timeout: Duration::from_secs(config.dcs.request_timeout_secs),
        }
    }

    fn config_record(&self) -> String {
        format!("{}{}", self.component_name, CONFIG_SUFFIX)
    }

    fn failover_record(&self) -> String {
        format!("{}{}", self.component_name, FAILOVER_SUFFIX)
    }

    fn extra_record(&self) -> String {
        format!("{}{}", self.component_name, EXTRA_SUFFIX)
    }
}

/// Unix seconds on the local wall clock.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct ConfigurationStore {
    backend: Arc<dyn StoreBackend>,
    settings: StoreSettings,
    cluster: RwLock<Arc<Cluster>>,
}

impl ConfigurationStore {
    pub fn new(backend: Arc<dyn StoreBackend>, settings: StoreSettings) -> Self {
        Self {
            backend,
            settings,
            cluster: RwLock::new(Arc::new(Cluster::default())),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Last refreshed snapshot.  No I/O.
    pub fn cluster(&self) -> Arc<Cluster> {
        self.cluster.read().expect("rwlock poisoned").clone()
    }

    pub fn cluster_name(&self) -> &str {
        &self.settings.cluster_name
    }

    /// One-time bootstrap: claim the lease for this member and persist the
    /// HA config record (plus the extras record when `extra` is given).
    ///
    /// Steps are not transactional.  Each one is a create-or-update, so a
    /// failed bootstrap converges when simply run again.
    pub async fn init(&self, sys_id: &str, extra: Option<BTreeMap<String, String>>) -> HaResult<()> {
        with_deadline("dcs init", self.settings.request_timeout * 3, async {
            let name = &self.settings.cluster_name;
            if self.backend.get_cluster_object(name).await?.is_none() {
                return Err(HaError::NotFound {
                    kind: "cluster object",
                    name: name.clone(),
                });
            }

            let now = unix_now();
            let record = LeaderRecord::acquired(&self.settings.member_name, now, self.settings.ttl);
            self.backend
                .patch_cluster_annotations(name, record.to_annotations(), None)
                .await
                .map_err(as_write_error)?;
            info!(
                "Initialized leader lease: leader={} ttl={}",
                record.leader, record.ttl
            );

            let config = ClusterConfig {
                ttl: self.settings.ttl,
                max_lag_on_failover: self.settings.max_lag_on_failover,
            };
            self.backend
                .apply_record(&self.settings.config_record(), config.to_annotations(sys_id))
                .await
                .map_err(as_write_error)?;

            if let Some(extra) = extra {
                self.backend
                    .apply_record(&self.settings.extra_record(), extra)
                    .await
                    .map_err(as_write_error)?;
            }
            Ok(())
        })
        .await
    }

    /// Read the store and replace the cached snapshot.
    pub async fn refresh(&self) -> HaResult<Arc<Cluster>> {
        let start = Instant::now();
        let result = with_deadline("dcs refresh", self.settings.request_timeout, self.load()).await;
        histogram!(DCS_REFRESH_DURATION_SECONDS).record(start.elapsed().as_secs_f64());

        match result {
            Ok(cluster) => {
                counter!(DCS_REFRESH_TOTAL, "status" => "ok").increment(1);
                let cluster = Arc::new(cluster);
                *self.cluster.write().expect("rwlock poisoned") = cluster.clone();
                Ok(cluster)
            }
            Err(e) => {
                counter!(DCS_REFRESH_TOTAL, "status" => e.kind()).increment(1);
                Err(e)
            }
        }
    }

    async fn load(&self) -> HaResult<Cluster> {
        let members = self.backend.list_members().await?;
        let records = self.backend.list_records().await?;
        let cluster_obj = self
            .backend
            .get_cluster_object(&self.settings.cluster_name)
            .await?
            .ok_or_else(|| {
                HaError::store_read(
                    "get cluster object",
                    anyhow::anyhow!("cluster object {} not found", self.settings.cluster_name),
                )
            })?;
        self.assemble(members, records, cluster_obj, unix_now())
    }

    fn assemble(
        &self,
        members: Vec<ProcessRecord>,
        records: Vec<StoreObject>,
        cluster_obj: StoreObject,
        now: i64,
    ) -> HaResult<Cluster> {
        let find = |name: String| records.iter().find(|r| r.name == name);

        let (sys_id, config) = match find(self.settings.config_record()) {
            Some(record) => (
                record.annotations.get(SYS_ID).cloned().unwrap_or_default(),
                ClusterConfig::from_annotations(&record.annotations)?,
            ),
            None => (String::new(), ClusterConfig::default()),
        };

        let members: Vec<Member> = members
            .into_iter()
            .map(|p| Member {
                name: p.name,
                role: p.role,
                address: p.address,
                metadata: p.labels,
            })
            .collect();

        let leader = LeaderRecord::from_annotations(&cluster_obj.annotations)?.map(|record| {
            let member = members
                .iter()
                .find(|m| m.name == record.leader)
                .cloned()
                .unwrap_or_else(|| Member::new(record.leader.clone()));
            Leader {
                version: cluster_obj.version.clone(),
                member,
                record,
                observed_at: now,
            }
        });

        let failover = find(self.settings.failover_record()).and_then(|record| {
            let failover = Failover::from_annotations(&record.version, &record.annotations);
            if failover.is_none() {
                warn!("Ignoring failover record {} with malformed schedule", record.name);
            }
            failover
        });

        let extra = find(self.settings.extra_record())
            .map(|r| r.annotations.clone())
            .unwrap_or_default();

        debug!(
            "Refreshed cluster: members={} leader={:?} failover={}",
            members.len(),
            leader.as_ref().map(|l| l.name().to_string()),
            failover.is_some()
        );

        Ok(Cluster {
            sys_id,
            version: cluster_obj.version.clone(),
            config,
            leader,
            members,
            failover,
            extra,
        })
    }

    /// Acquire or renew the lease for this member.
    ///
    /// Decides from the cached snapshot and writes conditioned on its
    /// version.  Returns `Ok(false)` when another member holds a live lease
    /// or a concurrent writer won the race.  A cluster object without any
    /// lease is acquired against the object's own version.
    pub async fn update_lease(&self) -> HaResult<bool> {
        let cluster = self.cluster();
        let me = self.settings.member_name.as_str();
        let now = unix_now();

        let (record, version) = match cluster.leader.as_ref() {
            Some(leader) if leader.record.leader == me => {
                (leader.record.renewed(now, self.settings.ttl), &leader.version)
            }
            Some(leader) if !leader.record.is_expired(now) => {
                debug!(
                    "Lease held by {} for another {}s",
                    leader.record.leader,
                    leader.record.remaining(now)
                );
                return Ok(false);
            }
            Some(leader) => {
                info!(
                    "Lease of {} expired, attempting acquisition",
                    leader.record.leader
                );
                (LeaderRecord::acquired(me, now, self.settings.ttl), &leader.version)
            }
            None if cluster.version.is_empty() => {
                return Err(HaError::NoLeader {
                    reason: "no cluster object version in snapshot; refresh first".to_string(),
                })
            }
            None => {
                info!("No lease recorded, attempting acquisition");
                (LeaderRecord::acquired(me, now, self.settings.ttl), &cluster.version)
            }
        };

        self.write_lease(record, version).await
    }

    /// Give up the lease if this member holds it.
    pub async fn release_lease(&self) -> HaResult<bool> {
        let cluster = self.cluster();
        let leader = match cluster.leader.as_ref() {
            Some(leader) if leader.record.leader == self.settings.member_name => leader,
            _ => return Ok(false),
        };
        let record = LeaderRecord {
            leader: leader.record.leader.clone(),
            acquire_time: leader.record.acquire_time,
            renew_time: 0,
            ttl: 0,
        };
        self.write_lease(record, &leader.version).await
    }

    async fn write_lease(&self, record: LeaderRecord, version: &str) -> HaResult<bool> {
        let result = with_deadline(
            "lease write",
            self.settings.request_timeout,
            self.backend.patch_cluster_annotations(
                &self.settings.cluster_name,
                record.to_annotations(),
                Some(version),
            ),
        )
        .await;

        match result {
            Ok(new_version) => {
                counter!(LEASE_WRITES_TOTAL, "status" => "ok").increment(1);
                debug!(
                    "Lease written: leader={} renew_time={} version={}",
                    record.leader, record.renew_time, new_version
                );
                Ok(true)
            }
            Err(HaError::VersionConflict { .. }) => {
                counter!(LEASE_WRITES_TOTAL, "status" => "conflict").increment(1);
                warn!("Lease write lost the race at version {}", version);
                Ok(false)
            }
            Err(e) => {
                counter!(LEASE_WRITES_TOTAL, "status" => e.kind()).increment(1);
                Err(as_write_error(e))
            }
        }
    }

    /// Remove the failover intent read in the last snapshot.
    pub async fn clear_failover(&self) -> HaResult<()> {
        let cluster = self.cluster();
        let failover = match cluster.failover.as_ref() {
            Some(failover) => failover,
            None => return Ok(()),
        };
        with_deadline(
            "clear failover",
            self.settings.request_timeout,
            self.backend
                .delete_record(&self.settings.failover_record(), Some(&failover.version)),
        )
        .await?;
        info!(
            "Cleared failover from {} (candidate '{}')",
            failover.leader, failover.candidate
        );
        Ok(())
    }

    /// Run `command` on a named member and return its full output.  The
    /// caller picks the deadline: admin commands routinely outlast a store
    /// round-trip.
    pub async fn execute_on_member(
        &self,
        member: &str,
        command: &str,
        timeout: Duration,
    ) -> HaResult<ExecOutput> {
        with_deadline("exec", timeout, self.backend.exec(member, command)).await
    }
}

/// Bootstrap failures surface as write errors; conflicts and timeouts keep
/// their own kind.
fn as_write_error(err: HaError) -> HaError {
    match err {
        HaError::StoreRead { context, source } => HaError::StoreWrite { context, source },
        HaError::NotFound { kind, name } => HaError::store_write(
            format!("write {kind} {name}"),
            anyhow::anyhow!("{kind} {name} not found"),
        ),
        other => other,
    }
}
