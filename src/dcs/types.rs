//! Cluster snapshot types.
//!
//! A [`Cluster`] is one point-in-time materialization of the store.  It is
//! built by [`super::store::ConfigurationStore::refresh`] and handed out
//! behind an `Arc`; nothing mutates it after construction.

use std::collections::BTreeMap;

use serde::Serialize;

use super::lease::{self, LeaderRecord};
use crate::errors::HaResult;

// ── Auxiliary record names and annotation keys ─────────────────────

/// Suffix of the primary HA config record.
pub const CONFIG_SUFFIX: &str = "-haconfig";
/// Suffix of the failover-intent record.
pub const FAILOVER_SUFFIX: &str = "-failover";
/// Suffix of the engine-specific extras record.
pub const EXTRA_SUFFIX: &str = "-extra";

pub const SYS_ID: &str = "sys-id";
pub const MAX_LAG_ON_FAILOVER: &str = "max-lag-on-failover";
pub const CANDIDATE: &str = "candidate";
pub const SCHEDULED_AT: &str = "scheduled-at";

// ── Types ──────────────────────────────────────────────────────────

/// One cluster participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    /// Unique within the cluster.
    pub name: String,
    /// Role as observed through the store; the engine is authoritative.
    pub role: String,
    /// Engine-reachable host (pod IP or DNS name), empty if unknown.
    pub address: String,
    /// Opaque metadata carried by the member record.
    pub metadata: BTreeMap<String, String>,
}

impl Member {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: String::new(),
            address: String::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// The store's current leadership claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leader {
    /// CAS token of the cluster object the claim was read from.
    pub version: String,
    /// Identity of the claimed leader.
    pub member: Member,
    /// Decoded lease.
    pub record: LeaderRecord,
    /// Local wall-clock (Unix seconds) at which this claim was observed.
    pub observed_at: i64,
}

impl Leader {
    pub fn name(&self) -> &str {
        &self.member.name
    }
}

/// A pending request to move leadership away from `leader`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failover {
    pub version: String,
    pub leader: String,
    /// Preferred replacement, empty for any healthy member.
    pub candidate: String,
    pub scheduled_at: i64,
}

impl Failover {
    /// Decode a failover record.  Any malformed or missing `scheduled-at`
    /// yields `None` so a bad record never blocks a refresh.
    pub fn from_annotations(version: &str, annotations: &BTreeMap<String, String>) -> Option<Self> {
        let scheduled_at = annotations.get(SCHEDULED_AT)?.trim().parse::<i64>().ok()?;
        Some(Self {
            version: version.to_string(),
            leader: annotations.get(lease::LEADER_NAME).cloned().unwrap_or_default(),
            candidate: annotations.get(CANDIDATE).cloned().unwrap_or_default(),
            scheduled_at,
        })
    }
}

/// Engine-agnostic cluster configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterConfig {
    pub ttl: i64,
    /// Followers lagging more than this are not failover candidates.
    pub max_lag_on_failover: i64,
}

impl ClusterConfig {
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> HaResult<Self> {
        Ok(Self {
            ttl: lease::parse_seconds(annotations, lease::TTL)?,
            max_lag_on_failover: lease::parse_seconds(annotations, MAX_LAG_ON_FAILOVER)?,
        })
    }

    pub fn to_annotations(&self, sys_id: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (SYS_ID.to_string(), sys_id.to_string()),
            (lease::TTL.to_string(), self.ttl.to_string()),
            (
                MAX_LAG_ON_FAILOVER.to_string(),
                self.max_lag_on_failover.to_string(),
            ),
        ])
    }
}

/// Point-in-time view of the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub sys_id: String,
    /// CAS token of the cluster object at refresh, kept whether or not a
    /// lease is recorded on it.  Empty before the first refresh.
    pub version: String,
    pub config: ClusterConfig,
    pub leader: Option<Leader>,
    pub members: Vec<Member>,
    pub failover: Option<Failover>,
    pub extra: BTreeMap<String, String>,
}

impl Cluster {
    /// The leader claim, unless its lease has expired at `now`.
    pub fn active_leader(&self, now: i64) -> Option<&Leader> {
        self.leader
            .as_ref()
            .filter(|leader| !leader.record.is_expired(now))
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Roster entry of the active leader, if both exist.
    pub fn leader_member(&self, now: i64) -> Option<&Member> {
        self.active_leader(now).and_then(|l| self.member(l.name()))
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }
}
