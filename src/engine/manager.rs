//! Engine HA manager contract.
//!
//! Every supported engine implements [`EngineManager`].  Operations query
//! live engine state on each call instead of trusting a cached role: the
//! engine's own consensus layer decides who leads.  Snapshots are borrowed
//! for one call and never modified; state changes go back through the
//! configuration store.
//!
//! Dropping a returned future cancels the in-flight I/O.  A cancelled
//! `promote` or `leave_member_from_cluster` has an unknown outcome and
//! must be re-verified from a fresh refresh.

use std::future::Future;
use std::pin::Pin;

use crate::dcs::store::unix_now;
use crate::dcs::{Cluster, Member};
use crate::errors::HaResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Logical role of the local node, recomputed on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The engine has not answered a role query yet.
    Unknown,
    Follower,
    Leader,
    /// Engine unreachable, or reachable without any role information.
    Unhealthy,
}

/// What an engine does on its own versus what the manager must drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities {
    /// The old leader must step down explicitly in `demote`.  When false,
    /// leadership moves through the new leader's `promote`.
    pub explicit_demotion: bool,
    /// Bootstrap and replica join happen inside the engine.  When false,
    /// `initialize_cluster`, `initiate_cluster` and
    /// `join_current_member_to_cluster` must do real work.
    pub self_managed_membership: bool,
    /// The engine reports per-member replication lag.
    pub lag_telemetry: bool,
}

pub trait EngineManager: Send + Sync + 'static {
    fn capabilities(&self) -> EngineCapabilities;

    /// This process's member name.
    fn member_name(&self) -> &str;

    fn role<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, Role>;

    /// Whether the local engine reports itself as leader.  A follower is
    /// `Ok(false)`; only query failures are errors.
    fn is_leader<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, HaResult<bool>>;

    /// Pure snapshot comparison against the active (non-expired) lease.
    fn is_leader_member(&self, cluster: &Cluster, member: Option<&Member>) -> bool {
        match (cluster.active_leader(unix_now()), member) {
            (Some(leader), Some(member)) => leader.name() == member.name,
            _ => false,
        }
    }

    /// Raw consensus membership string, from the snapshot leader when a
    /// cluster is given, else from the local engine.  Empty means unknown.
    fn cluster_info<'a>(&'a self, cluster: Option<&'a Cluster>) -> BoxFuture<'a, String>;

    fn member_addrs<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, Vec<String>>;

    /// Engine address of `member_name`, or `""` when not in the membership.
    fn addr_with_member_name<'a>(
        &'a self,
        cluster: &'a Cluster,
        member_name: &'a str,
    ) -> BoxFuture<'a, String>;

    fn is_current_member_in_cluster<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, bool>;

    /// Fail-closed: any failure reads as unhealthy.
    fn is_cluster_healthy<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, bool>;

    fn is_cluster_initialized<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, HaResult<bool>>;

    fn promote<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, HaResult<()>>;

    fn demote(&self) -> BoxFuture<'_, HaResult<()>>;

    fn follow<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, HaResult<()>>;

    fn initialize_cluster<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, HaResult<()>>;

    fn initiate_cluster<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, HaResult<()>>;

    fn join_current_member_to_cluster<'a>(
        &'a self,
        cluster: &'a Cluster,
    ) -> BoxFuture<'a, HaResult<()>>;

    fn recover<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, HaResult<()>>;

    /// Remove a member from the voting set.  Removing an absent member
    /// succeeds.
    fn leave_member_from_cluster<'a>(
        &'a self,
        cluster: &'a Cluster,
        member_name: &'a str,
    ) -> BoxFuture<'a, HaResult<()>>;

    /// `(lagging, lag)`.  Engines without lag telemetry report `(false, 0)`.
    fn is_member_lagging<'a>(
        &'a self,
        cluster: &'a Cluster,
        member: &'a Member,
    ) -> BoxFuture<'a, (bool, i64)>;

    fn is_member_healthy<'a>(&'a self, cluster: &'a Cluster, member: &'a Member) -> BoxFuture<'a, bool>;

    /// A live leader other than this node, judged from local state only.
    fn has_other_healthy_leader<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, Option<Member>>;

    /// Healthy roster members other than `leader_name`: the failover
    /// candidate pool.
    fn has_other_healthy_members<'a>(
        &'a self,
        cluster: &'a Cluster,
        leader_name: &'a str,
    ) -> BoxFuture<'a, Vec<Member>> {
        Box::pin(async move {
            let mut healthy = Vec::new();
            for member in cluster.members.iter().filter(|m| m.name != leader_name) {
                if self.is_member_healthy(cluster, member).await {
                    healthy.push(member.clone());
                }
            }
            healthy
        })
    }
}
