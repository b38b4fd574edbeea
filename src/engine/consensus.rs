//! HA manager for leader-based consensus engines.
//!
//! The engine runs its own consensus protocol and exposes it through SQL:
//! per-node state in `information_schema.wesql_cluster_local`, the global
//! view (leader only) in `information_schema.wesql_cluster_global`, the
//! membership string in `mysql.consensus_info`, and administrative
//! procedures under `dbms_consensus`.  Leadership moves when the new
//! leader asks the old one to hand over, so demotion is implicit and
//! bootstrap and replica join are handled by the engine itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, error, info, warn};

use super::connection::{EngineConnection, EngineConnector, RowMap};
use super::manager::{BoxFuture, EngineCapabilities, EngineManager, Role};
use super::membership;
use crate::dcs::store::unix_now;
use crate::dcs::{Cluster, Member};
use crate::errors::{with_deadline, HaError, HaResult};
use crate::metrics::{command_label, record_flag, CLUSTER_HEALTHY, ENGINE_COMMANDS_TOTAL, IS_LEADER};

pub const ROLE: &str = "ROLE";
pub const CURRENT_LEADER: &str = "CURRENT_LEADER";
pub const CLUSTER_INFO: &str = "CLUSTER_INFO";
pub const LEADER: &str = "Leader";

const LOCAL_INFO_SQL: &str = "select * from information_schema.wesql_cluster_local";
const GLOBAL_INFO_SQL: &str = "select * from information_schema.wesql_cluster_global";
const CONSENSUS_INFO_SQL: &str = "select cluster_id, cluster_info from mysql.consensus_info";
const PING_SQL: &str = "select 1";

fn change_leader_sql(addr: &str) -> String {
    format!("call dbms_consensus.change_leader('{addr}');")
}

fn downgrade_follower_sql(addr: &str) -> String {
    format!("call dbms_consensus.downgrade_follower('{addr}');")
}

fn drop_learner_sql(addr: &str) -> String {
    format!("call dbms_consensus.drop_learner('{addr}');")
}

pub struct ConsensusManager {
    member_name: String,
    local: Arc<dyn EngineConnection>,
    connector: Arc<dyn EngineConnector>,
    query_timeout: Duration,
    /// Set once the local engine has answered a role query.
    observed: AtomicBool,
}

impl ConsensusManager {
    pub fn new(
        member_name: impl Into<String>,
        local: Arc<dyn EngineConnection>,
        connector: Arc<dyn EngineConnector>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            member_name: member_name.into(),
            local,
            connector,
            query_timeout,
            observed: AtomicBool::new(false),
        }
    }

    /// Connection to the engine of the snapshot's active leader.
    pub fn leader_connection(&self, cluster: &Cluster) -> HaResult<Arc<dyn EngineConnection>> {
        let leader = cluster.active_leader(unix_now()).ok_or_else(|| HaError::NoLeader {
            reason: "no active leader lease in snapshot".to_string(),
        })?;
        if leader.name() == self.member_name {
            return Ok(self.local.clone());
        }
        let member = cluster.member(leader.name()).ok_or_else(|| HaError::NoLeader {
            reason: format!("leader {} is not in the member roster", leader.name()),
        })?;
        self.connector.connect(member).map_err(|e| HaError::NoLeader {
            reason: format!("connect to leader {}: {e:#}", leader.name()),
        })
    }

    fn member_connection(&self, member: &Member) -> anyhow::Result<Arc<dyn EngineConnection>> {
        if member.name == self.member_name {
            Ok(self.local.clone())
        } else {
            self.connector.connect(member)
        }
    }

    async fn query_rows(&self, conn: &dyn EngineConnection, sql: &str) -> HaResult<Vec<RowMap>> {
        with_deadline("engine query", self.query_timeout, async {
            conn.query_rows(sql)
                .await
                .map_err(|e| HaError::engine_query(sql, e))
        })
        .await
    }

    async fn execute(&self, conn: &dyn EngineConnection, sql: &str) -> HaResult<()> {
        let result = with_deadline("engine command", self.query_timeout, async {
            conn.execute(sql)
                .await
                .map_err(|e| HaError::engine_command(sql, e))
        })
        .await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        counter!(ENGINE_COMMANDS_TOTAL, "command" => command_label(sql), "status" => status)
            .increment(1);
        let affected = result?;
        debug!("Executed {} ({} rows)", sql, affected);
        Ok(())
    }

    /// This node's row of the local consensus view.
    pub async fn cluster_local_info(&self) -> HaResult<Option<RowMap>> {
        let rows = self.query_rows(self.local.as_ref(), LOCAL_INFO_SQL).await?;
        self.observed.store(true, Ordering::Relaxed);
        Ok(rows.into_iter().next())
    }

    /// Role string the local engine reports, `""` when it has none.
    pub async fn replica_role(&self) -> HaResult<String> {
        Ok(self
            .cluster_local_info()
            .await?
            .map(|row| row.get_string(ROLE).to_string())
            .unwrap_or_default())
    }

    pub async fn is_promoted(&self, cluster: &Cluster) -> bool {
        self.is_leader(cluster).await.unwrap_or(false)
    }

    /// No lag telemetry, so no member is preferred over another.
    pub fn healthiest_member(&self, _cluster: &Cluster, _candidate: &str) -> Option<Member> {
        None
    }
}

impl EngineManager for ConsensusManager {
    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            explicit_demotion: false,
            self_managed_membership: true,
            lag_telemetry: false,
        }
    }

    fn member_name(&self) -> &str {
        &self.member_name
    }

    fn role<'a>(&'a self, _cluster: &'a Cluster) -> BoxFuture<'a, Role> {
        Box::pin(async move {
            match self.replica_role().await {
                Ok(role) if role.eq_ignore_ascii_case(LEADER) => Role::Leader,
                Ok(role) if role.is_empty() => Role::Unhealthy,
                Ok(_) => Role::Follower,
                Err(e) if !self.observed.load(Ordering::Relaxed) => {
                    debug!("Role not yet known: {}", e);
                    Role::Unknown
                }
                Err(e) => {
                    warn!("Role query failed: {}", e);
                    Role::Unhealthy
                }
            }
        })
    }

    fn is_leader<'a>(&'a self, _cluster: &'a Cluster) -> BoxFuture<'a, HaResult<bool>> {
        Box::pin(async move {
            let is_leader = self.replica_role().await?.eq_ignore_ascii_case(LEADER);
            record_flag(IS_LEADER, is_leader);
            Ok(is_leader)
        })
    }

    fn cluster_info<'a>(&'a self, cluster: Option<&'a Cluster>) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let conn = match cluster {
                Some(cluster) => match self.leader_connection(cluster) {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Get leader conn failed: {}", e);
                        return String::new();
                    }
                },
                None => self.local.clone(),
            };
            match self.query_rows(conn.as_ref(), CONSENSUS_INFO_SQL).await {
                Ok(rows) => rows
                    .first()
                    .map(|row| row.get_string(CLUSTER_INFO).to_string())
                    .unwrap_or_default(),
                Err(e) => {
                    error!("Cluster info query failed: {}", e);
                    String::new()
                }
            }
        })
    }

    fn member_addrs<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move {
            let info = self.cluster_info(Some(cluster)).await;
            membership::parse_member_addrs(&info)
        })
    }

    fn addr_with_member_name<'a>(
        &'a self,
        cluster: &'a Cluster,
        member_name: &'a str,
    ) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let addrs = self.member_addrs(cluster).await;
            membership::find_member_addr(&addrs, cluster, member_name)
                .cloned()
                .unwrap_or_default()
        })
    }

    fn is_current_member_in_cluster<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            !self
                .addr_with_member_name(cluster, &self.member_name)
                .await
                .is_empty()
        })
    }

    fn is_cluster_healthy<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let healthy = match self.leader_connection(cluster) {
                Ok(conn) => match self.query_rows(conn.as_ref(), GLOBAL_INFO_SQL).await {
                    Ok(rows) => {
                        let leaders = rows
                            .iter()
                            .filter(|row| row.get_string(ROLE) == LEADER)
                            .count();
                        if leaders != 1 {
                            warn!("Global consensus view reports {} leaders", leaders);
                        }
                        leaders == 1
                    }
                    Err(e) => {
                        error!("Global info query failed: {}", e);
                        false
                    }
                },
                Err(e) => {
                    error!("Get leader conn failed: {}", e);
                    false
                }
            };
            record_flag(CLUSTER_HEALTHY, healthy);
            healthy
        })
    }

    fn is_cluster_initialized<'a>(&'a self, _cluster: &'a Cluster) -> BoxFuture<'a, HaResult<bool>> {
        Box::pin(async move { Ok(!self.cluster_info(None).await.is_empty()) })
    }

    fn promote<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, HaResult<()>> {
        Box::pin(async move {
            match self.is_leader(cluster).await {
                Ok(true) => {
                    debug!("Already leader, nothing to promote");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => warn!("Role check before promote failed: {}", e),
            }

            let conn = self.leader_connection(cluster)?;
            let addr = self.addr_with_member_name(cluster, &self.member_name).await;
            if addr.is_empty() {
                return Err(HaError::AddressResolution {
                    member: self.member_name.clone(),
                });
            }

            self.execute(conn.as_ref(), &change_leader_sql(&addr)).await?;
            info!("Promote success: leadership requested for {}", addr);
            Ok(())
        })
    }

    fn demote(&self) -> BoxFuture<'_, HaResult<()>> {
        Box::pin(async move {
            debug!("Demotion is implicit: the new leader's promote moves leadership");
            Ok(())
        })
    }

    fn follow<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, HaResult<()>> {
        Box::pin(async move {
            match cluster.active_leader(unix_now()) {
                Some(leader) => info!("Current member still follows the leader {}", leader.name()),
                None => info!("Current member follows, no active leader lease"),
            }
            Ok(())
        })
    }

    fn initialize_cluster<'a>(&'a self, _cluster: &'a Cluster) -> BoxFuture<'a, HaResult<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn initiate_cluster<'a>(&'a self, _cluster: &'a Cluster) -> BoxFuture<'a, HaResult<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn join_current_member_to_cluster<'a>(
        &'a self,
        _cluster: &'a Cluster,
    ) -> BoxFuture<'a, HaResult<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn recover<'a>(&'a self, _cluster: &'a Cluster) -> BoxFuture<'a, HaResult<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn leave_member_from_cluster<'a>(
        &'a self,
        cluster: &'a Cluster,
        member_name: &'a str,
    ) -> BoxFuture<'a, HaResult<()>> {
        Box::pin(async move {
            let conn = self.leader_connection(cluster).map_err(|e| {
                error!("Get leader conn failed: {}", e);
                e
            })?;
            let addr = self.addr_with_member_name(cluster, member_name).await;
            if addr.is_empty() {
                info!("Member {} already deleted", member_name);
                return Ok(());
            }

            // Voters cannot be dropped directly: demote to learner first.
            for statement in [downgrade_follower_sql(&addr), drop_learner_sql(&addr)] {
                if let Err(e) = self.execute(conn.as_ref(), &statement).await {
                    error!("Delete member {} from db cluster failed: {}", member_name, e);
                    return Err(e);
                }
            }
            info!("Member {} ({}) left the cluster", member_name, addr);
            Ok(())
        })
    }

    fn is_member_lagging<'a>(
        &'a self,
        _cluster: &'a Cluster,
        _member: &'a Member,
    ) -> BoxFuture<'a, (bool, i64)> {
        Box::pin(async move { (false, 0) })
    }

    fn is_member_healthy<'a>(&'a self, _cluster: &'a Cluster, member: &'a Member) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let conn = match self.member_connection(member) {
                Ok(conn) => conn,
                Err(e) => {
                    debug!("Member {} unreachable: {:#}", member.name, e);
                    return false;
                }
            };
            match self.query_rows(conn.as_ref(), PING_SQL).await {
                Ok(_) => true,
                Err(e) => {
                    debug!("Member {} failed health probe: {}", member.name, e);
                    false
                }
            }
        })
    }

    fn has_other_healthy_leader<'a>(&'a self, cluster: &'a Cluster) -> BoxFuture<'a, Option<Member>> {
        Box::pin(async move {
            let info = match self.cluster_local_info().await {
                Ok(Some(info)) => info,
                Ok(None) => {
                    error!("Get cluster local info failed: no rows");
                    return None;
                }
                Err(e) => {
                    error!("Get cluster local info failed: {}", e);
                    return None;
                }
            };

            if info.get_string(ROLE).eq_ignore_ascii_case(LEADER) {
                return None;
            }
            let leader_addr = info.get_string(CURRENT_LEADER);
            if leader_addr.is_empty() {
                return None;
            }
            membership::member_for_addr(cluster, leader_addr).cloned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcs::{Leader, LeaderRecord};
    use crate::engine::testing::{ScriptedConnection, ScriptedConnector};

    const MEMBERSHIP: &str = "pod-0.h:13306#1;pod-1.h:13306#1;pod-2.h:13306#1@7";

    struct Fixture {
        local: Arc<ScriptedConnection>,
        leader: Arc<ScriptedConnection>,
        connector: Arc<ScriptedConnector>,
        manager: ConsensusManager,
    }

    /// Local node is pod-0; the lease names pod-1.
    fn fixture() -> Fixture {
        let local = Arc::new(ScriptedConnection::new());
        let leader = Arc::new(ScriptedConnection::new());
        let connector = Arc::new(ScriptedConnector::new());
        connector.add("pod-1", leader.clone());
        let manager = ConsensusManager::new(
            "pod-0",
            local.clone(),
            connector.clone(),
            Duration::from_secs(1),
        );
        Fixture {
            local,
            leader,
            connector,
            manager,
        }
    }

    fn member(name: &str) -> Member {
        Member::new(name)
    }

    fn cluster_with_leader(name: &str, renew_time: i64) -> Cluster {
        Cluster {
            leader: Some(Leader {
                version: "1".to_string(),
                member: member(name),
                record: LeaderRecord {
                    leader: name.to_string(),
                    acquire_time: renew_time,
                    renew_time,
                    ttl: 30,
                },
                observed_at: renew_time,
            }),
            members: vec![member("pod-0"), member("pod-1"), member("pod-2")],
            ..Default::default()
        }
    }

    fn cluster() -> Cluster {
        cluster_with_leader("pod-1", unix_now())
    }

    fn consensus_info(info: &str) -> Vec<RowMap> {
        vec![RowMap::from_pairs([("cluster_id", "1"), ("cluster_info", info)])]
    }

    fn local_info(role: &str, current_leader: &str) -> Vec<RowMap> {
        vec![RowMap::from_pairs([(ROLE, role), (CURRENT_LEADER, current_leader)])]
    }

    #[test]
    fn test_capabilities() {
        let caps = fixture().manager.capabilities();
        assert!(!caps.explicit_demotion);
        assert!(caps.self_managed_membership);
        assert!(!caps.lag_telemetry);
    }

    #[tokio::test]
    async fn test_is_leader() {
        let f = fixture();
        let c = cluster();
        f.local.set_rows(LOCAL_INFO_SQL, local_info("leader", ""));
        assert!(f.manager.is_leader(&c).await.unwrap());
        f.local.set_rows(LOCAL_INFO_SQL, local_info("Follower", "pod-1.h:13306"));
        assert!(!f.manager.is_leader(&c).await.unwrap());
        assert_eq!(f.manager.role(&c).await, Role::Follower);
    }

    #[tokio::test]
    async fn test_is_leader_query_failure_is_error() {
        let f = fixture();
        f.local.set_error(LOCAL_INFO_SQL, "connection refused");
        let err = f.manager.is_leader(&cluster()).await.unwrap_err();
        assert!(matches!(err, HaError::EngineQuery { .. }));
    }

    #[tokio::test]
    async fn test_role_is_unknown_until_first_answer() {
        let f = fixture();
        let c = cluster();
        f.local.set_error(LOCAL_INFO_SQL, "connection refused");
        assert_eq!(f.manager.role(&c).await, Role::Unknown);

        f.local.set_rows(LOCAL_INFO_SQL, local_info("Follower", "pod-1.h:13306"));
        assert_eq!(f.manager.role(&c).await, Role::Follower);

        // Once the engine has answered, losing it is unhealthy, not unknown.
        f.local.set_error(LOCAL_INFO_SQL, "connection refused");
        assert_eq!(f.manager.role(&c).await, Role::Unhealthy);

        f.local.set_rows(LOCAL_INFO_SQL, vec![]);
        assert_eq!(f.manager.role(&c).await, Role::Unhealthy);
    }

    #[test]
    fn test_is_leader_member() {
        let f = fixture();
        let c = cluster();
        assert!(f.manager.is_leader_member(&c, Some(&member("pod-1"))));
        assert!(!f.manager.is_leader_member(&c, Some(&member("pod-0"))));
        assert!(!f.manager.is_leader_member(&c, None));

        let no_leader = Cluster {
            leader: None,
            ..cluster()
        };
        for name in ["pod-0", "pod-1", "pod-2"] {
            assert!(!f.manager.is_leader_member(&no_leader, Some(&member(name))));
        }

        let expired = cluster_with_leader("pod-1", 100);
        assert!(!f.manager.is_leader_member(&expired, Some(&member("pod-1"))));
    }

    #[tokio::test]
    async fn test_cluster_info_uses_leader_or_local() {
        let f = fixture();
        f.leader.set_rows(CONSENSUS_INFO_SQL, consensus_info(MEMBERSHIP));
        f.local.set_rows(CONSENSUS_INFO_SQL, consensus_info("local-view"));
        assert_eq!(f.manager.cluster_info(Some(&cluster())).await, MEMBERSHIP);
        assert_eq!(f.manager.cluster_info(None).await, "local-view");
    }

    #[tokio::test]
    async fn test_cluster_info_fail_soft() {
        let f = fixture();
        f.leader.set_error(CONSENSUS_INFO_SQL, "timeout");
        assert_eq!(f.manager.cluster_info(Some(&cluster())).await, "");
        let no_leader = Cluster {
            leader: None,
            ..cluster()
        };
        assert_eq!(f.manager.cluster_info(Some(&no_leader)).await, "");
    }

    #[tokio::test]
    async fn test_member_addrs() {
        let f = fixture();
        f.leader.set_rows(
            CONSENSUS_INFO_SQL,
            consensus_info("10.0.0.1:13306#1;10.0.0.2:13306#1@1000"),
        );
        assert_eq!(
            f.manager.member_addrs(&cluster()).await,
            vec!["10.0.0.1:13306", "10.0.0.2:13306"]
        );
    }

    #[tokio::test]
    async fn test_addr_with_member_name() {
        let f = fixture();
        f.leader.set_rows(
            CONSENSUS_INFO_SQL,
            consensus_info("pod-0.h:13306#1;pod-1.h:13306#1@7"),
        );
        let c = cluster();
        assert_eq!(f.manager.addr_with_member_name(&c, "pod-1").await, "pod-1.h:13306");
        assert_eq!(f.manager.addr_with_member_name(&c, "pod-2").await, "");
    }

    #[tokio::test]
    async fn test_is_current_member_in_cluster() {
        let f = fixture();
        f.leader.set_rows(CONSENSUS_INFO_SQL, consensus_info(MEMBERSHIP));
        assert!(f.manager.is_current_member_in_cluster(&cluster()).await);
        f.leader.set_rows(CONSENSUS_INFO_SQL, consensus_info("pod-1.h:13306#1"));
        assert!(!f.manager.is_current_member_in_cluster(&cluster()).await);
    }

    #[tokio::test]
    async fn test_is_cluster_healthy() {
        let f = fixture();
        let c = cluster();
        let row = |role: &str| RowMap::from_pairs([(ROLE, role)]);

        f.leader
            .set_rows(GLOBAL_INFO_SQL, vec![row("Leader"), row("Follower"), row("Follower")]);
        assert!(f.manager.is_cluster_healthy(&c).await);

        f.leader.set_rows(GLOBAL_INFO_SQL, vec![row("Follower")]);
        assert!(!f.manager.is_cluster_healthy(&c).await);

        f.leader.set_rows(GLOBAL_INFO_SQL, vec![row("Leader"), row("Leader")]);
        assert!(!f.manager.is_cluster_healthy(&c).await);

        f.leader.set_error(GLOBAL_INFO_SQL, "gone");
        assert!(!f.manager.is_cluster_healthy(&c).await);

        let no_leader = Cluster {
            leader: None,
            ..cluster()
        };
        assert!(!f.manager.is_cluster_healthy(&no_leader).await);
    }

    #[tokio::test]
    async fn test_is_cluster_initialized_uses_local() {
        let f = fixture();
        let no_leader = Cluster {
            leader: None,
            ..cluster()
        };
        f.local.set_rows(CONSENSUS_INFO_SQL, consensus_info(MEMBERSHIP));
        assert!(f.manager.is_cluster_initialized(&no_leader).await.unwrap());

        f.local.set_rows(CONSENSUS_INFO_SQL, vec![]);
        assert!(!f.manager.is_cluster_initialized(&no_leader).await.unwrap());
    }

    #[tokio::test]
    async fn test_promote_when_already_leader_issues_nothing() {
        let f = fixture();
        f.local.set_rows(LOCAL_INFO_SQL, local_info("Leader", ""));
        f.manager.promote(&cluster()).await.unwrap();
        assert!(f.local.executed().is_empty());
        assert!(f.leader.executed().is_empty());
    }

    #[tokio::test]
    async fn test_promote_asks_leader_to_hand_over() {
        let f = fixture();
        f.local.set_rows(LOCAL_INFO_SQL, local_info("Follower", "pod-1.h:13306"));
        f.leader.set_rows(CONSENSUS_INFO_SQL, consensus_info(MEMBERSHIP));
        f.manager.promote(&cluster()).await.unwrap();
        assert_eq!(
            f.leader.executed(),
            vec!["call dbms_consensus.change_leader('pod-0.h:13306');"]
        );
    }

    #[tokio::test]
    async fn test_promote_without_leader() {
        let f = fixture();
        f.local.set_rows(LOCAL_INFO_SQL, local_info("Follower", ""));
        let no_leader = Cluster {
            leader: None,
            ..cluster()
        };
        let err = f.manager.promote(&no_leader).await.unwrap_err();
        assert!(matches!(err, HaError::NoLeader { .. }));

        // Lease names a member the connector cannot reach.
        let unreachable = cluster_with_leader("pod-2", unix_now());
        let err = f.manager.promote(&unreachable).await.unwrap_err();
        assert!(matches!(err, HaError::NoLeader { .. }));
    }

    #[tokio::test]
    async fn test_promote_address_resolution_failure() {
        let f = fixture();
        f.local.set_rows(LOCAL_INFO_SQL, local_info("Follower", ""));
        f.leader.set_rows(CONSENSUS_INFO_SQL, consensus_info("pod-1.h:13306#1"));
        let err = f.manager.promote(&cluster()).await.unwrap_err();
        assert!(matches!(err, HaError::AddressResolution { ref member } if member == "pod-0"));
        assert!(f.leader.executed().is_empty());
    }

    #[tokio::test]
    async fn test_promote_command_failure_carries_statement() {
        let f = fixture();
        f.local.set_rows(LOCAL_INFO_SQL, local_info("Follower", ""));
        f.leader.set_rows(CONSENSUS_INFO_SQL, consensus_info(MEMBERSHIP));
        let statement = change_leader_sql("pod-0.h:13306");
        f.leader.fail_statement(&statement, "not leader");
        let err = f.manager.promote(&cluster()).await.unwrap_err();
        match err {
            HaError::EngineCommand { command, .. } => assert_eq!(command, statement),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_hooks_are_no_ops() {
        let f = fixture();
        let c = cluster();
        f.manager.demote().await.unwrap();
        f.manager.follow(&c).await.unwrap();
        f.manager.initialize_cluster(&c).await.unwrap();
        f.manager.initiate_cluster(&c).await.unwrap();
        f.manager.join_current_member_to_cluster(&c).await.unwrap();
        f.manager.recover(&c).await.unwrap();
        assert!(f.local.executed().is_empty());
        assert!(f.leader.executed().is_empty());
    }

    #[tokio::test]
    async fn test_leave_member_downgrades_then_drops() {
        let f = fixture();
        f.leader.set_rows(CONSENSUS_INFO_SQL, consensus_info(MEMBERSHIP));
        f.manager
            .leave_member_from_cluster(&cluster(), "pod-2")
            .await
            .unwrap();
        assert_eq!(
            f.leader.executed(),
            vec![
                "call dbms_consensus.downgrade_follower('pod-2.h:13306');",
                "call dbms_consensus.drop_learner('pod-2.h:13306');",
            ]
        );
    }

    #[tokio::test]
    async fn test_leave_absent_member_is_idempotent() {
        let f = fixture();
        f.leader.set_rows(CONSENSUS_INFO_SQL, consensus_info("pod-0.h:13306#1;pod-1.h:13306#1"));
        let c = cluster();
        f.manager.leave_member_from_cluster(&c, "pod-2").await.unwrap();
        f.manager.leave_member_from_cluster(&c, "pod-2").await.unwrap();
        assert!(f.leader.executed().is_empty());
    }

    #[tokio::test]
    async fn test_leave_member_failure_carries_statement() {
        let f = fixture();
        f.leader.set_rows(CONSENSUS_INFO_SQL, consensus_info(MEMBERSHIP));
        let statement = drop_learner_sql("pod-2.h:13306");
        f.leader.fail_statement(&statement, "learner busy");
        let err = f
            .manager
            .leave_member_from_cluster(&cluster(), "pod-2")
            .await
            .unwrap_err();
        assert!(matches!(err, HaError::EngineCommand { ref command, .. } if *command == statement));
    }

    #[tokio::test]
    async fn test_leave_member_without_leader() {
        let f = fixture();
        let no_leader = Cluster {
            leader: None,
            ..cluster()
        };
        let err = f
            .manager
            .leave_member_from_cluster(&no_leader, "pod-2")
            .await
            .unwrap_err();
        assert!(matches!(err, HaError::NoLeader { .. }));
    }

    #[tokio::test]
    async fn test_is_member_lagging_reports_no_lag() {
        let f = fixture();
        assert_eq!(
            f.manager.is_member_lagging(&cluster(), &member("pod-2")).await,
            (false, 0)
        );
        assert!(f.manager.healthiest_member(&cluster(), "pod-2").is_none());
    }

    #[tokio::test]
    async fn test_has_other_healthy_leader() {
        let f = fixture();
        let c = cluster();

        f.local.set_rows(LOCAL_INFO_SQL, local_info("Follower", "pod-2.h.ns.svc:13306"));
        assert_eq!(f.manager.has_other_healthy_leader(&c).await.unwrap().name, "pod-2");

        f.local.set_rows(LOCAL_INFO_SQL, local_info("Leader", "pod-0.h:13306"));
        assert!(f.manager.has_other_healthy_leader(&c).await.is_none());

        f.local.set_rows(LOCAL_INFO_SQL, local_info("Follower", ""));
        assert!(f.manager.has_other_healthy_leader(&c).await.is_none());

        f.local.set_rows(LOCAL_INFO_SQL, local_info("Follower", "pod-9.h:13306"));
        assert!(f.manager.has_other_healthy_leader(&c).await.is_none());

        f.local.set_error(LOCAL_INFO_SQL, "down");
        assert!(f.manager.has_other_healthy_leader(&c).await.is_none());

        f.local.set_rows(LOCAL_INFO_SQL, vec![]);
        assert!(f.manager.has_other_healthy_leader(&c).await.is_none());
    }

    #[tokio::test]
    async fn test_has_other_healthy_members() {
        let f = fixture();
        let pod2 = Arc::new(ScriptedConnection::new());
        f.connector.add("pod-2", pod2.clone());
        f.local.set_rows(PING_SQL, vec![RowMap::from_pairs([("1", "1")])]);
        f.leader.set_rows(PING_SQL, vec![RowMap::from_pairs([("1", "1")])]);
        pod2.set_error(PING_SQL, "refused");

        let c = cluster();
        let healthy = f.manager.has_other_healthy_members(&c, "pod-1").await;
        let names: Vec<_> = healthy.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["pod-0"]);

        for leader in ["pod-0", "pod-1", "pod-2"] {
            let healthy = f.manager.has_other_healthy_members(&c, leader).await;
            assert!(healthy.iter().all(|m| m.name != leader && m.name != "pod-2"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_engine_times_out() {
        let f = fixture();
        f.local.set_rows(LOCAL_INFO_SQL, local_info("Leader", ""));
        f.local.set_latency(Some(Duration::from_secs(30)));
        let err = f.manager.is_leader(&cluster()).await.unwrap_err();
        assert!(matches!(err, HaError::Timeout { .. }));
    }
}
