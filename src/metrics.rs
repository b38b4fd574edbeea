//! Prometheus metrics for the HA sidecar.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! (with its own HTTP listener) and defines metric name constants.  The
//! store and engine layers record through the `metrics` facade, which is a
//! no-op until a recorder is installed.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

// -- Metric name constants ----------------------------------------------------

/// Store refreshes (counter). Labels: status.
pub const DCS_REFRESH_TOTAL: &str = "ha_dcs_refresh_total";

/// Store refresh duration in seconds (histogram).
pub const DCS_REFRESH_DURATION_SECONDS: &str = "ha_dcs_refresh_duration_seconds";

/// Conditional lease writes (counter). Labels: status.
pub const LEASE_WRITES_TOTAL: &str = "ha_lease_writes_total";

/// Engine administrative statements (counter). Labels: command, status.
pub const ENGINE_COMMANDS_TOTAL: &str = "ha_engine_commands_total";

/// 1 when the local engine reports the leader role (gauge).
pub const IS_LEADER: &str = "ha_is_leader";

/// 1 when the last health verdict was healthy (gauge).
pub const CLUSTER_HEALTHY: &str = "ha_cluster_healthy";

// -- Global recorder installation ---------------------------------------------

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the global recorder serving `/metrics` on `addr`.  Idempotent;
/// must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus exporter: {e}"))?;
    let _ = INSTALLED.set(addr);
    Ok(())
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(DCS_REFRESH_TOTAL, "Configuration store refreshes");
    describe_histogram!(
        DCS_REFRESH_DURATION_SECONDS,
        "Configuration store refresh duration in seconds"
    );
    describe_counter!(LEASE_WRITES_TOTAL, "Conditional leader lease writes");
    describe_counter!(ENGINE_COMMANDS_TOTAL, "Engine administrative statements");
    describe_gauge!(IS_LEADER, "Whether the local engine reports the leader role");
    describe_gauge!(CLUSTER_HEALTHY, "Last cluster health verdict");
}

pub(crate) fn record_flag(name: &'static str, value: bool) {
    gauge!(name).set(if value { 1.0 } else { 0.0 });
}

/// Metric label for an administrative statement: the procedure name only,
/// so member addresses do not become label values.
///
/// - `call dbms_consensus.change_leader('10.0.0.1:13306');` -> `change_leader`
/// - `select 1` -> `select`
pub(crate) fn command_label(statement: &str) -> String {
    let trimmed = statement.trim_start();
    let lowered = trimmed.to_ascii_lowercase();
    if let Some(rest) = lowered.strip_prefix("call ") {
        let procedure = rest.split('(').next().unwrap_or_default().trim();
        return procedure
            .rsplit('.')
            .next()
            .unwrap_or(procedure)
            .to_string();
    }
    lowered
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

// -- Tests --------------------------------------------------------------------
