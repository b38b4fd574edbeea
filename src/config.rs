//! Configuration loading and types for the HA sidecar.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct, then selected fields are overridden from the
//! environment so the same file can be shared by every replica.  Each
//! subsection governs a different part of the system: node identity, the
//! configuration store, the engine connection, logging and metrics.

use serde::Deserialize;
use std::path::Path;

use crate::errors::HaError;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Identity of this node and the cluster it belongs to.
    #[serde(default)]
    pub node: NodeConfig,

    /// Distributed configuration store settings.
    #[serde(default)]
    pub dcs: DcsConfig,

    /// Database engine connection settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Node identity.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeConfig {
    /// This member's name (the pod name in Kubernetes deployments).
    #[serde(default)]
    pub member_name: String,

    /// Namespace holding the cluster objects.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Name of the cluster object carrying the leader lease.
    #[serde(default)]
    pub cluster_name: String,

    /// Component name, used as prefix for auxiliary records.
    #[serde(default)]
    pub component_name: String,
}

/// Distributed configuration store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DcsConfig {
    /// Backend type: `kubernetes` or `memory`.
    #[serde(default = "default_dcs_backend")]
    pub backend: String,

    /// Leader lease TTL in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: i64,

    /// Maximum replication lag (bytes) tolerated for failover candidates.
    #[serde(default = "default_max_lag_on_failover")]
    pub max_lag_on_failover: i64,

    /// Deadline for a single store round-trip, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Default deadline for a remote exec, in seconds.
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Resource type of the cluster object.
    #[serde(default)]
    pub cluster_resource: ClusterResourceConfig,

    /// Label selector restricting which pods are cluster members.
    #[serde(default)]
    pub pod_selector: String,

    /// Pod label carrying the observed member role.
    #[serde(default = "default_role_label")]
    pub role_label: String,

    /// Container targeted by remote exec (empty = pod default).
    #[serde(default)]
    pub exec_container: String,
}

impl Default for DcsConfig {
    fn default() -> Self {
        Self {
            backend: default_dcs_backend(),
            ttl: default_ttl(),
            max_lag_on_failover: default_max_lag_on_failover(),
            request_timeout_secs: default_request_timeout(),
            exec_timeout_secs: default_exec_timeout(),
            cluster_resource: ClusterResourceConfig::default(),
            pod_selector: String::new(),
            role_label: default_role_label(),
            exec_container: String::new(),
        }
    }
}

/// Group/version/kind of the custom resource that carries the lease.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterResourceConfig {
    #[serde(default = "default_cluster_group")]
    pub group: String,
    #[serde(default = "default_cluster_version")]
    pub version: String,
    #[serde(default = "default_cluster_kind")]
    pub kind: String,
    #[serde(default = "default_cluster_plural")]
    pub plural: String,
}

impl Default for ClusterResourceConfig {
    fn default() -> Self {
        Self {
            group: default_cluster_group(),
            version: default_cluster_version(),
            kind: default_cluster_kind(),
            plural: default_cluster_plural(),
        }
    }
}

/// Engine connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Engine flavour: `consensus`.
    #[serde(default = "default_engine_kind")]
    pub kind: String,

    /// Host of the local engine.
    #[serde(default = "default_engine_host")]
    pub host: String,

    /// Port every member's engine listens on.
    #[serde(default = "default_engine_port")]
    pub port: u16,

    #[serde(default = "default_engine_user")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub database: String,

    /// Deadline for a single engine query, in seconds.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Pool size per engine endpoint.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: default_engine_kind(),
            host: default_engine_host(),
            port: default_engine_port(),
            username: default_engine_user(),
            password: String::new(),
            database: String::new(),
            query_timeout_secs: default_query_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus exporter.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Listen address of the Prometheus exporter.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_addr: default_metrics_addr(),
        }
    }
}

impl Config {
    /// Override fields from `HA_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HA_MEMBER_NAME") {
            // Pod hostnames may arrive fully qualified.
            self.node.member_name = v.split('.').next().unwrap_or_default().to_string();
        }
        if let Some(v) = lookup("HA_NAMESPACE") {
            self.node.namespace = v;
        }
        if let Some(v) = lookup("HA_CLUSTER_NAME") {
            self.node.cluster_name = v;
        }
        if let Some(v) = lookup("HA_COMPONENT_NAME") {
            self.node.component_name = v;
        }
        if let Some(ttl) = lookup("HA_TTL").and_then(|v| v.parse().ok()) {
            self.dcs.ttl = ttl;
        }
        if let Some(lag) = lookup("HA_MAX_LAG_ON_FAILOVER").and_then(|v| v.parse().ok()) {
            self.dcs.max_lag_on_failover = lag;
        }
    }

    /// Reject configurations the store and engine layers cannot run with.
    pub fn validate(&self) -> Result<(), HaError> {
        if self.node.member_name.is_empty() {
            return Err(HaError::Config("node.member_name must be set".to_string()));
        }
        if self.node.cluster_name.is_empty() {
            return Err(HaError::Config("node.cluster_name must be set".to_string()));
        }
        if self.dcs.ttl <= 0 {
            return Err(HaError::Config("dcs.ttl must be positive".to_string()));
        }
        match self.dcs.backend.as_str() {
            "kubernetes" | "memory" => {}
            other => {
                return Err(HaError::Config(format!("unknown dcs.backend '{other}'")));
            }
        }
        if self.engine.kind != "consensus" {
            return Err(HaError::Config(format!(
                "unknown engine.kind '{}'",
                self.engine.kind
            )));
        }
        Ok(())
    }

    /// Component name, falling back to the cluster name.
    pub fn component_name(&self) -> &str {
        if self.node.component_name.is_empty() {
            &self.node.cluster_name
        } else {
            &self.node.component_name
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_dcs_backend() -> String {
    "kubernetes".to_string()
}

fn default_ttl() -> i64 {
    15
}

fn default_max_lag_on_failover() -> i64 {
    1_048_576
}

fn default_request_timeout() -> u64 {
    5
}

fn default_exec_timeout() -> u64 {
    60
}

fn default_role_label() -> String {
    "ha.role".to_string()
}

fn default_cluster_group() -> String {
    "apps.kubeblocks.io".to_string()
}

fn default_cluster_version() -> String {
    "v1alpha1".to_string()
}

fn default_cluster_kind() -> String {
    "Cluster".to_string()
}

fn default_cluster_plural() -> String {
    "clusters".to_string()
}

fn default_engine_kind() -> String {
    "consensus".to_string()
}

fn default_engine_host() -> String {
    "127.0.0.1".to_string()
}

fn default_engine_port() -> u16 {
    3306
}

fn default_engine_user() -> String {
    "root".to_string()
}

fn default_query_timeout() -> u64 {
    3
}

fn default_max_connections() -> u32 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9108".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
