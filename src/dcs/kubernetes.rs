//! Kubernetes store backend.
//!
//! Object mapping:
//! - Cluster object:     the cluster custom resource (`DynamicObject`),
//!                       lease fields kept in its annotations
//! - Auxiliary records:  `ConfigMap`s named `{component}{suffix}`, payload
//!                       in annotations
//! - Member records:     `Pod`s matching the configured label selector
//! - Remote exec:        the pod `exec` subresource (`sh -c <command>`)
//!
//! Conditional writes put the expected `resourceVersion` in the patch body,
//! which the API server checks before applying the merge.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{
    Api, ApiResource, AttachParams, DeleteParams, DynamicObject, GroupVersionKind, ListParams,
    Patch, PatchParams, PostParams, Preconditions,
};
use kube::{Client, ResourceExt};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::backend::{conflict, ExecOutput, ProcessRecord, StoreBackend, StoreObject};
use crate::config::Config;
use crate::errors::{HaError, HaResult};

pub struct KubernetesBackend {
    clusters: Api<DynamicObject>,
    config_maps: Api<ConfigMap>,
    pods: Api<Pod>,
    record_prefix: String,
    pod_selector: String,
    role_label: String,
    exec_container: String,
}

impl KubernetesBackend {
    /// Connect using the in-cluster service account or the local kubeconfig.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        info!(
            "Kubernetes store backend initialized: namespace={} cluster={}",
            config.node.namespace, config.node.cluster_name
        );
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &Config) -> Self {
        let resource = &config.dcs.cluster_resource;
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let api_resource = ApiResource::from_gvk_with_plural(&gvk, &resource.plural);
        let namespace = config.node.namespace.as_str();

        Self {
            clusters: Api::namespaced_with(client.clone(), namespace, &api_resource),
            config_maps: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
            record_prefix: config.component_name().to_string(),
            pod_selector: config.dcs.pod_selector.clone(),
            role_label: config.dcs.role_label.clone(),
            exec_container: config.dcs.exec_container.clone(),
        }
    }
}

/// Member record of a pod: its IP is the engine address and `role_label`
/// carries the observed role.
fn to_process_record(pod: &Pod, role_label: &str) -> ProcessRecord {
    let labels = pod.labels().clone();
    ProcessRecord {
        name: pod.name_any(),
        address: pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .unwrap_or_default(),
        role: labels.get(role_label).cloned().unwrap_or_default(),
        labels,
    }
}

fn to_store_object(meta: &ObjectMeta) -> StoreObject {
    StoreObject {
        name: meta.name.clone().unwrap_or_default(),
        version: meta.resource_version.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
    }
}

fn read_error(context: &str, err: kube::Error) -> HaError {
    HaError::store_read(context.to_string(), err)
}

fn write_error(object: &str, expected: Option<&str>, err: kube::Error) -> HaError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => HaError::NotFound {
            kind: "object",
            name: object.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 => conflict(object, expected.unwrap_or("")),
        other => HaError::store_write(format!("write {object}"), other),
    }
}

impl StoreBackend for KubernetesBackend {
    fn get_cluster_object(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = HaResult<Option<StoreObject>>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let obj = self
                .clusters
                .get_opt(&name)
                .await
                .map_err(|e| read_error("get cluster object", e))?;
            Ok(obj.map(|o| to_store_object(&o.metadata)))
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
            let mut metadata = json!({ "annotations": annotations });
            if let Some(expected) = &expected_version {
                metadata["resourceVersion"] = json!(expected);
            }
            let body = json!({ "metadata": metadata });
            debug!(
                "K8s patch cluster object: name={} expected_version={:?}",
                name, expected_version
            );
            let obj = self
                .clusters
                .patch(&name, &PatchParams::default(), &Patch::Merge(&body))
                .await
                .map_err(|e| write_error(&name, expected_version.as_deref(), e))?;
            Ok(obj.metadata.resource_version.unwrap_or_default())
        })
    }

    fn list_records(
        &self,
    ) -> Pin<Box<dyn Future<Output = HaResult<Vec<StoreObject>>> + Send + '_>> {
        Box::pin(async move {
            let list = self
                .config_maps
                .list(&ListParams::default())
                .await
                .map_err(|e| read_error("list config maps", e))?;
            Ok(list
                .items
                .iter()
                .filter(|cm| cm.name_any().starts_with(&self.record_prefix))
                .map(|cm| to_store_object(&cm.metadata))
                .collect())
        })
    }

    fn apply_record(
        &self,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = HaResult<String>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let cm = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    annotations: Some(annotations),
                    ..Default::default()
                },
                ..Default::default()
            };

            let created = match self.config_maps.create(&PostParams::default(), &cm).await {
                Ok(created) => {
                    debug!("Created ConfigMap {}", name);
                    created
                }
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    let updated = self
                        .config_maps
                        .patch(&name, &PatchParams::default(), &Patch::Merge(&cm))
                        .await
                        .map_err(|e| write_error(&name, None, e))?;
                    debug!("Updated ConfigMap {}", name);
                    updated
                }
                Err(e) => return Err(write_error(&name, None, e)),
            };
            Ok(created.metadata.resource_version.unwrap_or_default())
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
            let params = DeleteParams {
                preconditions: expected_version.as_ref().map(|v| Preconditions {
                    resource_version: Some(v.clone()),
                    uid: None,
                }),
                ..Default::default()
            };
            match self.config_maps.delete(&name, &params).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
                Err(e) => Err(write_error(&name, expected_version.as_deref(), e)),
            }
        })
    }

    fn list_members(
        &self,
    ) -> Pin<Box<dyn Future<Output = HaResult<Vec<ProcessRecord>>> + Send + '_>> {
        Box::pin(async move {
            let mut params = ListParams::default();
            if !self.pod_selector.is_empty() {
                params = params.labels(&self.pod_selector);
            }
            let pods = self
                .pods
                .list(&params)
                .await
                .map_err(|e| read_error("list pods", e))?;
            Ok(pods
                .items
                .iter()
                .map(|p| to_process_record(p, &self.role_label))
                .collect())
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
            let exec_error = |source: anyhow::Error| HaError::Exec {
                member: member.clone(),
                source,
            };

            let mut params = AttachParams::default().stdin(false).stdout(true).stderr(true);
            if !self.exec_container.is_empty() {
                params = params.container(self.exec_container.clone());
            }

            debug!("K8s exec: pod={} command={}", member, command);
            let mut attached = self
                .pods
                .exec(&member, vec!["sh", "-c", command.as_str()], &params)
                .await
                .map_err(|e| exec_error(e.into()))?;

            let mut stdout_reader = attached
                .stdout()
                .ok_or_else(|| exec_error(anyhow::anyhow!("stdout stream not attached")))?;
            let mut stderr_reader = attached
                .stderr()
                .ok_or_else(|| exec_error(anyhow::anyhow!("stderr stream not attached")))?;
            let status = attached.take_status();

            let mut output = ExecOutput::default();
            let (out, err) = tokio::join!(
                stdout_reader.read_to_string(&mut output.stdout),
                stderr_reader.read_to_string(&mut output.stderr)
            );
            out.map_err(|e| exec_error(e.into()))?;
            err.map_err(|e| exec_error(e.into()))?;

            if let Some(status) = status {
                if let Some(status) = status.await {
                    if status.status.as_deref() == Some("Failure") {
                        return Err(exec_error(anyhow::anyhow!(
                            "command failed: {}",
                            status.message.unwrap_or_default()
                        )));
                    }
                }
            }
            attached.join().await.map_err(|e| exec_error(e.into()))?;
            Ok(output)
        })
    }
}
