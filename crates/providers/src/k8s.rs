//! Read-only Kubernetes provider.
//!
//! One lazily-initialized `kube::Client` per process, shared behind this
//! struct. Every method maps API objects into the simplified evidence
//! records; nothing here mutates cluster state.

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Event, Pod, ServiceAccount};
use kube::api::{Api, ListParams, LogParams};
use kube::Client;
use tokio::sync::OnceCell;
use tracing::debug;

use tarka_core::model::evidence::{
    ContainerSpec, ContainerState, ContainerStatusInfo, K8sEventInfo, OwnerChain, OwnerRef,
    PodCondition, PodInfo, RolloutStatus, TerminatedState,
};

/// Maximum ownerReference hops when resolving the workload controller.
const OWNER_CHAIN_MAX_DEPTH: usize = 5;

/// Service-account summary used by image-pull and IRSA diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceAccountInfo {
    pub name: String,
    pub namespace: String,
    pub annotations: std::collections::BTreeMap<String, String>,
    pub image_pull_secrets: Vec<String>,
}

/// Read-only Kubernetes client with thread-safe lazy init.
#[derive(Default)]
pub struct K8sClient {
    client: OnceCell<Client>,
}

impl K8sClient {
    #[must_use]
    pub fn new() -> Self {
        Self { client: OnceCell::new() }
    }

    async fn client(&self) -> Result<Client> {
        let c = self
            .client
            .get_or_try_init(|| async {
                Client::try_default()
                    .await
                    .context("Failed to initialize Kubernetes client")
            })
            .await?;
        Ok(c.clone())
    }

    /// Fetch the simplified pod record.
    pub async fn pod_info(&self, pod_name: &str, namespace: &str) -> Result<PodInfo> {
        let api: Api<Pod> = Api::namespaced(self.client().await?, namespace);
        let pod = api.get(pod_name).await.context("Failed to read pod")?;
        Ok(map_pod_info(&pod, namespace))
    }

    /// Pod `status.conditions[]`.
    pub async fn pod_conditions(&self, pod_name: &str, namespace: &str) -> Result<Vec<PodCondition>> {
        let api: Api<Pod> = Api::namespaced(self.client().await?, namespace);
        let pod = api.get(pod_name).await.context("Failed to read pod")?;
        let conditions = pod
            .status
            .and_then(|s| s.conditions)
            .unwrap_or_default()
            .into_iter()
            .map(|c| PodCondition {
                condition_type: c.type_,
                status: c.status,
                reason: c.reason,
                message: c.message,
            })
            .collect();
        Ok(conditions)
    }

    /// Recent events for a pod, newest last, capped at `limit`.
    pub async fn pod_events(&self, pod_name: &str, namespace: &str, limit: usize) -> Result<Vec<K8sEventInfo>> {
        self.events(namespace, "Pod", pod_name, limit).await
    }

    /// Recent events for any resource (`kind` is the involvedObject kind,
    /// e.g. `Job`).
    pub async fn events(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
        limit: usize,
    ) -> Result<Vec<K8sEventInfo>> {
        let api: Api<Event> = Api::namespaced(self.client().await?, namespace);
        let lp = ListParams::default()
            .fields(&format!("involvedObject.kind={kind},involvedObject.name={name}"));
        let list = api.list(&lp).await.context("Failed to list events")?;

        let mut events: Vec<K8sEventInfo> = list
            .items
            .into_iter()
            .map(|e| K8sEventInfo {
                event_type: e.type_,
                reason: e.reason,
                message: e.message,
                count: e.count,
                first_seen: e.first_timestamp.map(|t| t.0),
                last_seen: e.last_timestamp.map(|t| t.0),
            })
            .collect();
        // Oldest first so the report reads chronologically; keep the tail.
        events.sort_by_key(|e| e.last_seen.or(e.first_seen));
        if events.len() > limit {
            events.drain(..events.len() - limit);
        }
        Ok(events)
    }

    /// Walk ownerReferences up to the workload controller.
    ///
    /// A ReplicaSet owner is resolved one more hop to its Deployment so
    /// rollout-noisy dedupe keys land on the stable controller.
    pub async fn pod_owner_chain(&self, pod_name: &str, namespace: &str) -> Result<OwnerChain> {
        let client = self.client().await?;
        let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
        let pod = pods.get(pod_name).await.context("Failed to read pod")?;

        let mut owners: Vec<OwnerRef> = Vec::new();
        let mut current = pod
            .metadata
            .owner_references
            .unwrap_or_default()
            .into_iter()
            .find(|o| o.controller.unwrap_or(false))
            .map(|o| OwnerRef { kind: o.kind, name: o.name });

        let mut depth = 0;
        while let Some(owner) = current.take() {
            if depth >= OWNER_CHAIN_MAX_DEPTH {
                owners.push(owner);
                break;
            }
            depth += 1;

            let next = match owner.kind.as_str() {
                "ReplicaSet" => {
                    let api: Api<ReplicaSet> = Api::namespaced(client.clone(), namespace);
                    match api.get(&owner.name).await {
                        Ok(rs) => rs
                            .metadata
                            .owner_references
                            .unwrap_or_default()
                            .into_iter()
                            .find(|o| o.controller.unwrap_or(false))
                            .map(|o| OwnerRef { kind: o.kind, name: o.name }),
                        Err(e) => {
                            debug!(error = %e, rs = %owner.name, "owner chain: replicaset lookup failed");
                            None
                        }
                    }
                }
                "Job" => {
                    // CronJob-owned Jobs keep the Job as the workload; the
                    // CronJob hop is recorded but not adopted as identity.
                    let api: Api<Job> = Api::namespaced(client.clone(), namespace);
                    match api.get(&owner.name).await {
                        Ok(job) => job
                            .metadata
                            .owner_references
                            .unwrap_or_default()
                            .into_iter()
                            .find(|o| o.controller.unwrap_or(false) && o.kind == "CronJob")
                            .map(|o| OwnerRef { kind: o.kind, name: o.name }),
                        Err(_) => None,
                    }
                }
                _ => None,
            };

            owners.push(owner);
            current = next;
        }

        let workload = owners
            .iter()
            .find(|o| {
                matches!(
                    o.kind.as_str(),
                    "Deployment" | "StatefulSet" | "DaemonSet" | "Job"
                )
            })
            .cloned();

        Ok(OwnerChain { owners, workload })
    }

    /// Rollout/status summary for a workload kind.
    pub async fn workload_rollout_status(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<RolloutStatus> {
        let client = self.client().await?;
        let mut rs = RolloutStatus {
            kind: kind.to_string(),
            name: name.to_string(),
            source: Some("k8s_api".to_string()),
            ..RolloutStatus::default()
        };

        match kind {
            "Deployment" => {
                let api: Api<Deployment> = Api::namespaced(client, namespace);
                let d = api.get(name).await.context("Failed to read deployment")?;
                rs.generation = d.metadata.generation;
                if let Some(status) = d.status {
                    rs.replicas = status.replicas.map(i64::from);
                    rs.ready_replicas = status.ready_replicas.map(i64::from);
                    rs.updated_replicas = status.updated_replicas.map(i64::from);
                    rs.unavailable_replicas = status.unavailable_replicas.map(i64::from);
                    rs.observed_generation = status.observed_generation;
                }
            }
            "StatefulSet" => {
                let api: Api<StatefulSet> = Api::namespaced(client, namespace);
                let s = api.get(name).await.context("Failed to read statefulset")?;
                rs.generation = s.metadata.generation;
                if let Some(status) = s.status {
                    rs.replicas = Some(i64::from(status.replicas));
                    rs.ready_replicas = status.ready_replicas.map(i64::from);
                    rs.current_replicas = status.current_replicas.map(i64::from);
                    rs.updated_replicas = status.updated_replicas.map(i64::from);
                    rs.observed_generation = status.observed_generation;
                }
            }
            "DaemonSet" => {
                let api: Api<DaemonSet> = Api::namespaced(client, namespace);
                let d = api.get(name).await.context("Failed to read daemonset")?;
                if let Some(status) = d.status {
                    rs.desired_number_scheduled = Some(i64::from(status.desired_number_scheduled));
                    rs.number_ready = Some(i64::from(status.number_ready));
                    rs.updated_number_scheduled = status.updated_number_scheduled.map(i64::from);
                }
            }
            "Job" => {
                let api: Api<Job> = Api::namespaced(client, namespace);
                let j = api.get(name).await.context("Failed to read job")?;
                if let Some(status) = j.status {
                    rs.active = status.active.map(i64::from);
                    rs.succeeded = status.succeeded.map(i64::from);
                    rs.failed = status.failed.map(i64::from);
                    rs.start_time = status.start_time.map(|t| t.0);
                    rs.completion_time = status.completion_time.map(|t| t.0);
                }
            }
            "CronJob" => {
                let api: Api<CronJob> = Api::namespaced(client, namespace);
                let c = api.get(name).await.context("Failed to read cronjob")?;
                if let Some(status) = c.status {
                    rs.start_time = status.last_schedule_time.map(|t| t.0);
                }
            }
            other => anyhow::bail!("unsupported workload kind: {other}"),
        }
        Ok(rs)
    }

    /// List pods by label selector (e.g. `job-name=etl-nightly`).
    pub async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<PodInfo>> {
        let api: Api<Pod> = Api::namespaced(self.client().await?, namespace);
        let mut lp = ListParams::default();
        if let Some(sel) = label_selector {
            lp = lp.labels(sel);
        }
        let list = api.list(&lp).await.context("Failed to list pods")?;
        Ok(list.items.iter().map(|p| map_pod_info(p, namespace)).collect())
    }

    /// Read pod logs via the K8s API. `previous=true` reads the prior
    /// terminated container instance (crashloop evidence).
    pub async fn read_pod_log(
        &self,
        pod_name: &str,
        namespace: &str,
        container: Option<&str>,
        previous: bool,
        tail_lines: i64,
    ) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client().await?, namespace);
        let lp = LogParams {
            container: container.map(ToString::to_string),
            previous,
            tail_lines: Some(tail_lines),
            ..LogParams::default()
        };
        api.logs(pod_name, &lp).await.context("Failed to read pod logs")
    }

    /// Service-account summary (annotations carry the IRSA role ARN).
    pub async fn service_account_info(&self, namespace: &str, name: &str) -> Result<ServiceAccountInfo> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client().await?, namespace);
        let sa = api.get(name).await.context("Failed to read service account")?;
        Ok(ServiceAccountInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            annotations: sa.metadata.annotations.unwrap_or_default().into_iter().collect(),
            image_pull_secrets: sa
                .image_pull_secrets
                .unwrap_or_default()
                .into_iter()
                .map(|s| s.name)
                .collect(),
        })
    }
}

fn map_terminated(t: &k8s_openapi::api::core::v1::ContainerStateTerminated) -> TerminatedState {
    TerminatedState {
        exit_code: Some(t.exit_code),
        reason: t.reason.clone(),
        started_at: t.started_at.as_ref().map(|x| x.0),
        finished_at: t.finished_at.as_ref().map(|x| x.0),
    }
}

fn map_pod_info(pod: &Pod, namespace: &str) -> PodInfo {
    let spec = pod.spec.as_ref();
    let status = pod.status.as_ref();

    let containers = spec
        .map(|s| {
            s.containers
                .iter()
                .map(|c| ContainerSpec { name: c.name.clone(), image: c.image.clone() })
                .collect()
        })
        .unwrap_or_default();

    let container_statuses = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| {
                    let state = cs.state.as_ref().map(|st| {
                        if let Some(w) = &st.waiting {
                            ContainerState::Waiting {
                                reason: w.reason.clone(),
                                message: w.message.clone(),
                            }
                        } else if let Some(t) = &st.terminated {
                            ContainerState::Terminated(map_terminated(t))
                        } else {
                            ContainerState::Running
                        }
                    });
                    let last_state = cs
                        .last_state
                        .as_ref()
                        .and_then(|st| st.terminated.as_ref())
                        .map(map_terminated);
                    ContainerStatusInfo {
                        name: cs.name.clone(),
                        ready: cs.ready,
                        restart_count: cs.restart_count,
                        state,
                        last_state,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    PodInfo {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: namespace.to_string(),
        phase: status.and_then(|s| s.phase.clone()),
        status_reason: status.and_then(|s| s.reason.clone()),
        node: spec.and_then(|s| s.node_name.clone()),
        service_account_name: spec.and_then(|s| s.service_account_name.clone()),
        labels: pod.metadata.labels.clone().unwrap_or_default().into_iter().collect(),
        containers,
        container_statuses,
        created_at: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_pod_info_waiting_reason() {
        let pod: Pod = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "api-1", "labels": {"app": "api"}},
            "spec": {
                "containers": [{"name": "app", "image": "registry.local/app:1.2"}],
                "serviceAccountName": "api-sa"
            },
            "status": {
                "phase": "Pending",
                "containerStatuses": [{
                    "name": "app",
                    "ready": false,
                    "restartCount": 7,
                    "image": "registry.local/app:1.2",
                    "imageID": "",
                    "state": {"waiting": {"reason": "CrashLoopBackOff", "message": "back-off"}},
                    "lastState": {"terminated": {"exitCode": 1, "reason": "Error"}}
                }]
            }
        }))
        .unwrap();

        let info = map_pod_info(&pod, "prod");
        assert_eq!(info.name, "api-1");
        assert_eq!(info.phase.as_deref(), Some("Pending"));
        assert_eq!(info.service_account_name.as_deref(), Some("api-sa"));
        let cs = &info.container_statuses[0];
        assert_eq!(cs.restart_count, 7);
        match &cs.state {
            Some(ContainerState::Waiting { reason, .. }) => {
                assert_eq!(reason.as_deref(), Some("CrashLoopBackOff"));
            }
            other => panic!("unexpected state: {other:?}"),
        }
        assert_eq!(cs.last_state.as_ref().unwrap().exit_code, Some(1));
    }
}
