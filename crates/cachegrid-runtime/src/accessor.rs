//! Cluster State Accessor
//!
//! Read side of the controller: fetches the runtime, its dataset, and the
//! process groups behind each component. Nothing here mutates cluster state
//! except the two status writers and the worker scale patch on
//! [`KubeClient`], which the reconcilers only call through
//! [`cachegrid_common::retry::update_on_conflict`] or after persisting the
//! matching condition.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, StatefulSet};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use cachegrid_common::crd::{CacheRuntime, CacheStateName, Dataset};
use cachegrid_common::{Error, ObjectKey, FIELD_MANAGER};

use crate::component::{Component, ProcessGroup};

/// Trait abstracting Kubernetes client operations for the cachegrid controller
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a CacheRuntime, None if it does not exist
    async fn get_runtime(&self, namespace: &str, name: &str)
        -> Result<Option<CacheRuntime>, Error>;

    /// Get a Dataset, None if it does not exist
    async fn get_dataset(&self, namespace: &str, name: &str) -> Result<Option<Dataset>, Error>;

    /// Get a StatefulSet, None if it does not exist
    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error>;

    /// Get a DaemonSet, None if it does not exist
    async fn get_daemon_set(&self, namespace: &str, name: &str)
        -> Result<Option<DaemonSet>, Error>;

    /// Write the status of `runtime`, conditional on its resource version.
    ///
    /// A stale resource version fails with [`Error::Conflict`].
    async fn write_runtime_status(&self, runtime: &CacheRuntime) -> Result<CacheRuntime, Error>;

    /// Write the status of `dataset`, conditional on its resource version.
    ///
    /// A stale resource version fails with [`Error::Conflict`].
    async fn write_dataset_status(&self, dataset: &Dataset) -> Result<Dataset, Error>;

    /// Set `spec.replicas` of a StatefulSet
    async fn scale_stateful_set(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Build a status merge patch keyed on the object's resource version.
///
/// The API server rejects a patch whose `metadata.resourceVersion` is stale
/// with 409. A merge patch only removes what it sets to null, so every
/// top-level field in `cleared` that the status no longer carries and every
/// cache state key missing from `cacheStates` is sent as an explicit null.
fn status_patch<S: serde::Serialize>(
    api_version: &str,
    kind: &str,
    resource_version: Option<String>,
    status: &S,
    cleared: &[&str],
) -> Result<serde_json::Value, Error> {
    let mut status = serde_json::to_value(status)?;
    if let Some(fields) = status.as_object_mut() {
        for field in cleared {
            fields
                .entry(field.to_string())
                .or_insert(serde_json::Value::Null);
        }
        let states = fields
            .entry("cacheStates")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        if let Some(states) = states.as_object_mut() {
            for name in CacheStateName::ALL {
                if let serde_json::Value::String(key) = serde_json::to_value(name)? {
                    states.entry(key).or_insert(serde_json::Value::Null);
                }
            }
        }
    }
    Ok(serde_json::json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    }))
}

/// Status merge patch for a runtime
pub(crate) fn runtime_status_patch(runtime: &CacheRuntime) -> Result<serde_json::Value, Error> {
    status_patch(
        "cachegrid.dev/v1alpha1",
        "CacheRuntime",
        runtime.resource_version(),
        &runtime.status.clone().unwrap_or_default(),
        &["gateway", "conditions"],
    )
}

/// Status merge patch for a dataset
pub(crate) fn dataset_status_patch(dataset: &Dataset) -> Result<serde_json::Value, Error> {
    status_patch(
        "cachegrid.dev/v1alpha1",
        "Dataset",
        dataset.resource_version(),
        &dataset.status.clone().unwrap_or_default(),
        &["access", "fileNum", "conditions", "runtimes"],
    )
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_runtime(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CacheRuntime>, Error> {
        let api: Api<CacheRuntime> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, "CacheRuntime", name))
    }

    async fn get_dataset(&self, namespace: &str, name: &str) -> Result<Option<Dataset>, Error> {
        let api: Api<Dataset> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, "Dataset", name))
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, "StatefulSet", name))
    }

    async fn get_daemon_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DaemonSet>, Error> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, "DaemonSet", name))
    }

    async fn write_runtime_status(&self, runtime: &CacheRuntime) -> Result<CacheRuntime, Error> {
        let name = runtime.name_any();
        let namespace = runtime.namespace().unwrap_or_default();
        let api: Api<CacheRuntime> = Api::namespaced(self.client.clone(), &namespace);

        let patch = runtime_status_patch(runtime)?;

        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, "CacheRuntime", &name))
    }

    async fn write_dataset_status(&self, dataset: &Dataset) -> Result<Dataset, Error> {
        let name = dataset.name_any();
        let namespace = dataset.namespace().unwrap_or_default();
        let api: Api<Dataset> = Api::namespaced(self.client.clone(), &namespace);

        let patch = dataset_status_patch(dataset)?;

        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, "Dataset", &name))
    }

    async fn scale_stateful_set(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, "StatefulSet", name))?;
        Ok(())
    }
}

/// What the accessor found behind one component
#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    /// Process group exists
    Present(ProcessGroup),
    /// Process group does not exist (yet)
    Missing,
    /// Process group exists in a legacy shape this controller cannot manage
    Deprecated(String),
}

impl Observation {
    /// Unwrap the process group, mapping the absent cases onto the error
    /// taxonomy: `Missing` becomes [`Error::NotFound`], `Deprecated` becomes
    /// [`Error::DeprecatedLayout`]
    pub fn require(self, component: Component, key: &ObjectKey) -> Result<ProcessGroup, Error> {
        let group_name = component.group_name(&key.name);
        match self {
            Self::Present(group) => Ok(group),
            Self::Missing => Err(Error::not_found(
                component.workload_kind(),
                format!("{}/{}", key.namespace, group_name),
            )),
            Self::Deprecated(message) => Err(Error::deprecated_layout(
                component.as_str(),
                format!("{}/{}", key.namespace, group_name),
                message,
            )),
        }
    }
}

/// Runtime plus the observation of every component at one point in time
#[derive(Clone, Debug)]
pub struct ClusterState {
    /// The runtime object, spec and status
    pub runtime: CacheRuntime,
    /// Master process group
    pub master: Observation,
    /// Worker process group
    pub worker: Observation,
    /// Fuse process group
    pub fuse: Observation,
}

impl ClusterState {
    /// Observation for one component
    pub fn component(&self, component: Component) -> &Observation {
        match component {
            Component::Master => &self.master,
            Component::Worker => &self.worker,
            Component::Fuse => &self.fuse,
        }
    }
}

/// Read-only view of the cluster for one runtime key
#[derive(Clone)]
pub struct ClusterStateAccessor {
    kube: Arc<dyn KubeClient>,
}

impl ClusterStateAccessor {
    /// Create an accessor over the given client
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }

    /// Current runtime, [`Error::NotFound`] if it does not exist
    pub async fn runtime(&self, key: &ObjectKey) -> Result<CacheRuntime, Error> {
        self.kube
            .get_runtime(&key.namespace, &key.name)
            .await?
            .ok_or_else(|| Error::not_found("CacheRuntime", key.to_string()))
    }

    /// Current dataset bound to the runtime, None if there is none
    pub async fn dataset(&self, key: &ObjectKey) -> Result<Option<Dataset>, Error> {
        self.kube.get_dataset(&key.namespace, &key.name).await
    }

    /// Observe the process group backing `component`
    pub async fn observe_component(
        &self,
        key: &ObjectKey,
        component: Component,
    ) -> Result<Observation, Error> {
        let group_name = component.group_name(&key.name);
        match component {
            Component::Master => {
                let sts = self.kube.get_stateful_set(&key.namespace, &group_name).await?;
                Ok(sts
                    .map(|s| Observation::Present(ProcessGroup::from_stateful_set(&s)))
                    .unwrap_or(Observation::Missing))
            }
            Component::Worker => {
                if let Some(sts) = self.kube.get_stateful_set(&key.namespace, &group_name).await? {
                    return Ok(Observation::Present(ProcessGroup::from_stateful_set(&sts)));
                }
                // Workers used to run as a DaemonSet; such runtimes predate
                // replica management and are left alone
                if self
                    .kube
                    .get_daemon_set(&key.namespace, &group_name)
                    .await?
                    .is_some()
                {
                    warn!(
                        runtime = %key,
                        group = %group_name,
                        "worker group runs as a DaemonSet, legacy layout"
                    );
                    return Ok(Observation::Deprecated(format!(
                        "worker group {group_name} is a DaemonSet; only StatefulSet workers are managed"
                    )));
                }
                debug!(runtime = %key, group = %group_name, "worker group not found");
                Ok(Observation::Missing)
            }
            Component::Fuse => {
                let ds = self.kube.get_daemon_set(&key.namespace, &group_name).await?;
                Ok(ds
                    .map(|d| Observation::Present(ProcessGroup::from_daemon_set(&d)))
                    .unwrap_or(Observation::Missing))
            }
        }
    }

    /// Runtime and every component observation.
    ///
    /// Fails with [`Error::NotFound`] only when the runtime itself is
    /// missing; absent process groups are reported as observations.
    pub async fn observe(&self, key: &ObjectKey) -> Result<ClusterState, Error> {
        let runtime = self.runtime(key).await?;
        Ok(ClusterState {
            runtime,
            master: self.observe_component(key, Component::Master).await?,
            worker: self.observe_component(key, Component::Worker).await?,
            fuse: self.observe_component(key, Component::Fuse).await?,
        })
    }
}
