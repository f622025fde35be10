//! In-memory cluster for reconciler tests
//!
//! Objects carry resource versions and status writes are conditional on
//! them, like the API server. Writes go through the same status merge patch
//! the real client sends and are applied with merge patch semantics, so a
//! field the patch forgets to clear survives the write. Tests can inject conflicts (a concurrent
//! writer bumping the version between our read and our write) and failures
//! on dataset writes, and count how many writes actually happened.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetStatus, StatefulSet, StatefulSetSpec, StatefulSetStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use cachegrid_common::crd::{
    CacheRuntime, CacheRuntimeSpec, CacheRuntimeStatus, ComponentSpec, Dataset, DatasetSpec,
    DatasetStatus,
};
use cachegrid_common::{Error, ObjectKey};

use crate::accessor::{dataset_status_patch, runtime_status_patch, KubeClient};

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        resource_version: Some("1".to_string()),
        generation: Some(1),
        ..Default::default()
    }
}

fn key_of(meta: &ObjectMeta) -> ObjectKey {
    ObjectKey::new(
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn bump(meta: &mut ObjectMeta) {
    let next = meta
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    meta.resource_version = Some(next.to_string());
}

/// CacheRuntime with the given declared replica counts
pub fn runtime(namespace: &str, name: &str, master: i32, worker: i32, fuse: i32) -> CacheRuntime {
    let mut rt = CacheRuntime::new(
        name,
        CacheRuntimeSpec {
            master: ComponentSpec { replicas: master },
            worker: ComponentSpec { replicas: worker },
            fuse: ComponentSpec { replicas: fuse },
            ..Default::default()
        },
    );
    rt.metadata = meta(namespace, name);
    rt
}

/// Dataset with no status yet
pub fn dataset(namespace: &str, name: &str) -> Dataset {
    let mut ds = Dataset::new(name, DatasetSpec::default());
    ds.metadata = meta(namespace, name);
    ds
}

/// StatefulSet wanting `replicas`, all scheduled, `ready` of them ready
pub fn stateful_set(namespace: &str, name: &str, replicas: i32, ready: i32) -> StatefulSet {
    StatefulSet {
        metadata: meta(namespace, name),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: Some(StatefulSetStatus {
            replicas,
            ready_replicas: Some(ready),
            available_replicas: Some(ready),
            ..Default::default()
        }),
    }
}

/// DaemonSet scheduled on `desired` nodes with `ready` pods ready
pub fn daemon_set(namespace: &str, name: &str, desired: i32, ready: i32) -> DaemonSet {
    DaemonSet {
        metadata: meta(namespace, name),
        spec: None,
        status: Some(DaemonSetStatus {
            desired_number_scheduled: desired,
            current_number_scheduled: desired,
            number_ready: ready,
            number_available: Some(ready),
            number_unavailable: Some(desired - ready),
            ..Default::default()
        }),
    }
}

#[derive(Default)]
struct Objects {
    runtimes: BTreeMap<ObjectKey, CacheRuntime>,
    datasets: BTreeMap<ObjectKey, Dataset>,
    stateful_sets: BTreeMap<ObjectKey, StatefulSet>,
    daemon_sets: BTreeMap<ObjectKey, DaemonSet>,
    scale_calls: Vec<(String, i32)>,
}

/// Fake API server backing [`KubeClient`]
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<Objects>,
    runtime_conflicts: AtomicU32,
    dataset_conflicts: AtomicU32,
    fail_dataset_writes: AtomicBool,
    runtime_writes: AtomicU32,
    dataset_writes: AtomicU32,
}

impl FakeCluster {
    /// Empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, Objects> {
        self.objects.lock().expect("mutex should not be poisoned")
    }

    /// Insert or replace a runtime
    pub fn put_runtime(&self, rt: CacheRuntime) {
        self.objects().runtimes.insert(key_of(&rt.metadata), rt);
    }

    /// Insert or replace a dataset
    pub fn put_dataset(&self, ds: Dataset) {
        self.objects().datasets.insert(key_of(&ds.metadata), ds);
    }

    /// Insert or replace a StatefulSet
    pub fn put_stateful_set(&self, sts: StatefulSet) {
        self.objects().stateful_sets.insert(key_of(&sts.metadata), sts);
    }

    /// Insert or replace a DaemonSet
    pub fn put_daemon_set(&self, ds: DaemonSet) {
        self.objects().daemon_sets.insert(key_of(&ds.metadata), ds);
    }

    /// Change the declared spec of a stored runtime
    pub fn edit_runtime(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut CacheRuntimeSpec)) {
        let mut objects = self.objects();
        let rt = objects
            .runtimes
            .get_mut(&ObjectKey::new(namespace, name))
            .expect("runtime should exist");
        edit(&mut rt.spec);
        rt.metadata.generation = rt.metadata.generation.map(|g| g + 1);
        bump(&mut rt.metadata);
    }

    /// Let a StatefulSet catch up with its `spec.replicas`
    pub fn settle_stateful_set(&self, namespace: &str, name: &str) {
        let mut objects = self.objects();
        let sts = objects
            .stateful_sets
            .get_mut(&ObjectKey::new(namespace, name))
            .expect("stateful set should exist");
        let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        sts.status = Some(StatefulSetStatus {
            replicas,
            ready_replicas: Some(replicas),
            available_replicas: Some(replicas),
            ..Default::default()
        });
    }

    /// Stored runtime status
    pub fn runtime_status(&self, namespace: &str, name: &str) -> CacheRuntimeStatus {
        self.objects()
            .runtimes
            .get(&ObjectKey::new(namespace, name))
            .and_then(|rt| rt.status.clone())
            .unwrap_or_default()
    }

    /// Stored dataset status
    pub fn dataset_status(&self, namespace: &str, name: &str) -> DatasetStatus {
        self.objects()
            .datasets
            .get(&ObjectKey::new(namespace, name))
            .and_then(|ds| ds.status.clone())
            .unwrap_or_default()
    }

    /// Stored `spec.replicas` of a StatefulSet
    pub fn stateful_set_replicas(&self, namespace: &str, name: &str) -> Option<i32> {
        self.objects()
            .stateful_sets
            .get(&ObjectKey::new(namespace, name))
            .and_then(|s| s.spec.as_ref())
            .and_then(|s| s.replicas)
    }

    /// Make the next `n` runtime status writes lose a race
    pub fn inject_runtime_conflicts(&self, n: u32) {
        self.runtime_conflicts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` dataset status writes lose a race
    pub fn inject_dataset_conflicts(&self, n: u32) {
        self.dataset_conflicts.store(n, Ordering::SeqCst);
    }

    /// Fail every dataset status write with an internal error
    pub fn fail_dataset_writes(&self) {
        self.fail_dataset_writes.store(true, Ordering::SeqCst);
    }

    /// Runtime status write attempts, accepted or not
    pub fn runtime_writes(&self) -> u32 {
        self.runtime_writes.load(Ordering::SeqCst)
    }

    /// Dataset status write attempts, accepted or not
    pub fn dataset_writes(&self) -> u32 {
        self.dataset_writes.load(Ordering::SeqCst)
    }

    /// Every scale patch issued, as (StatefulSet name, replicas)
    pub fn scale_calls(&self) -> Vec<(String, i32)> {
        self.objects().scale_calls.clone()
    }
}

/// Apply a JSON merge patch: objects merge key by key, null removes a key,
/// anything else replaces the target
fn merge(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let serde_json::Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = serde_json::Value::Object(Default::default());
    }
    if let serde_json::Value::Object(fields) = target {
        for (key, value) in patch {
            if value.is_null() {
                fields.remove(key);
            } else {
                merge(
                    fields.entry(key.clone()).or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
    }
}

/// Stored status after applying the `status` part of a merge patch
fn patched<S>(stored: &Option<S>, patch: &serde_json::Value) -> Result<Option<S>, Error>
where
    S: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut status = serde_json::to_value(stored)?;
    merge(&mut status, &patch["status"]);
    Ok(Some(serde_json::from_value(status)?))
}

/// Take one injected conflict, if any are left
fn take_conflict(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn get_runtime(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CacheRuntime>, Error> {
        Ok(self.objects().runtimes.get(&ObjectKey::new(namespace, name)).cloned())
    }

    async fn get_dataset(&self, namespace: &str, name: &str) -> Result<Option<Dataset>, Error> {
        Ok(self.objects().datasets.get(&ObjectKey::new(namespace, name)).cloned())
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        Ok(self
            .objects()
            .stateful_sets
            .get(&ObjectKey::new(namespace, name))
            .cloned())
    }

    async fn get_daemon_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DaemonSet>, Error> {
        Ok(self
            .objects()
            .daemon_sets
            .get(&ObjectKey::new(namespace, name))
            .cloned())
    }

    async fn write_runtime_status(&self, runtime: &CacheRuntime) -> Result<CacheRuntime, Error> {
        self.runtime_writes.fetch_add(1, Ordering::SeqCst);
        let key = key_of(&runtime.metadata);
        let mut objects = self.objects();
        let stored = objects
            .runtimes
            .get_mut(&key)
            .ok_or_else(|| Error::not_found("CacheRuntime", key.to_string()))?;

        if take_conflict(&self.runtime_conflicts) {
            bump(&mut stored.metadata);
            return Err(Error::conflict("CacheRuntime", key.to_string()));
        }
        if stored.resource_version() != runtime.resource_version() {
            return Err(Error::conflict("CacheRuntime", key.to_string()));
        }

        stored.status = patched(&stored.status, &runtime_status_patch(runtime)?)?;
        bump(&mut stored.metadata);
        Ok(stored.clone())
    }

    async fn write_dataset_status(&self, dataset: &Dataset) -> Result<Dataset, Error> {
        self.dataset_writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_dataset_writes.load(Ordering::SeqCst) {
            return Err(Error::internal("injected dataset write failure"));
        }

        let key = key_of(&dataset.metadata);
        let mut objects = self.objects();
        let stored = objects
            .datasets
            .get_mut(&key)
            .ok_or_else(|| Error::not_found("Dataset", key.to_string()))?;

        if take_conflict(&self.dataset_conflicts) {
            bump(&mut stored.metadata);
            return Err(Error::conflict("Dataset", key.to_string()));
        }
        if stored.resource_version() != dataset.resource_version() {
            return Err(Error::conflict("Dataset", key.to_string()));
        }

        stored.status = patched(&stored.status, &dataset_status_patch(dataset)?)?;
        bump(&mut stored.metadata);
        Ok(stored.clone())
    }

    async fn scale_stateful_set(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error> {
        let mut objects = self.objects();
        objects.scale_calls.push((name.to_string(), replicas));
        let sts = objects
            .stateful_sets
            .get_mut(&ObjectKey::new(namespace, name))
            .ok_or_else(|| Error::not_found("StatefulSet", format!("{namespace}/{name}")))?;
        sts.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
        bump(&mut sts.metadata);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_semantics() {
        let mut target = json!({ "a": { "x": 1, "y": 2 }, "b": [1, 2], "c": "keep" });
        merge(&mut target, &json!({ "a": { "y": null, "z": 3 }, "b": [3] }));
        assert_eq!(target, json!({ "a": { "x": 1, "z": 3 }, "b": [3], "c": "keep" }));
    }
}
