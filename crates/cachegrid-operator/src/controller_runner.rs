//! Controller runner - builds the CacheRuntime controller future
//!
//! The controller reconciles `CacheRuntime` objects and is also triggered by
//! their process groups (StatefulSets and DaemonSets carrying the runtime
//! label) and by the Dataset bound to them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, StatefulSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};

use cachegrid_common::crd::{CacheRuntime, Dataset};
use cachegrid_common::RUNTIME_LABEL_KEY;
use cachegrid_runtime::{error_policy, reconcile, Context, ControllerConfig};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Api scoped to the watched namespace, or cluster-wide
fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Process groups of any runtime carry the runtime label
fn group_watcher() -> WatcherConfig {
    WatcherConfig::default()
        .labels(RUNTIME_LABEL_KEY)
        .timeout(WATCH_TIMEOUT_SECS)
}

/// Runtime owning a process group, from its runtime label
pub fn runtime_for_group(meta: &ObjectMeta) -> Option<ObjectRef<CacheRuntime>> {
    let namespace = meta.namespace.as_deref()?;
    let runtime = meta.labels.as_ref()?.get(RUNTIME_LABEL_KEY)?;
    Some(ObjectRef::new(runtime).within(namespace))
}

/// Runtime bound to a dataset: same namespace and name
pub fn runtime_for_dataset(meta: &ObjectMeta) -> Option<ObjectRef<CacheRuntime>> {
    let namespace = meta.namespace.as_deref()?;
    let name = meta.name.as_deref()?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Build the CacheRuntime controller future
pub fn build_runtime_controller(
    client: Client,
    config: ControllerConfig,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let namespace = config.watch_namespace.clone();
    let ns = namespace.as_deref();

    let runtimes: Api<CacheRuntime> = scoped_api(client.clone(), ns);
    let stateful_sets: Api<StatefulSet> = scoped_api(client.clone(), ns);
    let daemon_sets: Api<DaemonSet> = scoped_api(client.clone(), ns);
    let datasets: Api<Dataset> = scoped_api(client.clone(), ns);

    let ctx = Arc::new(Context::builder(client).config(config).build());

    tracing::info!(namespace = ?namespace, "- CacheRuntime controller");

    Box::pin(
        Controller::new(runtimes, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .watches(stateful_sets, group_watcher(), |sts| runtime_for_group(&sts.metadata))
            .watches(daemon_sets, group_watcher(), |ds| runtime_for_group(&ds.metadata))
            .watches(
                datasets,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                |ds| runtime_for_dataset(&ds.metadata),
            )
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("CacheRuntime")),
    )
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
