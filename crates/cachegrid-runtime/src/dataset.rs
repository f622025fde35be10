//! Dataset status synchronizer
//!
//! The Dataset status is derived entirely from its runtime's status, the
//! outcome of the last health check, and the cache snapshot of the pass. The
//! controller is its only writer: a dataset records exactly one runtime
//! binding, and a dataset already bound to a different runtime is refused.

use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{debug, info};

use cachegrid_common::conditions;
use cachegrid_common::crd::{
    reasons, AccessStatus, CacheRuntime, CacheRuntimeStatus, Condition, ConditionStatus, Dataset,
    DatasetConditionType, DatasetPhase, DatasetStatus, RuntimeRef,
};
use cachegrid_common::events::actions;
use cachegrid_common::retry::{update_on_conflict, UpdateOutcome};
use cachegrid_common::{Error, ObjectKey};

use crate::cache::CacheStateSnapshot;
use crate::controller::Context;
use crate::phase::{project_dataset_phase, RuntimeHealth};

/// Record the binding to `key`, refusing a dataset bound elsewhere
fn ensure_binding(status: &mut DatasetStatus, key: &ObjectKey) -> Result<(), Error> {
    let binding = RuntimeRef::new(&key.namespace, &key.name);
    match status.runtimes.as_slice() {
        [] => {
            status.runtimes = vec![binding];
            Ok(())
        }
        [existing] if existing.name == binding.name && existing.namespace == binding.namespace => {
            // Normalise the category written by older controllers
            status.runtimes = vec![binding];
            Ok(())
        }
        bound => Err(Error::validation_for(
            key.to_string(),
            format!(
                "dataset is already bound to {}",
                bound
                    .iter()
                    .map(|r| format!("{}/{}", r.namespace, r.name))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        )),
    }
}

/// Upsert DatasetReady and DatasetRuntimeHealthy for `phase`
fn apply_conditions(
    status: &mut DatasetStatus,
    key: &ObjectKey,
    phase: DatasetPhase,
    health: &RuntimeHealth,
) {
    let ready = match (phase, health) {
        (DatasetPhase::Bound, _) => Condition::new(
            DatasetConditionType::Ready,
            ConditionStatus::True,
            reasons::DATASET_BOUND,
            format!("The dataset is bound to runtime {key}."),
        ),
        (_, RuntimeHealth::Failed(message)) => Condition::new(
            DatasetConditionType::Ready,
            ConditionStatus::False,
            reasons::RUNTIME_UNHEALTHY,
            message.clone(),
        ),
        _ => Condition::new(
            DatasetConditionType::Ready,
            ConditionStatus::False,
            reasons::RUNTIME_NOT_READY,
            format!("Runtime {key} has components that are not ready."),
        ),
    };
    conditions::upsert_in_place(&mut status.conditions, ready);

    let healthy = match health {
        RuntimeHealth::Healthy { .. } => Condition::new(
            DatasetConditionType::RuntimeHealthy,
            ConditionStatus::True,
            reasons::RUNTIME_HEALTHY,
            format!("Runtime {key} passed its last health check."),
        ),
        RuntimeHealth::Failed(message) => Condition::new(
            DatasetConditionType::RuntimeHealthy,
            ConditionStatus::False,
            reasons::RUNTIME_UNHEALTHY,
            message.clone(),
        ),
    };
    conditions::upsert_in_place(&mut status.conditions, healthy);
}

/// Pure projection of a runtime onto a dataset status
pub fn project_status(
    status: &mut DatasetStatus,
    key: &ObjectKey,
    runtime: &CacheRuntimeStatus,
    health: &RuntimeHealth,
    snapshot: &CacheStateSnapshot,
) -> Result<DatasetPhase, Error> {
    ensure_binding(status, key)?;

    let phase = project_dataset_phase(runtime, health);
    status.phase = phase;
    status.cache_states = snapshot.merged_over(&runtime.cache_states);
    if snapshot.file_num.is_some() {
        status.file_num = snapshot.file_num;
    }
    status.access = runtime.gateway.as_ref().map(|g| AccessStatus {
        endpoint: g.endpoint.clone(),
    });
    apply_conditions(status, key, phase, health);
    Ok(phase)
}

/// Apply `mutate` to the dataset status under the optimistic update loop.
///
/// Returns None when the dataset does not exist.
async fn update_dataset<F>(
    ctx: &Context,
    key: &ObjectKey,
    operation: &str,
    mut mutate: F,
) -> Result<Option<(DatasetPhase, DatasetPhase)>, Error>
where
    F: FnMut(&mut DatasetStatus) -> Result<DatasetPhase, Error>,
{
    let accessor = ctx.accessor();
    if accessor.dataset(key).await?.is_none() {
        debug!(runtime = %key, operation, "no dataset bound, skipping");
        return Ok(None);
    }

    let mut phases = (DatasetPhase::NotBound, DatasetPhase::NotBound);
    let outcome = update_on_conflict(
        &ctx.config.status_retry,
        operation,
        || async {
            accessor.dataset(key).await.and_then(|ds| {
                ds.ok_or_else(|| Error::not_found("Dataset", key.to_string()))
            })
        },
        |ds: &mut Dataset| {
            let status = ds.status.get_or_insert_with(Default::default);
            let from = status.phase;
            let to = mutate(status)?;
            phases = (from, to);
            Ok(())
        },
        |ds: Dataset| async move { ctx.kube.write_dataset_status(&ds).await },
    )
    .await?;

    let (from, to) = phases;
    if let UpdateOutcome::Updated(ds) = outcome {
        if from != to {
            info!(runtime = %key, from = %from, to = %to, "dataset phase changed");
            let type_ = if to == DatasetPhase::Failed {
                EventType::Warning
            } else {
                EventType::Normal
            };
            ctx.events
                .publish(
                    &ds.object_ref(&()),
                    type_,
                    &to.to_string(),
                    actions::BIND,
                    None,
                )
                .await;
        }
    }
    Ok(Some((from, to)))
}

/// Project the runtime onto its dataset.
///
/// Returns the dataset phase, or None when no dataset exists for the
/// runtime.
pub async fn sync_dataset_status(
    ctx: &Context,
    key: &ObjectKey,
    runtime: &CacheRuntime,
    health: &RuntimeHealth,
    snapshot: &CacheStateSnapshot,
) -> Result<Option<DatasetPhase>, Error> {
    let runtime_status = runtime.status.clone().unwrap_or_default();
    let phases = update_dataset(ctx, key, "sync_dataset_status", |status| {
        project_status(status, key, &runtime_status, health, snapshot)
    })
    .await?;
    Ok(phases.map(|(_, to)| to))
}

/// Mark the dataset Failed after a failed health check.
///
/// Uses the same optimistic update loop as every other status write and
/// returns its errors; the caller decides whether they matter.
pub async fn mark_dataset_failed(ctx: &Context, key: &ObjectKey, message: &str) -> Result<(), Error> {
    let health = RuntimeHealth::Failed(message.to_string());
    update_dataset(ctx, key, "mark_dataset_failed", |status| {
        ensure_binding(status, key)?;
        status.phase = DatasetPhase::Failed;
        apply_conditions(status, key, DatasetPhase::Failed, &health);
        Ok(DatasetPhase::Failed)
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cachegrid_common::crd::{CacheStateName, GatewayStatus, RuntimePhase};

    use crate::cache::StatusCacheInspector;
    use crate::testing::{dataset, runtime, FakeCluster};

    const NS: &str = "default";
    const NAME: &str = "hbase";

    fn key() -> ObjectKey {
        ObjectKey::new(NS, NAME)
    }

    fn ready_runtime() -> CacheRuntime {
        let mut rt = runtime(NS, NAME, 1, 1, 1);
        rt.status = Some(CacheRuntimeStatus {
            master_phase: RuntimePhase::Ready,
            worker_phase: RuntimePhase::Ready,
            fuse_phase: RuntimePhase::Ready,
            cache_states: [(CacheStateName::Cached, "5GiB".to_string())]
                .into_iter()
                .collect(),
            gateway: Some(GatewayStatus {
                endpoint: "hbase-master.default.svc:19998".to_string(),
            }),
            ..Default::default()
        });
        rt
    }

    #[test]
    fn ready_runtime_projects_bound() {
        let mut status = DatasetStatus::default();
        let rt = ready_runtime();
        let phase = project_status(
            &mut status,
            &key(),
            rt.status.as_ref().expect("status set"),
            &RuntimeHealth::healthy(),
            &CacheStateSnapshot::default(),
        )
        .unwrap();

        assert_eq!(phase, DatasetPhase::Bound);
        assert_eq!(status.runtimes, vec![RuntimeRef::new(NS, NAME)]);
        assert_eq!(status.cache_states[&CacheStateName::Cached], "5GiB");
        assert_eq!(
            status.access.as_ref().map(|a| a.endpoint.as_str()),
            Some("hbase-master.default.svc:19998")
        );
        assert!(status
            .condition(DatasetConditionType::Ready)
            .is_some_and(|c| c.is_true()));
        assert!(status
            .condition(DatasetConditionType::RuntimeHealthy)
            .is_some_and(|c| c.is_true()));
    }

    #[test]
    fn failed_health_projects_failed() {
        let mut status = DatasetStatus::default();
        let phase = project_status(
            &mut status,
            &key(),
            &CacheRuntimeStatus::default(),
            &RuntimeHealth::Failed("worker group missing".into()),
            &CacheStateSnapshot::default(),
        )
        .unwrap();

        assert_eq!(phase, DatasetPhase::Failed);
        let healthy = status
            .condition(DatasetConditionType::RuntimeHealthy)
            .expect("condition recorded");
        assert_eq!(healthy.status, ConditionStatus::False);
        assert_eq!(healthy.message, "worker group missing");
    }

    #[test]
    fn foreign_binding_is_refused() {
        let mut status = DatasetStatus {
            runtimes: vec![RuntimeRef::new(NS, "other")],
            ..Default::default()
        };
        let err = project_status(
            &mut status,
            &key(),
            &CacheRuntimeStatus::default(),
            &RuntimeHealth::healthy(),
            &CacheStateSnapshot::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("default/other"));
    }

    #[test]
    fn snapshot_file_count_is_kept_until_replaced() {
        let mut status = DatasetStatus {
            file_num: Some(10),
            ..Default::default()
        };
        project_status(
            &mut status,
            &key(),
            &CacheRuntimeStatus::default(),
            &RuntimeHealth::healthy(),
            &CacheStateSnapshot::default(),
        )
        .unwrap();
        assert_eq!(status.file_num, Some(10));

        let snapshot = CacheStateSnapshot {
            file_num: Some(12),
            ..Default::default()
        };
        project_status(
            &mut status,
            &key(),
            &CacheRuntimeStatus::default(),
            &RuntimeHealth::healthy(),
            &snapshot,
        )
        .unwrap();
        assert_eq!(status.file_num, Some(12));
    }

    #[tokio::test]
    async fn sync_writes_once_then_settles() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_dataset(dataset(NS, NAME));
        let ctx = Context::for_testing(cluster.clone(), Arc::new(StatusCacheInspector));
        let rt = ready_runtime();

        let phase = sync_dataset_status(
            &ctx,
            &key(),
            &rt,
            &RuntimeHealth::healthy(),
            &CacheStateSnapshot::default(),
        )
        .await
        .unwrap();
        assert_eq!(phase, Some(DatasetPhase::Bound));
        assert_eq!(cluster.dataset_writes(), 1);

        sync_dataset_status(
            &ctx,
            &key(),
            &rt,
            &RuntimeHealth::healthy(),
            &CacheStateSnapshot::default(),
        )
        .await
        .unwrap();
        assert_eq!(cluster.dataset_writes(), 1);
        assert_eq!(cluster.dataset_status(NS, NAME).conditions.len(), 2);
    }

    /// Story: the cache layer stops reporting `cachedPercentage`.
    ///
    /// The key disappears from the stored dataset status and the following
    /// pass has nothing left to write.
    #[tokio::test]
    async fn dropped_cache_state_is_removed_and_settles() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_dataset(dataset(NS, NAME));
        let ctx = Context::for_testing(cluster.clone(), Arc::new(StatusCacheInspector));
        let rt = ready_runtime();
        let with_percentage = CacheStateSnapshot {
            states: [(CacheStateName::CachedPercentage, "25.0%".to_string())]
                .into_iter()
                .collect(),
            file_num: None,
        };

        sync_dataset_status(&ctx, &key(), &rt, &RuntimeHealth::healthy(), &with_percentage)
            .await
            .unwrap();
        assert!(cluster
            .dataset_status(NS, NAME)
            .cache_states
            .contains_key(&CacheStateName::CachedPercentage));

        let without = CacheStateSnapshot::default();
        sync_dataset_status(&ctx, &key(), &rt, &RuntimeHealth::healthy(), &without)
            .await
            .unwrap();
        let states = cluster.dataset_status(NS, NAME).cache_states;
        assert!(!states.contains_key(&CacheStateName::CachedPercentage));
        assert_eq!(states[&CacheStateName::Cached], "5GiB");

        let writes = cluster.dataset_writes();
        sync_dataset_status(&ctx, &key(), &rt, &RuntimeHealth::healthy(), &without)
            .await
            .unwrap();
        assert_eq!(cluster.dataset_writes(), writes);
    }

    #[tokio::test]
    async fn missing_dataset_is_skipped() {
        let cluster = Arc::new(FakeCluster::new());
        let ctx = Context::for_testing(cluster.clone(), Arc::new(StatusCacheInspector));

        let phase = sync_dataset_status(
            &ctx,
            &key(),
            &ready_runtime(),
            &RuntimeHealth::healthy(),
            &CacheStateSnapshot::default(),
        )
        .await
        .unwrap();
        assert_eq!(phase, None);
        mark_dataset_failed(&ctx, &key(), "boom").await.unwrap();
        assert_eq!(cluster.dataset_writes(), 0);
    }

    #[tokio::test]
    async fn mark_failed_retries_conflicts() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_dataset(dataset(NS, NAME));
        cluster.inject_dataset_conflicts(1);
        let ctx = Context::for_testing(cluster.clone(), Arc::new(StatusCacheInspector));

        mark_dataset_failed(&ctx, &key(), "master not found").await.unwrap();

        assert_eq!(cluster.dataset_writes(), 2);
        assert_eq!(cluster.dataset_status(NS, NAME).phase, DatasetPhase::Failed);
    }

    #[tokio::test]
    async fn nested_conflict_propagates_from_mark_failed() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_dataset(dataset(NS, NAME));
        cluster.inject_dataset_conflicts(u32::MAX);
        let ctx = Context::for_testing(cluster.clone(), Arc::new(StatusCacheInspector));

        let err = mark_dataset_failed(&ctx, &key(), "boom").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn recovery_after_failure_clears_failed() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_dataset(dataset(NS, NAME));
        let ctx = Context::for_testing(cluster.clone(), Arc::new(StatusCacheInspector));

        mark_dataset_failed(&ctx, &key(), "boom").await.unwrap();
        sync_dataset_status(
            &ctx,
            &key(),
            &ready_runtime(),
            &RuntimeHealth::healthy(),
            &CacheStateSnapshot::default(),
        )
        .await
        .unwrap();

        let status = cluster.dataset_status(NS, NAME);
        assert_eq!(status.phase, DatasetPhase::Bound);
        assert_eq!(status.conditions.len(), 2);
        assert!(status.conditions.iter().all(|c| c.is_true()));
    }
}
