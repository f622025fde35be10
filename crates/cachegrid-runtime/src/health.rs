//! Component health checkers
//!
//! One readiness rule per component, evaluated against the live process
//! group and the declared replica count (zero defaults to 1):
//!
//! - master: ready replicas equal the declared count
//! - worker: at least the declared count of replicas is ready
//! - fuse: at least the wanted fuse pods are ready and none is unavailable;
//!   the declared count stands in for the wanted count until the DaemonSet
//!   has computed its own
//!
//! Each check persists the component's counters, phase, and readiness
//! condition in one optimistic status write. The runtime-level check reads
//! every process group before it writes anything, then walks master, worker,
//! fuse in that order and stops at the first component that is not ready.

use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{debug, error, info, warn};

use cachegrid_common::crd::{CacheRuntime, CacheRuntimeSpec, CacheRuntimeStatus, RuntimePhase};
use cachegrid_common::events::actions;
use cachegrid_common::metrics;
use cachegrid_common::retry::update_on_conflict;
use cachegrid_common::{Error, ObjectKey};

use crate::accessor::{ClusterState, Observation};
use crate::component::{Component, ProcessGroup};
use crate::controller::Context;
use crate::dataset::mark_dataset_failed;
use crate::phase::{ComponentTransition, RuntimeHealth};

/// Outcome of one readiness rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Readiness {
    /// Whether the rule holds
    pub ready: bool,
    /// Human-readable explanation recorded on the condition
    pub message: String,
}

/// Replica count the fuse group should be running.
///
/// The DaemonSet controller computes it from node placement; the declared
/// count only stands in until it has.
fn fuse_desired(declared: i32, group: &ProcessGroup) -> i32 {
    if group.desired > 0 {
        group.desired
    } else {
        declared
    }
}

/// Apply the readiness rule of `component` to a live process group
pub fn evaluate(component: Component, spec: &CacheRuntimeSpec, group: &ProcessGroup) -> Readiness {
    let declared = component.spec(spec).desired_replicas();
    match component {
        Component::Master => {
            let ready = group.ready == declared;
            Readiness {
                ready,
                message: if ready {
                    "The master is ready.".to_string()
                } else {
                    format!(
                        "The master is not ready: {}/{} replicas ready.",
                        group.ready, declared
                    )
                },
            }
        }
        Component::Worker => {
            let ready = group.ready >= declared;
            Readiness {
                ready,
                message: if ready {
                    format!("The workers are ready: {}/{} replicas ready.", group.ready, declared)
                } else {
                    format!(
                        "The workers are not ready: {}/{} replicas ready.",
                        group.ready, declared
                    )
                },
            }
        }
        Component::Fuse => {
            let desired = fuse_desired(declared, group);
            let ready = group.ready >= desired && group.unavailable == 0;
            Readiness {
                ready,
                message: if ready {
                    "The fuses are ready.".to_string()
                } else {
                    format!(
                        "The fuses are not ready: {}/{} ready, {} unavailable.",
                        group.ready, desired, group.unavailable
                    )
                },
            }
        }
    }
}

/// Copy the group counters of `component` onto the status
pub fn record_counters(
    component: Component,
    spec: &CacheRuntimeSpec,
    group: &ProcessGroup,
    status: &mut CacheRuntimeStatus,
) {
    let declared = component.spec(spec).desired_replicas();
    match component {
        Component::Master => {
            status.desired_master_number_scheduled = declared;
            status.current_master_number_scheduled = group.current_scheduled;
            status.master_number_ready = group.ready;
        }
        Component::Worker => {
            status.desired_worker_number_scheduled = declared;
            status.current_worker_number_scheduled = group.current_scheduled;
            status.worker_number_ready = group.ready;
            status.worker_number_available = group.available;
            status.worker_number_unavailable = group.unavailable;
        }
        Component::Fuse => {
            status.desired_fuse_number_scheduled = fuse_desired(declared, group);
            status.current_fuse_number_scheduled = group.current_scheduled;
            status.fuse_number_ready = group.ready;
            status.fuse_number_available = group.available;
            status.fuse_number_unavailable = group.unavailable;
        }
    }
}

/// Result of a runtime-level health check that did not fail
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Every checked component is Ready
    pub ready: bool,
    /// Components skipped for a legacy layout
    pub skipped: Vec<Component>,
}

impl HealthReport {
    /// Health to project onto the dataset
    pub fn health(&self) -> RuntimeHealth {
        RuntimeHealth::Healthy {
            skipped: self.skipped.clone(),
        }
    }
}

/// What a health check saw for its component
#[derive(Clone, Copy, Debug)]
enum Seen {
    Group(ProcessGroup),
    Missing,
}

/// Persist counters, phase and condition of `component` in one write.
///
/// Runs inside the optimistic update loop, so the transition is always
/// computed against the freshly fetched status.
async fn persist_component(
    ctx: &Context,
    key: &ObjectKey,
    component: Component,
    seen: Seen,
) -> Result<ComponentTransition, Error> {
    let accessor = ctx.accessor();
    let operation = format!("check_{}_ready", component.as_str());
    let mut applied: Option<ComponentTransition> = None;

    let outcome = update_on_conflict(
        &ctx.config.status_retry,
        &operation,
        || accessor.runtime(key),
        |rt: &mut CacheRuntime| {
            let spec = &rt.spec;
            let status = rt.status.get_or_insert_with(Default::default);

            let transition = match seen {
                Seen::Group(group) => {
                    let readiness = evaluate(component, spec, &group);
                    record_counters(component, spec, &group, status);
                    let reason = if readiness.ready {
                        component.ready_reason()
                    } else {
                        component.not_ready_reason()
                    };
                    ComponentTransition::evaluate(
                        component,
                        status,
                        readiness.ready,
                        reason,
                        readiness.message,
                    )
                }
                Seen::Missing => {
                    record_counters(component, spec, &ProcessGroup::default(), status);
                    ComponentTransition::evaluate(
                        component,
                        status,
                        false,
                        component.not_found_reason(),
                        format!(
                            "The {} {} {} was not found.",
                            component,
                            component.workload_kind(),
                            component.group_name(&key.name)
                        ),
                    )
                }
            };
            transition.apply(status);
            applied = Some(transition);
            Ok(())
        },
        |rt: CacheRuntime| async move { ctx.kube.write_runtime_status(&rt).await },
    )
    .await?;

    let transition = applied.ok_or_else(|| {
        Error::internal_with_context(operation.clone(), "status mutation was never applied")
    })?;

    let ready = transition.to == RuntimePhase::Ready;
    metrics::record_component_ready(&key.to_string(), component.as_str(), ready);

    if outcome.was_written() && transition.transition.is_change() {
        info!(
            runtime = %key,
            component = %component,
            from = %transition.from,
            to = %transition.to,
            reason = %transition.condition.reason,
            "component phase changed"
        );
        let runtime = outcome.into_inner();
        let type_ = if ready {
            EventType::Normal
        } else {
            EventType::Warning
        };
        ctx.events
            .publish(
                &runtime.object_ref(&()),
                type_,
                &transition.condition.reason,
                actions::HEALTH_CHECK,
                Some(transition.condition.message.clone()),
            )
            .await;
    }

    Ok(transition)
}

/// Persist what was observed for one component.
///
/// Returns the readiness verdict, or None when a legacy layout was skipped.
async fn record_observation(
    ctx: &Context,
    key: &ObjectKey,
    component: Component,
    observation: Observation,
) -> Result<Option<bool>, Error> {
    let group = match observation.require(component, key) {
        Ok(group) => group,
        Err(e) if e.is_deprecated() => {
            warn!(runtime = %key, component = %component, error = %e, "skipping health check");
            return Ok(None);
        }
        Err(e) if e.is_not_found() => {
            persist_component(ctx, key, component, Seen::Missing).await?;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let transition = persist_component(ctx, key, component, Seen::Group(group)).await?;
    let ready = transition.to == RuntimePhase::Ready;
    debug!(runtime = %key, component = %component, ready, "component checked");
    Ok(Some(ready))
}

/// Evaluate and persist the readiness of one component.
///
/// - A missing process group is recorded as NotReady with a not-found
///   reason, then reported as [`Error::NotFound`].
/// - A legacy layout is skipped with a warning and counts as ready.
pub async fn check_component_ready(
    ctx: &Context,
    key: &ObjectKey,
    component: Component,
) -> Result<bool, Error> {
    let observation = ctx.accessor().observe_component(key, component).await?;
    Ok(record_observation(ctx, key, component, observation)
        .await?
        .unwrap_or(true))
}

/// Readiness of the master group
pub async fn check_master_ready(ctx: &Context, key: &ObjectKey) -> Result<bool, Error> {
    check_component_ready(ctx, key, Component::Master).await
}

/// Readiness of the worker group
pub async fn check_workers_ready(ctx: &Context, key: &ObjectKey) -> Result<bool, Error> {
    check_component_ready(ctx, key, Component::Worker).await
}

/// Readiness of the fuse group
pub async fn check_fuses_ready(ctx: &Context, key: &ObjectKey) -> Result<bool, Error> {
    check_component_ready(ctx, key, Component::Fuse).await
}

/// Mark the bound dataset Failed on a best-effort basis and hand back the
/// error that caused it.
///
/// A failure of the dataset write is logged and counted. A runtime that no
/// longer exists leaves its dataset alone.
pub(crate) async fn report_failure(ctx: &Context, key: &ObjectKey, cause: Error) -> Error {
    if matches!(&cause, Error::NotFound { kind, .. } if kind == "CacheRuntime") {
        return cause;
    }
    if let Err(secondary) = mark_dataset_failed(ctx, key, &cause.to_string()).await {
        error!(
            runtime = %key,
            error = %secondary,
            cause = %cause,
            "failed to mark dataset Failed"
        );
        metrics::record_secondary_write_failure("mark_dataset_failed");
    }
    cause
}

/// Check master, worker, fuse in order against an observed cluster state.
///
/// Stops at the first component that is not ready. On error the bound
/// dataset is marked Failed through [`report_failure`].
pub async fn check_observed_health(
    ctx: &Context,
    key: &ObjectKey,
    state: &ClusterState,
) -> Result<HealthReport, Error> {
    let mut report = HealthReport {
        ready: true,
        skipped: Vec::new(),
    };
    for component in Component::ALL {
        let observation = state.component(component).clone();
        match record_observation(ctx, key, component, observation).await {
            Ok(Some(true)) => {}
            Ok(Some(false)) => {
                info!(runtime = %key, component = %component, "runtime not ready");
                report.ready = false;
                return Ok(report);
            }
            Ok(None) => report.skipped.push(component),
            Err(e) => return Err(report_failure(ctx, key, e).await),
        }
    }
    Ok(report)
}

/// Observe every process group, then check master, worker, fuse in order.
///
/// A failed read aborts the check before any status is written.
pub async fn check_runtime_health(ctx: &Context, key: &ObjectKey) -> Result<HealthReport, Error> {
    let state = match ctx.accessor().observe(key).await {
        Ok(state) => state,
        Err(e) => return Err(report_failure(ctx, key, e).await),
    };
    check_observed_health(ctx, key, &state).await
}
