//! Worker replica sync
//!
//! Compares the declared worker count with the worker group and records the
//! direction of any difference as a `RuntimeWorkersScaledOut` or
//! `RuntimeWorkersScaledIn` condition. The condition message is derived from
//! the two counts only, so a difference that has not been absorbed yet
//! upserts the same condition and causes no write. Under the managed scaling
//! policy the worker StatefulSet is then resized to the declared count.

use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{debug, info, warn};

use cachegrid_common::conditions;
use cachegrid_common::crd::{
    reasons, CacheRuntime, CacheRuntimeStatus, Condition, ConditionStatus, RuntimeConditionType,
    ScalingPolicy,
};
use cachegrid_common::events::actions;
use cachegrid_common::retry::{update_on_conflict, UpdateOutcome};
use cachegrid_common::{Error, ObjectKey};

use crate::accessor::Observation;
use crate::component::Component;
use crate::controller::Context;

/// Direction of a pending worker resize
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleDirection {
    /// Declared count is above the worker group's replicas
    Out,
    /// Declared count is below the worker group's replicas
    In,
    /// Counts agree
    None,
}

impl ScaleDirection {
    fn condition_type(&self) -> Option<RuntimeConditionType> {
        match self {
            Self::Out => Some(RuntimeConditionType::WorkersScaledOut),
            Self::In => Some(RuntimeConditionType::WorkersScaledIn),
            Self::None => None,
        }
    }

    fn opposite(&self) -> Option<RuntimeConditionType> {
        match self {
            Self::Out => Some(RuntimeConditionType::WorkersScaledIn),
            Self::In => Some(RuntimeConditionType::WorkersScaledOut),
            Self::None => None,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Self::Out => "out",
            Self::In => "in",
            Self::None => "nowhere",
        }
    }

    /// Scale condition for a resize from `from` to `to` replicas
    pub fn condition(&self, from: i32, to: i32) -> Option<Condition<RuntimeConditionType>> {
        let reason = match self {
            Self::Out => reasons::WORKERS_SCALED_OUT,
            Self::In => reasons::WORKERS_SCALED_IN,
            Self::None => return None,
        };
        let type_ = self.condition_type()?;
        Some(Condition::new(
            type_,
            ConditionStatus::True,
            reason,
            format!("The workers are scaled {} from {from} to {to}.", self.verb()),
        ))
    }
}

/// Direction from the worker group's replicas toward the declared count
pub fn scale_direction(declared: i32, group_desired: i32) -> ScaleDirection {
    match declared.cmp(&group_desired) {
        std::cmp::Ordering::Greater => ScaleDirection::Out,
        std::cmp::Ordering::Less => ScaleDirection::In,
        std::cmp::Ordering::Equal => ScaleDirection::None,
    }
}

/// Upsert the scale condition and retire a True opposite one.
///
/// Returns true when the scale condition itself changed.
fn record_scale(
    status: &mut CacheRuntimeStatus,
    direction: ScaleDirection,
    condition: Condition<RuntimeConditionType>,
) -> bool {
    let changed = status
        .condition(condition.type_)
        .map_or(true, |c| c.status != condition.status || c.message != condition.message);
    conditions::upsert_in_place(&mut status.conditions, condition);

    if let Some(opposite) = direction.opposite() {
        if status.condition(opposite).is_some_and(|c| c.is_true()) {
            let superseded = Condition::new(
                opposite,
                ConditionStatus::False,
                reasons::SCALE_SUPERSEDED,
                format!("Superseded by a scale {}.", direction.verb()),
            );
            conditions::upsert_in_place(&mut status.conditions, superseded);
        }
    }
    changed
}

/// Sync worker counters and scale conditions, resizing the worker group
/// under [`ScalingPolicy::Managed`].
///
/// A missing worker group is left to the health check, which records it as
/// NotReady. A legacy worker layout is skipped.
pub async fn sync_replicas(ctx: &Context, key: &ObjectKey) -> Result<ScaleDirection, Error> {
    let worker = ctx.accessor().observe_component(key, Component::Worker).await?;
    sync_observed_replicas(ctx, key, &worker).await
}

/// [`sync_replicas`] against an already observed worker group
pub async fn sync_observed_replicas(
    ctx: &Context,
    key: &ObjectKey,
    worker: &Observation,
) -> Result<ScaleDirection, Error> {
    let accessor = ctx.accessor();
    let group = match worker {
        Observation::Present(group) => *group,
        Observation::Missing => {
            debug!(runtime = %key, "worker group not created yet, skipping replica sync");
            return Ok(ScaleDirection::None);
        }
        Observation::Deprecated(message) => {
            warn!(runtime = %key, %message, "skipping replica sync");
            return Ok(ScaleDirection::None);
        }
    };

    let mut declared = group.desired;
    let mut policy = ScalingPolicy::Managed;
    let mut direction = ScaleDirection::None;
    let mut announced: Option<Condition<RuntimeConditionType>> = None;

    let outcome = update_on_conflict(
        &ctx.config.status_retry,
        "sync_replicas",
        || accessor.runtime(key),
        |rt: &mut CacheRuntime| {
            declared = rt.spec.worker.desired_replicas();
            policy = rt.spec.scaling;
            direction = scale_direction(declared, group.desired);
            announced = None;

            let status = rt.status.get_or_insert_with(Default::default);
            status.desired_worker_number_scheduled = declared;
            status.current_worker_number_scheduled = group.current_scheduled;

            if let Some(condition) = direction.condition(group.desired, declared) {
                if record_scale(status, direction, condition.clone()) {
                    announced = Some(condition);
                }
            }
            Ok(())
        },
        |rt: CacheRuntime| async move { ctx.kube.write_runtime_status(&rt).await },
    )
    .await?;

    if let (UpdateOutcome::Updated(rt), Some(condition)) = (&outcome, &announced) {
        info!(
            runtime = %key,
            from = group.desired,
            to = declared,
            reason = %condition.reason,
            "worker scale detected"
        );
        ctx.events
            .publish(
                &rt.object_ref(&()),
                EventType::Normal,
                &condition.reason,
                actions::SCALE,
                Some(condition.message.clone()),
            )
            .await;
    }

    if direction != ScaleDirection::None && policy == ScalingPolicy::Managed {
        let name = Component::Worker.group_name(&key.name);
        ctx.kube
            .scale_stateful_set(&key.namespace, &name, declared)
            .await?;
        debug!(runtime = %key, group = %name, replicas = declared, "worker group resized");
    }

    Ok(direction)
}
