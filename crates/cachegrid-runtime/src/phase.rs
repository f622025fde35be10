//! Component phase state machine and Dataset phase projection
//!
//! Component phases move along `None -> NotReady <-> Ready`. The transition
//! function is total over `(old phase, ready)` and never targets `None`, so
//! once a component has been observed it cannot fall back to `None`.
//!
//! A phase change is only ever expressed as a [`ComponentTransition`], which
//! carries the phase together with its readiness condition. Applying it to a
//! status writes both, so any persisted phase change has its condition in the
//! same status update.

use cachegrid_common::conditions;
use cachegrid_common::crd::{
    CacheRuntimeStatus, Condition, ConditionStatus, DatasetPhase, RuntimeConditionType,
    RuntimePhase,
};

use crate::component::Component;

/// Kind of edge taken through the state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// First observation: `None -> NotReady` or `None -> Ready`
    Initialized,
    /// `NotReady -> Ready`
    Promoted,
    /// `Ready -> NotReady` (e.g., a crashed replica)
    Degraded,
    /// Phase did not move
    Unchanged,
}

impl Transition {
    /// True when the phase moved
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Next phase for a component given its previous phase and the outcome of
/// its readiness rule
pub fn next_phase(old: RuntimePhase, ready: bool) -> (RuntimePhase, Transition) {
    match (old, ready) {
        (RuntimePhase::None, false) => (RuntimePhase::NotReady, Transition::Initialized),
        (RuntimePhase::None, true) => (RuntimePhase::Ready, Transition::Initialized),
        (RuntimePhase::NotReady, true) => (RuntimePhase::Ready, Transition::Promoted),
        (RuntimePhase::NotReady, false) => (RuntimePhase::NotReady, Transition::Unchanged),
        (RuntimePhase::Ready, true) => (RuntimePhase::Ready, Transition::Unchanged),
        (RuntimePhase::Ready, false) => (RuntimePhase::NotReady, Transition::Degraded),
    }
}

/// A component's next phase bundled with the condition that explains it
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentTransition {
    /// Component being moved
    pub component: Component,
    /// Phase before the transition
    pub from: RuntimePhase,
    /// Phase after the transition
    pub to: RuntimePhase,
    /// Edge taken
    pub transition: Transition,
    /// Readiness condition recorded with the phase
    pub condition: Condition<RuntimeConditionType>,
}

impl ComponentTransition {
    /// Evaluate the state machine for `component` against `status`
    pub fn evaluate(
        component: Component,
        status: &CacheRuntimeStatus,
        ready: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let from = component.phase(status);
        let (to, transition) = next_phase(from, ready);
        Self {
            component,
            from,
            to,
            transition,
            condition: Condition::new(
                component.condition_type(),
                ConditionStatus::from_bool(ready),
                reason,
                message,
            ),
        }
    }

    /// Write the phase and upsert the condition
    pub fn apply(&self, status: &mut CacheRuntimeStatus) {
        self.component.set_phase(status, self.to);
        conditions::upsert_in_place(&mut status.conditions, self.condition.clone());
    }
}

/// Health of the bound runtime as seen by the last health check
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeHealth {
    /// Health check completed (components may still be NotReady)
    Healthy {
        /// Components whose check was skipped for a legacy layout
        skipped: Vec<Component>,
    },
    /// Health check failed with the given message
    Failed(String),
}

impl RuntimeHealth {
    /// Completed health check with nothing skipped
    pub fn healthy() -> Self {
        Self::Healthy {
            skipped: Vec::new(),
        }
    }
}

/// Project the Dataset phase from the three component phases.
///
/// A failed health check wins. Otherwise the dataset is Bound only when
/// every component is Ready or was skipped by the health check; a skipped
/// component never gets a phase of its own.
pub fn project_dataset_phase(status: &CacheRuntimeStatus, health: &RuntimeHealth) -> DatasetPhase {
    let skipped = match health {
        RuntimeHealth::Failed(_) => return DatasetPhase::Failed,
        RuntimeHealth::Healthy { skipped } => skipped,
    };
    if Component::ALL
        .iter()
        .all(|c| skipped.contains(c) || c.phase(status) == RuntimePhase::Ready)
    {
        DatasetPhase::Bound
    } else {
        DatasetPhase::NotBound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::first_seen_not_ready(RuntimePhase::None, false, RuntimePhase::NotReady, Transition::Initialized)]
    #[case::first_seen_ready(RuntimePhase::None, true, RuntimePhase::Ready, Transition::Initialized)]
    #[case::promoted(RuntimePhase::NotReady, true, RuntimePhase::Ready, Transition::Promoted)]
    #[case::still_not_ready(RuntimePhase::NotReady, false, RuntimePhase::NotReady, Transition::Unchanged)]
    #[case::still_ready(RuntimePhase::Ready, true, RuntimePhase::Ready, Transition::Unchanged)]
    #[case::degraded(RuntimePhase::Ready, false, RuntimePhase::NotReady, Transition::Degraded)]
    fn transition_table(
        #[case] old: RuntimePhase,
        #[case] ready: bool,
        #[case] expected: RuntimePhase,
        #[case] transition: Transition,
    ) {
        assert_eq!(next_phase(old, ready), (expected, transition));
    }

    #[test]
    fn none_is_never_a_target() {
        for old in [RuntimePhase::None, RuntimePhase::NotReady, RuntimePhase::Ready] {
            for ready in [true, false] {
                assert_ne!(next_phase(old, ready).0, RuntimePhase::None);
            }
        }
    }

    #[test]
    fn apply_writes_phase_and_condition_together() {
        let mut status = CacheRuntimeStatus::default();
        let t = ComponentTransition::evaluate(
            Component::Master,
            &status,
            true,
            "MasterReady",
            "The master is ready.",
        );
        assert_eq!(t.transition, Transition::Initialized);
        t.apply(&mut status);

        assert_eq!(status.master_phase, RuntimePhase::Ready);
        let cond = status
            .condition(RuntimeConditionType::MasterReady)
            .expect("condition recorded");
        assert_eq!(cond.status, ConditionStatus::True);
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn degradation_flips_the_condition() {
        let mut status = CacheRuntimeStatus::default();
        ComponentTransition::evaluate(Component::Worker, &status, true, "WorkersReady", "ok")
            .apply(&mut status);

        let t = ComponentTransition::evaluate(
            Component::Worker,
            &status,
            false,
            "WorkersNotReady",
            "1/2 ready",
        );
        assert_eq!(t.transition, Transition::Degraded);
        t.apply(&mut status);

        assert_eq!(status.worker_phase, RuntimePhase::NotReady);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, ConditionStatus::False);
    }

    fn phases(master: RuntimePhase, worker: RuntimePhase, fuse: RuntimePhase) -> CacheRuntimeStatus {
        CacheRuntimeStatus {
            master_phase: master,
            worker_phase: worker,
            fuse_phase: fuse,
            ..Default::default()
        }
    }

    #[rstest]
    #[case::all_ready(RuntimePhase::Ready, RuntimePhase::Ready, RuntimePhase::Ready, DatasetPhase::Bound)]
    #[case::fuse_pending(RuntimePhase::Ready, RuntimePhase::Ready, RuntimePhase::NotReady, DatasetPhase::NotBound)]
    #[case::never_seen(RuntimePhase::None, RuntimePhase::None, RuntimePhase::None, DatasetPhase::NotBound)]
    fn healthy_projection(
        #[case] master: RuntimePhase,
        #[case] worker: RuntimePhase,
        #[case] fuse: RuntimePhase,
        #[case] expected: DatasetPhase,
    ) {
        let status = phases(master, worker, fuse);
        assert_eq!(project_dataset_phase(&status, &RuntimeHealth::healthy()), expected);
    }

    #[test]
    fn failed_health_wins_over_ready_phases() {
        let status = phases(RuntimePhase::Ready, RuntimePhase::Ready, RuntimePhase::Ready);
        assert_eq!(
            project_dataset_phase(&status, &RuntimeHealth::Failed("boom".into())),
            DatasetPhase::Failed
        );
    }

    #[test]
    fn skipped_component_counts_as_satisfied() {
        let status = phases(RuntimePhase::Ready, RuntimePhase::None, RuntimePhase::Ready);
        let health = RuntimeHealth::Healthy {
            skipped: vec![Component::Worker],
        };
        assert_eq!(project_dataset_phase(&status, &health), DatasetPhase::Bound);

        let status = phases(RuntimePhase::Ready, RuntimePhase::None, RuntimePhase::NotReady);
        assert_eq!(project_dataset_phase(&status, &health), DatasetPhase::NotBound);
    }
}
