//! Runtime components and their process groups
//!
//! A runtime is made of three components. Each maps to one orchestrator
//! process group named `<runtime>-<component>`: the master and worker run as
//! StatefulSets, the fuse client as a DaemonSet. Whatever the workload kind,
//! the controller only looks at a [`ProcessGroup`], the replica counters it
//! exposes.

use k8s_openapi::api::apps::v1::{DaemonSet, StatefulSet};

use cachegrid_common::crd::{
    reasons, CacheRuntimeSpec, CacheRuntimeStatus, ComponentSpec, RuntimeConditionType,
    RuntimePhase,
};

/// One of the three process groups of a runtime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    /// Metadata master (StatefulSet)
    Master,
    /// Cache workers (StatefulSet)
    Worker,
    /// Per-node fuse clients (DaemonSet)
    Fuse,
}

impl Component {
    /// Health-check order: a not-ready master invalidates worker and fuse
    /// placement, so it is always evaluated first
    pub const ALL: [Component; 3] = [Component::Master, Component::Worker, Component::Fuse];

    /// Lowercase label used in logs, metrics and group names
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Worker => "worker",
            Self::Fuse => "fuse",
        }
    }

    /// Name of the process group backing this component
    pub fn group_name(&self, runtime: &str) -> String {
        format!("{}-{}", runtime, self.as_str())
    }

    /// Workload kind of the process group, for error messages
    pub fn workload_kind(&self) -> &'static str {
        match self {
            Self::Master | Self::Worker => "StatefulSet",
            Self::Fuse => "DaemonSet",
        }
    }

    /// Readiness condition type recorded for this component
    pub fn condition_type(&self) -> RuntimeConditionType {
        match self {
            Self::Master => RuntimeConditionType::MasterReady,
            Self::Worker => RuntimeConditionType::WorkersReady,
            Self::Fuse => RuntimeConditionType::FusesReady,
        }
    }

    /// Condition reason when the readiness rule holds
    pub fn ready_reason(&self) -> &'static str {
        match self {
            Self::Master => reasons::MASTER_READY,
            Self::Worker => reasons::WORKERS_READY,
            Self::Fuse => reasons::FUSES_READY,
        }
    }

    /// Condition reason when the readiness rule does not hold
    pub fn not_ready_reason(&self) -> &'static str {
        match self {
            Self::Master => reasons::MASTER_NOT_READY,
            Self::Worker => reasons::WORKERS_NOT_READY,
            Self::Fuse => reasons::FUSES_NOT_READY,
        }
    }

    /// Condition reason when the process group does not exist
    pub fn not_found_reason(&self) -> &'static str {
        match self {
            Self::Master => reasons::MASTER_NOT_FOUND,
            Self::Worker => reasons::WORKERS_NOT_FOUND,
            Self::Fuse => reasons::FUSES_NOT_FOUND,
        }
    }

    /// Declared shape of this component
    pub fn spec<'a>(&self, spec: &'a CacheRuntimeSpec) -> &'a ComponentSpec {
        match self {
            Self::Master => &spec.master,
            Self::Worker => &spec.worker,
            Self::Fuse => &spec.fuse,
        }
    }

    /// Current phase recorded on the status
    pub fn phase(&self, status: &CacheRuntimeStatus) -> RuntimePhase {
        match self {
            Self::Master => status.master_phase,
            Self::Worker => status.worker_phase,
            Self::Fuse => status.fuse_phase,
        }
    }

    /// Only [`crate::phase::ComponentTransition::apply`] moves a phase, so the
    /// matching condition always lands in the same write
    pub(crate) fn set_phase(&self, status: &mut CacheRuntimeStatus, phase: RuntimePhase) {
        match self {
            Self::Master => status.master_phase = phase,
            Self::Worker => status.worker_phase = phase,
            Self::Fuse => status.fuse_phase = phase,
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replica counters of a live process group
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessGroup {
    /// Replicas the group itself wants (StatefulSet `spec.replicas`,
    /// DaemonSet `desiredNumberScheduled`)
    pub desired: i32,
    /// Replicas currently scheduled
    pub current_scheduled: i32,
    /// Replicas passing their readiness probe
    pub ready: i32,
    /// Replicas available (ready for at least `minReadySeconds`)
    pub available: i32,
    /// Replicas that should be running but are not available
    pub unavailable: i32,
}

impl ProcessGroup {
    /// Normalise a StatefulSet. An unset `spec.replicas` means 1, as the
    /// API server defaults it.
    pub fn from_stateful_set(sts: &StatefulSet) -> Self {
        let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let status = sts.status.as_ref();
        let available = status.and_then(|s| s.available_replicas).unwrap_or(0);
        Self {
            desired,
            current_scheduled: status.map(|s| s.replicas).unwrap_or(0),
            ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            available,
            unavailable: (desired - available).max(0),
        }
    }

    /// Normalise a DaemonSet
    pub fn from_daemon_set(ds: &DaemonSet) -> Self {
        let Some(status) = ds.status.as_ref() else {
            return Self::default();
        };
        Self {
            desired: status.desired_number_scheduled,
            current_scheduled: status.current_number_scheduled,
            ready: status.number_ready,
            available: status.number_available.unwrap_or(0),
            unavailable: status.number_unavailable.unwrap_or(0),
        }
    }
}
