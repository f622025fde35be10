//! Shared status types: phases, condition types, and conditions

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Phase of one runtime component (master, worker, or fuse group)
///
/// `None` is only ever the initial value: no transition targets it, so a
/// component that has been observed once can never silently fall back to it.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RuntimePhase {
    /// Component has not been observed yet
    #[default]
    None,
    /// Component exists but does not meet its readiness rule
    NotReady,
    /// Component meets its readiness rule
    Ready,
}

impl std::fmt::Display for RuntimePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::NotReady => write!(f, "NotReady"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Consumer-facing phase of a Dataset
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DatasetPhase {
    /// Bound runtime is not fully ready yet
    #[default]
    NotBound,
    /// Every component of the bound runtime is ready
    Bound,
    /// The last health check of the bound runtime failed
    Failed,
}

impl std::fmt::Display for DatasetPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotBound => write!(f, "NotBound"),
            Self::Bound => write!(f, "Bound"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Map a boolean observation onto True/False
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Condition types recorded on a CacheRuntime
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum RuntimeConditionType {
    /// Master group has the declared number of ready replicas
    #[serde(rename = "RuntimeMasterReady")]
    MasterReady,
    /// Worker group has the declared number of ready replicas
    #[serde(rename = "RuntimeWorkersReady")]
    WorkersReady,
    /// Every scheduled fuse pod is ready
    #[serde(rename = "RuntimeFusesReady")]
    FusesReady,
    /// Worker group was scaled out toward the declared count
    #[serde(rename = "RuntimeWorkersScaledOut")]
    WorkersScaledOut,
    /// Worker group was scaled in toward the declared count
    #[serde(rename = "RuntimeWorkersScaledIn")]
    WorkersScaledIn,
}

impl RuntimeConditionType {
    /// Wire name of the condition type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MasterReady => "RuntimeMasterReady",
            Self::WorkersReady => "RuntimeWorkersReady",
            Self::FusesReady => "RuntimeFusesReady",
            Self::WorkersScaledOut => "RuntimeWorkersScaledOut",
            Self::WorkersScaledIn => "RuntimeWorkersScaledIn",
        }
    }
}

impl std::fmt::Display for RuntimeConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition types recorded on a Dataset
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum DatasetConditionType {
    /// Dataset is bound to a fully ready runtime
    #[serde(rename = "DatasetReady")]
    Ready,
    /// Last health check of the bound runtime succeeded
    #[serde(rename = "DatasetRuntimeHealthy")]
    RuntimeHealthy,
}

impl DatasetConditionType {
    /// Wire name of the condition type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "DatasetReady",
            Self::RuntimeHealthy => "DatasetRuntimeHealthy",
        }
    }
}

impl std::fmt::Display for DatasetConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kubernetes-style condition for status reporting
///
/// Generic over the closed set of condition types of the owning resource,
/// so a runtime condition can never be recorded on a dataset by mistake.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition<T> {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: T,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition status flipped
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl<T> Condition<T> {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: T,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// True when the condition status is `True`
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Keys of the cache summary maps on runtime and dataset status
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CacheStateName {
    /// Total cache capacity across workers (e.g., "20GiB")
    CacheCapacity,
    /// Bytes currently cached (e.g., "5GiB")
    Cached,
    /// Cached bytes as a percentage of the dataset size (e.g., "25.0%")
    CachedPercentage,
    /// Ratio of reads served from cache
    CacheHitRatio,
    /// Ratio of reads served from a node-local worker
    LocalHitRatio,
    /// Ratio of reads served from a remote worker
    RemoteHitRatio,
}

impl CacheStateName {
    /// Every cache state key
    pub const ALL: [CacheStateName; 6] = [
        CacheStateName::CacheCapacity,
        CacheStateName::Cached,
        CacheStateName::CachedPercentage,
        CacheStateName::CacheHitRatio,
        CacheStateName::LocalHitRatio,
        CacheStateName::RemoteHitRatio,
    ];
}

/// Machine-readable condition reasons.
///
/// These appear in `kubectl describe` under the condition REASON column and
/// double as Kubernetes Event reasons.
pub mod reasons {
    /// Master ready replicas match the declared count
    pub const MASTER_READY: &str = "MasterReady";
    /// Master ready replicas differ from the declared count
    pub const MASTER_NOT_READY: &str = "MasterNotReady";
    /// Master StatefulSet does not exist
    pub const MASTER_NOT_FOUND: &str = "MasterNotFound";
    /// Workers reached the declared ready count
    pub const WORKERS_READY: &str = "WorkersReady";
    /// Fewer ready workers than declared
    pub const WORKERS_NOT_READY: &str = "WorkersNotReady";
    /// Worker StatefulSet does not exist
    pub const WORKERS_NOT_FOUND: &str = "WorkersNotFound";
    /// Every scheduled fuse pod is ready
    pub const FUSES_READY: &str = "FusesReady";
    /// Some scheduled fuse pods are not ready
    pub const FUSES_NOT_READY: &str = "FusesNotReady";
    /// Fuse DaemonSet does not exist
    pub const FUSES_NOT_FOUND: &str = "FusesNotFound";
    /// Declared worker count rose above the group's replicas
    pub const WORKERS_SCALED_OUT: &str = "WorkersScaledOut";
    /// Declared worker count dropped below the group's replicas
    pub const WORKERS_SCALED_IN: &str = "WorkersScaledIn";
    /// A newer scale event in the opposite direction superseded this one
    pub const SCALE_SUPERSEDED: &str = "ScaleSuperseded";
    /// Dataset bound to a fully ready runtime
    pub const DATASET_BOUND: &str = "DatasetBound";
    /// Bound runtime has components that are not ready
    pub const RUNTIME_NOT_READY: &str = "RuntimeNotReady";
    /// Bound runtime passed its last health check
    pub const RUNTIME_HEALTHY: &str = "RuntimeHealthy";
    /// Bound runtime failed its last health check
    pub const RUNTIME_UNHEALTHY: &str = "RuntimeUnhealthy";
}
