//! Custom Resource Definitions for cachegrid
//!
//! This module contains all CRD definitions used by the cachegrid controller.

mod dataset;
mod runtime;
mod types;

pub use dataset::{
    AccessStatus, Dataset, DatasetSpec, DatasetStatus, Mount, RuntimeRef, RUNTIME_CATEGORY,
};
pub use runtime::{
    CacheRuntime, CacheRuntimeSpec, CacheRuntimeStatus, ComponentSpec, GatewaySpec,
    GatewayStatus, ScalingPolicy, DEFAULT_GATEWAY_PORT,
};
pub use types::{
    reasons, CacheStateName, Condition, ConditionStatus, DatasetConditionType, DatasetPhase,
    RuntimeConditionType, RuntimePhase,
};
