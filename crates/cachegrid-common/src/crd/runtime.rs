//! CacheRuntime Custom Resource Definition
//!
//! A CacheRuntime declares one caching cluster instance: a master group, a
//! worker group, and a fuse group, each run as an orchestrator-managed
//! process group. The spec is owned by the user; the status is owned by the
//! cachegrid controller and converges on every reconcile.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CacheStateName, Condition, RuntimeConditionType, RuntimePhase};

/// Default port the master exposes through the gateway
pub const DEFAULT_GATEWAY_PORT: u16 = 19998;

/// Specification for a CacheRuntime
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cachegrid.dev",
    version = "v1alpha1",
    kind = "CacheRuntime",
    plural = "cacheruntimes",
    shortname = "cgr",
    status = "CacheRuntimeStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Master","type":"string","jsonPath":".status.masterPhase"}"#,
    printcolumn = r#"{"name":"Worker","type":"string","jsonPath":".status.workerPhase"}"#,
    printcolumn = r#"{"name":"Fuse","type":"string","jsonPath":".status.fusePhase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CacheRuntimeSpec {
    /// Master group
    #[serde(default)]
    pub master: ComponentSpec,

    /// Worker group
    #[serde(default)]
    pub worker: ComponentSpec,

    /// Fuse group
    #[serde(default)]
    pub fuse: ComponentSpec,

    /// How the worker group follows the declared replica count
    #[serde(default)]
    pub scaling: ScalingPolicy,

    /// API gateway exposed by the master
    #[serde(default)]
    pub gateway: GatewaySpec,
}

impl CacheRuntimeSpec {
    /// Validate the runtime specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        for (field, component) in [
            ("spec.master.replicas", &self.master),
            ("spec.worker.replicas", &self.worker),
            ("spec.fuse.replicas", &self.fuse),
        ] {
            if component.replicas < 0 {
                return Err(crate::Error::validation_for_field(
                    crate::error::UNKNOWN_CONTEXT,
                    field,
                    format!("replicas must be >= 0, got {}", component.replicas),
                ));
            }
        }
        if self.gateway.enabled && self.gateway.port == 0 {
            return Err(crate::Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "spec.gateway.port",
                "gateway port must be set when the gateway is enabled",
            ));
        }
        Ok(())
    }
}

/// Declared shape of one process group
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Desired replica count. The zero value means "unset" and defaults to 1.
    #[serde(default)]
    pub replicas: i32,
}

impl ComponentSpec {
    /// Declared replica count with the zero value defaulted to 1
    pub fn desired_replicas(&self) -> i32 {
        if self.replicas == 0 {
            1
        } else {
            self.replicas
        }
    }
}

/// How the controller reacts to a declared worker count that differs from
/// the worker group's replicas
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ScalingPolicy {
    /// Controller records the scale event and resizes the worker group
    #[default]
    Managed,
    /// Controller records the scale event only; resizing happens elsewhere
    Manual,
}

/// API gateway configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Expose the master API through a stable endpoint
    #[serde(default)]
    pub enabled: bool,

    /// Port of the master API
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewaySpec {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_GATEWAY_PORT,
        }
    }
}

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

/// Status for a CacheRuntime
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheRuntimeStatus {
    /// The generation of the spec that was last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Phase of the master group
    #[serde(default)]
    pub master_phase: RuntimePhase,

    /// Phase of the worker group
    #[serde(default)]
    pub worker_phase: RuntimePhase,

    /// Phase of the fuse group
    #[serde(default)]
    pub fuse_phase: RuntimePhase,

    /// Declared master replicas (defaulted)
    #[serde(default)]
    pub desired_master_number_scheduled: i32,

    /// Master replicas currently scheduled
    #[serde(default)]
    pub current_master_number_scheduled: i32,

    /// Master replicas ready
    #[serde(default)]
    pub master_number_ready: i32,

    /// Declared worker replicas (defaulted)
    #[serde(default)]
    pub desired_worker_number_scheduled: i32,

    /// Worker replicas currently scheduled
    #[serde(default)]
    pub current_worker_number_scheduled: i32,

    /// Worker replicas ready
    #[serde(default)]
    pub worker_number_ready: i32,

    /// Worker replicas available
    #[serde(default)]
    pub worker_number_available: i32,

    /// Worker replicas unavailable
    #[serde(default)]
    pub worker_number_unavailable: i32,

    /// Fuse pods the fuse group wants scheduled
    #[serde(default)]
    pub desired_fuse_number_scheduled: i32,

    /// Fuse pods currently scheduled
    #[serde(default)]
    pub current_fuse_number_scheduled: i32,

    /// Fuse pods ready
    #[serde(default)]
    pub fuse_number_ready: i32,

    /// Fuse pods available
    #[serde(default)]
    pub fuse_number_available: i32,

    /// Fuse pods unavailable
    #[serde(default)]
    pub fuse_number_unavailable: i32,

    /// Conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition<RuntimeConditionType>>,

    /// Cache summary reported by the caching engine
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cache_states: BTreeMap<CacheStateName, String>,

    /// Gateway endpoint, present when the gateway is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayStatus>,
}

impl CacheRuntimeStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: RuntimeConditionType) -> Option<&Condition<RuntimeConditionType>> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// True when master, worker, and fuse groups are all Ready
    pub fn all_ready(&self) -> bool {
        [self.master_phase, self.worker_phase, self.fuse_phase]
            .iter()
            .all(|p| *p == RuntimePhase::Ready)
    }
}

/// Gateway sub-status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    /// `host:port` of the master API
    pub endpoint: String,
}
