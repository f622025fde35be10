//! Dataset Custom Resource Definition
//!
//! A Dataset is the consumer-facing view of a data source served by a
//! CacheRuntime. It is bound to the runtime with the same namespace and
//! name. Its status is derived from the runtime status and written only by
//! the cachegrid controller.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CacheStateName, Condition, DatasetConditionType, DatasetPhase};

/// Runtime category recorded on dataset bindings
pub const RUNTIME_CATEGORY: &str = "Accelerate";

/// Specification for a Dataset
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cachegrid.dev",
    version = "v1alpha1",
    kind = "Dataset",
    plural = "datasets",
    shortname = "cgd",
    status = "DatasetStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Cached","type":"string","jsonPath":".status.cacheStates.cached"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSpec {
    /// Underlying storage mounted into the cache
    #[serde(default)]
    pub mounts: Vec<Mount>,
}

/// One underlying storage mount
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    /// Source URI (e.g., `s3://bucket/path`)
    pub mount_point: String,

    /// Name of the mount inside the cache namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// Status for a Dataset
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStatus {
    /// Binding phase
    #[serde(default)]
    pub phase: DatasetPhase,

    /// Cache summary projected from the bound runtime
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cache_states: BTreeMap<CacheStateName, String>,

    /// Conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition<DatasetConditionType>>,

    /// Number of files in the dataset, when the cache layer reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_num: Option<i64>,

    /// Runtimes bound to this dataset (at most one)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtimes: Vec<RuntimeRef>,

    /// Access endpoint derived from the runtime gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessStatus>,
}

impl DatasetStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: DatasetConditionType) -> Option<&Condition<DatasetConditionType>> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// Reference to the runtime a dataset is bound to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeRef {
    /// Runtime name
    pub name: String,
    /// Runtime namespace
    pub namespace: String,
    /// Runtime category
    pub category: String,
}

impl RuntimeRef {
    /// Reference to a cache runtime
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            category: RUNTIME_CATEGORY.to_string(),
        }
    }
}

/// Sub-system access status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessStatus {
    /// Endpoint clients use to reach the cache API
    pub endpoint: String,
}
