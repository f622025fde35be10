//! Common types for cachegrid: CRDs, conditions, errors, and retry primitives

#![deny(missing_docs)]

pub mod conditions;
pub mod crd;
pub mod error;
pub mod events;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all cachegrid CRDs
pub const API_GROUP: &str = "cachegrid.dev";

/// Field manager used for every write issued by the controller
pub const FIELD_MANAGER: &str = "cachegrid-controller";

/// Label carried by every process group (StatefulSet/DaemonSet) of a runtime.
///
/// The value is the owning `CacheRuntime` name; the controller maps watch
/// events on process groups back to the runtime through it.
pub const RUNTIME_LABEL_KEY: &str = "cachegrid.dev/runtime";

/// Identity of a namespaced object: the unit of reconciliation
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectKey {
    /// Create a key from a namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
