//! CacheRuntime controller: status convergence and health reconciliation
//!
//! Observes the master, worker, and fuse process groups of every
//! `CacheRuntime`, converges the runtime status (phases, counters,
//! conditions) on what they report, keeps the worker group at its declared
//! size, and projects the result onto the bound `Dataset`.

#![deny(missing_docs)]

pub mod accessor;
pub mod cache;
pub mod component;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod health;
pub mod phase;
pub mod replicas;

#[cfg(test)]
mod testing;

pub use accessor::{ClusterState, ClusterStateAccessor, KubeClient, KubeClientImpl, Observation};
pub use cache::{CacheInspector, CacheStateSnapshot, StatusCacheInspector};
pub use component::{Component, ProcessGroup};
pub use config::ControllerConfig;
pub use controller::{error_policy, reconcile, Context, ContextBuilder};
pub use dataset::{mark_dataset_failed, sync_dataset_status};
pub use health::{
    check_fuses_ready, check_master_ready, check_observed_health, check_runtime_health,
    check_workers_ready, HealthReport,
};
pub use phase::{next_phase, project_dataset_phase, RuntimeHealth, Transition};
pub use replicas::{sync_observed_replicas, sync_replicas, ScaleDirection};
