//! Cache-layer introspection
//!
//! The dataset's cache summary is the engine-reported `cacheStates` of the
//! runtime merged with a [`CacheStateSnapshot`] produced by a
//! [`CacheInspector`]. The snapshot is taken once per reconcile pass and
//! handed to the dataset synchronizer as a value; the controller keeps no
//! cache state between passes.

use std::collections::BTreeMap;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use cachegrid_common::crd::{CacheRuntime, CacheStateName};
use cachegrid_common::Error;

/// Immutable cache summary for one reconcile pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStateSnapshot {
    /// Cache states that override the runtime-reported ones
    pub states: BTreeMap<CacheStateName, String>,
    /// Number of files in the dataset, when known
    pub file_num: Option<i64>,
}

impl CacheStateSnapshot {
    /// Merge over the engine-reported states; snapshot values win
    pub fn merged_over(
        &self,
        reported: &BTreeMap<CacheStateName, String>,
    ) -> BTreeMap<CacheStateName, String> {
        let mut merged = reported.clone();
        merged.extend(self.states.iter().map(|(k, v)| (*k, v.clone())));
        merged
    }
}

/// Source of cache-layer statistics for a runtime
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CacheInspector: Send + Sync {
    /// Take a snapshot of the runtime's cache
    async fn inspect(&self, runtime: &CacheRuntime) -> Result<CacheStateSnapshot, Error>;
}

/// Inspector that derives what it can from the runtime status alone.
///
/// Computes `cachedPercentage` from the `cached` and `cacheCapacity`
/// quantities the engine reports.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusCacheInspector;

#[async_trait]
impl CacheInspector for StatusCacheInspector {
    async fn inspect(&self, runtime: &CacheRuntime) -> Result<CacheStateSnapshot, Error> {
        let mut snapshot = CacheStateSnapshot::default();
        let Some(status) = runtime.status.as_ref() else {
            return Ok(snapshot);
        };

        let cached = status
            .cache_states
            .get(&CacheStateName::Cached)
            .and_then(|q| parse_quantity(q));
        let capacity = status
            .cache_states
            .get(&CacheStateName::CacheCapacity)
            .and_then(|q| parse_quantity(q));

        if let (Some(cached), Some(capacity)) = (cached, capacity) {
            if capacity > 0 {
                let percentage = cached as f64 * 100.0 / capacity as f64;
                snapshot.states.insert(
                    CacheStateName::CachedPercentage,
                    format!("{percentage:.1}%"),
                );
            }
        }
        Ok(snapshot)
    }
}

/// Parse a byte quantity such as `512B`, `1.5GiB`, or `20Gi` into bytes.
///
/// Binary suffixes only, which is what the caching engine reports.
pub fn parse_quantity(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(quantity.len());
    let (number, unit) = quantity.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "KiB" | "Ki" | "KB" => 1 << 10,
        "MiB" | "Mi" | "MB" => 1 << 20,
        "GiB" | "Gi" | "GB" => 1 << 30,
        "TiB" | "Ti" | "TB" => 1 << 40,
        "PiB" | "Pi" | "PB" => 1 << 50,
        _ => return None,
    };
    Some((value * multiplier as f64).round() as u64)
}
