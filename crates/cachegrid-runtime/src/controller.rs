//! CacheRuntime controller implementation
//!
//! One reconcile pass for a runtime runs, in order:
//!
//! 1. one read of the runtime and all three process groups
//! 2. replica sync of the worker group
//! 3. the runtime health check (master, worker, fuse)
//! 4. observed generation and gateway endpoint
//! 5. the Dataset status projection, with a cache snapshot taken for this
//!    pass only
//!
//! A failed read aborts the pass before any status is written.
//!
//! Every status write goes through the optimistic update loop, so passes for
//! the same runtime never lose each other's updates.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use cachegrid_common::crd::{CacheRuntime, GatewayStatus};
use cachegrid_common::events::{EventPublisher, KubeEventPublisher};
use cachegrid_common::metrics::ReconcileTimer;
use cachegrid_common::retry::update_on_conflict;
use cachegrid_common::{Error, ObjectKey, FIELD_MANAGER};

use crate::accessor::{ClusterStateAccessor, KubeClient, KubeClientImpl};
use crate::cache::{CacheInspector, StatusCacheInspector};
use crate::config::ControllerConfig;
use crate::dataset::sync_dataset_status;
use crate::health::{check_observed_health, report_failure};
use crate::replicas::sync_observed_replicas;

/// Controller context containing shared state and clients
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client)
///     .config(config)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Source of the per-pass cache snapshot
    pub cache: Arc<dyn CacheInspector>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Requeue intervals and retry bounds
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Read-only accessor over this context's client
    pub fn accessor(&self) -> ClusterStateAccessor {
        ClusterStateAccessor::new(self.kube.clone())
    }

    /// Create a context for testing with custom mock clients
    ///
    /// Events are dropped and retries back off in milliseconds.
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, cache: Arc<dyn CacheInspector>) -> Self {
        Self {
            kube,
            cache,
            events: Arc::new(cachegrid_common::events::NoopEventPublisher),
            config: ControllerConfig::for_testing(),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    cache: Option<Arc<dyn CacheInspector>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            cache: None,
            events: None,
            config: ControllerConfig::default(),
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the cache inspector
    pub fn cache_inspector(mut self, cache: Arc<dyn CacheInspector>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the controller configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            cache: self.cache.unwrap_or_else(|| Arc::new(StatusCacheInspector)),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client, FIELD_MANAGER))),
            config: self.config,
        }
    }
}

/// Endpoint of the master API behind the gateway
pub fn gateway_endpoint(key: &ObjectKey, port: u16) -> String {
    format!("{}-master.{}.svc:{}", key.name, key.namespace, port)
}

/// Record the processed generation and the gateway sub-status
async fn record_observed(ctx: &Context, key: &ObjectKey) -> Result<CacheRuntime, Error> {
    let accessor = ctx.accessor();
    let outcome = update_on_conflict(
        &ctx.config.status_retry,
        "record_observed",
        || accessor.runtime(key),
        |rt: &mut CacheRuntime| {
            let generation = rt.metadata.generation;
            let gateway = rt.spec.gateway.enabled.then(|| GatewayStatus {
                endpoint: gateway_endpoint(key, rt.spec.gateway.port),
            });
            let status = rt.status.get_or_insert_with(Default::default);
            status.observed_generation = generation;
            status.gateway = gateway;
            Ok(())
        },
        |rt: CacheRuntime| async move { ctx.kube.write_runtime_status(&rt).await },
    )
    .await?;
    Ok(outcome.into_inner())
}

async fn reconcile_runtime(
    runtime: &CacheRuntime,
    ctx: &Context,
    key: &ObjectKey,
) -> Result<Action, Error> {
    if let Err(e) = runtime.spec.validate() {
        warn!(error = %e, "runtime validation failed");
        return Ok(Action::await_change());
    }

    let state = match ctx.accessor().observe(key).await {
        Ok(state) => state,
        Err(e) => return Err(report_failure(ctx, key, e).await),
    };

    let direction = sync_observed_replicas(ctx, key, &state.worker).await?;
    debug!(?direction, "replica sync complete");

    let report = check_observed_health(ctx, key, &state).await?;

    let current = record_observed(ctx, key).await?;
    let snapshot = ctx.cache.inspect(&current).await?;
    let phase = sync_dataset_status(ctx, key, &current, &report.health(), &snapshot).await?;

    info!(
        all_ready = report.ready,
        skipped = ?report.skipped,
        dataset_phase = ?phase,
        "reconcile pass complete"
    );
    Ok(Action::requeue(ctx.config.requeue_after(report.ready)))
}

/// Reconcile a CacheRuntime resource
///
/// Converges the runtime status and the status of its Dataset on what the
/// process groups report. Returns when to look at the runtime again, or an
/// error for [`error_policy`] to requeue.
#[instrument(skip(runtime, ctx), fields(runtime = %runtime.name_any()))]
pub async fn reconcile(runtime: Arc<CacheRuntime>, ctx: Arc<Context>) -> Result<Action, Error> {
    let Some(namespace) = runtime.namespace() else {
        return Err(Error::validation("CacheRuntime must be namespaced"));
    };
    let key = ObjectKey::new(namespace, runtime.name_any());
    let timer = ReconcileTimer::start(key.to_string());

    match reconcile_runtime(&runtime, &ctx, &key).await {
        Ok(action) => {
            timer.success();
            Ok(action)
        }
        Err(Error::NotFound { kind, .. }) if kind == "CacheRuntime" => {
            // Deleted while the pass was running; the watch will not bring it back
            debug!("runtime no longer exists");
            timer.success();
            Ok(Action::await_change())
        }
        Err(e) => {
            timer.error(e.kind_label());
            Err(e)
        }
    }
}

/// Error policy for the controller
///
/// Conflicts that outlived the retry bound and missing process groups are
/// expected while the cluster settles and are requeued quickly; anything
/// else backs off longer.
pub fn error_policy(runtime: Arc<CacheRuntime>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        runtime = %runtime.name_any(),
        "reconciliation failed"
    );

    if error.is_conflict() {
        Action::requeue(ctx.config.conflict_requeue)
    } else if error.is_not_found() {
        Action::requeue(ctx.config.not_ready_requeue)
    } else {
        Action::requeue(ctx.config.error_requeue)
    }
}
