//! cachegrid operator - status convergence for caching clusters

use std::time::Duration;

use clap::{Args, Parser, ValueEnum};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use cachegrid_common::crd::{CacheRuntime, Dataset};
use cachegrid_common::retry::{retry_with_backoff, RetryConfig, DEFAULT_CONFLICT_ATTEMPTS};
use cachegrid_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use cachegrid_common::FIELD_MANAGER;
use cachegrid_runtime::config::{DEFAULT_NOT_READY_REQUEUE, DEFAULT_READY_REQUEUE};
use cachegrid_runtime::ControllerConfig;

mod controller_runner;

/// cachegrid - converges CacheRuntime and Dataset status on the live cluster
#[derive(Parser, Debug)]
#[command(name = "cachegrid", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,
}

/// Stdout log format
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormatArg {
    Json,
    Text,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Text => LogFormat::Text,
        }
    }
}

#[derive(Args, Debug)]
struct ControllerArgs {
    /// Only watch this namespace (default: all namespaces)
    #[arg(long, env = "CACHEGRID_WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Attempts of each optimistic status write before requeueing
    #[arg(long, env = "CACHEGRID_STATUS_RETRY_ATTEMPTS", default_value_t = DEFAULT_CONFLICT_ATTEMPTS)]
    status_retry_attempts: u32,

    /// Requeue interval (seconds) once every component is Ready
    #[arg(long, env = "CACHEGRID_READY_REQUEUE_SECS", default_value_t = DEFAULT_READY_REQUEUE.as_secs())]
    ready_requeue_secs: u64,

    /// Requeue interval (seconds) while a component is not Ready
    #[arg(long, env = "CACHEGRID_NOT_READY_REQUEUE_SECS", default_value_t = DEFAULT_NOT_READY_REQUEUE.as_secs())]
    not_ready_requeue_secs: u64,

    /// Stdout log format
    #[arg(long, env = "CACHEGRID_LOG_FORMAT", value_enum, default_value = "json")]
    log_format: LogFormatArg,

    /// Do not install or upgrade the CRDs on startup
    #[arg(long, env = "CACHEGRID_SKIP_CRD_INSTALL")]
    skip_crd_install: bool,
}

impl ControllerArgs {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            watch_namespace: self.watch_namespace.clone(),
            ready_requeue: Duration::from_secs(self.ready_requeue_secs),
            not_ready_requeue: Duration::from_secs(self.not_ready_requeue_secs),
            ..Default::default()
        }
        .with_status_retry_attempts(self.status_retry_attempts)
    }
}

/// All CRDs owned by cachegrid as one multi-document YAML stream
fn crd_manifests() -> anyhow::Result<String> {
    let runtime = serde_yaml::to_string(&CacheRuntime::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize CacheRuntime CRD: {}", e))?;
    let dataset = serde_yaml::to_string(&Dataset::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize Dataset CRD: {}", e))?;
    Ok(format!("{runtime}---\n{dataset}"))
}

/// Ensure all cachegrid CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply.
/// This ensures the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let retry = RetryConfig::with_max_attempts(5);

    for crd in [CacheRuntime::crd(), Dataset::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD...");
        let patch = Patch::Apply(&crd);
        let (crds, params, patch, crd_name) = (&crds, &params, &patch, name.as_str());
        retry_with_backoff(&retry, "install_crd", move || {
            crds.patch(crd_name, params, patch)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install {} CRD: {}", name, e))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_manifests()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        log_format: cli.controller.log_format.into(),
        ..Default::default()
    })?;

    let client = Client::try_default().await?;
    if !cli.controller.skip_crd_install {
        ensure_crds_installed(&client).await?;
    }

    let config = cli.controller.controller_config();
    tracing::info!(
        namespace = ?config.watch_namespace,
        status_retry_attempts = config.status_retry.max_attempts,
        "Starting cachegrid controller"
    );

    controller_runner::build_runtime_controller(client, config).await;

    tracing::info!("Controller stopped");
    Ok(())
}
