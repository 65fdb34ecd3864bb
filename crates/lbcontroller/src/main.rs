use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::reflector;
use kube::Client;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lbcontroller::config::ControllerConfig;
use lbcontroller::controller::Controller;
use lbcontroller::reconciler::{ReconcilerSettings, ServiceReconciler};
use lbcontroller::source::{watch_services, CachedServices, KubeStatusWriter};
use lbcontroller::LbApiClient;

/// Reconciles Kubernetes LoadBalancer Services against a load balancer API
#[derive(Debug, Parser)]
#[command(name = "lbcontroller", version, about)]
struct Cli {
    /// Base URL of the load balancer API
    #[arg(long, env = "LBC_ENDPOINT")]
    endpoint: String,

    /// Cluster name, first component of every load balancer resource name
    #[arg(long, env = "LBC_CLUSTER_NAME", default_value = "nird")]
    cluster_name: String,

    /// Bearer token for the load balancer API
    #[arg(long, env = "LBC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// YAML configuration file
    #[arg(long, env = "LBC_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_current_span(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    info!("lbcontroller starting");

    let config = ControllerConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    info!(
        backends = config.backends.len(),
        workers = config.workers,
        method = %config.method,
        "Loaded configuration"
    );
    if config.backends.is_empty() {
        warn!("No backends configured, created services will not forward anywhere");
    }

    let api = LbApiClient::new(&cli.endpoint, cli.token.clone(), config.request_timeout())
        .context("Failed to create load balancer API client")?;
    info!(endpoint = %api.endpoint(), cluster = %cli.cluster_name, "Configured load balancer API");

    let kube_client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let (reader, writer) = reflector::store();
    let services = CachedServices::new(reader);

    let reconciler = ServiceReconciler::new(
        api,
        services.clone(),
        KubeStatusWriter::new(kube_client.clone()),
        ReconcilerSettings::new(&cli.cluster_name, &config),
    );
    let controller = Arc::new(Controller::new(Arc::new(reconciler), config.retry.policy()));

    let watch = tokio::spawn(watch_services(
        kube_client,
        writer,
        Arc::clone(controller.queue()),
    ));

    services
        .wait_until_ready()
        .await
        .context("Service watch stopped before the initial list completed")?;
    info!("Service cache synced");

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    let shutdown = async move {
        select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
        }
    };

    let workers = tokio::spawn(Arc::clone(&controller).run(config.workers, shutdown));
    let stop_watch = watch.abort_handle();

    select! {
        result = workers => {
            stop_watch.abort();
            result.context("Worker pool failed")?;
        }
        result = watch => {
            // The watch retries with backoff and only ends on a fatal error
            result.context("Service watch panicked")?;
            bail!("Service watch exited unexpectedly");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
