//! NamespaceStore Operator
//!
//! Reconciles NamespaceStore records against a storage-management API.

use anyhow::Context;
use clap::Parser;
use kube::CustomResourceExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use namespace_store_operator::{
    controller, KubeEventSink, KubeRecordStore, KubeSecretStore, NamespaceStore,
    NamespaceStoreReconciler, OperatorConfig, ProbeServer, ProbeServerConfig, ProbeState,
    ReconcileMetrics, RpcClientConfig, RpcStorageApi,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// NamespaceStore Operator - registers external storage targets as namespace resources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace to watch; all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Name of the parent storage system record
    #[arg(long, env = "SYSTEM_NAME", default_value = "noobaa")]
    system_name: String,

    /// Namespace the operator runs in
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "noobaa")]
    operator_namespace: String,

    /// Storage-management API endpoint
    #[arg(long, env = "REMOTE_ENDPOINT", default_value = "https://noobaa-mgmt:443")]
    remote_endpoint: String,

    /// Storage-management API token
    #[arg(long, env = "REMOTE_TOKEN", hide_env_values = true)]
    remote_token: Option<String>,

    /// Backoff after transient errors, in seconds
    #[arg(long, env = "REQUEUE_AFTER_SECS", default_value = "3")]
    requeue_after_secs: u64,

    /// Age below which missing or rejected credentials are retried, in seconds
    #[arg(long, env = "SECRET_GRACE_SECS", default_value = "300")]
    secret_grace_secs: u64,

    /// Probe and metrics server bind address
    #[arg(long, env = "PROBE_ADDR", default_value = "0.0.0.0:8081")]
    probe_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the CRD as YAML and exit
    #[arg(long)]
    print_crds: bool,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            system_name: self.system_name.clone(),
            operator_namespace: self.operator_namespace.clone(),
            requeue_after: Duration::from_secs(self.requeue_after_secs),
            grace_period: Duration::from_secs(self.secret_grace_secs),
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crds {
        print!("{}", serde_yaml::to_string(&NamespaceStore::crd())?);
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting NamespaceStore Operator");
    info!("  Version: {}", namespace_store_operator::VERSION);
    info!("  System: {}", args.system_name);
    info!("  Remote endpoint: {}", args.remote_endpoint);
    info!("  Probe address: {}", args.probe_addr);

    let config = args.operator_config();
    let metrics = Arc::new(ReconcileMetrics::new()?);

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let remote = RpcStorageApi::new(RpcClientConfig {
        endpoint: args.remote_endpoint.clone(),
        auth_token: args.remote_token.clone(),
        ..Default::default()
    })?
    .with_metrics(metrics.clone());

    let reconciler = Arc::new(NamespaceStoreReconciler::new(
        Arc::new(KubeRecordStore::new(client.clone())),
        Arc::new(KubeSecretStore::new(client.clone())),
        Arc::new(KubeEventSink::new(client.clone(), controller::CONTROLLER_NAME)),
        Arc::new(remote),
        config,
        metrics.clone(),
    ));

    // Start probe server
    let probe_addr: SocketAddr = args
        .probe_addr
        .parse()
        .with_context(|| format!("invalid probe address {:?}", args.probe_addr))?;
    let probe_state = ProbeState::new(metrics);
    let probe_server = ProbeServer::new(ProbeServerConfig { addr: probe_addr }, probe_state.clone());
    let probe_handle = probe_server.spawn();

    probe_state.set_ready(true);
    controller::run(client, reconciler, args.watch_namespace.clone()).await?;
    probe_state.set_ready(false);

    probe_server.shutdown();
    match probe_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Probe server error: {}", e),
        Err(e) => error!("Probe server task failed: {}", e),
    }

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("tower_http=info".parse()?)
        .add_directive("reqwest=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
