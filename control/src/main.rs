use anyhow::{Context, Result};
use clap::Parser;
use control::apis::ingress::watch::{spawn_watchers, Writers};
use control::apis::ingress::IngressReconciler;
use control::apis::mirror::mirror;
use control::config::ControllerConfig;
use control::error::ControlError;
use control::proxy::admin::AdminApiPusher;
use control::proxy::server::StatusServer;
use control::routes::RouteTable;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Kubernetes Ingress controller driving a Caddy server through its admin API
#[derive(Parser, Debug)]
#[command(name = "caddy-ingress", version, about)]
struct Cli {
    /// Cluster credentials file (default: $HOME/.kube/config; in-cluster
    /// config is used when the file does not exist)
    #[arg(long, value_name = "PATH")]
    kubeconfig: Option<PathBuf>,

    /// Base URL of the proxy admin API
    #[arg(long, value_name = "URL")]
    admin_url: Option<String>,

    /// Ingress class to reconcile
    #[arg(long, value_name = "CLASS")]
    ingress_class: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Needed by the Kubernetes and admin API TLS clients
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let mut config = ControllerConfig::from_env().context("Invalid configuration")?;
    if let Some(url) = cli.admin_url {
        config.admin_url = url;
    }
    if let Some(class) = cli.ingress_class {
        config.ingress_class = class;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    config.validate().context("Invalid configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        class = %config.ingress_class,
        server = %config.server_name,
        admin = %config.admin_url,
        "Starting Caddy ingress controller"
    );

    let client = kube_client(cli.kubeconfig).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (ingress_mirror, ingresses) = mirror();
    let (service_mirror, services) = mirror();
    let (endpoints_mirror, endpoints) = mirror();
    // Only the watch side reads Ingresses back
    drop(ingress_mirror);

    let table = Arc::new(RouteTable::new(
        config.server_name.clone(),
        config.initial_server(),
    ));
    let pusher = Arc::new(AdminApiPusher::from_config(&config)?);
    let status_server = StatusServer::bind(&config.metrics_addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", config.metrics_addr))?;

    let reconciler = Arc::new(IngressReconciler::new(
        config,
        table,
        service_mirror,
        endpoints_mirror,
        pusher,
        shutdown_rx.clone(),
    ));

    if let Err(e) = reconciler.start().await {
        warn!(error = %e, "Initial config push failed, continuing");
    }

    let mut handles = spawn_watchers(
        client,
        Writers {
            ingresses,
            services,
            endpoints,
        },
        reconciler,
        shutdown_rx.clone(),
    );
    handles.push(tokio::spawn(status_server.serve(shutdown_rx)));

    shutdown_signal().await?;
    info!("Shutdown signal received, stopping watchers");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Task failed during shutdown: {}", e);
        }
    }

    info!("Controller stopped");
    Ok(())
}

/// Client from the kubeconfig file if it exists, otherwise inferred
/// (in-cluster service account or `KUBECONFIG`)
async fn kube_client(path: Option<PathBuf>) -> Result<Client, ControlError> {
    let path = path.or_else(|| {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".kube").join("config"))
    });

    match path {
        Some(path) if path.exists() => {
            info!("Using kubeconfig {}", path.display());
            let kubeconfig = Kubeconfig::read_from(&path)?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await?;
            Ok(Client::try_from(config)?)
        }
        _ => {
            info!("No kubeconfig file found, inferring cluster config");
            Ok(Client::try_default().await?)
        }
    }
}

async fn shutdown_signal() -> Result<(), ControlError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}
