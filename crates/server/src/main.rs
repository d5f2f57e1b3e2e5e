use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use blobgate_broker::{BrokerMetrics, Router};
use blobgate_server::api::AppState;
use blobgate_server::config::BlobgateConfig;
use blobgate_server::error::ServerError;
use blobgate_server::roles::{self, CollectorStatus, Role};
use blobgate_server::store_factory::create_backend;
use blobgate_store::ObjectStore;

/// Blobgate object cache gateway.
#[derive(Parser, Debug)]
#[command(name = "blobgate-server", about = "Object cache gateway for blobgate")]
struct Cli {
    /// Roles to run in this process.
    #[arg(value_enum, default_value = "all")]
    role: Role,

    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "blobgate.toml")]
    config: String,

    /// Override the upload channel address.
    #[arg(long)]
    upload_listen: Option<String>,

    /// Override the download channel address.
    #[arg(long)]
    download_listen: Option<String>,

    /// Override the upload worker count.
    #[arg(long)]
    workers: Option<usize>,

    /// Override the download credit window.
    #[arg(long)]
    download_credit: Option<usize>,

    /// Override the collector interval in seconds.
    #[arg(long)]
    gc_interval: Option<u64>,

    /// Override the HTTP bind host.
    #[arg(long)]
    http_host: Option<String>,

    /// Override the HTTP bind port.
    #[arg(long)]
    http_port: Option<u16>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut BlobgateConfig) {
        if let Some(listen) = &self.upload_listen {
            config.upload.listen.clone_from(listen);
        }
        if let Some(listen) = &self.download_listen {
            config.download.listen.clone_from(listen);
        }
        if let Some(workers) = self.workers {
            config.upload.workers = workers;
        }
        if let Some(credit) = self.download_credit {
            config.download.credit_window = credit;
        }
        if let Some(interval) = self.gc_interval {
            config.collector.interval_seconds = interval;
        }
        if let Some(host) = &self.http_host {
            config.http.host.clone_from(host);
        }
        if let Some(port) = self.http_port {
            config.http.port = port;
        }
    }
}

#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration from TOML file, or use defaults if the file does not exist.
    let mut config = if Path::new(&cli.config).exists() {
        let contents = std::fs::read_to_string(&cli.config)?;
        BlobgateConfig::from_toml(&contents)?
    } else {
        info!(path = %cli.config, "config file not found, using defaults");
        BlobgateConfig::default()
    };
    cli.apply_overrides(&mut config);

    let backend = create_backend(&config.storage).await?;
    let store = ObjectStore::new(backend, config.storage.store_config());
    let metrics = Arc::new(BrokerMetrics::default());
    let collector_status = Arc::new(CollectorStatus::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Bind everything first so a taken port stops startup before any role runs.
    let mut tasks: JoinSet<(&'static str, Result<(), ServerError>)> = JoinSet::new();

    if cli.role.runs_brokers() {
        let upload_config = config.upload.broker_config();
        let upload_router =
            Router::bind(&config.upload.listen, upload_config.max_frame_size).await?;
        info!(
            address = %upload_router.local_addr()?,
            workers = upload_config.workers,
            "upload channel listening"
        );

        let download_config = config.download.server_config();
        let download_router =
            Router::bind(&config.download.listen, download_config.max_frame_size).await?;
        info!(
            address = %download_router.local_addr()?,
            credit_window = config.download.credit_window,
            "download channel listening"
        );

        let (store_u, metrics_u, rx_u) = (store.clone(), Arc::clone(&metrics), shutdown_rx.clone());
        tasks.spawn(async move {
            roles::serve_upload(upload_router, store_u, metrics_u, upload_config, rx_u).await;
            ("upload", Ok(()))
        });
        let (store_d, metrics_d, rx_d) = (store.clone(), Arc::clone(&metrics), shutdown_rx.clone());
        tasks.spawn(async move {
            roles::serve_download(download_router, store_d, metrics_d, download_config, rx_d).await;
            ("download", Ok(()))
        });
    }

    let collector_enabled = match cli.role {
        Role::All => config.collector.enabled,
        role => role.runs_collector(),
    };
    if collector_enabled {
        let (store_c, status, rx_c) = (
            store.clone(),
            Arc::clone(&collector_status),
            shutdown_rx.clone(),
        );
        let collector_config = config.collector.collector_config();
        tasks.spawn(async move {
            roles::run_collector(store_c, collector_config, status, rx_c).await;
            ("collector", Ok(()))
        });
    }

    let http_enabled = match cli.role {
        Role::All => config.http.enabled,
        role => role.runs_http(),
    };
    if http_enabled {
        let addr = config.http.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        let state = AppState {
            store: store.clone(),
            metrics: Arc::clone(&metrics),
            collector: Arc::clone(&collector_status),
            http: Arc::new(config.http.clone()),
        };
        let rx_h = shutdown_rx.clone();
        tasks.spawn(async move { ("http", roles::serve_http(listener, state, rx_h).await) });
    }

    if tasks.is_empty() {
        warn!(role = ?cli.role, "no roles enabled, exiting");
        return Ok(());
    }
    info!(role = ?cli.role, "blobgate-server running");

    // Serve until a signal arrives or a role stops on its own.
    let mut failed = false;
    tokio::select! {
        () = shutdown_signal() => {}
        Some(joined) = tasks.join_next() => {
            failed = report_role_exit(joined);
        }
    }
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    let drained = tokio::time::timeout(shutdown_timeout, async {
        let mut failed = false;
        while let Some(joined) = tasks.join_next().await {
            failed |= report_role_exit(joined);
        }
        failed
    })
    .await;
    match drained {
        Ok(role_failed) => failed |= role_failed,
        Err(_) => {
            warn!(
                timeout_secs = config.server.shutdown_timeout_seconds,
                "shutdown timeout exceeded, aborting remaining roles"
            );
            tasks.abort_all();
        }
    }

    info!("blobgate-server shut down");
    if failed {
        return Err("a server role failed".into());
    }
    Ok(())
}

/// Log how a role ended. Returns `true` if it failed.
fn report_role_exit(
    joined: Result<(&'static str, Result<(), ServerError>), tokio::task::JoinError>,
) -> bool {
    match joined {
        Ok((role, Ok(()))) => {
            info!(role, "role stopped");
            false
        }
        Ok((role, Err(e))) => {
            error!(role, error = %e, "role failed");
            true
        }
        Err(e) => {
            error!(error = %e, "role panicked");
            true
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
