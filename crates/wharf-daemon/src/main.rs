mod cli;

use std::sync::Arc;

use color_eyre::eyre::eyre;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use wharf_core::models::{DeploymentEvent, WharfConfig};
use wharf_core::services::config_loader;
use wharf_core::services::fetcher::GitFetcher;
use wharf_core::services::notifier::{ChannelNotifier, EventNotifier, TracingNotifier};
use wharf_core::services::orchestrator::DeploymentOrchestrator;
use wharf_core::services::registry::FileRegistry;
use wharf_core::services::runtime::DockerComposeRuntime;

use crate::cli::{Args, USAGE};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse(std::env::args().skip(1)).map_err(|e| eyre!("{e}\n\n{USAGE}"))?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = config_loader::load_or_default(args.config.as_deref())?;
    let _guard = setup_logging(&config, args.debug);
    tracing::info!(
        data_dir = %config.data_dir.display(),
        ports = %format!("{}-{}", config.port_range.start, config.port_range.end),
        "wharfd starting"
    );

    std::fs::create_dir_all(config.workspaces_dir())?;
    let registry = Arc::new(FileRegistry::open(&config.registry_path()).await?);
    tracing::info!(registry = %registry.path().display(), "registry opened");
    let fetcher = Arc::new(GitFetcher::new());
    let runtime = Arc::new(DockerComposeRuntime::new(config.container.clone()));
    let (notifier, events) = ChannelNotifier::channel();
    let _event_task = spawn_event_logger(events);

    let interval = config.reconcile_interval();
    let orchestrator = Arc::new(DeploymentOrchestrator::new(
        config,
        registry,
        fetcher,
        runtime,
        Arc::new(notifier),
    ));

    let recovered = orchestrator.recover_interrupted().await?;
    if !recovered.is_empty() {
        tracing::warn!(count = recovered.len(), "marked interrupted deployments as failed");
    }

    let synchronizer = orchestrator.synchronizer();
    if args.once {
        let report = synchronizer.reconcile(None).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let sync_task = synchronizer.spawn(interval);
    tracing::info!(interval_secs = interval.as_secs(), "reconciliation loop running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    sync_task.abort();
    Ok(())
}

/// Log to stderr, or to the configured file through a non-blocking writer.
/// `RUST_LOG` overrides the configured filter. The returned guard must stay
/// alive for buffered lines to be flushed.
fn setup_logging(
    config: &WharfConfig,
    debug: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = if debug {
        "debug"
    } else {
        config.logging.filter.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    match &config.logging.file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "wharfd.log".into());
            let file_appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_env_filter(filter)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
            None
        }
    }
}

/// Drain the event channel into the log.
fn spawn_event_logger(
    mut events: mpsc::UnboundedReceiver<DeploymentEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            TracingNotifier.emit(event);
        }
    })
}
