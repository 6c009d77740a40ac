//! sharedfsd: Docker volume plugin for shared-filesystem volumes.
//!
//! One instance runs per container host. All instances point `--root` at the
//! same directory on a shared filesystem (NFS or similar) and coordinate
//! through files there; there is no other channel between them.

use clap::Parser;
use gethostname::gethostname;
use sharedfs_core::{Config, Driver, Maintenance};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod shutdown;

#[derive(Parser, Debug)]
#[command(name = "sharedfsd", about = "Cluster-wide volume plugin over a shared filesystem")]
struct Args {
    /// Base directory where volumes are created in the cluster
    #[arg(long)]
    root: PathBuf,

    /// The hostname used in locking operations (defaults to the OS hostname)
    #[arg(long)]
    hostname: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    debug: bool,

    /// Unix socket the plugin listens on
    #[arg(long, default_value = "/run/docker/plugins/sharedfs.sock")]
    socket: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let hostname = args
        .hostname
        .unwrap_or_else(|| gethostname().to_string_lossy().into_owned());

    let mut config = Config::new(args.root, hostname);
    config.apply_env();
    if args.debug {
        config.debug = true;
    }
    config.validate()?;

    init_tracing(config.debug);
    info!("starting with hostname={} root={:?}", config.hostname, config.root);

    let config = Arc::new(config);
    let driver = Arc::new(Driver::new(config.clone()).await);

    let shutdown_rx = shutdown::shutdown_signal()?;
    let maintenance =
        Maintenance::new(driver.clone(), config.clone(), shutdown_rx.resubscribe());
    let maintenance_task = tokio::spawn(maintenance.run());

    api::serve(driver, &args.socket, shutdown_rx).await?;

    maintenance_task.await?;
    info!("daemon stopped");
    Ok(())
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(true)
        .init();
}
