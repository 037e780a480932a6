//! pointsrv - Modbus point server

use anyhow::Result;
use clap::Parser;
use pointsrv::bootstrap::{init_logging, spawn_log_reload, Args, Runtime};
use pointsrv::AppConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config_path();
    let config = AppConfig::load(&config_path)?;

    if args.validate {
        println!("Configuration {} is valid", config_path);
        return Ok(());
    }

    init_logging(&args, &config)?;
    info!(
        "pointsrv {} starting ({}, log filter {})",
        env!("CARGO_PKG_VERSION"),
        config_path,
        common::logging::get_log_level()
    );

    let runtime = Runtime::start(&config, args.republish()).await?;
    let log_reload = spawn_log_reload(args.clone());

    common::shutdown::wait_for_shutdown().await;
    info!("Shutdown signal received");
    if let Some(task) = log_reload {
        task.abort();
    }
    runtime.shutdown().await;
    Ok(())
}
