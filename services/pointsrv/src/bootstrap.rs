//! Process wiring: CLI arguments, logging and the startup sequence

use crate::config::{AppConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use crate::cov::CovDispatcher;
use crate::modbus::{ConnectionRegistry, ModbusConnector};
use crate::model::NetworkType;
use crate::publish::{CovNotifier, MqttPublisher};
use crate::scheduler::PollingScheduler;
use crate::store::SqliteStore;
use crate::sync::{HttpGateway, SyncEngine};
use anyhow::{Context, Result};
use clap::Parser;
use common::config_loader::{get_config_value, get_string_config};
use common::LogConfig;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const SERVICE_NAME: &str = "pointsrv";
pub const LOG_LEVEL_ENV: &str = "POINTSRV_LOG_LEVEL";

/// Modbus point server
#[derive(Debug, Clone, Default, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log filter (trace, debug, info, warn, error or a RUST_LOG directive)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Only validate the configuration and exit
    #[arg(long)]
    pub validate: bool,

    /// Publish the stored state of every point once after start
    #[arg(long)]
    pub republish: bool,
}

pub const REPUBLISH_ENV: &str = "POINTSRV_REPUBLISH";

impl Args {
    /// Config path: `--config` > `POINTSRV_CONFIG` > default
    pub fn config_path(&self) -> String {
        get_string_config(self.config.clone(), CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH)
    }

    /// `--republish` > `POINTSRV_REPUBLISH` > off
    pub fn republish(&self) -> bool {
        get_config_value(self.republish.then_some(true), REPUBLISH_ENV, false)
    }
}

/// Log filter: `--log-level` > `POINTSRV_LOG_LEVEL` > `logging.level`
pub fn log_level(args: &Args, config: &AppConfig) -> String {
    get_string_config(
        args.log_level.clone(),
        LOG_LEVEL_ENV,
        &config.logging.level,
    )
}

pub fn init_logging(args: &Args, config: &AppConfig) -> Result<()> {
    common::logging::init_log_root(config.logging.dir.as_deref());
    let log_config = LogConfig {
        service_name: SERVICE_NAME.to_string(),
        log_dir: common::logging::get_log_root(),
        level: log_level(args, config),
        enable_json: config.logging.json,
        enable_file: config.logging.file,
        ..Default::default()
    };
    common::logging::init_with_config(log_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))
}

/// Re-read the config file and apply its log level to the running subscriber
pub fn reload_log_level(args: &Args) -> Result<String> {
    let config = AppConfig::load(args.config_path())?;
    let filter = LogConfig {
        service_name: SERVICE_NAME.to_string(),
        level: log_level(args, &config),
        ..Default::default()
    }
    .filter_string();
    common::logging::set_log_level(&filter).map_err(|e| anyhow::anyhow!(e))?;
    Ok(filter)
}

/// Reload the log level on every SIGHUP
#[cfg(unix)]
pub fn spawn_log_reload(args: Args) -> Option<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("SIGHUP handler not installed: {}", e);
            return None;
        },
    };
    Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match reload_log_level(&args) {
                Ok(filter) => info!("SIGHUP: log filter now {}", filter),
                Err(e) => warn!("SIGHUP: log level not reloaded: {}", e),
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_log_reload(_args: Args) -> Option<JoinHandle<()>> {
    None
}

/// Running service
pub struct Runtime {
    pub store: SqliteStore,
    pub sync: Arc<SyncEngine>,
    pub notifier: Option<Arc<CovNotifier>>,
    pub schedulers: Vec<Arc<PollingScheduler>>,
    mqtt: Option<Arc<MqttPublisher>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    pub async fn start(config: &AppConfig, republish: bool) -> Result<Self> {
        let store = SqliteStore::connect(&config.database.url)
            .await
            .with_context(|| format!("Failed to open database {}", config.database.url))?;
        store.init_schema().await.context("Failed to create schema")?;
        info!("Database ready: {}", config.database.url);

        let gateway = HttpGateway::new(&config.gateway.url, config.gateway.timeout())
            .context("Failed to create gateway client")?;
        let sync = SyncEngine::start(Arc::new(gateway), store.clone(), config.sync.engine());

        let (mqtt, notifier) = if config.mqtt.enabled {
            let publisher = Arc::new(MqttPublisher::start(&config.mqtt));
            let notifier = Arc::new(CovNotifier::new(
                publisher.clone(),
                store.clone(),
                &config.mqtt,
                &config.installation,
            ));
            (Some(publisher), Some(notifier))
        } else {
            info!("MQTT disabled");
            (None, None)
        };

        let cov = Arc::new(CovDispatcher::new(Some(sync.clone()), notifier.clone()));

        let mut variants = Vec::new();
        if config.drivers.modbus_rtu {
            variants.push(NetworkType::Rtu);
        }
        if config.drivers.modbus_tcp {
            variants.push(NetworkType::Tcp);
        }

        let mut schedulers = Vec::with_capacity(variants.len());
        let mut tasks = Vec::with_capacity(variants.len());
        for network_type in variants {
            let registry = Arc::new(ConnectionRegistry::new(Arc::new(ModbusConnector)));
            let scheduler = Arc::new(PollingScheduler::new(
                network_type,
                registry,
                store.clone(),
                cov.clone(),
            ));
            tasks.push(tokio::spawn(scheduler.clone().run()));
            schedulers.push(scheduler);
        }
        if schedulers.is_empty() {
            warn!("No Modbus driver enabled");
        }

        if config.sync.sync_on_start {
            let sync = sync.clone();
            tasks.push(tokio::spawn(async move { sync.sync_on_start().await }));
        }

        if republish {
            if let Some(notifier) = notifier.clone() {
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = notifier.republish_all().await {
                        warn!("MQTT republish failed: {}", e);
                    }
                }));
            }
        }

        Ok(Self {
            store,
            sync,
            notifier,
            schedulers,
            mqtt,
            tasks,
        })
    }

    /// Scheduler of one driver variant
    pub fn scheduler(&self, network_type: NetworkType) -> Option<&Arc<PollingScheduler>> {
        self.schedulers
            .iter()
            .find(|s| s.network_type() == network_type)
    }

    pub async fn shutdown(self) {
        for scheduler in &self.schedulers {
            scheduler.shutdown();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        self.sync.drain().await;
        if let Some(mqtt) = &self.mqtt {
            mqtt.stop().await;
        }
        self.store.pool().close().await;
        info!("Shutdown complete");
    }
}
