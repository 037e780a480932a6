//! Mapping & sync engine
//!
//! Pushes point values to mapped points of the generic and BACnet domains.
//! Pushes go through a bounded queue consumed by a small worker pool; a full
//! queue drops the push and counts it. Failures are logged and counted, never
//! retried: the next change of value or resync heals them.

mod gateway;

pub use gateway::{GatewayApi, GatewayResponse, HttpGateway, DEFAULT_GATEWAY_URL};

use crate::model::{MapType, Mapping, PriorityArray};
use crate::store::SqliteStore;
use errors::PointResult;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const GENERIC_POINT_PATH: &str = "/ps/api/generic/points_value/uuid";
pub const BACNET_POINT_PATH: &str = "/bacnet/api/bacnet/points/uuid";
pub const LORA_TO_GENERIC_SYNC_PATH: &str = "/lora/api/sync/lp_to_gp";
pub const BACNET_TO_GENERIC_SYNC_PATH: &str = "/bacnet/api/sync/bp_to_gp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub workers: usize,
    pub queue_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 256,
        }
    }
}

/// One value push to a mapped point
#[derive(Debug, Clone, PartialEq)]
pub struct SyncJob {
    pub point_uuid: String,
    pub mapped_point_uuid: String,
    pub map_type: MapType,
    pub array: PriorityArray,
}

impl SyncJob {
    pub fn new(mapping: &Mapping, array: PriorityArray) -> Self {
        Self {
            point_uuid: mapping.point_uuid.clone(),
            mapped_point_uuid: mapping.mapped_point_uuid.clone(),
            map_type: mapping.map_type,
            array,
        }
    }

    pub fn api_path(&self) -> String {
        let base = match self.map_type {
            MapType::Generic => GENERIC_POINT_PATH,
            MapType::Bacnet => BACNET_POINT_PATH,
        };
        format!("{}/{}", base, self.mapped_point_uuid)
    }

    pub fn body(&self) -> Value {
        json!({ "priority_array_write": self.array.to_json() })
    }
}

#[derive(Debug, Default)]
pub struct SyncStats {
    enqueued: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatsSnapshot {
    pub enqueued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl SyncStats {
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

pub struct SyncEngine {
    gateway: Arc<dyn GatewayApi>,
    store: SqliteStore,
    tx: Mutex<Option<mpsc::Sender<SyncJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<SyncStats>,
}

impl SyncEngine {
    /// Start the worker pool
    pub fn start(gateway: Arc<dyn GatewayApi>, store: SqliteStore, config: SyncConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(SyncStats::default());

        let workers = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&gateway),
                    Arc::clone(&stats),
                ))
            })
            .collect();
        debug!(
            "Sync engine started: {} workers, queue {}",
            config.workers, config.queue_size
        );

        Arc::new(Self {
            gateway,
            store,
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            stats,
        })
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        self.stats.snapshot()
    }

    fn enqueue(&self, job: SyncJob) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match tx.try_send(job) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            },
            Err(TrySendError::Full(job)) => {
                warn!("Sync queue full, dropped push for {}", job.point_uuid);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            },
            Err(TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            },
        }
    }

    /// Queue a bulk resync push, waiting for queue space
    async fn enqueue_wait(&self, job: SyncJob) -> bool {
        let Some(tx) = self.tx.lock().clone() else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match tx.send(job).await {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            },
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            },
        }
    }

    /// Push one point's array to its mapped point
    ///
    /// Returns whether a push was queued. Missing or BROKEN mappings never
    /// reach the gateway.
    pub async fn sync_one(&self, point_uuid: &str, array: PriorityArray) -> bool {
        let mapping = match self.store.get_mapping_by_point(point_uuid).await {
            Ok(Some(mapping)) => mapping,
            Ok(None) => return false,
            Err(e) => {
                warn!("Mapping lookup for {} failed: {}", point_uuid, e);
                return false;
            },
        };
        if !mapping.is_mapped() {
            debug!("Mapping of {} is {}, not synced", point_uuid, mapping.mapping_state);
            return false;
        }
        self.enqueue(SyncJob::new(&mapping, array))
    }

    /// Queue a push for every MAPPED mapping with a stored value
    ///
    /// `gp` selects generic mappings, `bp` BACnet ones. Unlike COV pushes this
    /// waits for queue space, so no mapping is skipped. Returns the number of
    /// queued pushes.
    pub async fn sync_all_mapped(&self, gp: bool, bp: bool) -> PointResult<usize> {
        let mut queued = 0;
        for mapping in self.store.list_mappings().await? {
            if !mapping.is_mapped() {
                continue;
            }
            let selected = match mapping.map_type {
                MapType::Generic => gp,
                MapType::Bacnet => bp,
            };
            if !selected {
                continue;
            }

            let Some(point_store) = self.store.get_point_store(&mapping.point_uuid).await? else {
                continue;
            };
            let array = self
                .store
                .get_priority_array(&mapping.point_uuid)
                .await?
                .unwrap_or_else(|| PriorityArray::fallback_only(point_store.value));
            if self.enqueue_wait(SyncJob::new(&mapping, array)).await {
                queued += 1;
            }
        }
        Ok(queued)
    }

    pub async fn sync_mp_to_bp(&self) -> PointResult<usize> {
        self.sync_all_mapped(false, true).await
    }

    /// Startup resync, best effort
    pub async fn sync_on_start(&self) {
        for path in [LORA_TO_GENERIC_SYNC_PATH, BACNET_TO_GENERIC_SYNC_PATH] {
            let result = self
                .gateway
                .request(path, Method::GET, None)
                .await
                .and_then(|response| response.error_for_status(path));
            match result {
                Ok(_) => info!("Sync {} done", path),
                Err(e) => warn!("Sync {} failed: {}", path, e),
            }
        }

        match self.sync_all_mapped(true, true).await {
            Ok(queued) => info!("Startup sync queued {} mapped points", queued),
            Err(e) => warn!("Startup sync failed: {}", e),
        }
    }

    /// Close the queue and wait for the workers to finish what is queued
    pub async fn drain(&self) {
        self.tx.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Sync worker ended abnormally: {}", e);
            }
        }
        let stats = self.stats();
        info!(
            "Sync drained: {} ok, {} failed, {} dropped",
            stats.succeeded, stats.failed, stats.dropped
        );
    }
}

async fn run_worker(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<SyncJob>>>,
    gateway: Arc<dyn GatewayApi>,
    stats: Arc<SyncStats>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        let path = job.api_path();
        let result = gateway
            .request(&path, Method::PATCH, Some(job.body()))
            .await
            .and_then(|response| response.error_for_status(&path));
        match result {
            Ok(_) => {
                stats.succeeded.fetch_add(1, Ordering::Relaxed);
                debug!("Synced {} -> {}", job.point_uuid, path);
            },
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Sync {} -> {} failed: {}", job.point_uuid, path, e);
            },
        }
    }
    debug!("Sync worker {} stopped", id);
}
