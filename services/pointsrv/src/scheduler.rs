//! Polling scheduler
//!
//! One scheduler per driver variant (RTU or TCP). A supervision loop keeps
//! one polling task per enabled network alive; each task walks its devices,
//! polls or writes their points and maintains the network/device fault flags.
//!
//! ```text
//! run() ── every 2s ──> acquire(network) ──> spawn network loop (once)
//!                      remove stale keys
//! network loop: devices ─> ping ─> points (single | aggregate) ─> sleep
//! ```

use crate::aggregator::{group_points, is_point_to_be_written, plan_batches, Batch};
use crate::cov::CovDispatcher;
use crate::modbus::{Connection, ConnectionRegistry, ModbusClient};
use crate::model::{Device, Network, NetworkType, Point, PointStore};
use crate::poll::ExchangeContext;
use crate::store::SqliteStore;
use errors::{PointError, PointResult};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Supervision cadence
pub const SUPERVISOR_INTERVAL: Duration = Duration::from_secs(2);

/// What one bookkept exchange covers
enum Exchange<'a> {
    Point(&'a Point),
    Batch(&'a Batch),
}

pub struct PollingScheduler {
    network_type: NetworkType,
    registry: Arc<ConnectionRegistry>,
    store: SqliteStore,
    cov: Arc<CovDispatcher>,
    supervisor_interval: Duration,
    shutdown: CancellationToken,
}

impl PollingScheduler {
    pub fn new(
        network_type: NetworkType,
        registry: Arc<ConnectionRegistry>,
        store: SqliteStore,
        cov: Arc<CovDispatcher>,
    ) -> Self {
        Self {
            network_type,
            registry,
            store,
            cov,
            supervisor_interval: SUPERVISOR_INTERVAL,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_supervisor_interval(mut self, interval: Duration) -> Self {
        self.supervisor_interval = interval;
        self
    }

    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Stop the supervision loop and every network loop it started
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Supervision loop; returns after [`PollingScheduler::shutdown`]
    pub async fn run(self: Arc<Self>) {
        info!("{}: Polling started", self.network_type);
        loop {
            if let Err(e) = self.supervise_once().await {
                error!("{}: supervision failed: {}", self.network_type, e);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.supervisor_interval) => {},
                () = self.shutdown.cancelled() => break,
            }
        }
        info!("{}: Polling stopped", self.network_type);
    }

    /// One supervision pass
    ///
    /// Acquires a connection per enabled network, starts the loops that are
    /// not running and closes connections no enabled network produces.
    pub async fn supervise_once(self: &Arc<Self>) -> PointResult<()> {
        let mut networks = self.store.list_enabled_networks(self.network_type).await?;
        let mut available = HashSet::with_capacity(networks.len());

        for network in networks.iter_mut() {
            let key = network.connection_key();
            available.insert(key.clone());
            match self.registry.acquire(&*network).await {
                Ok(connection) => {
                    if connection.try_start() {
                        info!("{}: network {} loop started ({})", self.network_type, network.name, key);
                        let scheduler = Arc::clone(self);
                        tokio::spawn(scheduler.network_loop(connection));
                    }
                },
                Err(e) => {
                    warn!("{}: network {} unavailable: {}", self.network_type, network.name, e);
                    if e.is_connection() {
                        self.set_network_fault(network, true).await;
                    }
                },
            }
        }

        for key in self.registry.list_keys() {
            if !available.contains(&key) {
                if let Some(connection) = self.registry.remove(&key).await {
                    connection.stop();
                }
            }
        }
        Ok(())
    }

    async fn network_loop(self: Arc<Self>, connection: Arc<Connection>) {
        let key = connection.key().to_string();
        let network_uuid = connection.network_uuid().to_string();

        loop {
            if self.registry.get(&key).is_none() {
                debug!("{}: connection {} gone", self.network_type, key);
                break;
            }
            let network = match self.store.get_enabled_network(&network_uuid).await {
                Ok(Some(network)) => network,
                Ok(None) => {
                    debug!("{}: network {} gone", self.network_type, network_uuid);
                    break;
                },
                Err(e) => {
                    error!("{}: network {} not loaded: {}", self.network_type, network_uuid, e);
                    if self.pause(Duration::from_secs(1)).await {
                        break;
                    }
                    continue;
                },
            };

            if let Err(e) = self.poll_network(connection.client().as_ref(), network.clone()).await {
                debug!("{}: pass on {} aborted: {}", self.network_type, network.name, e);
            }

            if self
                .pause(Duration::from_secs(network.polling_interval_runtime))
                .await
            {
                break;
            }
        }

        connection.stop();
        info!("{}: network loop {} stopped", self.network_type, key);
    }

    /// Sleep unless shut down first; true when shutting down
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            () = self.shutdown.cancelled() => true,
        }
    }

    /// One pass over every enabled device of a network
    ///
    /// A connection error aborts the pass and is returned.
    pub async fn poll_network(&self, client: &dyn ModbusClient, mut network: Network) -> PointResult<()> {
        let devices = self.store.list_enabled_devices(&network.uuid).await?;

        for mut device in devices {
            match device.ping() {
                Ok(Some(ping)) => {
                    let result = self
                        .exchange(client, &mut network, &mut device, Exchange::Point(&ping), true, false)
                        .await;
                    if let Err(e) = result {
                        debug!("Device {} ping failed: {}", device.name, e);
                        continue;
                    }
                },
                Ok(None) => {},
                Err(e) => {
                    warn!("Device {} has an invalid ping point: {}", device.name, e);
                    continue;
                },
            }

            let points = self.store.list_enabled_points(&device.uuid).await?;
            if device.supports_multiple_rw {
                self.poll_device_aggregate(client, &mut network, &mut device, points)
                    .await?;
            } else {
                self.poll_device_single(client, &mut network, &mut device, points)
                    .await?;
            }
        }
        Ok(())
    }

    async fn poll_device_single(
        &self,
        client: &dyn ModbusClient,
        network: &mut Network,
        device: &mut Device,
        points: Vec<Point>,
    ) -> PointResult<()> {
        for point in self.pending_points(points).await? {
            match self
                .exchange(client, network, device, Exchange::Point(&point), true, true)
                .await
            {
                Err(e) if e.is_connection() => return Err(e),
                Err(e) => debug!("Point {} failed: {}", point.uuid, e),
                Ok(_) => {},
            }
        }
        Ok(())
    }

    async fn poll_device_aggregate(
        &self,
        client: &dyn ModbusClient,
        network: &mut Network,
        device: &mut Device,
        points: Vec<Point>,
    ) -> PointResult<()> {
        for (group, members) in group_points(points) {
            let members = if group.is_write() {
                self.pending_points(members).await?
            } else {
                members
            };

            for batch in plan_batches(members) {
                match self
                    .exchange(client, network, device, Exchange::Batch(&batch), true, true)
                    .await
                {
                    Err(e) if e.is_connection() => return Err(e),
                    Err(e) => debug!("Batch {:?}@{} failed: {}", group, batch.start(), e),
                    Ok(_) => {},
                }
            }
        }
        Ok(())
    }

    /// Drop write points with nothing to write this pass
    async fn pending_points(&self, points: Vec<Point>) -> PointResult<Vec<Point>> {
        let mut pending = Vec::with_capacity(points.len());
        for point in points {
            if point.function_code.is_writable() {
                let stored = self.store.get_point_store(&point.uuid).await?;
                if !is_point_to_be_written(&point, stored.as_ref()) {
                    continue;
                }
            }
            pending.push(point);
        }
        Ok(pending)
    }

    /// Run one exchange, then fault bookkeeping and the inter-point delay
    async fn exchange(
        &self,
        client: &dyn ModbusClient,
        network: &mut Network,
        device: &mut Device,
        exchange: Exchange<'_>,
        update_faults: bool,
        persist: bool,
    ) -> PointResult<Option<PointStore>> {
        let result = {
            let ctx = ExchangeContext {
                client,
                network: &*network,
                device: &*device,
                store: persist.then_some(&self.store),
                cov: persist.then_some(self.cov.as_ref()),
            };
            match exchange {
                Exchange::Point(point) => ctx.exchange_point(point).await.map(Some),
                Exchange::Batch(batch) => ctx.exchange_batch(batch).await.map(|_| None),
            }
        };

        if update_faults {
            self.update_faults(network, device, result.as_ref().err())
                .await;
        }

        tokio::time::sleep(Duration::from_millis(network.point_interval_ms_between_points)).await;
        result
    }

    async fn update_faults(&self, network: &mut Network, device: &mut Device, err: Option<&PointError>) {
        let connection_error = err.is_some_and(PointError::is_connection);
        let protocol_error = err.is_some_and(PointError::is_protocol);

        if connection_error && !network.fault {
            self.set_network_fault(network, true).await;
        }
        if protocol_error && !device.fault {
            self.set_device_fault(device, true).await;
        }

        if network.fault && !connection_error {
            self.set_network_fault(network, false).await;
        } else if device.fault && err.is_none() {
            self.set_device_fault(device, false).await;
        }
    }

    async fn set_network_fault(&self, network: &mut Network, fault: bool) {
        match self.store.set_network_fault(&network.uuid, fault).await {
            Ok(changed) => {
                if changed {
                    info!("Network {} fault: {}", network.name, fault);
                }
                network.fault = fault;
            },
            Err(e) => error!("Network {} fault not stored: {}", network.name, e),
        }
    }

    async fn set_device_fault(&self, device: &mut Device, fault: bool) {
        match self.store.set_device_fault(&device.uuid, fault).await {
            Ok(changed) => {
                if changed {
                    info!("Device {} fault: {}", device.name, fault);
                }
                device.fault = fault;
            },
            Err(e) => error!("Device {} fault not stored: {}", device.name, e),
        }
    }

    /// Poll one stored point now, with fault bookkeeping and persistence
    pub async fn poll_point(&self, point_uuid: &str) -> PointResult<PointStore> {
        let point = self
            .store
            .get_point(point_uuid)
            .await?
            .ok_or_else(|| PointError::not_found(format!("point {}", point_uuid)))?;
        let mut device = self
            .store
            .get_device(&point.device_uuid)
            .await?
            .ok_or_else(|| PointError::not_found(format!("device {}", point.device_uuid)))?;
        let mut network = self
            .store
            .get_network(&device.network_uuid)
            .await?
            .ok_or_else(|| PointError::not_found(format!("network {}", device.network_uuid)))?;
        if network.network_type != self.network_type {
            return Err(PointError::validation(format!(
                "network {} is not a {} network",
                network.name, self.network_type
            )));
        }

        let connection = self.registry.acquire(&network).await?;
        let polled = self
            .exchange(
                connection.client().as_ref(),
                &mut network,
                &mut device,
                Exchange::Point(&point),
                true,
                true,
            )
            .await?;
        polled.ok_or_else(|| PointError::internal("single exchange returned no store"))
    }

    /// Poll an unsaved point on unsaved entities, without touching the store
    pub async fn poll_point_not_existing(
        &self,
        mut point: Point,
        mut device: Device,
        mut network: Network,
    ) -> PointResult<PointStore> {
        network.validate()?;
        device.validate()?;
        point.validate()?;
        if network.network_type != self.network_type {
            return Err(PointError::validation(format!(
                "network {} is not a {} network",
                network.name, self.network_type
            )));
        }

        let connection = self.registry.acquire(&network).await?;
        let polled = self
            .exchange(
                connection.client().as_ref(),
                &mut network,
                &mut device,
                Exchange::Point(&point),
                false,
                false,
            )
            .await?;
        polled.ok_or_else(|| PointError::internal("single exchange returned no store"))
    }
}
