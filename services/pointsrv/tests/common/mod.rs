//! Shared fakes and fixtures for the integration tests
#![allow(dead_code)]
#![allow(clippy::disallowed_methods)]

use async_trait::async_trait;
use errors::{PointError, PointResult};
use parking_lot::Mutex;
use pointsrv::model::{Device, FunctionCode, Network, Point};
use pointsrv::modbus::{Connector, ModbusClient};
use pointsrv::publish::CovPublisher;
use pointsrv::sync::{GatewayApi, GatewayResponse};
use pointsrv::SqliteStore;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Modbus
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    Connection,
    Protocol,
}

impl FakeFailure {
    fn error(self) -> PointError {
        match self {
            Self::Connection => PointError::connection("fake:502", "link down"),
            Self::Protocol => PointError::protocol("unit answered with exception IllegalDataAddress"),
        }
    }
}

/// One request seen by the fake: function code, unit, wire address, quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub function: u8,
    pub unit: u8,
    pub address: u16,
    pub count: u16,
}

/// In-memory Modbus device set
#[derive(Default)]
pub struct FakeModbusClient {
    holding: Mutex<HashMap<(u8, u16), u16>>,
    input: Mutex<HashMap<(u8, u16), u16>>,
    coils: Mutex<HashMap<(u8, u16), bool>>,
    discrete: Mutex<HashMap<(u8, u16), bool>>,
    failure: Mutex<Option<FakeFailure>>,
    unit_failures: Mutex<HashMap<u8, FakeFailure>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeModbusClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_holding(&self, unit: u8, address: u16, words: &[u16]) {
        let mut map = self.holding.lock();
        for (i, word) in words.iter().enumerate() {
            map.insert((unit, address + i as u16), *word);
        }
    }

    pub fn set_input(&self, unit: u8, address: u16, words: &[u16]) {
        let mut map = self.input.lock();
        for (i, word) in words.iter().enumerate() {
            map.insert((unit, address + i as u16), *word);
        }
    }

    pub fn set_coil(&self, unit: u8, address: u16, value: bool) {
        self.coils.lock().insert((unit, address), value);
    }

    pub fn holding(&self, unit: u8, address: u16) -> Option<u16> {
        self.holding.lock().get(&(unit, address)).copied()
    }

    pub fn coil(&self, unit: u8, address: u16) -> Option<bool> {
        self.coils.lock().get(&(unit, address)).copied()
    }

    /// Fail every request until cleared with `None`
    pub fn fail_with(&self, failure: Option<FakeFailure>) {
        *self.failure.lock() = failure;
    }

    pub fn fail_unit(&self, unit: u8, failure: Option<FakeFailure>) {
        let mut map = self.unit_failures.lock();
        match failure {
            Some(failure) => map.insert(unit, failure),
            None => map.remove(&unit),
        };
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, function: u8, unit: u8, address: u16, count: u16) -> PointResult<()> {
        self.calls.lock().push(Call {
            function,
            unit,
            address,
            count,
        });
        if let Some(failure) = *self.failure.lock() {
            return Err(failure.error());
        }
        if let Some(failure) = self.unit_failures.lock().get(&unit) {
            return Err(failure.error());
        }
        Ok(())
    }

    fn read_words(map: &Mutex<HashMap<(u8, u16), u16>>, unit: u8, address: u16, count: u16) -> Vec<u16> {
        let map = map.lock();
        (0..count)
            .map(|i| map.get(&(unit, address + i)).copied().unwrap_or(0))
            .collect()
    }

    fn read_bits(map: &Mutex<HashMap<(u8, u16), bool>>, unit: u8, address: u16, count: u16) -> Vec<bool> {
        let map = map.lock();
        (0..count)
            .map(|i| map.get(&(unit, address + i)).copied().unwrap_or(false))
            .collect()
    }
}

#[async_trait]
impl ModbusClient for FakeModbusClient {
    async fn read_coils(&self, unit: u8, address: u16, count: u16) -> PointResult<Vec<bool>> {
        self.record(1, unit, address, count)?;
        Ok(Self::read_bits(&self.coils, unit, address, count))
    }

    async fn read_discrete_inputs(&self, unit: u8, address: u16, count: u16) -> PointResult<Vec<bool>> {
        self.record(2, unit, address, count)?;
        Ok(Self::read_bits(&self.discrete, unit, address, count))
    }

    async fn read_holding_registers(&self, unit: u8, address: u16, count: u16) -> PointResult<Vec<u16>> {
        self.record(3, unit, address, count)?;
        Ok(Self::read_words(&self.holding, unit, address, count))
    }

    async fn read_input_registers(&self, unit: u8, address: u16, count: u16) -> PointResult<Vec<u16>> {
        self.record(4, unit, address, count)?;
        Ok(Self::read_words(&self.input, unit, address, count))
    }

    async fn write_single_coil(&self, unit: u8, address: u16, value: bool) -> PointResult<()> {
        self.record(5, unit, address, 1)?;
        self.set_coil(unit, address, value);
        Ok(())
    }

    async fn write_multiple_coils(&self, unit: u8, address: u16, values: &[bool]) -> PointResult<()> {
        self.record(15, unit, address, values.len() as u16)?;
        for (i, value) in values.iter().enumerate() {
            self.set_coil(unit, address + i as u16, *value);
        }
        Ok(())
    }

    async fn write_single_register(&self, unit: u8, address: u16, value: u16) -> PointResult<()> {
        self.record(6, unit, address, 1)?;
        self.set_holding(unit, address, &[value]);
        Ok(())
    }

    async fn write_multiple_registers(&self, unit: u8, address: u16, values: &[u16]) -> PointResult<()> {
        self.record(16, unit, address, values.len() as u16)?;
        self.set_holding(unit, address, values);
        Ok(())
    }
}

/// Hands out one shared fake client
pub struct FakeConnector {
    pub client: Arc<FakeModbusClient>,
    pub connects: AtomicUsize,
    pub refuse: AtomicBool,
}

impl FakeConnector {
    pub fn new(client: Arc<FakeModbusClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, network: &Network) -> PointResult<Arc<dyn ModbusClient>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PointError::connection(network.endpoint(), "connection refused"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.clone())
    }
}

// ============================================================================
// Gateway & MQTT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub path: String,
    pub method: Method,
    pub body: Option<Value>,
}

pub struct RecordingGateway {
    requests: Mutex<Vec<GatewayRequest>>,
    status: AtomicU16,
    delay_ms: AtomicU64,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            status: AtomicU16::new(200),
            delay_ms: AtomicU64::new(0),
        })
    }

    /// Answer every request after `delay`
    pub fn respond_after(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn answer_with(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().clone()
    }

    /// PATCH paths, sorted
    pub fn patched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .requests()
            .into_iter()
            .filter(|r| r.method == Method::PATCH)
            .map(|r| r.path)
            .collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl GatewayApi for RecordingGateway {
    async fn request(&self, api_path: &str, method: Method, body: Option<Value>) -> PointResult<GatewayResponse> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.requests.lock().push(GatewayRequest {
            path: api_path.to_string(),
            method,
            body,
        });
        Ok(GatewayResponse {
            status: self.status.load(Ordering::SeqCst),
            body: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<Published> {
        self.messages.lock().clone()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

#[async_trait]
impl CovPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> PointResult<()> {
        self.messages.lock().push(Published {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub async fn memory_store() -> SqliteStore {
    SqliteStore::in_memory().await.unwrap()
}

/// TCP network without inter-point delay
pub async fn seed_network(store: &SqliteStore, name: &str, port: u16) -> Network {
    let mut network = Network::tcp(name, "127.0.0.1", port);
    network.point_interval_ms_between_points = 0;
    store.create_network(&network).await.unwrap();
    network
}

pub async fn seed_device(store: &SqliteStore, network: &Network, name: &str, address: u8, aggregate: bool) -> Device {
    let mut device = Device::new(&network.uuid, name, address);
    device.supports_multiple_rw = aggregate;
    store.create_device(&device).await.unwrap();
    device
}

pub async fn seed_point(
    store: &SqliteStore,
    device: &Device,
    name: &str,
    code: FunctionCode,
    register: u32,
    length: u32,
) -> Point {
    let mut point = Point::new(&device.uuid, name, code, register, length);
    store.create_point(&mut point).await.unwrap();
    point
}
