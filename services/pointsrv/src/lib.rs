//! Modbus point server
//!
//! Polls Modbus RTU/TCP devices, keeps live point values with 16-level write
//! priority arbitration and forwards changes to mapped generic/BACnet points
//! and to MQTT.
//!
//! ```text
//! PollingScheduler ──> ConnectionRegistry ──> ModbusClient (tokio-modbus)
//!        │
//!        ├─> aggregator (batch plan) ──> codec + pipeline (decode/encode)
//!        │
//!        └─> SqliteStore (COV test) ──> CovDispatcher ──┬─> SyncEngine ──> gateway
//!                                                       └─> CovNotifier ──> MQTT
//! ```

pub mod aggregator;
pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod cov;
pub mod modbus;
pub mod model;
pub mod pipeline;
pub mod poll;
pub mod publish;
pub mod scheduler;
pub mod store;
pub mod sync;

pub use config::AppConfig;
pub use cov::CovDispatcher;
pub use modbus::{ConnectionRegistry, Connector, ModbusClient};
pub use scheduler::PollingScheduler;
pub use store::SqliteStore;
pub use sync::SyncEngine;
