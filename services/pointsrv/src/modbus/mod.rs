//! Modbus transport seam
//!
//! The scheduler talks to devices through [`ModbusClient`]; production code
//! uses [`TokioModbusClient`], tests plug in fakes through [`Connector`].

mod client;
mod registry;

pub use client::{ModbusConnector, TokioModbusClient};
pub use registry::{Connection, ConnectionRegistry};

use crate::model::Network;
use async_trait::async_trait;
use errors::PointResult;
use std::sync::Arc;

/// Request/response access to the units behind one transport
///
/// Addresses are wire addresses (already zero based). Failures are either
/// [`PointError::Connection`](errors::PointError::Connection) when the
/// transport is broken, or a protocol/timeout error when a unit answered badly
/// or not at all.
#[async_trait]
pub trait ModbusClient: Send + Sync {
    async fn read_coils(&self, unit: u8, address: u16, count: u16) -> PointResult<Vec<bool>>;

    async fn read_discrete_inputs(&self, unit: u8, address: u16, count: u16)
        -> PointResult<Vec<bool>>;

    async fn read_holding_registers(&self, unit: u8, address: u16, count: u16)
        -> PointResult<Vec<u16>>;

    async fn read_input_registers(&self, unit: u8, address: u16, count: u16)
        -> PointResult<Vec<u16>>;

    async fn write_single_coil(&self, unit: u8, address: u16, value: bool) -> PointResult<()>;

    async fn write_multiple_coils(&self, unit: u8, address: u16, values: &[bool])
        -> PointResult<()>;

    async fn write_single_register(&self, unit: u8, address: u16, value: u16) -> PointResult<()>;

    async fn write_multiple_registers(&self, unit: u8, address: u16, values: &[u16])
        -> PointResult<()>;

    /// Close the transport
    async fn disconnect(&self) {}
}

/// Opens clients for networks
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, network: &Network) -> PointResult<Arc<dyn ModbusClient>>;
}
