use super::{Connector, ModbusClient};
use crate::model::{Network, NetworkType, Parity};
use async_trait::async_trait;
use errors::{PointError, PointResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, tcp, Client as _, Context, Reader, Writer};
use tokio_modbus::slave::{Slave, SlaveContext as _};
use tokio_modbus::ExceptionCode;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
enum Transport {
    Tcp {
        host: String,
        port: u16,
    },
    Rtu {
        port: String,
        baud_rate: u32,
        data_bits: tokio_serial::DataBits,
        stop_bits: tokio_serial::StopBits,
        parity: tokio_serial::Parity,
    },
}

impl Transport {
    fn from_network(network: &Network) -> PointResult<Self> {
        match network.network_type {
            NetworkType::Tcp => Ok(Transport::Tcp {
                host: network
                    .tcp_ip
                    .clone()
                    .ok_or_else(|| PointError::validation("tcp_ip should be be there on type TCP"))?,
                port: network
                    .tcp_port
                    .ok_or_else(|| PointError::validation("tcp_port should be be there on type TCP"))?,
            }),
            NetworkType::Rtu => Ok(Transport::Rtu {
                port: network
                    .rtu_port
                    .clone()
                    .ok_or_else(|| PointError::validation("rtu_port should be be there on type RTU"))?,
                baud_rate: network.rtu_speed,
                data_bits: match network.rtu_byte_size {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                },
                stop_bits: match network.rtu_stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                },
                parity: match network.rtu_parity {
                    Parity::O | Parity::Odd => tokio_serial::Parity::Odd,
                    Parity::E | Parity::Even => tokio_serial::Parity::Even,
                    Parity::N => tokio_serial::Parity::None,
                },
            }),
        }
    }

    /// RTU frames carry no transaction id, so a late reply would be read as
    /// the answer to the next request
    fn discards_context_on_timeout(&self) -> bool {
        matches!(self, Transport::Rtu { .. })
    }

    async fn open(&self, endpoint: &str, timeout_duration: Duration) -> PointResult<Context> {
        match self {
            Transport::Tcp { host, port } => {
                let addr = format!("{host}:{port}");
                match timeout(timeout_duration, TcpStream::connect(&addr)).await {
                    Ok(Ok(stream)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("TCP_NODELAY: {}", e);
                        }
                        info!("TCP connected: {}", addr);
                        Ok(tcp::attach(stream))
                    },
                    Ok(Err(e)) => Err(PointError::connection(endpoint, e.to_string())),
                    Err(_) => Err(PointError::connection(endpoint, "connect timed out")),
                }
            },
            Transport::Rtu {
                port,
                baud_rate,
                data_bits,
                stop_bits,
                parity,
            } => {
                let stream = tokio_serial::new(port, *baud_rate)
                    .data_bits(*data_bits)
                    .stop_bits(*stop_bits)
                    .parity(*parity)
                    .timeout(timeout_duration)
                    .open_native_async()
                    .map_err(|e| PointError::connection(endpoint, e.to_string()))?;
                info!("RTU opened: {} @{}baud", port, baud_rate);
                Ok(rtu::attach(stream))
            },
        }
    }
}

enum Request<'a> {
    ReadCoils(u16, u16),
    ReadDiscreteInputs(u16, u16),
    ReadHoldingRegisters(u16, u16),
    ReadInputRegisters(u16, u16),
    WriteSingleCoil(u16, bool),
    WriteMultipleCoils(u16, &'a [bool]),
    WriteSingleRegister(u16, u16),
    WriteMultipleRegisters(u16, &'a [u16]),
}

enum Response {
    Bits(Vec<bool>),
    Words(Vec<u16>),
    Done,
}

type WireResult = Result<Result<Response, ExceptionCode>, tokio_modbus::Error>;

async fn execute(ctx: &mut Context, request: Request<'_>) -> WireResult {
    Ok(match request {
        Request::ReadCoils(a, n) => ctx.read_coils(a, n).await?.map(Response::Bits),
        Request::ReadDiscreteInputs(a, n) => {
            ctx.read_discrete_inputs(a, n).await?.map(Response::Bits)
        },
        Request::ReadHoldingRegisters(a, n) => {
            ctx.read_holding_registers(a, n).await?.map(Response::Words)
        },
        Request::ReadInputRegisters(a, n) => {
            ctx.read_input_registers(a, n).await?.map(Response::Words)
        },
        Request::WriteSingleCoil(a, v) => ctx.write_single_coil(a, v).await?.map(|_| Response::Done),
        Request::WriteMultipleCoils(a, v) => {
            ctx.write_multiple_coils(a, v).await?.map(|_| Response::Done)
        },
        Request::WriteSingleRegister(a, v) => {
            ctx.write_single_register(a, v).await?.map(|_| Response::Done)
        },
        Request::WriteMultipleRegisters(a, v) => {
            ctx.write_multiple_registers(a, v).await?.map(|_| Response::Done)
        },
    })
}

/// [`ModbusClient`] over `tokio-modbus`
///
/// The transport is reopened on the next request after a transport failure.
/// Requests are serialised; a TCP socket or serial line carries one exchange
/// at a time.
pub struct TokioModbusClient {
    endpoint: String,
    transport: Transport,
    timeout: Duration,
    ctx: Mutex<Option<Context>>,
}

impl TokioModbusClient {
    /// Open the network's transport
    pub async fn open(network: &Network) -> PointResult<Self> {
        let transport = Transport::from_network(network)?;
        let endpoint = network.endpoint();
        let timeout = Duration::from_secs(network.timeout.max(1));
        let ctx = transport.open(&endpoint, timeout).await?;
        Ok(Self {
            endpoint,
            transport,
            timeout,
            ctx: Mutex::new(Some(ctx)),
        })
    }

    async fn call(&self, unit: u8, request: Request<'_>) -> PointResult<Response> {
        let mut guard = self.ctx.lock().await;
        if guard.is_none() {
            debug!("Reopening {}", self.endpoint);
            *guard = Some(self.transport.open(&self.endpoint, self.timeout).await?);
        }
        let ctx = guard
            .as_mut()
            .ok_or_else(|| PointError::connection(&self.endpoint, "transport not open"))?;
        ctx.set_slave(Slave(unit));

        match timeout(self.timeout, execute(ctx, request)).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(code))) => Err(PointError::protocol(format!(
                "unit {} answered with exception {:?}",
                unit, code
            ))),
            Ok(Err(tokio_modbus::Error::Transport(e))) => {
                warn!("{} transport error: {}", self.endpoint, e);
                *guard = None;
                Err(PointError::connection(&self.endpoint, e.to_string()))
            },
            Ok(Err(e)) => Err(PointError::protocol(format!("unit {}: {}", unit, e))),
            Err(_) => {
                if self.transport.discards_context_on_timeout() {
                    *guard = None;
                }
                Err(PointError::timeout(format!("{} unit {}", self.endpoint, unit)))
            },
        }
    }

    /// Whether a transport context is currently held
    pub async fn is_open(&self) -> bool {
        self.ctx.lock().await.is_some()
    }
}

fn unexpected(endpoint: &str) -> PointError {
    PointError::protocol(format!("unexpected response from {}", endpoint))
}

#[async_trait]
impl ModbusClient for TokioModbusClient {
    async fn read_coils(&self, unit: u8, address: u16, count: u16) -> PointResult<Vec<bool>> {
        match self.call(unit, Request::ReadCoils(address, count)).await? {
            Response::Bits(bits) => Ok(bits),
            _ => Err(unexpected(&self.endpoint)),
        }
    }

    async fn read_discrete_inputs(
        &self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> PointResult<Vec<bool>> {
        match self.call(unit, Request::ReadDiscreteInputs(address, count)).await? {
            Response::Bits(bits) => Ok(bits),
            _ => Err(unexpected(&self.endpoint)),
        }
    }

    async fn read_holding_registers(
        &self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> PointResult<Vec<u16>> {
        match self.call(unit, Request::ReadHoldingRegisters(address, count)).await? {
            Response::Words(words) => Ok(words),
            _ => Err(unexpected(&self.endpoint)),
        }
    }

    async fn read_input_registers(
        &self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> PointResult<Vec<u16>> {
        match self.call(unit, Request::ReadInputRegisters(address, count)).await? {
            Response::Words(words) => Ok(words),
            _ => Err(unexpected(&self.endpoint)),
        }
    }

    async fn write_single_coil(&self, unit: u8, address: u16, value: bool) -> PointResult<()> {
        self.call(unit, Request::WriteSingleCoil(address, value))
            .await
            .map(|_| ())
    }

    async fn write_multiple_coils(
        &self,
        unit: u8,
        address: u16,
        values: &[bool],
    ) -> PointResult<()> {
        self.call(unit, Request::WriteMultipleCoils(address, values))
            .await
            .map(|_| ())
    }

    async fn write_single_register(&self, unit: u8, address: u16, value: u16) -> PointResult<()> {
        self.call(unit, Request::WriteSingleRegister(address, value))
            .await
            .map(|_| ())
    }

    async fn write_multiple_registers(
        &self,
        unit: u8,
        address: u16,
        values: &[u16],
    ) -> PointResult<()> {
        self.call(unit, Request::WriteMultipleRegisters(address, values))
            .await
            .map(|_| ())
    }

    async fn disconnect(&self) {
        if let Some(mut ctx) = self.ctx.lock().await.take() {
            if let Err(e) = ctx.disconnect().await {
                debug!("{} disconnect: {}", self.endpoint, e);
            }
        }
    }
}

/// Production [`Connector`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ModbusConnector;

#[async_trait]
impl Connector for ModbusConnector {
    async fn connect(&self, network: &Network) -> PointResult<Arc<dyn ModbusClient>> {
        let client = TokioModbusClient::open(network).await?;
        Ok(Arc::new(client))
    }
}
