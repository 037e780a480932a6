//! Point exchanges: one read or write against a device, plus persistence
//!
//! The functions here return the raw error of the exchange so the scheduler
//! can do the network/device fault bookkeeping; point level faults are
//! recorded in the point store here.

use crate::aggregator::Batch;
use crate::codec;
use crate::cov::CovDispatcher;
use crate::modbus::ModbusClient;
use crate::model::{Device, FunctionCode, Network, Point, PointStore};
use crate::pipeline::ValuePipeline;
use crate::store::SqliteStore;
use errors::{PointError, PointResult};
use tracing::{debug, warn};

/// Everything one exchange needs besides the points
pub struct ExchangeContext<'a> {
    pub client: &'a dyn ModbusClient,
    pub network: &'a Network,
    pub device: &'a Device,
    /// `None` for dry polls that must not touch the database
    pub store: Option<&'a SqliteStore>,
    pub cov: Option<&'a CovDispatcher>,
}

/// Wire address of a configured register
pub fn wire_address(device: &Device, register: u32) -> PointResult<u16> {
    let address = if device.zero_based {
        register
    } else {
        register.checked_sub(1).ok_or_else(|| {
            PointError::validation("register 0 is invalid on a one-based device")
        })?
    };
    u16::try_from(address)
        .map_err(|_| PointError::validation(format!("register {} out of range", register)))
}

fn quantity(count: u32) -> PointResult<u16> {
    u16::try_from(count).map_err(|_| PointError::validation(format!("quantity {} out of range", count)))
}

/// Value read from the device, before the pipeline
struct RawReading {
    value_original: f64,
    value_raw: String,
}

fn decode_bits(point: &Point, bits: &[bool]) -> PointResult<RawReading> {
    let bit = bits
        .first()
        .copied()
        .ok_or_else(|| PointError::protocol("empty coil response"))?;
    Ok(RawReading {
        value_original: codec::decode_coil(bit),
        value_raw: codec::raw_to_string(bits.get(..point.register_length.max(1) as usize).unwrap_or(bits)),
    })
}

fn decode_words(point: &Point, words: &[u16]) -> PointResult<RawReading> {
    Ok(RawReading {
        value_original: codec::decode_registers(words, point.data_type, point.data_endian)?,
        value_raw: codec::raw_to_string(words),
    })
}

fn reading_to_store(point: &Point, reading: RawReading) -> PointResult<PointStore> {
    let value = ValuePipeline::for_point(point)?.decode(reading.value_original)?;
    Ok(PointStore::with_value(
        &point.uuid,
        value,
        reading.value_original,
        reading.value_raw,
    ))
}

/// Encoded payload of a write point
enum WritePayload {
    Bit(bool),
    Words(Vec<u16>),
}

fn encode_write(point: &Point) -> PointResult<(f64, WritePayload)> {
    let effective = point
        .effective_write_value()
        .ok_or_else(|| PointError::validation(format!("point {} has no write value", point.uuid)))?;
    let wire_value = ValuePipeline::for_point(point)?.encode(effective)?;
    let payload = if point.function_code.is_digital() {
        WritePayload::Bit(codec::encode_coil(wire_value))
    } else {
        WritePayload::Words(codec::encode_registers(
            wire_value,
            point.data_type,
            point.data_endian,
            point.register_length as usize,
        )?)
    };
    Ok((effective, payload))
}

fn written_store(point: &Point, effective: f64, payload: &WritePayload) -> PointStore {
    let raw = match payload {
        WritePayload::Bit(bit) => codec::raw_to_string(&[*bit]),
        WritePayload::Words(words) => codec::raw_to_string(words),
    };
    PointStore::with_value(&point.uuid, effective, effective, raw)
}

impl ExchangeContext<'_> {
    fn unit(&self) -> u8 {
        self.device.address
    }

    /// Persist a fresh store row and fan out the COV when it changed
    async fn persist(&self, point: &Point, mut point_store: PointStore) -> PointResult<PointStore> {
        if let Some(store) = self.store {
            if store
                .update_point_store(&mut point_store, point.cov_threshold)
                .await?
            {
                if let Some(cov) = self.cov {
                    cov.dispatch(self.network, self.device, point, &point_store)
                        .await;
                }
            }
        }
        Ok(point_store)
    }

    /// Record a point level fault unless the transport itself failed
    async fn record_fault(&self, point: &Point, err: &PointError) {
        if err.is_connection() {
            return;
        }
        let fault = PointStore::with_fault(&point.uuid, err.to_string());
        if let Err(e) = self.persist(point, fault).await {
            warn!("Point {} fault not stored: {}", point.uuid, e);
        }
    }

    /// Poll or write one point
    pub async fn exchange_point(&self, point: &Point) -> PointResult<PointStore> {
        match self.exchange_point_inner(point).await {
            Ok(point_store) => self.persist(point, point_store).await,
            Err(e) => {
                self.record_fault(point, &e).await;
                Err(e)
            },
        }
    }

    async fn exchange_point_inner(&self, point: &Point) -> PointResult<PointStore> {
        let client = self.client;
        let unit = self.unit();
        let address = wire_address(self.device, point.register)?;
        let count = quantity(point.register_length)?;

        match point.function_code {
            FunctionCode::ReadCoils => {
                let bits = client.read_coils(unit, address, count).await?;
                reading_to_store(point, decode_bits(point, &bits)?)
            },
            FunctionCode::ReadDiscreteInputs => {
                let bits = client.read_discrete_inputs(unit, address, count).await?;
                reading_to_store(point, decode_bits(point, &bits)?)
            },
            FunctionCode::ReadHoldingRegisters => {
                let words = client.read_holding_registers(unit, address, count).await?;
                reading_to_store(point, decode_words(point, &words)?)
            },
            FunctionCode::ReadInputRegisters => {
                let words = client.read_input_registers(unit, address, count).await?;
                reading_to_store(point, decode_words(point, &words)?)
            },
            FunctionCode::WriteCoil
            | FunctionCode::WriteCoils
            | FunctionCode::WriteRegister
            | FunctionCode::WriteRegisters => {
                let (effective, payload) = encode_write(point)?;
                match &payload {
                    WritePayload::Bit(bit) => {
                        client.write_single_coil(unit, address, *bit).await?;
                    },
                    WritePayload::Words(words) if words.len() == 1 => {
                        client.write_single_register(unit, address, words[0]).await?;
                    },
                    WritePayload::Words(words) => {
                        client.write_multiple_registers(unit, address, words).await?;
                    },
                }
                Ok(written_store(point, effective, &payload))
            },
        }
    }

    /// One aggregate exchange for a contiguous batch
    ///
    /// A wire failure faults every point of the batch and is returned.
    /// Decoding failures only fault the affected point.
    pub async fn exchange_batch(&self, batch: &Batch) -> PointResult<()> {
        if batch.is_single() {
            return self.exchange_point(&batch.points()[0]).await.map(|_| ());
        }

        let first = &batch.points()[0];
        debug!(
            "Aggregate {} x{} @{} on unit {}",
            first.function_code,
            batch.points().len(),
            batch.start(),
            self.unit()
        );

        let result = if first.function_code.is_writable() {
            self.write_batch(batch).await
        } else {
            self.read_batch(batch).await
        };

        if let Err(e) = &result {
            for point in batch.points() {
                self.record_fault(point, e).await;
            }
        }
        result
    }

    async fn read_batch(&self, batch: &Batch) -> PointResult<()> {
        let client = self.client;
        let unit = self.unit();
        let address = wire_address(self.device, batch.start())?;
        let count = quantity(batch.quantity())?;
        let code = batch.points()[0].function_code;

        if code.group().is_bit() {
            let bits = match code {
                FunctionCode::ReadDiscreteInputs => {
                    client.read_discrete_inputs(unit, address, count).await?
                },
                _ => client.read_coils(unit, address, count).await?,
            };
            for point in batch.points() {
                let reading = batch
                    .slice_for(point, &bits)
                    .ok_or_else(|| PointError::protocol("short coil response"))
                    .and_then(|slice| decode_bits(point, slice));
                self.settle_reading(point, reading).await?;
            }
        } else {
            let words = match code {
                FunctionCode::ReadInputRegisters => {
                    client.read_input_registers(unit, address, count).await?
                },
                _ => client.read_holding_registers(unit, address, count).await?,
            };
            for point in batch.points() {
                let reading = batch
                    .slice_for(point, &words)
                    .ok_or_else(|| PointError::protocol("short register response"))
                    .and_then(|slice| decode_words(point, slice));
                self.settle_reading(point, reading).await?;
            }
        }
        Ok(())
    }

    async fn settle_reading(&self, point: &Point, reading: PointResult<RawReading>) -> PointResult<()> {
        match reading.and_then(|r| reading_to_store(point, r)) {
            Ok(point_store) => {
                self.persist(point, point_store).await?;
            },
            Err(e) => {
                warn!("Point {} decode failed: {}", point.uuid, e);
                self.record_fault(point, &e).await;
            },
        }
        Ok(())
    }

    async fn write_batch(&self, batch: &Batch) -> PointResult<()> {
        let unit = self.unit();
        let address = wire_address(self.device, batch.start())?;

        let mut encoded = Vec::with_capacity(batch.points().len());
        for point in batch.points() {
            encoded.push(encode_write(point)?);
        }

        if batch.points()[0].function_code.group().is_bit() {
            let bits: Vec<bool> = encoded
                .iter()
                .map(|(_, payload)| match payload {
                    WritePayload::Bit(bit) => *bit,
                    WritePayload::Words(words) => words.first().is_some_and(|w| *w != 0),
                })
                .collect();
            self.client.write_multiple_coils(unit, address, &bits).await?;
        } else {
            let words: Vec<u16> = encoded
                .iter()
                .flat_map(|(_, payload)| match payload {
                    WritePayload::Bit(bit) => vec![u16::from(*bit)],
                    WritePayload::Words(words) => words.clone(),
                })
                .collect();
            self.client.write_multiple_registers(unit, address, &words).await?;
        }

        for (point, (effective, payload)) in batch.points().iter().zip(&encoded) {
            self.persist(point, written_store(point, *effective, payload))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_address() {
        let mut device = Device::new("net", "meter", 1);
        assert_eq!(wire_address(&device, 1).unwrap(), 0);
        assert_eq!(wire_address(&device, 40).unwrap(), 39);
        assert!(wire_address(&device, 0).is_err());

        device.zero_based = true;
        assert_eq!(wire_address(&device, 0).unwrap(), 0);
        assert_eq!(wire_address(&device, 40).unwrap(), 40);
        assert!(wire_address(&device, 70_000).is_err());
    }

    #[test]
    fn test_encode_write_uses_inverse_pipeline() {
        let mut point = Point::new("dev", "sp", FunctionCode::WriteRegister, 1, 1);
        point.value_operation = Some("x / 10".to_string());
        point.fallback_value = Some(21.5);
        point.validate().unwrap();

        let (effective, payload) = encode_write(&point).unwrap();
        assert_eq!(effective, 21.5);
        match payload {
            WritePayload::Words(words) => assert_eq!(words, vec![215]),
            WritePayload::Bit(_) => panic!("expected register payload"),
        }
    }
}
