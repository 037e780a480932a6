//! Register and coil encoding for point values
//!
//! Multi-register values are assembled as big-endian words first (ABCD) and
//! then reordered per [`DataEndian`]:
//!
//! | endian  | order |
//! |---------|-------|
//! | BEB_BEW | ABCD  |
//! | BEB_LEW | CDAB  |
//! | LEB_BEW | BADC  |
//! | LEB_LEW | DCBA  |

use crate::model::{DataEndian, DataType};
use errors::{PointError, PointResult};
use serde::Serialize;

/// Registers a data type needs on the wire
pub fn word_count(data_type: DataType) -> usize {
    data_type.register_count().unwrap_or(1) as usize
}

/// Bring wire words into big-endian (ABCD) order, or back; the transform is
/// its own inverse
fn reorder(words: &[u16], endian: DataEndian) -> Vec<u16> {
    let mut out: Vec<u16> = words
        .iter()
        .map(|w| {
            if endian.big_endian_bytes() {
                *w
            } else {
                w.swap_bytes()
            }
        })
        .collect();
    if !endian.big_endian_words() {
        out.reverse();
    }
    out
}

fn to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

fn to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
        .collect()
}

/// Decode the registers of one point into a number
pub fn decode_registers(regs: &[u16], data_type: DataType, endian: DataEndian) -> PointResult<f64> {
    let needed = word_count(data_type);
    if regs.len() < needed {
        return Err(PointError::protocol(format!(
            "{} needs {} registers, got {}",
            data_type,
            needed,
            regs.len()
        )));
    }

    let words = reorder(&regs[..needed], endian);
    let bytes = to_bytes(&words);

    let value = match data_type {
        DataType::Raw | DataType::Uint16 => f64::from(words[0]),
        DataType::Int16 => f64::from(words[0] as i16),
        DataType::Digital => {
            if regs[0] != 0 {
                1.0
            } else {
                0.0
            }
        },
        DataType::Int32 => f64::from(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        DataType::Uint32 => f64::from(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        DataType::Float => f64::from(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        DataType::Double => {
            let mut eight = [0u8; 8];
            eight.copy_from_slice(&bytes[..8]);
            f64::from_be_bytes(eight)
        },
    };
    Ok(value)
}

/// Encode a number into `length` registers
///
/// Integers are rounded and saturated. Registers beyond the width of the data
/// type are zero.
pub fn encode_registers(
    value: f64,
    data_type: DataType,
    endian: DataEndian,
    length: usize,
) -> PointResult<Vec<u16>> {
    if !value.is_finite() {
        return Err(PointError::validation(format!(
            "cannot encode non-finite value {}",
            value
        )));
    }

    let rounded = value.round();
    let bytes: Vec<u8> = match data_type {
        DataType::Raw | DataType::Uint16 => (rounded.clamp(0.0, f64::from(u16::MAX)) as u16)
            .to_be_bytes()
            .to_vec(),
        DataType::Int16 => (rounded.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16)
            .to_be_bytes()
            .to_vec(),
        DataType::Digital => u16::from(value != 0.0).to_be_bytes().to_vec(),
        DataType::Int32 => (rounded.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32)
            .to_be_bytes()
            .to_vec(),
        DataType::Uint32 => (rounded.clamp(0.0, f64::from(u32::MAX)) as u32)
            .to_be_bytes()
            .to_vec(),
        DataType::Float => (value as f32).to_be_bytes().to_vec(),
        DataType::Double => value.to_be_bytes().to_vec(),
    };

    let mut words = reorder(&to_words(&bytes), endian);
    if words.len() < length {
        words.resize(length, 0);
    }
    Ok(words)
}

pub fn decode_coil(bit: bool) -> f64 {
    if bit {
        1.0
    } else {
        0.0
    }
}

/// Non-zero is on
pub fn encode_coil(value: f64) -> bool {
    value != 0.0
}

/// `value_raw` text of a register or bit slice
pub fn raw_to_string<T: Serialize>(raw: &[T]) -> String {
    serde_json::to_string(raw).unwrap_or_default()
}
