//! 16-level write priority array
//!
//! Priority 1 is the highest; slot 16 holds the fallback written when nothing
//! else is commanded. The effective value is the lowest numbered occupied slot.

use errors::{PointError, PointResult};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PRIORITY_LEVELS: usize = 16;

/// Fallback slot used by writes without an explicit priority
pub const FALLBACK_PRIORITY: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriorityArray {
    slots: [Option<f64>; PRIORITY_LEVELS],
}

fn slot_key(priority: usize) -> String {
    format!("_{}", priority)
}

fn parse_slot_key(key: &str) -> Option<u8> {
    let priority: u8 = key.strip_prefix('_')?.parse().ok()?;
    (1..=PRIORITY_LEVELS as u8)
        .contains(&priority)
        .then_some(priority)
}

impl PriorityArray {
    pub fn get(&self, priority: u8) -> Option<f64> {
        Self::index(priority).ok().and_then(|i| self.slots[i])
    }

    /// Set or clear one slot; `priority` must be 1..=16
    pub fn set_slot(&mut self, priority: u8, value: Option<f64>) -> PointResult<()> {
        let index = Self::index(priority)?;
        self.slots[index] = value;
        Ok(())
    }

    fn index(priority: u8) -> PointResult<usize> {
        if !(1..=PRIORITY_LEVELS as u8).contains(&priority) {
            return Err(PointError::validation(format!(
                "priority {} out of range 1..=16",
                priority
            )));
        }
        Ok(priority as usize - 1)
    }

    /// `(priority, value)` of the lowest numbered occupied slot
    pub fn highest_priority(&self) -> Option<(u8, f64)> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(i, slot)| slot.map(|value| (i as u8 + 1, value)))
    }

    pub fn effective_value(&self) -> Option<f64> {
        self.highest_priority().map(|(_, value)| value)
    }

    pub fn with_fallback(mut self, value: Option<f64>) -> Self {
        self.slots[PRIORITY_LEVELS - 1] = value;
        self
    }

    /// A one-slot array carrying `value` as the fallback
    pub fn fallback_only(value: Option<f64>) -> Self {
        Self::default().with_fallback(value)
    }

    /// Apply a partial `{"_n": value | null}` update
    ///
    /// Unknown keys other than `point_uuid` are rejected.
    pub fn merge(&mut self, update: &serde_json::Map<String, serde_json::Value>) -> PointResult<()> {
        for (key, value) in update {
            if key == "point_uuid" {
                continue;
            }
            let priority = parse_slot_key(key).ok_or_else(|| {
                PointError::validation(format!("Invalid priority array key '{}'", key))
            })?;
            let value = match value {
                serde_json::Value::Null => None,
                other => Some(other.as_f64().ok_or_else(|| {
                    PointError::validation(format!("Priority {} value must be a number", key))
                })?),
            };
            self.set_slot(priority, value)?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for PriorityArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(PRIORITY_LEVELS))?;
        for (i, slot) in self.slots.iter().enumerate() {
            map.serialize_entry(&slot_key(i + 1), slot)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PriorityArray {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: HashMap<String, serde_json::Value> = HashMap::deserialize(deserializer)?;
        let update: serde_json::Map<String, serde_json::Value> = raw.into_iter().collect();
        let mut array = PriorityArray::default();
        array.merge(&update).map_err(de::Error::custom)?;
        Ok(array)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lowest_slot_wins() {
        let mut array = PriorityArray::default();
        array.set_slot(16, Some(99.0)).unwrap();
        array.set_slot(5, Some(10.0)).unwrap();
        assert_eq!(array.effective_value(), Some(10.0));
        assert_eq!(array.highest_priority(), Some((5, 10.0)));

        array.set_slot(5, None).unwrap();
        assert_eq!(array.highest_priority(), Some((16, 99.0)));
    }

    #[test]
    fn test_empty_array_has_no_write() {
        assert_eq!(PriorityArray::default().effective_value(), None);
    }

    #[test]
    fn test_priority_range() {
        let mut array = PriorityArray::default();
        assert!(array.set_slot(0, Some(1.0)).is_err());
        assert!(array.set_slot(17, Some(1.0)).is_err());
        assert!(array.set_slot(1, Some(1.0)).is_ok());
    }

    #[test]
    fn test_serialized_layout() {
        let array = PriorityArray::fallback_only(Some(16.0));
        let value = array.to_json();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 16);
        assert_eq!(object["_1"], json!(null));
        assert_eq!(object["_16"], json!(16.0));
    }

    #[test]
    fn test_deserialize_partial_and_ignores_point_uuid() {
        let array: PriorityArray =
            serde_json::from_value(json!({"_3": 7.5, "_16": 1, "point_uuid": "p1"})).unwrap();
        assert_eq!(array.get(3), Some(7.5));
        assert_eq!(array.get(16), Some(1.0));
        assert_eq!(array.get(1), None);

        assert!(serde_json::from_value::<PriorityArray>(json!({"_17": 1})).is_err());
    }

    #[test]
    fn test_merge_clears_with_null() {
        let mut array = PriorityArray::fallback_only(Some(1.0));
        array.set_slot(8, Some(5.0)).unwrap();
        let update = json!({"_8": null, "_2": 3.0});
        array.merge(update.as_object().unwrap()).unwrap();
        assert_eq!(array.get(8), None);
        assert_eq!(array.highest_priority(), Some((2, 3.0)));
    }
}
