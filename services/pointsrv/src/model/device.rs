//! Device: one Modbus unit on a network

use super::{new_uuid, validate_name, validate_tags, Point};
use errors::{PointError, PointResult};
use serde::{Deserialize, Serialize};

/// Highest assignable Modbus unit id
pub const MAX_UNIT_ID: u8 = 247;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,
    pub network_uuid: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub fault: bool,
    #[serde(default)]
    pub tags: Option<String>,
    /// Modbus unit id
    pub address: u8,
    /// Registers are addressed from 0 on the wire as configured
    #[serde(default)]
    pub zero_based: bool,
    /// `"<FC>:<register>:<length>"` polled before the device's points
    #[serde(default)]
    pub ping_point: Option<String>,
    #[serde(default)]
    pub supports_multiple_rw: bool,
}

fn default_true() -> bool {
    true
}

impl Device {
    pub fn new(network_uuid: impl Into<String>, name: impl Into<String>, address: u8) -> Self {
        Self {
            uuid: new_uuid(),
            network_uuid: network_uuid.into(),
            name: name.into(),
            enable: true,
            fault: false,
            tags: None,
            address,
            zero_based: false,
            ping_point: None,
            supports_multiple_rw: false,
        }
    }

    pub fn validate(&self) -> PointResult<()> {
        validate_name(&self.name)?;
        validate_tags(self.tags.as_deref())?;
        if self.address > MAX_UNIT_ID {
            return Err(PointError::validation(format!(
                "address {} out of range 0..={}",
                self.address, MAX_UNIT_ID
            )));
        }
        self.ping()?;
        Ok(())
    }

    /// The temporary point described by `ping_point`, if any
    pub fn ping(&self) -> PointResult<Option<Point>> {
        match self.ping_point.as_deref() {
            None | Some("") => Ok(None),
            Some(text) => Point::temporary_from_string(text).map(Some),
        }
    }
}
