//! Network: one physical Modbus medium (serial line or TCP socket)

use super::{new_uuid, text_enum, validate_name, validate_tags};
use errors::{PointError, PointResult};
use serde::{Deserialize, Serialize};

/// Transport variant of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkType {
    Rtu,
    Tcp,
}

text_enum!(NetworkType { Rtu => "RTU", Tcp => "TCP" });

/// Serial parity; the long names are accepted for compatibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Parity {
    O,
    E,
    #[default]
    N,
    Odd,
    Even,
}

text_enum!(Parity { O => "O", E => "E", N => "N", Odd => "Odd", Even => "Even" });

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub fault: bool,
    #[serde(default)]
    pub tags: Option<String>,

    // RTU
    #[serde(default)]
    pub rtu_port: Option<String>,
    #[serde(default = "default_rtu_speed")]
    pub rtu_speed: u32,
    #[serde(default = "default_rtu_stop_bits")]
    pub rtu_stop_bits: u8,
    #[serde(default)]
    pub rtu_parity: Parity,
    #[serde(default = "default_rtu_byte_size")]
    pub rtu_byte_size: u8,

    // TCP
    #[serde(default)]
    pub tcp_ip: Option<String>,
    #[serde(default)]
    pub tcp_port: Option<u16>,

    /// Per request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Pause between polling passes in seconds
    #[serde(default = "default_polling_interval")]
    pub polling_interval_runtime: u64,
    #[serde(default = "default_point_interval")]
    pub point_interval_ms_between_points: u64,
}

fn default_true() -> bool {
    true
}

fn default_rtu_speed() -> u32 {
    9600
}

fn default_rtu_stop_bits() -> u8 {
    1
}

fn default_rtu_byte_size() -> u8 {
    8
}

fn default_timeout() -> u64 {
    3
}

fn default_polling_interval() -> u64 {
    2
}

fn default_point_interval() -> u64 {
    30
}

impl Network {
    /// A new RTU network on `port` with default line settings
    pub fn rtu(name: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            rtu_port: Some(port.into()),
            ..Self::blank(name.into(), NetworkType::Rtu)
        }
    }

    /// A new TCP network on `ip:port`
    pub fn tcp(name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            tcp_ip: Some(ip.into()),
            tcp_port: Some(port),
            ..Self::blank(name.into(), NetworkType::Tcp)
        }
    }

    fn blank(name: String, network_type: NetworkType) -> Self {
        Self {
            uuid: new_uuid(),
            name,
            network_type,
            enable: true,
            fault: false,
            tags: None,
            rtu_port: None,
            rtu_speed: default_rtu_speed(),
            rtu_stop_bits: default_rtu_stop_bits(),
            rtu_parity: Parity::N,
            rtu_byte_size: default_rtu_byte_size(),
            tcp_ip: None,
            tcp_port: None,
            timeout: default_timeout(),
            polling_interval_runtime: default_polling_interval(),
            point_interval_ms_between_points: default_point_interval(),
        }
    }

    pub fn validate(&self) -> PointResult<()> {
        validate_name(&self.name)?;
        validate_tags(self.tags.as_deref())?;

        match self.network_type {
            NetworkType::Rtu => {
                if self.rtu_port.as_deref().is_none_or(str::is_empty) {
                    return Err(PointError::validation(
                        "rtu_port should be be there on type RTU",
                    ));
                }
                if !(5..=8).contains(&self.rtu_byte_size) {
                    return Err(PointError::validation(
                        "rtu_byte_size must be one of 5, 6, 7 or 8",
                    ));
                }
            },
            NetworkType::Tcp => {
                if self.tcp_ip.as_deref().is_none_or(str::is_empty) {
                    return Err(PointError::validation(
                        "tcp_ip should be be there on type TCP",
                    ));
                }
                if self.tcp_port.is_none_or(|port| port == 0) {
                    return Err(PointError::validation(
                        "tcp_port should be be there on type TCP",
                    ));
                }
            },
        }
        Ok(())
    }

    /// Transport fingerprint; editing any transport parameter changes it
    pub fn connection_key(&self) -> String {
        match self.network_type {
            NetworkType::Rtu => format!(
                "{}:{}:{}:{}:{}:{}",
                self.rtu_port.as_deref().unwrap_or_default(),
                self.rtu_speed,
                self.rtu_stop_bits,
                self.rtu_parity,
                self.rtu_byte_size,
                self.timeout
            ),
            NetworkType::Tcp => format!(
                "{}:{}:{}",
                self.tcp_ip.as_deref().unwrap_or_default(),
                self.tcp_port.unwrap_or_default(),
                self.timeout
            ),
        }
    }

    /// Human readable endpoint for logs and errors
    pub fn endpoint(&self) -> String {
        match self.network_type {
            NetworkType::Rtu => self.rtu_port.clone().unwrap_or_default(),
            NetworkType::Tcp => format!(
                "{}:{}",
                self.tcp_ip.as_deref().unwrap_or_default(),
                self.tcp_port.unwrap_or_default()
            ),
        }
    }
}
