//! Point: one register (or coil) range on a device

use super::{new_uuid, text_enum, validate_name, validate_tags, PriorityArray};
use errors::{PointError, PointResult};
use serde::{Deserialize, Serialize};

/// Largest register number and register length
pub const MAX_REGISTER: u32 = 65_535;

/// Modbus function code of a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteCoil,
    WriteRegister,
    WriteCoils,
    WriteRegisters,
}

text_enum!(FunctionCode {
    ReadCoils => "READ_COILS",
    ReadDiscreteInputs => "READ_DISCRETE_INPUTS",
    ReadHoldingRegisters => "READ_HOLDING_REGISTERS",
    ReadInputRegisters => "READ_INPUT_REGISTERS",
    WriteCoil => "WRITE_COIL",
    WriteRegister => "WRITE_REGISTER",
    WriteCoils => "WRITE_COILS",
    WriteRegisters => "WRITE_REGISTERS",
});

/// Aggregation category of a function code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionGroup {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteCoils,
    WriteRegisters,
}

impl FunctionGroup {
    /// Fixed polling order of the groups
    pub const ALL: [FunctionGroup; 6] = [
        FunctionGroup::ReadCoils,
        FunctionGroup::ReadDiscreteInputs,
        FunctionGroup::ReadHoldingRegisters,
        FunctionGroup::ReadInputRegisters,
        FunctionGroup::WriteCoils,
        FunctionGroup::WriteRegisters,
    ];

    pub fn is_write(&self) -> bool {
        matches!(self, Self::WriteCoils | Self::WriteRegisters)
    }

    /// Coil groups address bits, the rest 16-bit registers
    pub fn is_bit(&self) -> bool {
        matches!(
            self,
            Self::ReadCoils | Self::ReadDiscreteInputs | Self::WriteCoils
        )
    }
}

impl FunctionCode {
    pub fn code(&self) -> u8 {
        match self {
            Self::ReadCoils => 1,
            Self::ReadDiscreteInputs => 2,
            Self::ReadHoldingRegisters => 3,
            Self::ReadInputRegisters => 4,
            Self::WriteCoil => 5,
            Self::WriteRegister => 6,
            Self::WriteCoils => 15,
            Self::WriteRegisters => 16,
        }
    }

    pub fn from_code(code: u8) -> PointResult<Self> {
        Ok(match code {
            1 => Self::ReadCoils,
            2 => Self::ReadDiscreteInputs,
            3 => Self::ReadHoldingRegisters,
            4 => Self::ReadInputRegisters,
            5 => Self::WriteCoil,
            6 => Self::WriteRegister,
            15 => Self::WriteCoils,
            16 => Self::WriteRegisters,
            other => {
                return Err(PointError::validation(format!(
                    "Invalid function code {}",
                    other
                )))
            },
        })
    }

    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            Self::WriteCoil | Self::WriteCoils | Self::WriteRegister | Self::WriteRegisters
        )
    }

    /// Function codes that address single bits
    pub fn is_digital(&self) -> bool {
        self.group().is_bit()
    }

    pub fn group(&self) -> FunctionGroup {
        match self {
            Self::ReadCoils => FunctionGroup::ReadCoils,
            Self::ReadDiscreteInputs => FunctionGroup::ReadDiscreteInputs,
            Self::ReadHoldingRegisters => FunctionGroup::ReadHoldingRegisters,
            Self::ReadInputRegisters => FunctionGroup::ReadInputRegisters,
            Self::WriteCoil | Self::WriteCoils => FunctionGroup::WriteCoils,
            Self::WriteRegister | Self::WriteRegisters => FunctionGroup::WriteRegisters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    #[default]
    Raw,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
    Double,
    Digital,
}

text_enum!(DataType {
    Raw => "RAW",
    Int16 => "INT16",
    Uint16 => "UINT16",
    Int32 => "INT32",
    Uint32 => "UINT32",
    Float => "FLOAT",
    Double => "DOUBLE",
    Digital => "DIGITAL",
});

impl DataType {
    /// Registers a value of this type occupies, if fixed
    pub fn register_count(&self) -> Option<u32> {
        match self {
            Self::Int32 | Self::Uint32 | Self::Float => Some(2),
            Self::Double => Some(4),
            _ => None,
        }
    }
}

/// Byte order within a register, then word order across registers
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataEndian {
    LEB_BEW,
    LEB_LEW,
    #[default]
    BEB_LEW,
    BEB_BEW,
}

text_enum!(DataEndian {
    LEB_BEW => "LEB_BEW",
    LEB_LEW => "LEB_LEW",
    BEB_LEW => "BEB_LEW",
    BEB_BEW => "BEB_BEW",
});

impl DataEndian {
    pub fn big_endian_bytes(&self) -> bool {
        matches!(self, Self::BEB_LEW | Self::BEB_BEW)
    }

    pub fn big_endian_words(&self) -> bool {
        matches!(self, Self::LEB_BEW | Self::BEB_BEW)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub uuid: String,
    pub device_uuid: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Derived from the function code by [`Point::validate`]
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub cov_threshold: f64,
    #[serde(default = "default_value_round")]
    pub value_round: i32,
    #[serde(default = "default_value_operation")]
    pub value_operation: Option<String>,
    #[serde(default)]
    pub input_min: Option<f64>,
    #[serde(default)]
    pub input_max: Option<f64>,
    #[serde(default)]
    pub scale_min: Option<f64>,
    #[serde(default)]
    pub scale_max: Option<f64>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default = "default_fallback_value")]
    pub fallback_value: Option<f64>,
    pub register: u32,
    pub register_length: u32,
    pub function_code: FunctionCode,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub data_endian: DataEndian,
    #[serde(default)]
    pub write_value_once: bool,
    /// Present exactly when the point is writable
    #[serde(default)]
    pub priority_array_write: Option<PriorityArray>,
}

fn default_true() -> bool {
    true
}

fn default_value_round() -> i32 {
    2
}

fn default_value_operation() -> Option<String> {
    Some("x + 0".to_string())
}

fn default_fallback_value() -> Option<f64> {
    Some(16.0)
}

impl Point {
    pub fn new(
        device_uuid: impl Into<String>,
        name: impl Into<String>,
        function_code: FunctionCode,
        register: u32,
        register_length: u32,
    ) -> Self {
        Self {
            uuid: new_uuid(),
            device_uuid: device_uuid.into(),
            name: name.into(),
            enable: true,
            writable: false,
            cov_threshold: 0.0,
            value_round: default_value_round(),
            value_operation: default_value_operation(),
            input_min: None,
            input_max: None,
            scale_min: None,
            scale_max: None,
            tags: None,
            fallback_value: default_fallback_value(),
            register,
            register_length,
            function_code,
            data_type: DataType::Raw,
            data_endian: DataEndian::BEB_LEW,
            write_value_once: false,
            priority_array_write: None,
        }
    }

    /// Build an unsaved point from `"<FC>:<register>:<length>"`
    pub fn temporary_from_string(text: &str) -> PointResult<Self> {
        let parts: Vec<&str> = text.split(':').collect();
        let malformed =
            || PointError::validation("Invalid Modbus Point string format (\"<FC>:<Register>:<Length>\")");
        if parts.len() != 3 {
            return Err(malformed());
        }

        let code: u8 = parts[0].trim().parse().map_err(|_| malformed())?;
        let register: u32 = parts[1].trim().parse().map_err(|_| malformed())?;
        let length: u32 = parts[2].trim().parse().map_err(|_| malformed())?;

        let mut point = Self::new(
            String::new(),
            "temporary",
            FunctionCode::from_code(code)?,
            register,
            length,
        );
        point.validate()?;
        Ok(point)
    }

    /// Check the point and normalise its derived fields
    pub fn validate(&mut self) -> PointResult<()> {
        validate_name(&self.name)?;
        validate_tags(self.tags.as_deref())?;
        if self.register > MAX_REGISTER {
            return Err(PointError::validation("Invalid register"));
        }
        if self.register_length > MAX_REGISTER {
            return Err(PointError::validation("Invalid register length"));
        }
        if let Some(expr) = self.value_operation.as_deref() {
            point_calc::validate_value_operation(expr)?;
        }

        if self.function_code.is_digital() {
            self.data_type = DataType::Digital;
            self.register_length = 1;
            self.value_round = 0;
        } else if let Some(count) = self.data_type.register_count() {
            self.register_length = count;
        }

        self.function_code = match (self.function_code, self.register_length > 1) {
            (FunctionCode::WriteCoil, true) => FunctionCode::WriteCoils,
            (FunctionCode::WriteCoils, false) => FunctionCode::WriteCoil,
            (FunctionCode::WriteRegister, true) => FunctionCode::WriteRegisters,
            (FunctionCode::WriteRegisters, false) => FunctionCode::WriteRegister,
            (code, _) => code,
        };

        self.writable = self.function_code.is_writable();
        if self.writable {
            if self.priority_array_write.is_none() {
                self.priority_array_write =
                    Some(PriorityArray::default().with_fallback(self.fallback_value));
            }
        } else {
            self.priority_array_write = None;
        }
        Ok(())
    }

    /// Value the point should currently be driven to
    pub fn effective_write_value(&self) -> Option<f64> {
        self.priority_array_write
            .as_ref()
            .and_then(|array| array.effective_value())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn point(code: FunctionCode, length: u32) -> Point {
        Point::new("dev", "p1", code, 1, length)
    }

    #[test]
    fn test_function_code_round_trip() {
        for code in [1u8, 2, 3, 4, 5, 6, 15, 16] {
            assert_eq!(FunctionCode::from_code(code).unwrap().code(), code);
        }
        assert!(FunctionCode::from_code(7).is_err());
        assert_eq!(
            "WRITE_REGISTERS".parse::<FunctionCode>().unwrap(),
            FunctionCode::WriteRegisters
        );
    }

    #[test]
    fn test_digital_codes_force_digital_type() {
        let mut p = point(FunctionCode::ReadCoils, 4);
        p.data_type = DataType::Float;
        p.value_round = 3;
        p.validate().unwrap();
        assert_eq!(p.data_type, DataType::Digital);
        assert_eq!(p.register_length, 1);
        assert_eq!(p.value_round, 0);
        assert!(!p.writable);
        assert!(p.priority_array_write.is_none());
    }

    #[test]
    fn test_write_codes_follow_register_length() {
        let mut p = point(FunctionCode::WriteRegister, 2);
        p.validate().unwrap();
        assert_eq!(p.function_code, FunctionCode::WriteRegisters);

        let mut p = point(FunctionCode::WriteRegisters, 1);
        p.validate().unwrap();
        assert_eq!(p.function_code, FunctionCode::WriteRegister);

        let mut p = point(FunctionCode::WriteCoils, 3);
        p.validate().unwrap();
        assert_eq!(p.function_code, FunctionCode::WriteCoil);
        assert_eq!(p.register_length, 1);
    }

    #[test]
    fn test_wide_types_force_length() {
        let mut p = point(FunctionCode::ReadHoldingRegisters, 1);
        p.data_type = DataType::Float;
        p.validate().unwrap();
        assert_eq!(p.register_length, 2);

        let mut p = point(FunctionCode::WriteRegister, 1);
        p.data_type = DataType::Double;
        p.validate().unwrap();
        assert_eq!(p.register_length, 4);
        assert_eq!(p.function_code, FunctionCode::WriteRegisters);
    }

    #[test]
    fn test_writable_point_owns_priority_array() {
        let mut p = point(FunctionCode::WriteRegister, 1);
        p.fallback_value = Some(21.0);
        p.validate().unwrap();
        assert!(p.writable);
        assert_eq!(p.effective_write_value(), Some(21.0));

        p.function_code = FunctionCode::ReadHoldingRegisters;
        p.validate().unwrap();
        assert!(!p.writable);
        assert!(p.priority_array_write.is_none());
    }

    #[test]
    fn test_register_range_and_formula() {
        let mut p = point(FunctionCode::ReadHoldingRegisters, 1);
        p.register = 65_536;
        assert!(p.validate().is_err());

        let mut p = point(FunctionCode::ReadHoldingRegisters, 1);
        p.value_operation = Some("x ^ 2".to_string());
        assert!(p.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_temporary_from_string() {
        let p = Point::temporary_from_string("4:100:2").unwrap();
        assert_eq!(p.function_code, FunctionCode::ReadInputRegisters);
        assert_eq!(p.register, 100);
        assert_eq!(p.register_length, 2);
        assert!(Point::temporary_from_string("4:100").is_err());
        assert!(Point::temporary_from_string("x:1:1").is_err());
    }
}
