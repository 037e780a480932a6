//! Data model for networks, devices, points and their runtime state
//!
//! Validation is explicit: every entity exposes `validate()` which normalises
//! derived fields and rejects invalid configuration with
//! [`PointError::Validation`](errors::PointError::Validation). The store calls
//! it before every insert or update.

pub mod device;
pub mod mapping;
pub mod network;
pub mod point;
pub mod point_store;
pub mod priority_array;

pub use device::Device;
pub use mapping::{MapType, Mapping, MappingState};
pub use network::{Network, NetworkType, Parity};
pub use point::{DataEndian, DataType, FunctionCode, FunctionGroup, Point};
pub use point_store::PointStore;
pub use priority_array::{PriorityArray, FALLBACK_PRIORITY, PRIORITY_LEVELS};

use errors::{PointError, PointResult};
use regex::Regex;
use std::sync::OnceLock;

/// Generates `as_str`, `FromStr` and `Display` for enums persisted as text
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = errors::PointError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(errors::PointError::validation(format!(
                        "Invalid {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}
pub(crate) use text_enum;

fn name_regex() -> Option<&'static Regex> {
    static NAME: OnceLock<Option<Regex>> = OnceLock::new();
    NAME.get_or_init(|| Regex::new("^[A-Za-z0-9_-]+$").ok())
        .as_ref()
}

/// Names are alphanumeric and may contain '_' and '-'
pub(crate) fn validate_name(name: &str) -> PointResult<()> {
    let regex = name_regex().ok_or_else(|| PointError::internal("name pattern failed to compile"))?;
    if !regex.is_match(name) {
        return Err(PointError::validation(
            "name should be alphanumeric and can contain '_', '-'",
        ));
    }
    Ok(())
}

/// Tags are stored as a JSON document
pub(crate) fn validate_tags(tags: Option<&str>) -> PointResult<()> {
    if let Some(tags) = tags {
        serde_json::from_str::<serde_json::Value>(tags)
            .map_err(|_| PointError::validation("tags needs to be a valid JSON"))?;
    }
    Ok(())
}

pub(crate) fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
