//! Cross-domain mapping of a Modbus point to a generic or BACnet point

use super::{new_uuid, text_enum};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MapType {
    Generic,
    Bacnet,
}

text_enum!(MapType { Generic => "GENERIC", Bacnet => "BACNET" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MappingState {
    #[default]
    Mapped,
    Broken,
}

text_enum!(MappingState { Mapped => "MAPPED", Broken => "BROKEN" });

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub uuid: String,
    pub point_uuid: String,
    pub mapped_point_uuid: String,
    #[serde(rename = "type")]
    pub map_type: MapType,
    #[serde(default)]
    pub mapping_state: MappingState,
}

impl Mapping {
    pub fn new(
        point_uuid: impl Into<String>,
        mapped_point_uuid: impl Into<String>,
        map_type: MapType,
    ) -> Self {
        Self {
            uuid: new_uuid(),
            point_uuid: point_uuid.into(),
            mapped_point_uuid: mapped_point_uuid.into(),
            map_type,
            mapping_state: MappingState::Mapped,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping_state == MappingState::Mapped
    }
}
