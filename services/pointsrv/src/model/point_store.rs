//! Runtime value row of a point

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointStore {
    pub point_uuid: String,
    pub value: Option<f64>,
    /// Value before scaling, formula and rounding
    pub value_original: Option<f64>,
    /// Raw registers or bits as a JSON array
    pub value_raw: Option<String>,
    pub fault: bool,
    pub fault_message: Option<String>,
    pub ts_value: Option<DateTime<Utc>>,
    pub ts_fault: Option<DateTime<Utc>>,
}

impl PointStore {
    pub fn new(point_uuid: impl Into<String>) -> Self {
        Self {
            point_uuid: point_uuid.into(),
            value_raw: Some(String::new()),
            ..Default::default()
        }
    }

    pub fn with_value(
        point_uuid: impl Into<String>,
        value: f64,
        value_original: f64,
        value_raw: String,
    ) -> Self {
        Self {
            point_uuid: point_uuid.into(),
            value: Some(value),
            value_original: Some(value_original),
            value_raw: Some(value_raw),
            ..Default::default()
        }
    }

    pub fn with_fault(point_uuid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            point_uuid: point_uuid.into(),
            fault: true,
            fault_message: Some(message.into()),
            ..Default::default()
        }
    }
}
