//! Value pipeline of one point
//!
//! ```text
//! read:  value = round(formula(scale(value_original)), value_round)
//! write: wire  = round(unscale(revert_formula(effective)), value_round)
//! ```

use crate::model::Point;
use errors::PointResult;
use point_calc::{round_to, scale, unscale, ValueOperation};

#[derive(Debug, Clone)]
pub struct ValuePipeline {
    operation: ValueOperation,
    input_min: Option<f64>,
    input_max: Option<f64>,
    scale_min: Option<f64>,
    scale_max: Option<f64>,
    value_round: i32,
}

impl ValuePipeline {
    pub fn for_point(point: &Point) -> PointResult<Self> {
        let operation = ValueOperation::parse(point.value_operation.as_deref().unwrap_or_default())?;
        Ok(Self {
            operation,
            input_min: point.input_min,
            input_max: point.input_max,
            scale_min: point.scale_min,
            scale_max: point.scale_max,
            value_round: point.value_round,
        })
    }

    /// Device value to stored value
    pub fn decode(&self, value_original: f64) -> PointResult<f64> {
        let scaled = scale(
            value_original,
            self.input_min,
            self.input_max,
            self.scale_min,
            self.scale_max,
        );
        let value = self.operation.apply(scaled)?;
        Ok(round_to(value, self.value_round))
    }

    /// Effective write value to device value
    pub fn encode(&self, target: f64) -> PointResult<f64> {
        let reverted = self.operation.revert(target)?;
        let unscaled = unscale(
            reverted,
            self.input_min,
            self.input_max,
            self.scale_min,
            self.scale_max,
        );
        Ok(round_to(unscaled, self.value_round))
    }
}

/// COV test of a fresh value against the stored one
pub fn is_significant_change(old: Option<f64>, new: f64, cov_threshold: f64) -> bool {
    match old {
        None => true,
        Some(old) => old != new && (old - new).abs() >= cov_threshold,
    }
}
