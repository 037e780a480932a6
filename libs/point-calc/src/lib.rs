//! point-calc - Value pipeline math for the point server
//!
//! Decode direction (device to store):
//!
//! ```text
//! value = round(formula(scale(value_original)), value_round)
//! ```
//!
//! Encode direction (effective write value to device) reverses it:
//! solve the formula for its placeholder, unscale, then round.
//!
//! # Example
//!
//! ```rust
//! use point_calc::{round_to, scale, ValueOperation};
//!
//! let op = ValueOperation::parse("x * 2 + 3").unwrap();
//! let scaled = scale(12.0, Some(4.0), Some(20.0), Some(0.0), Some(100.0));
//! assert_eq!(round_to(op.apply(scaled).unwrap(), 2), 103.0);
//! assert_eq!(op.revert(103.0).unwrap(), 50.0);
//! ```

pub mod error;
pub mod expression;
pub mod scaling;

pub use error::{CalcError, Result};
pub use expression::{
    apply_value_operation, revert_value_operation, validate_value_operation, ValueOperation,
};
pub use scaling::{round_to, scale, unscale};
