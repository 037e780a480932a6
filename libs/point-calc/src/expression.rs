//! User value formulas
//!
//! A point may carry an arithmetic formula over the placeholder `x`
//! (for example `x * 0.1 - 40`). The decode path evaluates it, the write path
//! solves `formula(x) = target` for `x`.
//!
//! Supported grammar: `+ - * /`, unary `+`/`-`, parentheses and decimal
//! literals. Literals are evaluated as floating point so `x / 2` and `1 / 2`
//! never truncate.

use crate::error::{CalcError, Result};
use evalexpr::{ContextWithMutableVariables, HashMapContext, Node, Value};

/// Name of the placeholder substituted with the point value
pub const PLACEHOLDER: &str = "x";

/// Relative error allowed when checking that a formula is linear
const LINEARITY_TOLERANCE: f64 = 1e-9;

/// A parsed, ready to evaluate value formula
#[derive(Debug, Clone)]
pub struct ValueOperation {
    source: String,
    /// `None` for an empty formula (identity)
    tree: Option<Node>,
}

impl ValueOperation {
    /// Parse and validate a formula
    pub fn parse(expr: &str) -> Result<Self> {
        let normalized = normalize(expr)?;
        if normalized.is_empty() {
            return Ok(Self {
                source: expr.to_string(),
                tree: None,
            });
        }

        let tree = evalexpr::build_operator_tree(&normalized)
            .map_err(|e| CalcError::expression(format!("Failed to parse '{}': {}", expr, e)))?;

        let op = Self {
            source: expr.to_string(),
            tree: Some(tree),
        };
        // Catch operator misuse evalexpr only reports on evaluation
        op.eval(1.0)?;
        Ok(op)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_identity(&self) -> bool {
        self.tree.is_none()
    }

    /// Evaluate the formula with `x = value`
    pub fn apply(&self, value: f64) -> Result<f64> {
        let number = self.eval(value)?;
        if !number.is_finite() {
            return Err(CalcError::expression(format!(
                "Expression '{}' is not finite for x = {}",
                self.source, value
            )));
        }
        Ok(number)
    }

    fn eval(&self, value: f64) -> Result<f64> {
        let Some(tree) = &self.tree else {
            return Ok(value);
        };

        let mut context = HashMapContext::new();
        context
            .set_value(PLACEHOLDER.to_string(), Value::Float(value))
            .map_err(|e| CalcError::expression(format!("Failed to set variable x: {}", e)))?;

        let result = tree.eval_with_context(&context).map_err(|e| {
            CalcError::expression(format!("Failed to evaluate '{}': {}", self.source, e))
        })?;

        match result {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            _ => Err(CalcError::expression(format!(
                "Expression did not evaluate to a number: {}",
                self.source
            ))),
        }
    }

    /// Solve `formula(x) = target` for `x`
    ///
    /// Only linear formulas can be solved: slope and intercept come from
    /// `x = 0` and `x = 1`, and `x = 2` must lie on the same line.
    pub fn revert(&self, target: f64) -> Result<f64> {
        if self.tree.is_none() {
            return Ok(target);
        }

        let intercept = self.apply(0.0)?;
        let slope = self.apply(1.0)? - intercept;
        if slope == 0.0 {
            return Err(CalcError::not_invertible(self.source.clone()));
        }
        let expected = intercept + 2.0 * slope;
        let tolerance = LINEARITY_TOLERANCE * expected.abs().max(1.0);
        if (self.apply(2.0)? - expected).abs() > tolerance {
            return Err(CalcError::not_invertible(self.source.clone()));
        }

        let x = (target - intercept) / slope;
        // -0.0 reads badly in stores and payloads
        Ok(if x == 0.0 { 0.0 } else { x })
    }
}

/// Evaluate `expr` with `x = value`; an empty formula is the identity
pub fn apply_value_operation(expr: &str, value: f64) -> Result<f64> {
    ValueOperation::parse(expr)?.apply(value)
}

/// Solve `expr(x) = target`; an empty formula is the identity
pub fn revert_value_operation(expr: &str, target: f64) -> Result<f64> {
    ValueOperation::parse(expr)?.revert(target)
}

/// Check a formula at the model boundary
pub fn validate_value_operation(expr: &str) -> Result<()> {
    ValueOperation::parse(expr).map(|_| ())
}

/// Rewrite a formula into the subset evalexpr evaluates the way we need
///
/// - integer literals become float literals
/// - unary `+` is dropped
/// - anything outside the grammar is rejected
fn normalize(expr: &str) -> Result<String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut out = String::with_capacity(expr.len() + 8);
    // true when the previous token can end an operand
    let mut after_operand = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                i += 1;
            },
            '0'..='9' | '.' => {
                if after_operand {
                    return Err(CalcError::expression(format!(
                        "Unexpected number at position {} in '{}'",
                        i, expr
                    )));
                }
                let start = i;
                let mut dots = 0;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    if chars[i] == '.' {
                        dots += 1;
                    }
                    i += 1;
                }
                if dots > 1 {
                    return Err(CalcError::expression(format!(
                        "Malformed number in '{}'",
                        expr
                    )));
                }
                let literal: String = chars[start..i].iter().collect();
                if literal == "." {
                    return Err(CalcError::expression(format!(
                        "Malformed number in '{}'",
                        expr
                    )));
                }
                if literal.starts_with('.') {
                    out.push('0');
                }
                out.push_str(&literal);
                if dots == 0 {
                    out.push_str(".0");
                } else if literal.ends_with('.') {
                    out.push('0');
                }
                out.push(' ');
                after_operand = true;
            },
            'x' => {
                if after_operand {
                    return Err(CalcError::expression(format!(
                        "Unexpected 'x' at position {} in '{}'",
                        i, expr
                    )));
                }
                out.push_str(PLACEHOLDER);
                out.push(' ');
                after_operand = true;
                i += 1;
            },
            '+' if !after_operand => {
                i += 1;
            },
            '+' | '-' | '*' | '/' => {
                out.push(c);
                out.push(' ');
                after_operand = false;
                i += 1;
            },
            '(' => {
                out.push('(');
                after_operand = false;
                i += 1;
            },
            ')' => {
                out.push(')');
                out.push(' ');
                after_operand = true;
                i += 1;
            },
            other => {
                return Err(CalcError::expression(format!(
                    "Unsupported character '{}' in '{}'",
                    other, expr
                )));
            },
        }
    }

    Ok(out.trim_end().to_string())
}
