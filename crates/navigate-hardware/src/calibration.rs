//! Calibration Engine: voltage/position transfer functions per axis.
//!
//! Calibration expressions are parsed once, at load time, into a closed
//! [`TransferFunction`] tree. The accepted forms over the position variable
//! `x` are:
//!
//! | form            | example            |
//! |-----------------|--------------------|
//! | constant        | `2.5`              |
//! | linear          | `0.05*x + 0.1`     |
//! | rational-linear | `(5/100)*x + 0`    |
//!
//! Anything else fails with `UnsupportedCalibration`. An [`AxisCalibration`]
//! additionally requires the function to be strictly monotonic (constants
//! are rejected) so that `to_position` is the exact inverse of `to_voltage`.
//! Evaluating outside `[min, max]` is an `OutOfRange` error, never a clamp.

use navigate_core::error::{NavigateError, Quantity, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of supported transfer functions `voltage = f(x)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferFunction {
    Constant(f64),
    /// `slope*x + intercept`
    Linear { slope: f64, intercept: f64 },
    /// `(numerator/denominator)*x + intercept`
    RationalLinear {
        numerator: f64,
        denominator: f64,
        intercept: f64,
    },
}

impl TransferFunction {
    /// Parse an expression such as `(5/100)*x + 0`.
    pub fn parse(axis: &str, expression: &str) -> Result<Self> {
        parse_expression(expression).ok_or_else(|| NavigateError::UnsupportedCalibration {
            axis: axis.to_string(),
            expression: expression.to_string(),
        })
    }

    pub fn slope(&self) -> f64 {
        match *self {
            TransferFunction::Constant(_) => 0.0,
            TransferFunction::Linear { slope, .. } => slope,
            TransferFunction::RationalLinear {
                numerator,
                denominator,
                ..
            } => numerator / denominator,
        }
    }

    pub fn intercept(&self) -> f64 {
        match *self {
            TransferFunction::Constant(c) => c,
            TransferFunction::Linear { intercept, .. }
            | TransferFunction::RationalLinear { intercept, .. } => intercept,
        }
    }

    pub fn apply(&self, x: f64) -> f64 {
        match *self {
            TransferFunction::Constant(c) => c,
            TransferFunction::Linear { slope, intercept } => slope * x + intercept,
            TransferFunction::RationalLinear {
                numerator,
                denominator,
                intercept,
            } => numerator * x / denominator + intercept,
        }
    }

    /// Inverse, or `None` for a flat function.
    pub fn invert(&self, y: f64) -> Option<f64> {
        match *self {
            TransferFunction::Constant(_) => None,
            TransferFunction::Linear { slope, intercept } => Some((y - intercept) / slope),
            TransferFunction::RationalLinear {
                numerator,
                denominator,
                intercept,
            } => Some((y - intercept) * denominator / numerator),
        }
    }

    pub fn is_monotonic(&self) -> bool {
        let slope = self.slope();
        slope.is_finite() && slope != 0.0
    }
}

impl fmt::Display for TransferFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferFunction::Constant(c) => write!(f, "{c}"),
            TransferFunction::Linear { slope, intercept } => write!(f, "{slope}*x + {intercept}"),
            TransferFunction::RationalLinear {
                numerator,
                denominator,
                intercept,
            } => write!(f, "({numerator}/{denominator})*x + {intercept}"),
        }
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let value: f64 = s.parse().ok()?;
    value.is_finite().then_some(value)
}

fn parse_expression(expression: &str) -> Option<TransferFunction> {
    let s: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return None;
    }
    if let Some(c) = parse_number(&s) {
        return Some(TransferFunction::Constant(c));
    }

    let at = s.find('x')?;
    if s[at + 1..].contains('x') {
        return None;
    }
    let (coefficient, rest) = (&s[..at], &s[at + 1..]);

    let intercept = match rest {
        "" => 0.0,
        r if r.starts_with('+') || r.starts_with('-') => parse_number(r)?,
        _ => return None,
    };

    match coefficient {
        "" => Some(TransferFunction::Linear {
            slope: 1.0,
            intercept,
        }),
        "-" => Some(TransferFunction::Linear {
            slope: -1.0,
            intercept,
        }),
        c => {
            let factor = c.strip_suffix('*')?;
            if let Some(ratio) = factor.strip_prefix('(').and_then(|f| f.strip_suffix(')')) {
                let (num, den) = ratio.split_once('/')?;
                let numerator = parse_number(num)?;
                let denominator = parse_number(den)?;
                if denominator == 0.0 {
                    return None;
                }
                Some(TransferFunction::RationalLinear {
                    numerator,
                    denominator,
                    intercept,
                })
            } else {
                Some(TransferFunction::Linear {
                    slope: parse_number(factor)?,
                    intercept,
                })
            }
        }
    }
}

/// Transfer function plus hard bounds for one physical axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisCalibration {
    axis: String,
    function: TransferFunction,
    min: f64,
    max: f64,
}

impl AxisCalibration {
    pub fn new(axis: impl Into<String>, function: TransferFunction, min: f64, max: f64) -> Result<Self> {
        let axis = axis.into();
        if !(min.is_finite() && max.is_finite() && min <= max) {
            return Err(NavigateError::Configuration(format!(
                "axis '{axis}' has invalid bounds [{min}, {max}]"
            )));
        }
        if !function.is_monotonic() {
            return Err(NavigateError::Configuration(format!(
                "calibration '{function}' for axis '{axis}' is not invertible"
            )));
        }
        Ok(Self {
            axis,
            function,
            min,
            max,
        })
    }

    /// Parse `expression` and bind it to `[min, max]`.
    pub fn from_expression(axis: impl Into<String>, expression: &str, min: f64, max: f64) -> Result<Self> {
        let axis = axis.into();
        let function = TransferFunction::parse(&axis, expression)?;
        Self::new(axis, function, min, max)
    }

    pub fn axis(&self) -> &str {
        &self.axis
    }

    pub fn function(&self) -> TransferFunction {
        self.function
    }

    /// Position bounds.
    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Image of the position bounds, ordered low to high.
    pub fn voltage_bounds(&self) -> (f64, f64) {
        let a = self.function.apply(self.min);
        let b = self.function.apply(self.max);
        (a.min(b), a.max(b))
    }

    pub fn to_voltage(&self, position: f64) -> Result<f64> {
        if !(self.min..=self.max).contains(&position) {
            return Err(NavigateError::OutOfRange {
                axis: self.axis.clone(),
                quantity: Quantity::Position,
                value: position,
                min: self.min,
                max: self.max,
            });
        }
        Ok(self.function.apply(position))
    }

    pub fn to_position(&self, voltage: f64) -> Result<f64> {
        let (low, high) = self.voltage_bounds();
        if !(low..=high).contains(&voltage) {
            return Err(NavigateError::OutOfRange {
                axis: self.axis.clone(),
                quantity: Quantity::Voltage,
                value: voltage,
                min: low,
                max: high,
            });
        }
        let position = self
            .function
            .invert(voltage)
            .ok_or_else(|| NavigateError::Configuration(format!("axis '{}' not invertible", self.axis)))?;
        Ok(position.clamp(self.min, self.max))
    }
}

/// Every calibrated axis of one microscope profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationEngine {
    axes: BTreeMap<String, AxisCalibration>,
}

impl CalibrationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, calibration: AxisCalibration) -> Result<()> {
        let axis = calibration.axis().to_string();
        if self.axes.contains_key(&axis) {
            return Err(NavigateError::Configuration(format!(
                "axis '{axis}' calibrated twice"
            )));
        }
        self.axes.insert(axis, calibration);
        Ok(())
    }

    pub fn get(&self, axis: &str) -> Result<&AxisCalibration> {
        self.axes
            .get(axis)
            .ok_or_else(|| NavigateError::Configuration(format!("no calibration for axis '{axis}'")))
    }

    pub fn to_voltage(&self, axis: &str, position: f64) -> Result<f64> {
        self.get(axis)?.to_voltage(position)
    }

    pub fn to_position(&self, axis: &str, voltage: f64) -> Result<f64> {
        self.get(axis)?.to_position(voltage)
    }

    pub fn axes(&self) -> impl Iterator<Item = &str> {
        self.axes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_forms() {
        assert_eq!(
            TransferFunction::parse("a", "0.05*x + 0.1").unwrap(),
            TransferFunction::Linear {
                slope: 0.05,
                intercept: 0.1
            }
        );
        assert_eq!(
            TransferFunction::parse("a", "(5/100)*x + 0").unwrap(),
            TransferFunction::RationalLinear {
                numerator: 5.0,
                denominator: 100.0,
                intercept: 0.0
            }
        );
        assert_eq!(
            TransferFunction::parse("a", "-2*x-1.5").unwrap(),
            TransferFunction::Linear {
                slope: -2.0,
                intercept: -1.5
            }
        );
        assert_eq!(
            TransferFunction::parse("a", "x").unwrap(),
            TransferFunction::Linear {
                slope: 1.0,
                intercept: 0.0
            }
        );
        assert_eq!(
            TransferFunction::parse("a", " 3.3 ").unwrap(),
            TransferFunction::Constant(3.3)
        );
        assert_eq!(
            TransferFunction::parse("a", "1e-3*x").unwrap().slope(),
            1e-3
        );
    }

    #[test]
    fn rejects_unsupported_forms() {
        for expr in ["x^2", "x*x", "sin(x)", "2*y + 1", "(5/0)*x", "x + ", "", "2x", "x + 1 + 2"] {
            let err = TransferFunction::parse("galvo", expr).unwrap_err();
            assert!(
                matches!(err, NavigateError::UnsupportedCalibration { .. }),
                "{expr:?} should be unsupported"
            );
        }
    }

    #[test]
    fn constant_is_not_invertible() {
        let err = AxisCalibration::from_expression("f", "2.0", 0.0, 1.0).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn out_of_bounds_is_error_not_clamp() {
        let cal = AxisCalibration::from_expression("z", "0.05*x + 0", 0.0, 100.0).unwrap();
        assert_eq!(cal.to_voltage(100.0).unwrap(), 5.0);
        assert!(cal.to_voltage(100.5).unwrap_err().is_out_of_range());
        assert!(cal.to_position(5.1).unwrap_err().is_out_of_range());
        assert!(cal.to_position(-0.1).unwrap_err().is_out_of_range());
    }

    #[test]
    fn round_trip_within_tolerance_for_every_form() {
        let calibrations = [
            AxisCalibration::from_expression("a", "0.05*x + 0.1", -200.0, 200.0).unwrap(),
            AxisCalibration::from_expression("b", "(5/100)*x + 0", 0.0, 100.0).unwrap(),
            AxisCalibration::from_expression("c", "-0.25*x + 2", 0.0, 6.0).unwrap(),
            AxisCalibration::from_expression("d", "(-7/3)*x - 1", -1.0, 1.0).unwrap(),
        ];
        for cal in &calibrations {
            let (min, max) = cal.bounds();
            for i in 0..=50 {
                let p = min + (max - min) * i as f64 / 50.0;
                let back = cal.to_position(cal.to_voltage(p).unwrap()).unwrap();
                assert!((back - p).abs() < 1e-9, "{}: {p} -> {back}", cal.axis());
            }
        }
    }

    #[test]
    fn decreasing_functions_have_ordered_voltage_bounds() {
        let cal = AxisCalibration::from_expression("d", "(-7/3)*x - 1", -1.0, 1.0).unwrap();
        let (low, high) = cal.voltage_bounds();
        assert!(low < high);
    }

    #[test]
    fn engine_looks_up_by_axis() {
        let mut engine = CalibrationEngine::new();
        engine
            .insert(AxisCalibration::from_expression("x", "0.1*x", 0.0, 10.0).unwrap())
            .unwrap();
        assert_eq!(engine.to_voltage("x", 5.0).unwrap(), 0.5);
        assert!((engine.to_position("x", 0.5).unwrap() - 5.0).abs() < 1e-12);
        assert!(engine.to_voltage("y", 1.0).unwrap_err().is_configuration());
        assert!(engine
            .insert(AxisCalibration::from_expression("x", "x", 0.0, 1.0).unwrap())
            .is_err());
    }
}
