//! Physical units and unit-tagged quantities.
//!
//! Scan parameters, manipulator positions and acquired samples all carry a
//! [`Unit`]. Arithmetic between quantities of different dimensions is
//! rejected with [`UnitError::Incompatible`]; conversion between compatible
//! units is always explicit via [`Quantity::to`].
//!
//! ```rust
//! use scan_core::units::{Quantity, MILLIMETER, MICROMETER};
//!
//! let travel: Quantity = "2.5 mm".parse().unwrap();
//! let fine = travel.to(MICROMETER).unwrap();
//! assert_eq!(fine.value(), 2500.0);
//! assert_eq!(fine.unit(), MICROMETER);
//! assert!(travel.try_add(Quantity::new(1.0, MILLIMETER)).is_ok());
//! ```

use serde::{de, Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Div, Mul, Neg};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by unit parsing, conversion and checked arithmetic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    /// The two operands have different physical dimensions.
    #[error("Incompatible units: cannot combine '{left}' with '{right}'")]
    Incompatible {
        /// Left operand unit symbol
        left: String,
        /// Right operand unit symbol
        right: String,
    },

    /// The unit symbol is not known.
    #[error("Unknown unit '{0}'")]
    UnknownUnit(String),

    /// The text could not be parsed as `<value> <unit>`.
    #[error("Cannot parse quantity from '{0}'")]
    Parse(String),

    /// A ratio was requested against a zero-valued quantity.
    #[error("Division by a zero quantity")]
    DivisionByZero,
}

/// Physical dimension of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    /// Pure number
    Dimensionless,
    /// Linear distance (base: metre)
    Length,
    /// Rotation (base: radian)
    Angle,
    /// Time (base: second)
    Time,
    /// Electric potential (base: volt)
    Voltage,
    /// Event counts
    Count,
    /// Linear velocity (base: m/s)
    LengthPerTime,
    /// Angular velocity (base: rad/s)
    AnglePerTime,
}

/// A unit of measurement: a symbol, a dimension and its scale relative to
/// the dimension's base unit.
///
/// The scale is held as `factor * 10^exponent`. Conversions between units
/// sharing a factor shift by an exact power of ten, so `1 mm` is exactly
/// `1000 µm`.
///
/// Two units are equal when they share dimension and scale, whatever the
/// symbol spelling (`"um"` and `"µm"` are the same unit).
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(into = "String")]
pub struct Unit {
    symbol: &'static str,
    dimension: Dimension,
    exponent: i32,
    factor: f64,
}

impl Unit {
    /// Define a decimal unit scaled by `10^exponent` from the base unit.
    pub const fn new(symbol: &'static str, dimension: Dimension, exponent: i32) -> Self {
        Self {
            symbol,
            dimension,
            exponent,
            factor: 1.0,
        }
    }

    /// Define a unit whose scale carries a non-decimal `factor`.
    pub const fn with_factor(
        symbol: &'static str,
        dimension: Dimension,
        factor: f64,
        exponent: i32,
    ) -> Self {
        Self {
            symbol,
            dimension,
            exponent,
            factor,
        }
    }

    /// Display symbol
    pub fn symbol(&self) -> &'static str {
        self.symbol
    }

    /// Physical dimension
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Scale factor relative to the dimension's base unit
    pub fn scale(&self) -> f64 {
        shift(self.factor, self.exponent)
    }

    /// Whether values in `self` can be converted to `other`.
    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dimension == other.dimension
    }

    /// Look up a unit by symbol.
    pub fn parse(symbol: &str) -> Result<Self, UnitError> {
        let symbol = symbol.trim();
        KNOWN_UNITS
            .iter()
            .find(|(alias, _)| *alias == symbol)
            .map(|(_, unit)| *unit)
            .ok_or_else(|| UnitError::UnknownUnit(symbol.to_string()))
    }

    /// Velocity unit matching a position unit (`mm` -> `mm/s`).
    ///
    /// Returns `None` for dimensions without a defined velocity.
    pub fn per_second(&self) -> Option<Unit> {
        let dimension = match self.dimension {
            Dimension::Length => Dimension::LengthPerTime,
            Dimension::Angle => Dimension::AnglePerTime,
            _ => return None,
        };
        KNOWN_UNITS
            .iter()
            .map(|(_, unit)| *unit)
            .find(|unit| unit.dimension == dimension && unit.same_scale(self))
    }

    fn same_scale(&self, other: &Unit) -> bool {
        self.exponent == other.exponent && self.factor == other.factor
    }

    /// `value` in `self` re-expressed in `to`, without checking dimensions.
    fn convert(&self, value: f64, to: &Unit) -> f64 {
        let value = if self.factor == to.factor {
            value
        } else {
            value * (self.factor / to.factor)
        };
        shift(value, self.exponent - to.exponent)
    }
}

/// `value * 10^exponent`, dividing for negative exponents so that decimal
/// values stay correctly rounded.
fn shift(value: f64, exponent: i32) -> f64 {
    let magnitude = 10f64.powi(exponent.abs());
    if exponent >= 0 {
        value * magnitude
    } else {
        value / magnitude
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.dimension == other.dimension && self.same_scale(other)
    }
}

impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let symbol = String::deserialize(deserializer)?;
        Unit::parse(&symbol).map_err(de::Error::custom)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol)
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.symbol.to_string()
    }
}

impl TryFrom<String> for Unit {
    type Error = UnitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Unit::parse(&value)
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::parse(s)
    }
}

// =============================================================================
// Predefined Units
// =============================================================================

/// Pure number
pub const DIMENSIONLESS: Unit = Unit::new("", Dimension::Dimensionless, 0);
/// Event counts
pub const COUNTS: Unit = Unit::new("counts", Dimension::Count, 0);

/// Metre
pub const METER: Unit = Unit::new("m", Dimension::Length, 0);
/// Millimetre
pub const MILLIMETER: Unit = Unit::new("mm", Dimension::Length, -3);
/// Micrometre
pub const MICROMETER: Unit = Unit::new("µm", Dimension::Length, -6);
/// Nanometre
pub const NANOMETER: Unit = Unit::new("nm", Dimension::Length, -9);

/// Radian
pub const RADIAN: Unit = Unit::new("rad", Dimension::Angle, 0);
/// Degree of arc
pub const DEGREE: Unit = Unit::with_factor("deg", Dimension::Angle, DEG_TO_RAD, 0);

/// Second
pub const SECOND: Unit = Unit::new("s", Dimension::Time, 0);
/// Millisecond
pub const MILLISECOND: Unit = Unit::new("ms", Dimension::Time, -3);
/// Microsecond
pub const MICROSECOND: Unit = Unit::new("µs", Dimension::Time, -6);
/// Nanosecond
pub const NANOSECOND: Unit = Unit::new("ns", Dimension::Time, -9);
/// Picosecond
pub const PICOSECOND: Unit = Unit::new("ps", Dimension::Time, -12);
/// Femtosecond
pub const FEMTOSECOND: Unit = Unit::new("fs", Dimension::Time, -15);

/// Volt
pub const VOLT: Unit = Unit::new("V", Dimension::Voltage, 0);
/// Millivolt
pub const MILLIVOLT: Unit = Unit::new("mV", Dimension::Voltage, -3);

/// Metre per second
pub const METER_PER_SECOND: Unit = Unit::new("m/s", Dimension::LengthPerTime, 0);
/// Millimetre per second
pub const MILLIMETER_PER_SECOND: Unit = Unit::new("mm/s", Dimension::LengthPerTime, -3);
/// Micrometre per second
pub const MICROMETER_PER_SECOND: Unit = Unit::new("µm/s", Dimension::LengthPerTime, -6);
/// Radian per second
pub const RADIAN_PER_SECOND: Unit = Unit::new("rad/s", Dimension::AnglePerTime, 0);
/// Degree per second
pub const DEGREE_PER_SECOND: Unit =
    Unit::with_factor("deg/s", Dimension::AnglePerTime, DEG_TO_RAD, 0);

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// Symbol table used by [`Unit::parse`], including ASCII aliases.
const KNOWN_UNITS: &[(&str, Unit)] = &[
    ("", DIMENSIONLESS),
    ("1", DIMENSIONLESS),
    ("counts", COUNTS),
    ("count", COUNTS),
    ("m", METER),
    ("mm", MILLIMETER),
    ("µm", MICROMETER),
    ("um", MICROMETER),
    ("nm", NANOMETER),
    ("rad", RADIAN),
    ("deg", DEGREE),
    ("°", DEGREE),
    ("s", SECOND),
    ("ms", MILLISECOND),
    ("µs", MICROSECOND),
    ("us", MICROSECOND),
    ("ns", NANOSECOND),
    ("ps", PICOSECOND),
    ("fs", FEMTOSECOND),
    ("V", VOLT),
    ("mV", MILLIVOLT),
    ("m/s", METER_PER_SECOND),
    ("mm/s", MILLIMETER_PER_SECOND),
    ("µm/s", MICROMETER_PER_SECOND),
    ("um/s", MICROMETER_PER_SECOND),
    ("rad/s", RADIAN_PER_SECOND),
    ("deg/s", DEGREE_PER_SECOND),
];

// =============================================================================
// Quantity
// =============================================================================

/// A magnitude tagged with a [`Unit`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "String")]
pub struct Quantity {
    value: f64,
    unit: Unit,
}

impl Quantity {
    /// Create a quantity.
    pub const fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// Magnitude in [`Quantity::unit`].
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Unit of [`Quantity::value`]
    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Convert to another unit of the same dimension.
    pub fn to(&self, unit: Unit) -> Result<Quantity, UnitError> {
        Ok(Quantity::new(self.value_in(unit)?, unit))
    }

    /// Magnitude expressed in `unit`.
    pub fn value_in(&self, unit: Unit) -> Result<f64, UnitError> {
        self.check_compatible(&unit)?;
        if self.unit == unit {
            return Ok(self.value);
        }
        Ok(self.unit.convert(self.value, &unit))
    }

    /// Whether `self` and `other` share a dimension.
    pub fn is_compatible(&self, other: &Quantity) -> bool {
        self.unit.is_compatible(&other.unit)
    }

    /// Sum in `self`'s unit.
    pub fn try_add(&self, other: Quantity) -> Result<Quantity, UnitError> {
        let rhs = other.value_in(self.unit).map_err(|_| self.incompatible(&other.unit))?;
        Ok(Quantity::new(self.value + rhs, self.unit))
    }

    /// Difference in `self`'s unit.
    pub fn try_sub(&self, other: Quantity) -> Result<Quantity, UnitError> {
        let rhs = other.value_in(self.unit).map_err(|_| self.incompatible(&other.unit))?;
        Ok(Quantity::new(self.value - rhs, self.unit))
    }

    /// Dimensionless ratio `self / other`.
    pub fn ratio(&self, other: Quantity) -> Result<f64, UnitError> {
        let denominator = other.value_in(self.unit).map_err(|_| self.incompatible(&other.unit))?;
        if denominator == 0.0 {
            return Err(UnitError::DivisionByZero);
        }
        Ok(self.value / denominator)
    }

    /// Compare two quantities of the same dimension.
    pub fn compare(&self, other: &Quantity) -> Result<Ordering, UnitError> {
        let rhs = other.value_in(self.unit).map_err(|_| self.incompatible(&other.unit))?;
        Ok(self.value.partial_cmp(&rhs).unwrap_or(Ordering::Equal))
    }

    /// Magnitude without sign, same unit.
    pub fn abs(&self) -> Quantity {
        Quantity::new(self.value.abs(), self.unit)
    }

    /// `-1.0`, `0.0` or `1.0` depending on the sign of the magnitude.
    pub fn signum(&self) -> f64 {
        if self.value == 0.0 {
            0.0
        } else {
            self.value.signum()
        }
    }

    /// Whether the magnitude is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }

    fn check_compatible(&self, unit: &Unit) -> Result<(), UnitError> {
        if self.unit.is_compatible(unit) {
            Ok(())
        } else {
            Err(self.incompatible(unit))
        }
    }

    fn incompatible(&self, unit: &Unit) -> UnitError {
        UnitError::Incompatible {
            left: self.unit.symbol.to_string(),
            right: unit.symbol.to_string(),
        }
    }
}

impl Neg for Quantity {
    type Output = Quantity;

    fn neg(self) -> Self::Output {
        Quantity::new(-self.value, self.unit)
    }
}

impl Mul<f64> for Quantity {
    type Output = Quantity;

    fn mul(self, rhs: f64) -> Self::Output {
        Quantity::new(self.value * rhs, self.unit)
    }
}

impl Div<f64> for Quantity {
    type Output = Quantity;

    fn div(self, rhs: f64) -> Self::Output {
        Quantity::new(self.value / rhs, self.unit)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.symbol.is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit.symbol)
        }
    }
}

impl FromStr for Quantity {
    type Err = UnitError;

    /// Parse `"<value> <unit>"`; the space is optional (`"2.5mm"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(UnitError::Parse(s.to_string()));
        }

        if let Some((number, symbol)) = text.split_once(char::is_whitespace) {
            let value: f64 = number
                .trim()
                .parse()
                .map_err(|_| UnitError::Parse(s.to_string()))?;
            return Ok(Quantity::new(value, Unit::parse(symbol)?));
        }

        // No separator: take the longest numeric prefix that leaves a known unit
        for (idx, _) in text.char_indices().rev() {
            let (number, symbol) = text.split_at(idx);
            if let (Ok(value), Ok(unit)) = (number.parse::<f64>(), Unit::parse(symbol)) {
                return Ok(Quantity::new(value, unit));
            }
        }

        match text.parse::<f64>() {
            Ok(value) => Ok(Quantity::new(value, DIMENSIONLESS)),
            Err(_) => Err(UnitError::Parse(s.to_string())),
        }
    }
}

impl From<Quantity> for String {
    fn from(quantity: Quantity) -> Self {
        quantity.to_string()
    }
}

impl TryFrom<String> for Quantity {
    type Error = UnitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}
