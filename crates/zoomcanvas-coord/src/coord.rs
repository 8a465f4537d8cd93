//! Binary fixed-point coordinates.
//!
//! A [`Coord`] is `magnitude / 2^scale` with an arbitrary-precision
//! magnitude. Values of different scale are aligned by shifting the coarser
//! one up, which never loses bits; the only lossy step is the clamp to the
//! [`Precision`] cap applied to every arithmetic result.
//!
//! Text uses base 8 so each digit is exactly three bits:
//!
//! ```text
//! "0.4"    = 0.100₂          = 1/2
//! "0.0077" = 0.000000111111₂ = 63/4096
//! "-1.2"   = -1.010₂         = -5/4
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::{Num, One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoordError;

/// Default cap on fractional bits kept by arithmetic results.
pub const MAX_PRECISION: u32 = 384;

// ============================================================================
// Coord
// ============================================================================

/// Arbitrary-precision binary fixed-point number.
///
/// Equality and ordering are numeric: `0.4` and `0.40` compare equal even
/// though their scales differ.
#[derive(Clone, Debug)]
pub struct Coord {
    magnitude: BigInt,
    scale: u32,
}

impl Coord {
    /// `magnitude / 2^scale`.
    pub fn new(magnitude: impl Into<BigInt>, scale: u32) -> Self {
        Self {
            magnitude: magnitude.into(),
            scale,
        }
    }

    pub fn zero() -> Self {
        Self::new(0, 0)
    }

    pub fn one() -> Self {
        Self::new(1, 0)
    }

    /// Raw magnitude at this coordinate's own scale.
    pub fn magnitude(&self) -> &BigInt {
        &self.magnitude
    }

    /// Number of fractional bits.
    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_negative(&self) -> bool {
        self.magnitude.is_negative()
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_zero()
    }

    /// True when the value lies in `[0, 1)`.
    pub fn is_unit_fraction(&self) -> bool {
        !self.is_negative() && (&self.magnitude >> self.scale).is_zero()
    }

    /// Magnitude shifted up to a finer scale. `scale` must be ≥ `self.scale`.
    fn aligned(&self, scale: u32) -> BigInt {
        &self.magnitude << (scale - self.scale)
    }

    /// The value floored to exactly `bits` fractional bits, as an integer.
    ///
    /// Unlike [`truncate`](Self::truncate) this also widens coarser values,
    /// so the result is always "units of `2^-bits`".
    pub fn to_fixed(&self, bits: u32) -> BigInt {
        if self.scale > bits {
            &self.magnitude >> (self.scale - bits)
        } else {
            &self.magnitude << (bits - self.scale)
        }
    }

    fn floor_to(&self, bits: u32) -> Coord {
        if self.scale > bits {
            Coord::new(&self.magnitude >> (self.scale - bits), bits)
        } else {
            self.clone()
        }
    }

    /// Round toward negative infinity.
    ///
    /// `bits ≥ 0` keeps that many fractional bits. `bits < 0` drops the
    /// whole fraction and also zeroes the low `|bits|` integer bits, which
    /// aligns a value to a grid coarser than one unit.
    pub fn truncate(&self, bits: i32) -> Coord {
        if bits >= 0 {
            return self.floor_to(bits.unsigned_abs());
        }
        let low = bits.unsigned_abs();
        let whole = &self.magnitude >> self.scale;
        Coord::new((whole >> low) << low, 0)
    }

    /// Like [`truncate`](Self::truncate), but adds one unit of the kept
    /// resolution when any discarded bit was set.
    pub fn ceil(&self, bits: i32) -> Coord {
        let floor = self.truncate(bits);
        if floor == *self {
            return floor;
        }
        if bits >= 0 {
            Coord::new(floor.magnitude + BigInt::one(), bits.unsigned_abs())
        } else {
            Coord::new(floor.magnitude + (BigInt::one() << bits.unsigned_abs()), 0)
        }
    }

    pub fn negate(&self) -> Coord {
        Coord::new(-&self.magnitude, self.scale)
    }

    /// Exact multiplication by `2^k`.
    pub fn mul_pow2(&self, k: i32) -> Coord {
        let shift = k.unsigned_abs();
        if k < 0 {
            return Coord::new(self.magnitude.clone(), self.scale.saturating_add(shift));
        }
        if self.scale >= shift {
            Coord::new(self.magnitude.clone(), self.scale - shift)
        } else {
            Coord::new(&self.magnitude << (shift - self.scale), 0)
        }
    }

    /// Nearest `f64`. Loses precision past 53 significant bits.
    pub fn to_f64(&self) -> f64 {
        let width = self.magnitude.bits();
        let (mantissa, exponent) = if width > 64 {
            let dropped = width - 64;
            (
                &self.magnitude >> dropped,
                i64::from(self.scale) - dropped as i64,
            )
        } else {
            (self.magnitude.clone(), i64::from(self.scale))
        };
        let mantissa = mantissa.to_f64().unwrap_or(0.0);
        let exponent = i32::try_from(-exponent).unwrap_or(if exponent > 0 { i32::MIN } else { i32::MAX });
        mantissa * 2f64.powi(exponent)
    }
}

impl From<i64> for Coord {
    fn from(value: i64) -> Self {
        Coord::new(value, 0)
    }
}

impl PartialEq for Coord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Coord {}

impl PartialOrd for Coord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Coord {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.scale == other.scale {
            return self.magnitude.cmp(&other.magnitude);
        }
        let scale = self.scale.max(other.scale);
        self.aligned(scale).cmp(&other.aligned(scale))
    }
}

// ============================================================================
// Text form
// ============================================================================

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abs = self.magnitude.abs();
        if self.magnitude.is_negative() {
            f.write_str("-")?;
        }
        f.write_str(&(&abs >> self.scale).to_str_radix(8))?;

        let fraction = &abs & ((BigInt::one() << self.scale) - BigInt::one());
        if fraction.is_zero() {
            return Ok(());
        }
        // A sentinel bit above the fraction keeps its leading zero digits;
        // the padding makes the fraction a whole number of octal digits.
        let pad = (3 - self.scale % 3) % 3;
        let digits = ((fraction | (BigInt::one() << self.scale)) << pad).to_str_radix(8);
        write!(f, ".{}", digits[1..].trim_end_matches('0'))
    }
}

impl FromStr for Coord {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoordError::Parse(s.to_string());

        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        let octal = |c: char| ('0'..='7').contains(&c);
        if !whole.chars().all(octal) || !fraction.chars().all(octal) {
            return Err(invalid());
        }

        let magnitude = BigInt::from_str_radix(&format!("{whole}{fraction}"), 8)
            .map_err(|_| invalid())?;
        let scale = u32::try_from(fraction.len() * 3).map_err(|_| invalid())?;
        Ok(Coord::new(
            if negative { -magnitude } else { magnitude },
            scale,
        ))
    }
}

impl Serialize for Coord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Coord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Precision
// ============================================================================

/// Arithmetic context: every result is floored to `max_bits` fractional bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    max_bits: u32,
}

impl Default for Precision {
    fn default() -> Self {
        Self::new(MAX_PRECISION)
    }
}

impl Precision {
    pub const fn new(max_bits: u32) -> Self {
        Self { max_bits }
    }

    pub fn max_bits(&self) -> u32 {
        self.max_bits
    }

    /// Floor `value` to this context's bit cap.
    pub fn clamp(&self, value: Coord) -> Coord {
        if value.scale > self.max_bits {
            value.floor_to(self.max_bits)
        } else {
            value
        }
    }

    pub fn add(&self, a: &Coord, b: &Coord) -> Coord {
        let scale = a.scale.max(b.scale);
        self.clamp(Coord::new(a.aligned(scale) + b.aligned(scale), scale))
    }

    pub fn sub(&self, a: &Coord, b: &Coord) -> Coord {
        self.add(a, &b.negate())
    }

    pub fn mul(&self, a: &Coord, b: &Coord) -> Coord {
        self.clamp(Coord::new(
            &a.magnitude * &b.magnitude,
            a.scale.saturating_add(b.scale),
        ))
    }

    /// `a / b` at `a`'s scale, rounding toward zero.
    pub fn div(&self, a: &Coord, b: &Coord) -> Result<Coord, CoordError> {
        if b.magnitude.is_zero() {
            return Err(CoordError::DivideByZero);
        }
        let quotient = (&a.magnitude << b.scale) / &b.magnitude;
        Ok(self.clamp(Coord::new(quotient, a.scale)))
    }
}

// Operator forms use the default precision.
macro_rules! binary_op {
    ($trait:ident, $method:ident) => {
        impl $trait<&Coord> for &Coord {
            type Output = Coord;
            fn $method(self, rhs: &Coord) -> Coord {
                Precision::default().$method(self, rhs)
            }
        }

        impl $trait for Coord {
            type Output = Coord;
            fn $method(self, rhs: Coord) -> Coord {
                Precision::default().$method(&self, &rhs)
            }
        }

        impl $trait<&Coord> for Coord {
            type Output = Coord;
            fn $method(self, rhs: &Coord) -> Coord {
                Precision::default().$method(&self, rhs)
            }
        }
    };
}

binary_op!(Add, add);
binary_op!(Sub, sub);
binary_op!(Mul, mul);

impl Neg for Coord {
    type Output = Coord;
    fn neg(self) -> Coord {
        self.negate()
    }
}

impl Neg for &Coord {
    type Output = Coord;
    fn neg(self) -> Coord {
        self.negate()
    }
}
