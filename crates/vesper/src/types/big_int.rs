//! Arbitrary-precision integers backing the `BigInt` primitive.
//!
//! `JsBigInt` wraps `num_bigint::BigInt` (sign plus 32-bit magnitude limbs)
//! and centralizes every operation the interpreter performs on BigInts,
//! including the failure modes the language mandates: RangeError for a zero
//! divisor or an oversized exponent, TypeError for unsigned right shift, and
//! SyntaxError for malformed literals.

use std::{
    cmp::Ordering,
    fmt::{self, Display},
};

use num_bigint::{BigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::error::{RunError, RunResult};

/// Largest exponent accepted by [`JsBigInt::pow`]: one 32-bit limb.
const MAX_EXPONENT: u64 = u32::MAX as u64;

/// Largest shift distance accepted before the result is deemed unrepresentable.
const MAX_SHIFT: u64 = 1 << 30;

/// Wrapper around `num_bigint::BigInt` carrying ECMAScript semantics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub(crate) struct JsBigInt(pub BigInt);

impl JsBigInt {
    pub fn new(inner: BigInt) -> Self {
        Self(inner)
    }

    pub fn from_i64(i: i64) -> Self {
        Self(BigInt::from(i))
    }

    pub fn from_u64(u: u64) -> Self {
        Self(BigInt::from(u))
    }

    /// `NumberToBigInt`: fails unless the number is an integral finite value.
    pub fn from_f64(n: f64) -> RunResult<Self> {
        if !n.is_finite() || n.trunc() != n {
            return Err(RunError::range_error(format!(
                "the number {n} cannot be converted to a BigInt because it is not an integer"
            )));
        }
        // Build the magnitude from the mantissa shifted by the exponent; the
        // i128 fast path covers everything tests and realistic scripts reach.
        if n.abs() < 2f64.powi(127) {
            return Ok(Self(BigInt::from(n as i128)));
        }
        let bits = n.to_bits();
        let sign = if n.is_sign_negative() { Sign::Minus } else { Sign::Plus };
        let exponent = ((bits >> 52) & 0x7ff) as i64 - 1075;
        let mantissa = (bits & ((1u64 << 52) - 1)) | (1u64 << 52);
        let mut magnitude = BigInt::from(mantissa);
        magnitude <<= u32::try_from(exponent).expect("huge f64 has positive exponent");
        if sign == Sign::Minus {
            magnitude = -magnitude;
        }
        Ok(Self(magnitude))
    }

    /// `StringToBigInt`: decimal or prefixed (`0x`/`0o`/`0b`) integer text.
    ///
    /// The empty string is zero; anything else malformed is a SyntaxError.
    pub fn from_str(text: &str) -> RunResult<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self(BigInt::zero()));
        }
        let (negative, digits) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let (radix, digits) = match digits.as_bytes() {
            [b'0', b'x' | b'X', rest @ ..] if !negative => (16, rest),
            [b'0', b'o' | b'O', rest @ ..] if !negative => (8, rest),
            [b'0', b'b' | b'B', rest @ ..] if !negative => (2, rest),
            _ => (10, digits.as_bytes()),
        };
        let digits = std::str::from_utf8(digits).expect("sliced at ascii boundaries");
        let parsed = BigInt::parse_bytes(digits.as_bytes(), radix)
            .filter(|_| !digits.is_empty())
            .ok_or_else(|| RunError::syntax_error(format!("cannot convert {text:?} to a BigInt")))?;
        Ok(Self(if negative { -parsed } else { parsed }))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::INFINITY)
    }

    pub fn to_decimal(&self) -> String {
        self.0.to_str_radix(10)
    }

    /// Rough heap footprint for the resource tracker.
    pub fn estimate_size(&self) -> usize {
        let bit_bytes = usize::try_from(self.0.bits()).unwrap_or(usize::MAX).saturating_add(7) / 8;
        bit_bytes + size_of::<BigInt>()
    }

    // --- arithmetic ---

    pub fn add(&self, rhs: &Self) -> Self {
        Self(&self.0 + &rhs.0)
    }

    pub fn sub(&self, rhs: &Self) -> Self {
        Self(&self.0 - &rhs.0)
    }

    pub fn mul(&self, rhs: &Self) -> Self {
        Self(&self.0 * &rhs.0)
    }

    /// Truncating division; a zero divisor is a RangeError.
    pub fn div(&self, rhs: &Self) -> RunResult<Self> {
        if rhs.0.is_zero() {
            return Err(RunError::range_error("division by zero"));
        }
        Ok(Self(&self.0 / &rhs.0))
    }

    /// Remainder with the sign of the dividend; a zero divisor is a RangeError.
    pub fn rem(&self, rhs: &Self) -> RunResult<Self> {
        if rhs.0.is_zero() {
            return Err(RunError::range_error("division by zero"));
        }
        Ok(Self(&self.0 % &rhs.0))
    }

    /// Exponentiation by squaring. Negative exponents and exponents wider
    /// than one limb are RangeErrors.
    pub fn pow(&self, exponent: &Self) -> RunResult<Self> {
        if exponent.is_negative() {
            return Err(RunError::range_error("exponent must be non-negative"));
        }
        // 0, 1 and -1 stay small under any exponent.
        if self.0.is_zero() {
            return Ok(if exponent.is_zero() { Self(BigInt::one()) } else { Self(BigInt::zero()) });
        }
        if self.0 == BigInt::one() {
            return Ok(Self(BigInt::one()));
        }
        let exp = exponent
            .0
            .to_u64()
            .filter(|&e| e <= MAX_EXPONENT)
            .ok_or_else(|| RunError::range_error("exponent too large"))?;
        let exp = u32::try_from(exp).expect("bounded by MAX_EXPONENT");
        Ok(Self(self.0.pow(exp)))
    }

    pub fn neg(&self) -> Self {
        Self(-&self.0)
    }

    // --- bitwise (two's complement) ---

    pub fn bit_not(&self) -> Self {
        Self(-&self.0 - 1)
    }

    pub fn bit_and(&self, rhs: &Self) -> Self {
        Self(&self.0 & &rhs.0)
    }

    pub fn bit_or(&self, rhs: &Self) -> Self {
        Self(&self.0 | &rhs.0)
    }

    pub fn bit_xor(&self, rhs: &Self) -> Self {
        Self(&self.0 ^ &rhs.0)
    }

    /// Left shift; negative distances shift right.
    pub fn shl(&self, rhs: &Self) -> RunResult<Self> {
        if rhs.is_negative() {
            return self.shr(&rhs.neg());
        }
        let distance = rhs
            .0
            .to_u64()
            .filter(|&d| d <= MAX_SHIFT)
            .ok_or_else(|| RunError::range_error("BigInt shift distance too large"))?;
        if self.0.is_zero() {
            return Ok(Self(BigInt::zero()));
        }
        Ok(Self(&self.0 << usize::try_from(distance).expect("bounded by MAX_SHIFT")))
    }

    /// Signed (arithmetic) right shift; negative distances shift left.
    pub fn shr(&self, rhs: &Self) -> RunResult<Self> {
        if rhs.is_negative() {
            return self.shl(&rhs.neg());
        }
        let distance = match rhs.0.to_u64().filter(|&d| d <= MAX_SHIFT) {
            Some(d) => d,
            // Shifting everything out leaves the sign bit.
            None => {
                return Ok(Self(if self.0.is_negative() {
                    BigInt::from(-1)
                } else {
                    BigInt::zero()
                }));
            }
        };
        // Arithmetic shift floors toward negative infinity.
        let divisor = BigInt::one() << usize::try_from(distance).expect("bounded by MAX_SHIFT");
        Ok(Self(self.0.div_floor(&divisor)))
    }

    /// Unsigned right shift is not defined for BigInt.
    pub fn ushr(&self, _rhs: &Self) -> RunResult<Self> {
        Err(RunError::type_error("BigInts have no unsigned right shift, use >> instead"))
    }

    // --- comparison ---

    pub fn compare(&self, rhs: &Self) -> Ordering {
        self.0.cmp(&rhs.0)
    }

    /// Numeric comparison against an f64 (for mixed relational operators).
    pub fn compare_f64(&self, rhs: f64) -> Option<Ordering> {
        if rhs.is_nan() {
            return None;
        }
        if rhs == f64::INFINITY {
            return Some(Ordering::Less);
        }
        if rhs == f64::NEG_INFINITY {
            return Some(Ordering::Greater);
        }
        let floor = BigInt::from(rhs.floor() as i128);
        match self.0.cmp(&floor) {
            Ordering::Equal if rhs.fract() != 0.0 => Some(Ordering::Less),
            other => Some(other),
        }
    }

    // --- wrapping conversions ---

    /// `BigInt.asUintN(bits, x)`: the value modulo `2^bits`.
    pub fn as_uint_n(&self, bits: u32) -> Self {
        if bits == 0 {
            return Self(BigInt::zero());
        }
        let modulus = BigInt::one() << bits as usize;
        let mut r = &self.0 % &modulus;
        if r.is_negative() {
            r += &modulus;
        }
        Self(r)
    }

    /// `BigInt.asIntN(bits, x)`: wrap to `[-2^(bits-1), 2^(bits-1))`.
    pub fn as_int_n(&self, bits: u32) -> Self {
        if bits == 0 {
            return Self(BigInt::zero());
        }
        let unsigned = self.as_uint_n(bits).0;
        let half = BigInt::one() << (bits as usize - 1);
        if unsigned >= half {
            Self(unsigned - (BigInt::one() << bits as usize))
        } else {
            Self(unsigned)
        }
    }

    /// Rendering for `toString(radix)`, radix 2..=36.
    pub fn to_string_radix(&self, radix: u32) -> RunResult<String> {
        if !(2..=36).contains(&radix) {
            return Err(RunError::range_error("toString() radix must be between 2 and 36"));
        }
        Ok(self.0.to_str_radix(radix))
    }
}

impl Display for JsBigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{inner}", inner = self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bi(i: i64) -> JsBigInt {
        JsBigInt::from_i64(i)
    }

    #[test]
    fn ring_identities() {
        let a = JsBigInt::from_str("123456789012345678901234567890").unwrap();
        let b = JsBigInt::from_str("-987654321098765432109876543210").unwrap();
        assert_eq!(a.add(&b).sub(&b), a);
        assert_eq!(a.add(&a.neg()), bi(0));
        assert_eq!(a.mul(&b).div(&b).unwrap(), a);
    }

    #[test]
    fn division_by_zero_is_range_error() {
        assert!(matches!(bi(1).div(&bi(0)), Err(RunError::Native(e)) if e.kind == crate::error::NativeErrorKind::RangeError));
        assert!(bi(1).rem(&bi(0)).is_err());
    }

    #[test]
    fn pow_limits() {
        assert_eq!(bi(2).pow(&bi(64)).unwrap().to_decimal(), "18446744073709551616");
        assert!(bi(2).pow(&bi(-1)).is_err());
        let huge = JsBigInt::from_str("18446744073709551616").unwrap();
        assert!(bi(2).pow(&huge).is_err());
    }

    #[test]
    fn signed_shift_floors() {
        assert_eq!(bi(-5).shr(&bi(1)).unwrap(), bi(-3));
        assert_eq!(bi(5).shr(&bi(1)).unwrap(), bi(2));
        assert_eq!(bi(1).shl(&bi(8)).unwrap(), bi(256));
        assert_eq!(bi(-1).shr(&bi(100)).unwrap(), bi(-1));
        assert!(bi(1).ushr(&bi(1)).is_err());
    }

    #[test]
    fn wrap_to_width() {
        assert_eq!(bi(255).as_int_n(8), bi(-1));
        assert_eq!(bi(255).as_uint_n(8), bi(255));
        assert_eq!(bi(256).as_uint_n(8), bi(0));
        assert_eq!(bi(-1).as_uint_n(8), bi(255));
        // as_int_n(as_uint_n(x)) == as_int_n(x)
        for x in [-300i64, -1, 0, 1, 127, 128, 255, 300] {
            assert_eq!(bi(x).as_uint_n(8).as_int_n(8), bi(x).as_int_n(8));
        }
    }

    #[test]
    fn string_conversions() {
        assert_eq!(JsBigInt::from_str("  42  ").unwrap(), bi(42));
        assert_eq!(JsBigInt::from_str("").unwrap(), bi(0));
        assert_eq!(JsBigInt::from_str("0xff").unwrap(), bi(255));
        assert_eq!(JsBigInt::from_str("0b101").unwrap(), bi(5));
        assert!(JsBigInt::from_str("12.5").is_err());
        assert!(JsBigInt::from_str("0x").is_err());
        assert_eq!(bi(255).to_string_radix(16).unwrap(), "ff");
        assert!(bi(1).to_string_radix(37).is_err());
    }

    #[test]
    fn f64_conversions() {
        assert_eq!(JsBigInt::from_f64(42.0).unwrap(), bi(42));
        assert!(JsBigInt::from_f64(0.5).is_err());
        assert!(JsBigInt::from_f64(f64::NAN).is_err());
        assert!(JsBigInt::from_f64(f64::INFINITY).is_err());
        let big = JsBigInt::from_f64(2f64.powi(130)).unwrap();
        assert_eq!(big.to_f64(), 2f64.powi(130));
    }

    #[test]
    fn mixed_compare() {
        assert_eq!(bi(2).compare_f64(2.5), Some(Ordering::Less));
        assert_eq!(bi(3).compare_f64(2.5), Some(Ordering::Greater));
        assert_eq!(bi(2).compare_f64(2.0), Some(Ordering::Equal));
        assert_eq!(bi(2).compare_f64(f64::NAN), None);
    }
}
