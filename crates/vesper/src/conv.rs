//! Primitive conversions: the heap-free parts of the abstract operations.
//!
//! Conversions that can call script (`ToPrimitive` on objects, `ToNumber`
//! through `valueOf`) live in the operations layer; everything here is pure
//! over primitives and is reused by the interpreter, the object model, and
//! value rendering.

/// `Number::toString(10)`: shortest round-trip rendering with the
/// ECMAScript exponent rules.
#[must_use]
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == f64::INFINITY {
        return "Infinity".to_string();
    }
    if n == f64::NEG_INFINITY {
        return "-Infinity".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.trunc() == n && n.abs() < 1e21 {
        return format!("{i}", i = n as i128);
    }
    let mut buffer = ryu::Buffer::new();
    let shortest = buffer.format(n);
    normalize_ryu(shortest)
}

/// Rewrites ryu's rendering into the ECMAScript form: positional notation
/// for exponents in `[-6, 21)`, `e+`/`e-` spelling outside it, no trailing
/// `.0`.
fn normalize_ryu(shortest: &str) -> String {
    let Some(e_pos) = shortest.find(['e', 'E']) else {
        return shortest.strip_suffix(".0").unwrap_or(shortest).to_string();
    };
    let (mantissa, exp) = shortest.split_at(e_pos);
    let exp: i32 = exp[1..].parse().expect("ryu exponent is integral");
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = digits.trim_end_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };
    // Position of the decimal point relative to the first digit.
    let unsigned = mantissa.trim_start_matches('-');
    let point = exp + i32::try_from(unsigned.find('.').unwrap_or(unsigned.len())).expect("mantissa is short");
    let sign = if negative { "-" } else { "" };
    // Positional notation for -6 < point <= 21, exponential outside.
    if (-5..=21).contains(&point) {
        let mut out = String::from(sign);
        if point <= 0 {
            out.push_str("0.");
            for _ in 0..-point {
                out.push('0');
            }
            out.push_str(digits);
        } else if (point as usize) >= digits.len() {
            out.push_str(digits);
            for _ in 0..(point as usize - digits.len()) {
                out.push('0');
            }
        } else {
            out.push_str(&digits[..point as usize]);
            out.push('.');
            out.push_str(&digits[point as usize..]);
        }
        out
    } else {
        let mut out = format!("{sign}{first}", first = &digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let e = point - 1;
        if e >= 0 {
            out.push_str(&format!("e+{e}"));
        } else {
            out.push_str(&format!("e{e}"));
        }
        out
    }
}

/// `StringToNumber`: trimmed text to a number, honoring the `0x`/`0o`/`0b`
/// prefixes and `Infinity`. Unparseable text is NaN, never an error.
#[must_use]
pub fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let (sign, body) = match trimmed.as_bytes()[0] {
        b'-' => (-1.0, &trimmed[1..]),
        b'+' => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    if body == "Infinity" {
        return sign * f64::INFINITY;
    }
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        if sign < 0.0 {
            return f64::NAN;
        }
        return u128::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    if let Some(oct) = body.strip_prefix("0o").or_else(|| body.strip_prefix("0O")) {
        if sign < 0.0 {
            return f64::NAN;
        }
        return u128::from_str_radix(oct, 8).map_or(f64::NAN, |v| v as f64);
    }
    if let Some(bin) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        if sign < 0.0 {
            return f64::NAN;
        }
        return u128::from_str_radix(bin, 2).map_or(f64::NAN, |v| v as f64);
    }
    body.parse::<f64>().map_or(f64::NAN, |v| sign * v)
}

/// `ToInt32`: modulo 2^32 into the signed range.
#[must_use]
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// `ToUint32`: modulo 2^32.
#[must_use]
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let modulo = n.trunc() % 4_294_967_296.0;
    let modulo = if modulo < 0.0 { modulo + 4_294_967_296.0 } else { modulo };
    modulo as u32
}

/// Array length coercion: `ToUint32(v)` must round-trip the number exactly,
/// otherwise the write is a RangeError (signalled by `None`).
#[must_use]
pub fn to_array_length(n: f64) -> Option<u32> {
    let as_u32 = to_uint32(n);
    if f64::from(as_u32) == n { Some(as_u32) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_have_no_fraction() {
        assert_eq!(number_to_string(0.0), "0");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(-42.0), "-42");
        assert_eq!(number_to_string(9_007_199_254_740_991.0), "9007199254740991");
    }

    #[test]
    fn fractions_and_exponents() {
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(0.1), "0.1");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(0.000001), "0.000001");
        assert_eq!(number_to_string(1.5e22), "1.5e+22");
    }

    #[test]
    fn string_parsing() {
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("  42  "), 42.0);
        assert_eq!(string_to_number("-1.5"), -1.5);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert_eq!(string_to_number("0b101"), 5.0);
        assert_eq!(string_to_number("Infinity"), f64::INFINITY);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(string_to_number("12abc").is_nan());
        assert!(string_to_number("-0x10").is_nan());
    }

    #[test]
    fn int32_wrapping() {
        assert_eq!(to_int32(0.0), 0);
        assert_eq!(to_int32(4_294_967_296.0), 0);
        assert_eq!(to_int32(2_147_483_648.0), -2_147_483_648);
        assert_eq!(to_uint32(-1.0), 4_294_967_295);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(f64::INFINITY), 0);
    }

    #[test]
    fn array_length_coercion() {
        assert_eq!(to_array_length(0.0), Some(0));
        assert_eq!(to_array_length(4_294_967_295.0), Some(4_294_967_295));
        assert_eq!(to_array_length(-1.0), None);
        assert_eq!(to_array_length(4_294_967_296.0), None);
        assert_eq!(to_array_length(1.5), None);
    }
}
