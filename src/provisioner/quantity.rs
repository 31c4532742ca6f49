//! Storage quantity parsing
//!
//! Converts Kubernetes quantity strings ("5Gi", "500M", "1.5Ti", "1e9") to a
//! byte count. Fractional byte counts are rounded up.

use crate::error::{Error, Result};

/// Parse a quantity string to bytes
pub fn parse_quantity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty quantity string".into()));
    }

    // Find where the number ends and the suffix begins
    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let (num_str, suffix) = s.split_at(num_end);
    let (mantissa, scale) = parse_decimal(num_str)?;
    let (numerator, denominator) = multiplier(suffix)?;

    let overflow = || Error::CapacityParse(format!("quantity out of range: {}", s));

    let dividend = mantissa.checked_mul(numerator).ok_or_else(overflow)?;
    let divisor = 10u128
        .checked_pow(scale)
        .and_then(|p| p.checked_mul(denominator))
        .ok_or_else(overflow)?;

    let bytes = dividend.div_ceil(divisor);
    u64::try_from(bytes).map_err(|_| overflow())
}

/// Split "12.50" into (1250, 2)
fn parse_decimal(num_str: &str) -> Result<(u128, u32)> {
    let invalid = || Error::CapacityParse(format!("invalid number: {:?}", num_str));

    let (int_part, frac_part) = match num_str.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (num_str, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if frac_part.contains('.') {
        return Err(invalid());
    }

    let digits = format!("{}{}", int_part, frac_part);
    let mantissa = digits.parse::<u128>().map_err(|_| invalid())?;
    Ok((mantissa, frac_part.len() as u32))
}

/// Multiplier of a suffix as a fraction
fn multiplier(suffix: &str) -> Result<(u128, u128)> {
    let m = match suffix {
        "" => (1, 1),
        // Binary SI suffixes
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        // Decimal SI suffixes
        "m" => (1, 1000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        // Decimal exponent, e.g. "1e9"
        _ => return exponent(suffix),
    };
    Ok(m)
}

fn exponent(suffix: &str) -> Result<(u128, u128)> {
    let unknown = || Error::CapacityParse(format!("unknown suffix: {}", suffix));

    let digits = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))
        .ok_or_else(unknown)?;
    let exp: i32 = digits.parse().map_err(|_| unknown())?;

    let power = 10u128.checked_pow(exp.unsigned_abs()).ok_or_else(unknown)?;
    if exp >= 0 {
        Ok((power, 1))
    } else {
        Ok((1, power))
    }
}
