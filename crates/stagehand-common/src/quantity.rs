//! Resource quantities as they appear in isolator declarations.
//!
//! A quantity is a decimal number with an optional SI (`k`, `M`, `G`, ...)
//! or binary (`Ki`, `Mi`, `Gi`, ...) suffix, or `m` for thousandths.
//! Internally it is kept as a count of milli-units.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StagehandError};

/// Largest whole value whose milli-value still fits in a signed 64-bit integer.
pub const MAX_MILLI_VALUE: i128 = (i64::MAX / 1000) as i128;

/// A parsed resource quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuantityRepr", into = "String")]
pub struct Quantity {
    milli: i128,
    repr: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuantityRepr {
    Text(String),
    Number(i64),
}

impl TryFrom<QuantityRepr> for Quantity {
    type Error = StagehandError;

    fn try_from(repr: QuantityRepr) -> Result<Self> {
        match repr {
            QuantityRepr::Text(s) => s.parse(),
            QuantityRepr::Number(n) => Ok(Self {
                milli: i128::from(n) * 1000,
                repr: n.to_string(),
            }),
        }
    }
}

impl From<Quantity> for String {
    fn from(q: Quantity) -> Self {
        q.repr
    }
}

impl Quantity {
    /// Builds a quantity from a milli-unit count (`1000` is one whole unit).
    #[must_use]
    pub fn from_milli(milli: i64) -> Self {
        let repr = if milli % 1000 == 0 {
            (milli / 1000).to_string()
        } else {
            format!("{milli}m")
        };
        Self {
            milli: i128::from(milli),
            repr,
        }
    }

    /// Builds a quantity of whole units.
    #[must_use]
    pub fn from_value(value: i64) -> Self {
        Self {
            milli: i128::from(value) * 1000,
            repr: value.to_string(),
        }
    }

    /// Returns the quantity in milli-units.
    #[must_use]
    pub const fn milli_value(&self) -> i128 {
        self.milli
    }

    /// Returns the quantity in whole units, rounded up.
    #[must_use]
    pub const fn value(&self) -> i128 {
        ceil_div(self.milli, 1000)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl FromStr for Quantity {
    type Err = StagehandError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || StagehandError::config(format!("invalid quantity: {s:?}"));
        let trimmed = s.trim();

        let (negative, unsigned) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let split = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(split);
        if number.is_empty() || number == "." {
            return Err(invalid());
        }

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if frac.contains('.') {
            return Err(invalid());
        }

        let (mul_num, mul_den) = suffix_multiplier(suffix).ok_or_else(invalid)?;

        let digits = format!("{whole}{frac}");
        let mantissa: i128 = digits.parse().map_err(|_| invalid())?;
        let frac_scale = 10_i128
            .checked_pow(u32::try_from(frac.len()).map_err(|_| invalid())?)
            .ok_or_else(invalid)?;

        let numerator = mantissa
            .checked_mul(mul_num)
            .and_then(|n| n.checked_mul(1000))
            .ok_or_else(invalid)?;
        let denominator = frac_scale.checked_mul(mul_den).ok_or_else(invalid)?;

        let magnitude = ceil_div(numerator, denominator);
        let milli = if negative { -magnitude } else { magnitude };

        Ok(Self {
            milli,
            repr: trimmed.to_string(),
        })
    }
}

/// Returns `(numerator, denominator)` of the multiplier a suffix stands for.
fn suffix_multiplier(suffix: &str) -> Option<(i128, i128)> {
    let m = match suffix {
        "" => (1, 1),
        "m" => (1, 1000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => return None,
    };
    Some(m)
}

const fn ceil_div(a: i128, b: i128) -> i128 {
    let q = a.div_euclid(b);
    if a.rem_euclid(b) == 0 { q } else { q + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_millicores() {
        let q: Quantity = "500m".parse().unwrap();
        assert_eq!(q.milli_value(), 500);
        assert_eq!(q.value(), 1);
    }

    #[test]
    fn parses_binary_suffix() {
        let q: Quantity = "100Mi".parse().unwrap();
        assert_eq!(q.value(), 104_857_600);
    }

    #[test]
    fn parses_decimal_fraction() {
        let q: Quantity = "1.5".parse().unwrap();
        assert_eq!(q.milli_value(), 1500);
        assert_eq!(q.value(), 2);
    }

    #[test]
    fn rejects_unknown_suffix() {
        assert!("12Q".parse::<Quantity>().is_err());
        assert!("".parse::<Quantity>().is_err());
        assert!("1.2.3".parse::<Quantity>().is_err());
    }

    #[test]
    fn deserializes_from_string_or_number() {
        let q: Quantity = serde_json::from_str("\"2G\"").unwrap();
        assert_eq!(q.value(), 2_000_000_000);
        let q: Quantity = serde_json::from_str("104857600").unwrap();
        assert_eq!(q.value(), 104_857_600);
        assert_eq!(q.to_string(), "104857600");
    }

    #[test]
    fn from_milli_keeps_readable_repr() {
        assert_eq!(Quantity::from_milli(1000).to_string(), "1");
        assert_eq!(Quantity::from_milli(250).to_string(), "250m");
    }
}
