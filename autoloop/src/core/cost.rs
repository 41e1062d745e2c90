//! Fixed-point money for budget accounting.
//!
//! Amounts are stored as integer micro-dollars so budget comparisons are exact.
//! Conversion to and from `f64` dollars happens only at the edges (profile,
//! model-service replies, JSON logs).

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const MICROS_PER_DOLLAR: f64 = 1_000_000.0;

/// A non-negative amount of US dollars with micro-dollar precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cost(u64);

impl Cost {
    pub const ZERO: Cost = Cost(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Convert from dollars, rounding to the nearest micro-dollar.
    ///
    /// Negative and non-finite inputs clamp to zero.
    pub fn from_dollars(dollars: f64) -> Self {
        if !dollars.is_finite() || dollars <= 0.0 {
            return Self::ZERO;
        }
        Self((dollars * MICROS_PER_DOLLAR).round() as u64)
    }

    pub const fn micros(self) -> u64 {
        self.0
    }

    pub fn as_dollars(self) -> f64 {
        self.0 as f64 / MICROS_PER_DOLLAR
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn saturating_add(self, other: Cost) -> Cost {
        Cost(self.0.saturating_add(other.0))
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Cost) {
        *self = self.saturating_add(rhs);
    }
}

impl std::iter::Sum for Cost {
    fn sum<I: Iterator<Item = Cost>>(iter: I) -> Cost {
        iter.fold(Cost::ZERO, Cost::saturating_add)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / 1_000_000;
        let frac = self.0 % 1_000_000;
        // Show cents, plus sub-cent digits only when present.
        let mut digits = format!("{frac:06}");
        while digits.len() > 2 && digits.ends_with('0') {
            digits.pop();
        }
        write!(f, "${whole}.{digits}")
    }
}

impl Serialize for Cost {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_dollars())
    }
}

impl<'de> Deserialize<'de> for Cost {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let dollars = f64::deserialize(deserializer)?;
        if !dollars.is_finite() || dollars < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "cost must be a finite non-negative number (got {dollars})"
            )));
        }
        Ok(Cost::from_dollars(dollars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_are_exact() {
        let total = Cost::from_dollars(0.1) + Cost::from_dollars(0.2);
        assert_eq!(total, Cost::from_dollars(0.3));
    }

    #[test]
    fn negative_and_nan_clamp_to_zero() {
        assert_eq!(Cost::from_dollars(-1.0), Cost::ZERO);
        assert_eq!(Cost::from_dollars(f64::NAN), Cost::ZERO);
    }

    #[test]
    fn display_trims_trailing_zeros_to_cents() {
        assert_eq!(Cost::from_dollars(0.6).to_string(), "$0.60");
        assert_eq!(Cost::from_dollars(1.0).to_string(), "$1.00");
        assert_eq!(Cost::from_micros(1_500).to_string(), "$0.0015");
    }

    #[test]
    fn deserialize_rejects_negative() {
        let err = serde_json::from_str::<Cost>("-0.5").unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }
}
