//! Kubernetes-style resource quantities.
//!
//! Only the integer forms the agent produces and consumes are supported:
//! an optional sign, decimal digits, and an optional binary (`Ki`..`Ei`)
//! or decimal (`k`..`E`) suffix.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("invalid quantity {0:?}")]
    Invalid(String),

    #[error("quantity {0:?} overflows a 64-bit integer")]
    Overflow(String),
}

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ei", 60),
    ("Pi", 50),
    ("Ti", 40),
    ("Gi", 30),
    ("Mi", 20),
    ("Ki", 10),
];

const DECIMAL_SUFFIXES: [(&str, i64); 6] = [
    ("E", 1_000_000_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("T", 1_000_000_000_000),
    ("G", 1_000_000_000),
    ("M", 1_000_000),
    ("k", 1_000),
];

/// A serialized quantity string such as `10Gi` or `7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(String);

impl Quantity {
    /// Wrap an already-formatted quantity string without validating it.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Format a byte count with the largest binary suffix that divides it.
    pub fn from_bytes(bytes: i64) -> Self {
        if bytes == 0 {
            return Self("0".to_string());
        }
        for (suffix, shift) in BINARY_SUFFIXES {
            let unit = 1i64 << shift;
            if bytes % unit == 0 {
                return Self(format!("{}{suffix}", bytes / unit));
            }
        }
        Self(bytes.to_string())
    }

    /// Format a plain decimal count.
    pub fn from_count(count: i64) -> Self {
        Self(count.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the quantity into its integer value in base units.
    pub fn value(&self) -> Result<i64, QuantityError> {
        parse_quantity(&self.0)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_quantity(s)?;
        Ok(Self(s.trim().to_string()))
    }
}

fn parse_quantity(raw: &str) -> Result<i64, QuantityError> {
    let s = raw.trim();
    let digits_end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(digits_end);

    if number.is_empty() || number == "-" || number == "+" {
        return Err(QuantityError::Invalid(raw.to_string()));
    }
    let base: i64 = number
        .parse()
        .map_err(|_| QuantityError::Overflow(raw.to_string()))?;

    let multiplier = if suffix.is_empty() {
        1
    } else if let Some((_, shift)) = BINARY_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix) {
        1i64 << shift
    } else if let Some((_, m)) = DECIMAL_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix) {
        *m
    } else {
        return Err(QuantityError::Invalid(raw.to_string()));
    };

    base.checked_mul(multiplier)
        .ok_or_else(|| QuantityError::Overflow(raw.to_string()))
}
