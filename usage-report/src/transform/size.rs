//! Human readable ZFS sizes (`12.5G`, `900K`, `1024`) to byte counts.
//!
//! Suffixes are decimal (K = 10^3 ... P = 10^15) and case-sensitive.

pub const BYTES_PER_TB: f64 = 1e12;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SizeParseError {
    #[error("'{0}' is not a decimal number")]
    InvalidNumber(String),
    #[error("'{0}' has an unrecognized unit suffix (expected one of K, M, G, T, P)")]
    UnknownUnit(String),
    #[error("'{0}' is not a finite, non-negative size")]
    OutOfRange(String),
}

fn unit_multiplier(unit: char) -> Option<f64> {
    match unit {
        'K' => Some(1e3),
        'M' => Some(1e6),
        'G' => Some(1e9),
        'T' => Some(1e12),
        'P' => Some(1e15),
        _ => None,
    }
}

/// Convert a size string to bytes. `None` and blank strings are zero.
pub fn size_to_bytes(space: Option<&str>) -> Result<f64, SizeParseError> {
    let s = match space.map(str::trim) {
        None | Some("") => return Ok(0.0),
        Some(s) => s,
    };

    let unit = s.chars().last().and_then(unit_multiplier);
    let (number, multiplier) = match unit {
        // Unit letters are ASCII, so dropping one byte stays on a char boundary.
        Some(m) => (s[..s.len() - 1].trim_end(), m),
        None => (s, 1.0),
    };

    let quantity: f64 = match number.parse() {
        Ok(q) => q,
        Err(_) if unit.is_none() && s.ends_with(|c: char| c.is_ascii_alphabetic()) => {
            return Err(SizeParseError::UnknownUnit(s.to_string()));
        }
        Err(_) => return Err(SizeParseError::InvalidNumber(s.to_string())),
    };

    let bytes = quantity * multiplier;
    if !bytes.is_finite() || bytes < 0.0 {
        return Err(SizeParseError::OutOfRange(s.to_string()));
    }

    // Folds `-0` into `0`.
    Ok(bytes + 0.0)
}

pub fn bytes_to_tb(bytes: f64) -> f64 {
    bytes / BYTES_PER_TB
}
