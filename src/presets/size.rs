//! Human-readable size strings.
//!
//! Catalog entries declare sizes such as `"4.8GB"`, `"300MB"` or the annotated
//! form `"1.5GB (9536MB)"`. The grammar is:
//!
//! ```text
//! size     := quantity [ "(" quantity ")" ]
//! quantity := number unit
//! unit     := "B" | "KB" | "MB" | "GB"      (case-insensitive, binary multiples)
//! ```
//!
//! The primary quantity is authoritative; the parenthetical is kept only as an
//! annotation. `B` quantities must be whole numbers.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    B,
    KB,
    MB,
    GB,
}

impl SizeUnit {
    #[must_use]
    pub const fn multiplier(self) -> u64 {
        match self {
            Self::B => 1,
            Self::KB => KB,
            Self::MB => MB,
            Self::GB => GB,
        }
    }
}

impl FromStr for SizeUnit {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "B" => Ok(Self::B),
            "KB" => Ok(Self::KB),
            "MB" => Ok(Self::MB),
            "GB" => Ok(Self::GB),
            _ => Err(SizeParseError::UnknownUnit(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeParseError {
    #[error("empty size string")]
    Empty,
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),
    #[error("malformed size '{0}'")]
    Malformed(String),
}

/// A single `<number><unit>` quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeQuantity {
    pub value: f64,
    pub unit: SizeUnit,
}

impl SizeQuantity {
    /// Exact byte count, rounded to the nearest byte
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn bytes(&self) -> u64 {
        (self.value * self.unit.multiplier() as f64).round() as u64
    }
}

impl FromStr for SizeQuantity {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SizeParseError::Empty);
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, unit) = (&s[..split], s[split..].trim());

        if number.is_empty() || !number.chars().any(|c| c.is_ascii_digit()) {
            return Err(SizeParseError::InvalidNumber(number.to_string()));
        }
        let unit: SizeUnit = unit.parse()?;
        if unit == SizeUnit::B && number.contains('.') {
            return Err(SizeParseError::InvalidNumber(number.to_string()));
        }

        let value: f64 = number
            .parse()
            .map_err(|_| SizeParseError::InvalidNumber(number.to_string()))?;

        Ok(Self { value, unit })
    }
}

/// A parsed size declaration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeSpec {
    pub primary: SizeQuantity,
    pub alternate: Option<SizeQuantity>,
}

impl SizeSpec {
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.primary.bytes()
    }
}

impl FromStr for SizeSpec {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(open) = s.find('(') else {
            return Ok(Self {
                primary: s.parse()?,
                alternate: None,
            });
        };

        let inner = s[open + 1..]
            .trim_end()
            .strip_suffix(')')
            .ok_or_else(|| SizeParseError::Malformed(s.to_string()))?;
        if inner.contains('(') || inner.contains(')') {
            return Err(SizeParseError::Malformed(s.to_string()));
        }

        Ok(Self {
            primary: s[..open].parse()?,
            alternate: Some(inner.parse()?),
        })
    }
}

/// Parse a declared size into bytes, `None` when it falls outside the grammar
#[must_use]
pub fn parse_size_string(s: &str) -> Option<u64> {
    s.parse::<SizeSpec>().ok().map(|spec| spec.bytes())
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::B => "B",
            Self::KB => "KB",
            Self::MB => "MB",
            Self::GB => "GB",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gigabytes_rounds_to_nearest_byte() {
        // 4.8 * 2^30 = 5153960755.2
        assert_eq!(parse_size_string("4.8GB"), Some(5_153_960_755));
        assert_eq!(parse_size_string("2GB"), Some(2 * GB));
    }

    #[test]
    fn test_parse_basic_units() {
        assert_eq!(parse_size_string("300MB"), Some(300 * MB));
        assert_eq!(parse_size_string("100MB"), Some(104_857_600));
        assert_eq!(parse_size_string("512KB"), Some(512 * KB));
        assert_eq!(parse_size_string("1024B"), Some(1024));
        assert_eq!(parse_size_string("0B"), Some(0));
    }

    #[test]
    fn test_parse_is_lenient_on_case_and_spacing() {
        assert_eq!(parse_size_string(" 1.5 gb "), Some(1_610_612_736));
        assert_eq!(parse_size_string("20 Mb"), Some(20 * MB));
    }

    #[test]
    fn test_parse_annotated_form_uses_primary_value() {
        // The parenthetical disagrees with the primary value on purpose.
        assert_eq!(parse_size_string("1.5GB (9536MB)"), Some(1_610_612_736));

        let spec: SizeSpec = "1.5GB (9536MB)".parse().unwrap();
        let alternate = spec.alternate.unwrap();
        assert_eq!(alternate.unit, SizeUnit::MB);
        assert!((alternate.value - 9536.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_rejects_out_of_grammar() {
        assert_eq!(parse_size_string(""), None);
        assert_eq!(parse_size_string("unknown"), None);
        assert_eq!(parse_size_string("GB"), None);
        assert_eq!(parse_size_string("12TB"), None);
        assert_eq!(parse_size_string("1.5B"), None);
        assert_eq!(parse_size_string("1.2.3GB"), None);
        assert_eq!(parse_size_string("1GB (2GB"), None);
        assert_eq!(parse_size_string("1GB (2GB) extra"), None);
        assert_eq!(parse_size_string("-5MB"), None);
    }

    #[test]
    fn test_parse_error_kinds() {
        assert_eq!("".parse::<SizeQuantity>(), Err(SizeParseError::Empty));
        assert_eq!(
            "5XB".parse::<SizeQuantity>(),
            Err(SizeParseError::UnknownUnit("XB".to_string()))
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_572_864), "1.50 MB");
        assert_eq!(format_bytes(1_610_612_736), "1.50 GB");
    }
}
