//! `VID:PID` device filters
//!
//! Patterns look like `0x046d:0xc31c` or `0x046d:*`; `*` matches any value.
//! An empty filter list allows every device.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error(
        "Invalid filter format '{0}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')"
    )]
    Format(String),

    #[error("Invalid {name} '{id}', must start with '0x' (e.g., '0x1234')")]
    MissingPrefix { name: &'static str, id: String },

    #[error("Invalid {name} '{id}', hex part must be 1-4 digits")]
    Length { name: &'static str, id: String },

    #[error("Invalid {name} '{id}', not a valid hex number")]
    NotHex { name: &'static str, id: String },
}

/// Parse a `0x`-prefixed 16-bit hex ID
pub fn parse_hex_id(id: &str, name: &'static str) -> Result<u16, FilterError> {
    let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
        return Err(FilterError::MissingPrefix {
            name,
            id: id.to_string(),
        });
    };

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(FilterError::Length {
            name,
            id: id.to_string(),
        });
    }

    u16::from_str_radix(hex_part, 16).map_err(|_| FilterError::NotHex {
        name,
        id: id.to_string(),
    })
}

/// One `VID:PID` pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.is_none_or(|v| v == vendor_id)
            && self.product_id.is_none_or(|p| p == product_id)
    }

    /// Parse a list of patterns, failing on the first bad one
    pub fn parse_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<DeviceFilter>, FilterError> {
        patterns.iter().map(|p| p.as_ref().parse()).collect()
    }

    /// Whether a device passes a filter list. An empty list allows everything.
    pub fn allows(filters: &[DeviceFilter], vendor_id: u16, product_id: u16) -> bool {
        filters.is_empty() || filters.iter().any(|f| f.matches(vendor_id, product_id))
    }
}

impl FromStr for DeviceFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((vid, pid)) = s.split_once(':') else {
            return Err(FilterError::Format(s.to_string()));
        };
        if pid.contains(':') {
            return Err(FilterError::Format(s.to_string()));
        }

        let vendor_id = match vid {
            "*" => None,
            _ => Some(parse_hex_id(vid, "VID")?),
        };
        let product_id = match pid {
            "*" => None,
            _ => Some(parse_hex_id(pid, "PID")?),
        };

        Ok(Self {
            vendor_id,
            product_id,
        })
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor_id {
            Some(v) => write!(f, "0x{:04x}", v)?,
            None => write!(f, "*")?,
        }
        match self.product_id {
            Some(p) => write!(f, ":0x{:04x}", p),
            None => write!(f, ":*"),
        }
    }
}
