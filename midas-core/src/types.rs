//! Core types and data structures for Midas LCD

use crate::{MidasError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// USB vendor/product identity of the target device
///
/// Both identifiers are stored as upper-case 4-digit hex strings, which is
/// how they appear inside device identifier strings (`VID_04D8&PID_F9C3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDeviceIdentity")]
pub struct DeviceIdentity {
    vendor_id: String,
    product_id: String,
}

/// Unchecked form of [`DeviceIdentity`] as it appears in serialized data
#[derive(Deserialize)]
struct RawDeviceIdentity {
    vendor_id: String,
    product_id: String,
}

impl TryFrom<RawDeviceIdentity> for DeviceIdentity {
    type Error = MidasError;

    fn try_from(raw: RawDeviceIdentity) -> Result<Self> {
        Self::new(&raw.vendor_id, &raw.product_id)
    }
}

impl DeviceIdentity {
    /// Create an identity from two 16-bit hex strings (e.g. "04D8", "F9C3")
    pub fn new(vendor_id: &str, product_id: &str) -> Result<Self> {
        Ok(Self {
            vendor_id: normalize_hex_id("vendor", vendor_id)?,
            product_id: normalize_hex_id("product", product_id)?,
        })
    }

    /// Create an identity from numeric USB identifiers
    pub fn from_ids(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id: format!("{:04X}", vendor_id),
            product_id: format!("{:04X}", product_id),
        }
    }

    pub fn vendor_id(&self) -> &str {
        &self.vendor_id
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    /// Error reported when no live port matches this identity
    pub fn not_found(&self) -> MidasError {
        MidasError::DeviceNotFound {
            vendor_id: self.vendor_id.clone(),
            product_id: self.product_id.clone(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VID:{} PID:{}", self.vendor_id, self.product_id)
    }
}

fn normalize_hex_id(kind: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(MidasError::InvalidInput(format!(
            "Invalid USB {} ID '{}': expected up to 4 hex digits",
            kind, value
        )));
    }

    Ok(format!("{:0>4}", digits.to_ascii_uppercase()))
}

/// Serial port resolved for one connection attempt
///
/// Never cached across failures: the port can change on replug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialEndpoint {
    pub port_name: String,
    pub baud_rate: u32,
}

impl SerialEndpoint {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
        }
    }
}

impl fmt::Display for SerialEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} baud", self.port_name, self.baud_rate)
    }
}

/// A single temperature reading from the sensor provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Sensor label (e.g. "CPU Package")
    pub label: String,
    /// Current value in degrees Celsius
    pub current: f32,
    /// Maximum value observed by the provider
    pub max: f32,
}

impl SensorReading {
    pub fn new(label: impl Into<String>, current: f32, max: f32) -> Self {
        Self {
            label: label.into(),
            current,
            max,
        }
    }
}
