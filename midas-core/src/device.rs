//! Device definitions
//!
//! Trait-based description of the character LCD hardware. Each supported
//! display implements [`LcdDevice`] with its USB identifiers, link speed and
//! controller timing.
//!
//! Note: Actual hardware I/O is in the `midas-hardware` crate. This module only
//! contains device specifications.

use crate::DeviceIdentity;
use std::time::Duration;

/// Character LCD device description
///
/// # Example
///
/// ```
/// use midas_core::device::{LcdDevice, MidasLcd2x16};
///
/// const COLUMNS: usize = MidasLcd2x16::COLUMNS;
/// const NAME: &str = MidasLcd2x16::NAME;
/// ```
pub trait LcdDevice: Send + Sync + 'static {
    /// Human-readable device name
    const NAME: &'static str;

    /// USB Vendor ID for device detection
    const USB_VID: u16;

    /// USB Product ID for device detection
    const USB_PID: u16;

    /// Serial communication baud rate
    const BAUD_RATE: u32;

    /// Quiescent period the controller needs after each command
    const SETTLE_DELAY_MS: u64;

    /// Characters per line
    const COLUMNS: usize;

    /// Number of display lines
    const ROWS: usize;

    /// USB identity of this device
    fn identity() -> DeviceIdentity {
        DeviceIdentity::from_ids(Self::USB_VID, Self::USB_PID)
    }

    /// Settle delay as a [`Duration`]
    fn settle_delay() -> Duration {
        Duration::from_millis(Self::SETTLE_DELAY_MS)
    }
}

/// Midas 2×16 serial character LCD (MCCOG21605 family with USB-serial bridge)
///
/// - USB VID: 0x04D8 (Microchip)
/// - USB PID: 0xF9C3
/// - 9600 baud
/// - 100 ms settle delay between commands
pub struct MidasLcd2x16;

impl LcdDevice for MidasLcd2x16 {
    const NAME: &'static str = "Midas 2x16 LCD";
    const USB_VID: u16 = 0x04D8;
    const USB_PID: u16 = 0xF9C3;
    const BAUD_RATE: u32 = 9600;
    const SETTLE_DELAY_MS: u64 = 100;
    const COLUMNS: usize = 16;
    const ROWS: usize = 2;
}

/// Default device used throughout the codebase
pub type DefaultDevice = MidasLcd2x16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midas_lcd_config() {
        assert_eq!(MidasLcd2x16::NAME, "Midas 2x16 LCD");
        assert_eq!(MidasLcd2x16::USB_VID, 0x04D8);
        assert_eq!(MidasLcd2x16::USB_PID, 0xF9C3);
        assert_eq!(MidasLcd2x16::BAUD_RATE, 9600);
        assert_eq!(MidasLcd2x16::COLUMNS, 16);
        assert_eq!(MidasLcd2x16::ROWS, 2);
    }

    #[test]
    fn test_identity_and_settle_delay() {
        let id = DefaultDevice::identity();
        assert_eq!(id.vendor_id(), "04D8");
        assert_eq!(id.product_id(), "F9C3");
        assert_eq!(DefaultDevice::settle_delay(), Duration::from_millis(100));
    }
}
