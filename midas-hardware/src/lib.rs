//! midas-hardware
//!
//! Hardware abstraction crate that contains device discovery, the low-level
//! serial driver and the character LCD protocol. Used by the daemon to drive
//! the display.
//!
//! Public API:
//! - `lcd_controller::LcdController`: LCD command set over a serial link
//! - `serial_driver::SerialDriver`: low-level serial I/O driver
//! - `device_locator::DeviceLocator`: finds the serial port by VID/PID
//! - `mock`: in-memory hardware for tests and `--mock` runs

pub mod device_locator;
pub mod lcd_controller;
pub mod mock;
pub mod serial_driver;

pub use device_locator::{DeviceDatabase, DeviceLocator, DeviceNode, SerialPortDatabase};
pub use lcd_controller::{Command, ConnectionState, LcdController};
pub use serial_driver::{SerialConnector, SerialDriver, SerialTransport, TokioSerialConnector};
