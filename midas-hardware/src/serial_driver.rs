//! Serial driver for low-level hardware communication
//!
//! Provides async serial output to the LCD controller. The display never
//! answers, so the transport is write-only.

use async_trait::async_trait;
use midas_core::{MidasError, Result, SerialEndpoint};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error};

/// Default timeout for a single write, in milliseconds
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;

/// Trait for an open serial connection
///
/// This trait enables testing of `LcdController` without real hardware
/// by allowing mock implementations.
#[async_trait]
pub trait SerialTransport: Send {
    /// Write all bytes and flush them to the device
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Release the connection
    async fn close(&mut self) -> Result<()>;

    /// Get the port path of this connection
    fn port_path(&self) -> Option<&str>;
}

/// Opens serial connections and lists the ports currently present
pub trait SerialConnector: Send + Sync {
    /// Open a connection to `endpoint`
    fn open(&self, endpoint: &SerialEndpoint) -> Result<Box<dyn SerialTransport>>;

    /// Names of the serial ports currently available on the system
    fn available_ports(&self) -> Result<Vec<String>>;
}

/// Serial driver for hardware communication
pub struct SerialDriver {
    port: SerialStream,
    port_path: String,
    timeout_duration: Duration,
    debug_uart: bool,
}

impl SerialDriver {
    /// Create a new serial driver
    ///
    /// # Arguments
    /// * `endpoint` - Port name and baud rate (e.g., "/dev/ttyACM0" at 9600)
    /// * `timeout_ms` - Timeout in milliseconds for write operations
    /// * `debug_uart` - Enable UART debug logging
    pub fn new(endpoint: &SerialEndpoint, timeout_ms: u64, debug_uart: bool) -> Result<Self> {
        debug!("Opening serial port: {}", endpoint);

        let port = tokio_serial::new(&endpoint.port_name, endpoint.baud_rate)
            .timeout(Duration::from_millis(timeout_ms))
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                error!("Failed to open serial port {}: {}", endpoint.port_name, e);
                MidasError::Connection(format!(
                    "Failed to open serial port {}: {}",
                    endpoint.port_name, e
                ))
            })?;

        debug!("Serial port opened successfully");

        if debug_uart {
            debug!("UART debug logging enabled");
        }

        Ok(Self {
            port,
            port_path: endpoint.port_name.clone(),
            timeout_duration: Duration::from_millis(timeout_ms),
            debug_uart,
        })
    }
}

#[async_trait]
impl SerialTransport for SerialDriver {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        if self.debug_uart {
            debug!("TX: {:02X?}", bytes);
        }

        timeout(self.timeout_duration, self.port.write_all(bytes))
            .await
            .map_err(|_| {
                error!("Write timeout");
                MidasError::Connection("Write operation timed out".to_string())
            })?
            .map_err(|e| {
                error!("Write failed: {}", e);
                MidasError::Connection(format!("Write failed: {}", e))
            })?;

        // Flush to ensure data is sent
        timeout(self.timeout_duration, self.port.flush())
            .await
            .map_err(|_| MidasError::Connection("Flush operation timed out".to_string()))?
            .map_err(|e| MidasError::Connection(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        debug!("Closing serial port: {}", self.port_path);
        self.port
            .shutdown()
            .await
            .map_err(|e| MidasError::Connection(format!("Close failed: {}", e)))
    }

    fn port_path(&self) -> Option<&str> {
        Some(&self.port_path)
    }
}

/// [`SerialConnector`] backed by `tokio-serial`
#[derive(Debug, Clone)]
pub struct TokioSerialConnector {
    timeout_ms: u64,
    debug_uart: bool,
}

impl TokioSerialConnector {
    pub fn new(timeout_ms: u64, debug_uart: bool) -> Self {
        Self {
            timeout_ms,
            debug_uart,
        }
    }
}

impl Default for TokioSerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_TIMEOUT_MS, false)
    }
}

impl SerialConnector for TokioSerialConnector {
    fn open(&self, endpoint: &SerialEndpoint) -> Result<Box<dyn SerialTransport>> {
        let driver = SerialDriver::new(endpoint, self.timeout_ms, self.debug_uart)?;
        Ok(Box::new(driver))
    }

    fn available_ports(&self) -> Result<Vec<String>> {
        let ports = tokio_serial::available_ports().map_err(|e| {
            error!("Failed to enumerate serial ports: {}", e);
            MidasError::Enumeration(format!("Failed to enumerate ports: {}", e))
        })?;

        Ok(ports.into_iter().map(|port| port.port_name).collect())
    }
}
