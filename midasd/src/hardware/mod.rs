//! Hardware abstraction layer for the display
//!
//! Re-export the hardware interface from the `midas_hardware` crate and wire
//! up either the real serial stack or the in-memory one used by `--mock`.

pub use midas_hardware::{DeviceLocator, LcdController};

/// Hardware construction utilities
pub(crate) mod connection {
    use super::*;
    use midas_core::{DeviceSettings, Result};
    use midas_hardware::mock::{MockConnector, MockDatabase};
    use midas_hardware::serial_driver::DEFAULT_WRITE_TIMEOUT_MS;
    use midas_hardware::{
        DeviceDatabase, SerialConnector, SerialPortDatabase, TokioSerialConnector,
    };
    use std::sync::Arc;
    use tracing::info;

    /// Port name the simulated display appears on
    pub const MOCK_PORT: &str = "SIM0";

    /// Build the device locator and display controller
    ///
    /// Nothing is opened here; the supervisor resolves and opens the port
    /// on every Starting pass.
    pub fn build_display(
        settings: &DeviceSettings,
        mock: bool,
    ) -> Result<(DeviceLocator, LcdController)> {
        let identity = settings.identity()?;

        let database: Box<dyn DeviceDatabase>;
        let connector: Arc<dyn SerialConnector>;

        if mock {
            info!("Mock mode: simulated display on {}", MOCK_PORT);
            database = Box::new(MockDatabase::with_device(&identity, MOCK_PORT));
            connector = Arc::new(MockConnector::new([MOCK_PORT]));
        } else {
            database = Box::new(SerialPortDatabase);
            connector = Arc::new(TokioSerialConnector::new(
                DEFAULT_WRITE_TIMEOUT_MS,
                settings.debug_uart,
            ));
        }

        let locator = DeviceLocator::new(database, Arc::clone(&connector));
        let lcd = LcdController::new(connector, settings.settle_delay());
        Ok((locator, lcd))
    }

}
