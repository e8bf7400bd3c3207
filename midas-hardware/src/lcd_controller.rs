//! LCD Controller - High-level interface for the character display
//!
//! Implements the display command set over a serial connection. Every frame
//! goes through a single write primitive that waits for the controller's
//! settle delay before returning, so commands are never pipelined.

use crate::serial_driver::{SerialConnector, SerialTransport};
use midas_core::{MidasError, Result, SerialEndpoint, LINE_WIDTH};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Escape byte starting every command
pub const ESCAPE: u8 = 0x1B;

/// Subcode following the escape byte
pub const SUBCODE: u8 = 0x80;

/// Text written once the display is initialized
pub const GREETING: &str = "Hello!";

/// Text left on the display after a clean shutdown
pub const FAREWELL: &str = "Goodbye!";

/// Commands supported by the display controller
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Clear the display buffer (0x01)
    Clear = 0x01,
    /// Cursor to line 1, column 1 (0x02)
    Home = 0x02,
    /// Cursor to line 2, column 1 (0xC0)
    NextLine = 0xC0,
    /// Configure the controller for 2×16 mode (0x38)
    Enable2x16 = 0x38,
}

impl Command {
    /// Wire encoding: escape, subcode, opcode
    pub fn bytes(self) -> [u8; 3] {
        [ESCAPE, SUBCODE, self as u8]
    }
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    Closed,
    /// Port open, initialization sequence in progress
    Opening,
    /// Initialized and accepting text
    Ready,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Ready => "ready",
        }
    }
}

/// Character LCD driver
///
/// Owns the physical connection. The controller object lives as long as its
/// owner; only the underlying connection is replaced on reconnect.
pub struct LcdController {
    connector: Arc<dyn SerialConnector>,
    transport: Option<Box<dyn SerialTransport>>,
    state: ConnectionState,
    settle_delay: Duration,
}

impl LcdController {
    /// Create a closed controller
    pub fn new(connector: Arc<dyn SerialConnector>, settle_delay: Duration) -> Self {
        Self {
            connector,
            transport: None,
            state: ConnectionState::Closed,
            settle_delay,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Port of the current connection, if any
    pub fn port_name(&self) -> Option<&str> {
        self.transport.as_ref().and_then(|t| t.port_path())
    }

    /// Open the connection and initialize the display
    ///
    /// Sends CLEAR, HOME, ENABLE_2X16 and writes the greeting. Any previous
    /// connection is dropped first.
    pub async fn open(&mut self, endpoint: &SerialEndpoint) -> Result<()> {
        if self.transport.is_some() {
            self.disconnect().await;
        }

        info!("Opening display at {}", endpoint);
        self.state = ConnectionState::Opening;

        let transport = match self.connector.open(endpoint) {
            Ok(transport) => transport,
            Err(e) => {
                self.state = ConnectionState::Closed;
                return Err(as_connection_error(e));
            }
        };
        self.transport = Some(transport);

        if let Err(e) = self.initialize().await {
            self.disconnect().await;
            return Err(e);
        }

        self.state = ConnectionState::Ready;
        info!("Display ready on {}", endpoint.port_name);
        Ok(())
    }

    async fn initialize(&mut self) -> Result<()> {
        self.clear().await?;
        self.send_command(Command::Enable2x16).await?;
        self.write_text(GREETING).await
    }

    /// Write raw bytes, then wait for the settle delay
    ///
    /// A failed write closes the connection.
    pub async fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| MidasError::Connection("Display is not connected".to_string()))?;

        let result = transport.write_all(bytes).await;
        if let Err(e) = result {
            warn!("Display write failed, closing connection: {}", e);
            self.disconnect().await;
            return Err(as_connection_error(e));
        }

        sleep(self.settle_delay).await;
        Ok(())
    }

    async fn send_command(&mut self, command: Command) -> Result<()> {
        debug!("Sending command: {:?}", command);
        self.write_command(&command.bytes()).await
    }

    /// Write text starting at line 1
    ///
    /// The first 16 characters go to line 1, the remainder to line 2. A
    /// remainder longer than one line is truncated.
    pub async fn write_text(&mut self, text: &str) -> Result<()> {
        self.send_command(Command::Home).await?;

        let (line1, line2) = split_lines(text);

        if !line1.is_empty() {
            self.write_command(&line1).await?;
        }

        if let Some(mut line2) = line2 {
            if line2.len() > LINE_WIDTH {
                warn!(
                    "Text overflows the second line by {} characters, truncating",
                    line2.len() - LINE_WIDTH
                );
                line2.truncate(LINE_WIDTH);
            }
            self.send_command(Command::NextLine).await?;
            self.write_command(&line2).await?;
        }

        Ok(())
    }

    /// Clear the display and home the cursor
    pub async fn clear(&mut self) -> Result<()> {
        self.send_command(Command::Clear).await?;
        self.send_command(Command::Home).await
    }

    /// Clear the display, write the farewell and release the connection
    ///
    /// Best-effort: failures are logged, never returned.
    pub async fn close(&mut self) {
        if self.transport.is_none() {
            self.state = ConnectionState::Closed;
            return;
        }

        let farewell = async {
            self.clear().await?;
            self.write_text(FAREWELL).await
        };
        if let Err(e) = farewell.await {
            warn!("Failed to write farewell to display: {}", e);
        }

        self.disconnect().await;
        info!("Display closed");
    }

    /// Release the connection without touching the display
    pub async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Failed to close serial port: {}", e);
            }
        }
        self.state = ConnectionState::Closed;
    }
}

/// Split text into ASCII bytes for line 1 and the optional remainder
fn split_lines(text: &str) -> (Vec<u8>, Option<Vec<u8>>) {
    let mut bytes: Vec<u8> = text
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect();

    if bytes.len() > LINE_WIDTH {
        let rest = bytes.split_off(LINE_WIDTH);
        (bytes, Some(rest))
    } else {
        (bytes, None)
    }
}

fn as_connection_error(err: MidasError) -> MidasError {
    match err {
        MidasError::Connection(_) => err,
        other => MidasError::Connection(other.to_string()),
    }
}
