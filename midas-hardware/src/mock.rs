//! Mock implementations for running without hardware.
//!
//! Used by the tests and by the daemon's `--mock` mode. Handles are cheap to
//! clone and share their state, so a test can keep one copy for assertions
//! while the code under test owns another.
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockConnector`] | [`SerialConnector`] | Records frames, injects open/write failures |
//! | [`MockDatabase`] | [`DeviceDatabase`] | Fixed device tree, counts enumerations |

use crate::device_locator::{DeviceDatabase, DeviceNode, PORT_NAME_ATTRIBUTE};
use crate::serial_driver::{SerialConnector, SerialTransport};
use async_trait::async_trait;
use midas_core::{DeviceIdentity, MidasError, Result, SerialEndpoint};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Number of frames kept in memory
const FRAME_HISTORY: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct ConnectorState {
    ports: Vec<String>,
    frames: VecDeque<Vec<u8>>,
    opened: Vec<SerialEndpoint>,
    closes: usize,
    failing_opens: usize,
    write_failure_in: Option<usize>,
}

/// In-memory serial connector
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    /// Create a connector reporting `ports` as available
    pub fn new<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let connector = Self::default();
        connector.set_ports(ports);
        connector
    }

    /// Replace the list of available ports (simulates plug/unplug)
    pub fn set_ports<I, S>(&self, ports: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state).ports = ports.into_iter().map(Into::into).collect();
    }

    /// Make the next `count` open attempts fail
    pub fn fail_next_opens(&self, count: usize) {
        lock(&self.state).failing_opens = count;
    }

    /// Let `writes` more writes succeed, then fail the following one
    pub fn fail_write_after(&self, writes: usize) {
        lock(&self.state).write_failure_in = Some(writes);
    }

    /// All frames written so far, oldest first
    pub fn frames(&self) -> Vec<Vec<u8>> {
        lock(&self.state).frames.iter().cloned().collect()
    }

    /// Drain the recorded frames
    pub fn take_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.state).frames.drain(..).collect()
    }

    /// Endpoints successfully opened, in order
    pub fn opened(&self) -> Vec<SerialEndpoint> {
        lock(&self.state).opened.clone()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }
}

impl SerialConnector for MockConnector {
    fn open(&self, endpoint: &SerialEndpoint) -> Result<Box<dyn SerialTransport>> {
        let mut state = lock(&self.state);

        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(MidasError::Connection(format!(
                "Failed to open serial port {}: Access denied",
                endpoint.port_name
            )));
        }

        if !state.ports.contains(&endpoint.port_name) {
            return Err(MidasError::Connection(format!(
                "Failed to open serial port {}: No such device",
                endpoint.port_name
            )));
        }

        debug!("Mock port opened: {}", endpoint);
        state.opened.push(endpoint.clone());

        Ok(Box::new(MockTransport {
            state: Arc::clone(&self.state),
            port: endpoint.port_name.clone(),
        }))
    }

    fn available_ports(&self) -> Result<Vec<String>> {
        Ok(lock(&self.state).ports.clone())
    }
}

/// Connection handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<ConnectorState>>,
    port: String,
}

#[async_trait]
impl SerialTransport for MockTransport {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);

        match state.write_failure_in {
            Some(0) => {
                state.write_failure_in = None;
                return Err(MidasError::Connection(
                    "Write failed: Broken pipe".to_string(),
                ));
            }
            Some(remaining) => state.write_failure_in = Some(remaining - 1),
            None => {}
        }

        debug!("{} <- {:?}", self.port, String::from_utf8_lossy(bytes));

        if state.frames.len() == FRAME_HISTORY {
            state.frames.pop_front();
        }
        state.frames.push_back(bytes.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        lock(&self.state).closes += 1;
        Ok(())
    }

    fn port_path(&self) -> Option<&str> {
        Some(&self.port)
    }
}

/// In-memory device database
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    tree: Arc<Mutex<Vec<DeviceNode>>>,
    failing: Arc<AtomicBool>,
    enumerations: Arc<AtomicUsize>,
}

impl MockDatabase {
    pub fn new(tree: Vec<DeviceNode>) -> Self {
        Self {
            tree: Arc::new(Mutex::new(tree)),
            ..Default::default()
        }
    }

    /// Database containing a single USB device attached at `port`
    pub fn with_device(identity: &DeviceIdentity, port: &str) -> Self {
        Self::new(vec![device_node(identity, port)])
    }

    pub fn set_tree(&self, tree: Vec<DeviceNode>) {
        *lock(&self.tree) = tree;
    }

    /// Make enumeration fail as if the database were inaccessible
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of times the tree was enumerated
    pub fn enumeration_count(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl DeviceDatabase for MockDatabase {
    fn enumerate_device_tree(&self) -> Result<Vec<DeviceNode>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(MidasError::Enumeration(
                "Device database not accessible".to_string(),
            ));
        }

        Ok(lock(&self.tree).clone())
    }
}

/// Device tree entry for a USB device attached at `port`
pub fn device_node(identity: &DeviceIdentity, port: &str) -> DeviceNode {
    DeviceNode::new(format!(
        "USB\\VID_{}&PID_{}",
        identity.vendor_id(),
        identity.product_id()
    ))
    .with_child(DeviceNode::new("0001").with_attribute(PORT_NAME_ATTRIBUTE, port))
}
