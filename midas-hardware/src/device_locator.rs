//! Device discovery by USB vendor/product identifier
//!
//! The platform device database is modelled as a tree of named nodes with
//! string attributes. A node whose name contains `VID_<vid>` followed by
//! `PID_<pid>` identifies the device; the serial port is the `PortName`
//! attribute somewhere below it. Only ports that are currently present on
//! the system are reported, which filters out stale database entries left
//! behind by unplugged devices.

use crate::serial_driver::SerialConnector;
use midas_core::{DeviceIdentity, MidasError, Result};
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Attribute holding the serial port name of a device instance
pub const PORT_NAME_ATTRIBUTE: &str = "PortName";

/// A node in the device database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceNode {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<DeviceNode>,
}

impl DeviceNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: DeviceNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Source of the device tree
pub trait DeviceDatabase: Send + Sync {
    /// Enumerate the device tree
    ///
    /// Fails with [`MidasError::Enumeration`] when the database is not accessible.
    fn enumerate_device_tree(&self) -> Result<Vec<DeviceNode>>;
}

/// Device database built from the USB metadata `tokio-serial` reports
///
/// Each USB serial port becomes a `USB\VID_xxxx&PID_xxxx` node with one
/// instance child carrying the port name.
#[derive(Debug, Clone, Default)]
pub struct SerialPortDatabase;

impl DeviceDatabase for SerialPortDatabase {
    fn enumerate_device_tree(&self) -> Result<Vec<DeviceNode>> {
        let ports = tokio_serial::available_ports().map_err(|e| {
            MidasError::Enumeration(format!("Failed to enumerate USB devices: {}", e))
        })?;

        let nodes = ports
            .into_iter()
            .filter_map(|port| match port.port_type {
                tokio_serial::SerialPortType::UsbPort(info) => {
                    debug!(
                        "  USB Device - VID:{:04X} PID:{:04X} at {}",
                        info.vid, info.pid, port.port_name
                    );
                    let instance = info
                        .serial_number
                        .clone()
                        .unwrap_or_else(|| port.port_name.clone());
                    let mut child = DeviceNode::new(instance)
                        .with_attribute(PORT_NAME_ATTRIBUTE, port.port_name);
                    if let Some(product) = info.product {
                        child = child.with_attribute("FriendlyName", product);
                    }
                    Some(
                        DeviceNode::new(format!("USB\\VID_{:04X}&PID_{:04X}", info.vid, info.pid))
                            .with_child(child),
                    )
                }
                _ => None,
            })
            .collect();

        Ok(nodes)
    }
}

/// Finds the serial ports backing a USB device
pub struct DeviceLocator {
    database: Box<dyn DeviceDatabase>,
    ports: Arc<dyn SerialConnector>,
}

impl DeviceLocator {
    /// Create a locator over `database`, checking liveness against `ports`
    pub fn new(database: Box<dyn DeviceDatabase>, ports: Arc<dyn SerialConnector>) -> Self {
        Self { database, ports }
    }

    /// Find all live serial ports whose device matches `identity`
    ///
    /// Returns an empty set when nothing matches; only database or port
    /// enumeration failures are errors.
    pub fn find_ports(&self, identity: &DeviceIdentity) -> Result<BTreeSet<String>> {
        debug!("Searching for device ({})", identity);

        let pattern = identity_pattern(identity)?;
        let tree = self.database.enumerate_device_tree()?;
        let live: HashSet<String> = self
            .ports
            .available_ports()
            .map_err(|e| match e {
                MidasError::Enumeration(_) => e,
                other => MidasError::Enumeration(other.to_string()),
            })?
            .into_iter()
            .collect();

        let mut found = BTreeSet::new();
        for node in &tree {
            collect_matching_ports(node, &pattern, &live, &mut found);
        }

        debug!("Found {} live port(s) for {}", found.len(), identity);
        Ok(found)
    }

    /// Resolve the port to connect to
    ///
    /// Fails with [`MidasError::DeviceNotFound`] if no live port matches.
    pub fn locate(&self, identity: &DeviceIdentity) -> Result<String> {
        self.find_ports(identity)?
            .into_iter()
            .next()
            .ok_or_else(|| identity.not_found())
    }
}

/// Case-insensitive `VID_<vid>` ... `PID_<pid>` with any separators between
fn identity_pattern(identity: &DeviceIdentity) -> Result<Regex> {
    let pattern = format!(
        r"VID_{}[^0-9A-Z]*PID_{}(?:[^0-9A-F]|$)",
        regex::escape(identity.vendor_id()),
        regex::escape(identity.product_id())
    );

    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| MidasError::InvalidInput(format!("Invalid device pattern: {}", e)))
}

fn collect_matching_ports(
    node: &DeviceNode,
    pattern: &Regex,
    live: &HashSet<String>,
    found: &mut BTreeSet<String>,
) {
    if pattern.is_match(&node.name) {
        collect_port_names(node, live, found);
        return;
    }

    for child in &node.children {
        collect_matching_ports(child, pattern, live, found);
    }
}

fn collect_port_names(node: &DeviceNode, live: &HashSet<String>, found: &mut BTreeSet<String>) {
    match node.attribute(PORT_NAME_ATTRIBUTE) {
        Some("") | None => {}
        Some(port) if live.contains(port) => {
            found.insert(port.to_string());
        }
        Some(port) => warn!("Ignoring stale port {} for {}", port, node.name),
    }

    for child in &node.children {
        collect_port_names(child, live, found);
    }
}
