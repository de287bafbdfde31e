//! # Transport Boundary
//!
//! The contract between the engine and the external mesh-radio driver. The
//! driver owns the physical link (serial, TCP, BLE) and all packet
//! decoding; the engine only sees the [`Transport`] request surface here
//! and a stream of decoded [`crate::ingest::Event`]s the driver feeds into
//! the engine's event channel.
//!
//! Port discovery is advisory only: scan results are candidate addresses
//! for the operator to pick from and never enter the conversation state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ConnectionKind, ConnectionStatus};

/// Failure reported by the driver for a connect/send/trace request. The
/// engine surfaces these to the caller without touching prior state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected to a device")]
    NotConnected,
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("send rejected: {0}")]
    SendRejected(String),
    #[error("device request failed: {0}")]
    Request(String),
}

/// Outbound text request handed to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundText {
    pub text: String,
    /// `None` broadcasts on the channel; `Some` sends a reliable DM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    pub channel_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<u32>,
}

/// Driver request surface.
///
/// `connect` resolves to the full status of the established link, including
/// the local node identity the device reports. `send_text` resolves to the
/// radio-assigned packet id used for ack correlation. `trace_route` is
/// fire-and-forget; its response arrives on the event stream.
pub trait Transport: Send + 'static {
    fn connect(
        &mut self,
        kind: ConnectionKind,
        address: &str,
    ) -> impl std::future::Future<Output = Result<ConnectionStatus, TransportError>> + Send;

    fn disconnect(&mut self) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    fn send_text(
        &mut self,
        outbound: OutboundText,
    ) -> impl std::future::Future<Output = Result<u32, TransportError>> + Send;

    fn trace_route(
        &mut self,
        node_id: &str,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
}

/// A candidate device address found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPort {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// List serial ports that look like candidate radio links.
#[cfg(feature = "serial")]
pub fn scan_serial_ports() -> anyhow::Result<Vec<DiscoveredPort>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => usb.product,
                serialport::SerialPortType::BluetoothPort => Some("bluetooth".to_string()),
                serialport::SerialPortType::PciPort => Some("pci".to_string()),
                serialport::SerialPortType::Unknown => None,
            };
            DiscoveredPort {
                address: p.port_name,
                description,
            }
        })
        .collect())
}
