//! Test utilities & fixtures.
//! Provides a scriptable in-memory transport and event/message builders
//! shared by the integration tests.
#![allow(dead_code)] // Each test crate pulls in only the helpers it needs.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use meshchat::model::{AckStatus, ConnectionKind, ConnectionStatus, Message};
use meshchat::transport::{OutboundText, Transport, TransportError};

/// Everything the fake transport was asked to do, for assertions.
#[derive(Debug, Default)]
pub struct TransportLog {
    pub sent: Vec<OutboundText>,
    pub traces: Vec<String>,
    pub disconnects: u32,
}

/// In-memory stand-in for a mesh-radio driver. Connect succeeds with a
/// canned identity, sends hand out sequential packet ids, and every request
/// is recorded for inspection. Individual operations can be switched to
/// fail.
#[derive(Clone)]
pub struct FakeTransport {
    pub log: Arc<Mutex<TransportLog>>,
    next_packet_id: Arc<AtomicU32>,
    pub fail_connect: Arc<AtomicBool>,
    pub fail_send: Arc<AtomicBool>,
    pub fail_trace: Arc<AtomicBool>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(TransportLog::default())),
            next_packet_id: Arc::new(AtomicU32::new(1000)),
            fail_connect: Arc::new(AtomicBool::new(false)),
            fail_send: Arc::new(AtomicBool::new(false)),
            fail_trace: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn sent(&self) -> Vec<OutboundText> {
        self.log.lock().unwrap().sent.clone()
    }
}

impl Transport for FakeTransport {
    async fn connect(
        &mut self,
        kind: ConnectionKind,
        address: &str,
    ) -> Result<ConnectionStatus, TransportError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed("device unreachable".into()));
        }
        Ok(ConnectionStatus {
            connected: true,
            connection_type: Some(kind),
            address: Some(address.to_string()),
            my_node_id: Some("!me000001".to_string()),
            my_node_num: Some(0x4d450001),
        })
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.log.lock().unwrap().disconnects += 1;
        Ok(())
    }

    async fn send_text(&mut self, outbound: OutboundText) -> Result<u32, TransportError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::SendRejected("radio busy".into()));
        }
        self.log.lock().unwrap().sent.push(outbound);
        Ok(self.next_packet_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn trace_route(&mut self, node_id: &str) -> Result<(), TransportError> {
        if self.fail_trace.load(Ordering::SeqCst) {
            return Err(TransportError::Request("trace rejected".into()));
        }
        self.log.lock().unwrap().traces.push(node_id.to_string());
        Ok(())
    }
}

/// Incoming broadcast message on `channel` with a fixed-offset timestamp so
/// ordering assertions stay deterministic.
pub fn broadcast(id: &str, packet_id: u32, sender: &str, channel: u32, text: &str, secs: i64) -> Message {
    Message {
        id: id.to_string(),
        packet_id: Some(packet_id),
        sender: sender.to_string(),
        receiver: None,
        channel,
        text: text.to_string(),
        timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        ack_status: AckStatus::Received,
        is_outgoing: false,
        reply_id: None,
        rx_snr: None,
        hop_limit: None,
    }
}

/// Incoming direct message addressed to `receiver`.
pub fn direct(id: &str, packet_id: u32, sender: &str, receiver: &str, text: &str, secs: i64) -> Message {
    Message {
        receiver: Some(receiver.to_string()),
        channel: 0,
        ..broadcast(id, packet_id, sender, 0, text, secs)
    }
}
