//! # Domain Model
//!
//! Record types shared by the store, ingestion, projection, and the command
//! façade: mesh nodes, channels, messages with their acknowledgment
//! lifecycle, connection status, conversation targets, and path-trace
//! results.
//!
//! All records are plain serde-serializable data. Optional fields stay
//! `Option` end to end so that a partial update can be told apart from an
//! explicit value; the merge rules in [`crate::store`] rely on that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Destination sentinel used by the radio for channel broadcasts.
pub const BROADCAST_ID: &str = "^all";

/// Node number the firmware reports for unknown/encrypted hops in a trace.
pub const UNKNOWN_NODE_NUM: u32 = 0xFFFF_FFFF;

/// GPS position attached to a node. Fields arrive independently and may be
/// absent on devices without a fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
}

/// Device telemetry for a node. Every metric is independently optional;
/// firmware versions differ in what they report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceMetrics {
    pub battery_level: Option<u32>,
    pub voltage: Option<f32>,
    pub channel_utilization: Option<f32>,
    pub air_util_tx: Option<f32>,
}

/// A node seen on the mesh.
///
/// Uniquely addressable by `id` (the firmware's `!hex` handle) or by `num`.
/// Created on first sighting, merged field-by-field on every later sighting,
/// and dropped only when the connection is torn down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub num: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    /// Unix seconds the node was last heard, as reported by the radio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heard: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_metrics: Option<DeviceMetrics>,
    #[serde(default)]
    pub is_favorite: bool,
}

impl Node {
    pub fn new(id: impl Into<String>, num: u32) -> Self {
        Self {
            id: id.into(),
            num,
            long_name: None,
            short_name: None,
            last_heard: None,
            snr: None,
            position: None,
            device_metrics: None,
            is_favorite: false,
        }
    }

    /// Best display name: long name, then short name, then the raw id.
    pub fn display_name(&self) -> &str {
        self.long_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.short_name.as_deref().filter(|s| !s.trim().is_empty()))
            .unwrap_or(&self.id)
    }
}

/// A broadcast channel configured on the connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub index: u32,
    pub name: String,
    /// Role string as reported by the device: PRIMARY, SECONDARY, ...
    pub role: String,
}

/// Delivery lifecycle of a message.
///
/// Outgoing messages start at `Pending` and settle into one of the
/// confirmed states when the radio reports routing results. Incoming
/// messages are stored as `Received`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    #[default]
    Pending,
    Ack,
    ImplicitAck,
    Nak,
    Failed,
    Received,
    None,
}

impl AckStatus {
    /// True once the radio has told us something definitive about delivery.
    /// Used by the merge rules: a confirmed status is never regressed to
    /// `Pending`/`None` by a later partial event.
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, AckStatus::Pending | AckStatus::None)
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Locally unique id. Synthesized (uuid) when the originating event does
    /// not carry a usable identifier.
    pub id: String,
    /// Mesh-level packet identifier; globally meaningful for dedup and ack
    /// correlation. Absent on some locally-synthesized records until the
    /// radio assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_id: Option<u32>,
    pub sender: String,
    /// `None` or [`BROADCAST_ID`] for channel traffic; a concrete node id
    /// for direct traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    pub channel: u32,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub ack_status: AckStatus,
    #[serde(default)]
    pub is_outgoing: bool,
    /// Packet id of the message this one replies to, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx_snr: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hop_limit: Option<u32>,
}

impl Message {
    /// True when this message is addressed to a concrete peer rather than a
    /// broadcast group. Channel 0 carries both kinds of traffic, so the
    /// receiver field, not the channel index, decides.
    pub fn is_direct(&self) -> bool {
        matches!(&self.receiver, Some(r) if r != BROADCAST_ID)
    }

    /// Conversation this message belongs to, from the point of view of
    /// `my_node_id` (the local node). Direct traffic keys on the remote
    /// peer; everything else keys on the channel index.
    pub fn conversation_key(&self, my_node_id: Option<&str>) -> String {
        if self.is_direct() {
            let receiver = self.receiver.as_deref().unwrap_or_default();
            let peer = if Some(self.sender.as_str()) == my_node_id || self.is_outgoing {
                receiver
            } else {
                self.sender.as_str()
            };
            format!("dm:{peer}")
        } else {
            format!("channel:{}", self.channel)
        }
    }
}

/// Transport flavor of the active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Tcp,
    Serial,
    Ble,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionKind::Tcp => write!(f, "tcp"),
            ConnectionKind::Serial => write!(f, "serial"),
            ConnectionKind::Ble => write!(f, "ble"),
        }
    }
}

/// Status of the device link. Single instance per session, replaced
/// atomically on connect/disconnect/status pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<ConnectionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_node_num: Option<u32>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self::default()
    }
}

/// Which conversation the consumer is currently looking at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatTarget {
    Channel { index: u32, name: String },
    Direct { node_id: String, name: String },
}

impl ChatTarget {
    /// Stable key used by the unread-count map.
    pub fn conversation_key(&self) -> String {
        match self {
            ChatTarget::Channel { index, .. } => format!("channel:{index}"),
            ChatTarget::Direct { node_id, .. } => format!("dm:{node_id}"),
        }
    }
}

/// Result of a path trace toward a target node.
///
/// `route` holds intermediate hop node numbers only; source and destination
/// are not part of the array. `route_back` and `snr_back` are present when
/// the response traced the return path too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathTraceResult {
    /// Node id the response came from (the trace target).
    pub from: String,
    #[serde(default)]
    pub route: Vec<u32>,
    #[serde(default)]
    pub snr_towards: Vec<f32>,
    #[serde(default)]
    pub route_back: Vec<u32>,
    #[serde(default)]
    pub snr_back: Vec<f32>,
}

/// Lifecycle of the most recent path-trace request.
///
/// A fresh request supersedes whatever was there before. A timeout is a
/// presentational state: a matching result arriving later still completes
/// it, while a result for some other abandoned target is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TraceState {
    #[default]
    Idle,
    Pending {
        target: String,
    },
    TimedOut {
        target: String,
    },
    Complete(PathTraceResult),
}

impl TraceState {
    /// Target the state is currently scoped to, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            TraceState::Idle => None,
            TraceState::Pending { target } | TraceState::TimedOut { target } => Some(target),
            TraceState::Complete(result) => Some(&result.from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_detection_ignores_broadcast_sentinel() {
        let mut msg = Message {
            id: "m1".into(),
            packet_id: None,
            sender: "!aa".into(),
            receiver: Some(BROADCAST_ID.into()),
            channel: 0,
            text: "hi".into(),
            timestamp: Utc::now(),
            ack_status: AckStatus::Received,
            is_outgoing: false,
            reply_id: None,
            rx_snr: None,
            hop_limit: None,
        };
        assert!(!msg.is_direct());
        assert_eq!(msg.conversation_key(Some("!me")), "channel:0");

        msg.receiver = Some("!me".into());
        assert!(msg.is_direct());
        assert_eq!(msg.conversation_key(Some("!me")), "dm:!aa");
    }

    #[test]
    fn conversation_key_uses_receiver_for_own_messages() {
        let msg = Message {
            id: "m2".into(),
            packet_id: None,
            sender: "!me".into(),
            receiver: Some("!bb".into()),
            channel: 0,
            text: "hello".into(),
            timestamp: Utc::now(),
            ack_status: AckStatus::Pending,
            is_outgoing: true,
            reply_id: None,
            rx_snr: None,
            hop_limit: None,
        };
        assert_eq!(msg.conversation_key(Some("!me")), "dm:!bb");
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let mut node = Node::new("!cafe0001", 7);
        assert_eq!(node.display_name(), "!cafe0001");
        node.short_name = Some("CAFE".into());
        assert_eq!(node.display_name(), "CAFE");
        node.long_name = Some("Cafe Repeater".into());
        assert_eq!(node.display_name(), "Cafe Repeater");
    }

    #[test]
    fn confirmed_status_classification() {
        assert!(!AckStatus::Pending.is_confirmed());
        assert!(!AckStatus::None.is_confirmed());
        assert!(AckStatus::Ack.is_confirmed());
        assert!(AckStatus::Nak.is_confirmed());
        assert!(AckStatus::Received.is_confirmed());
    }
}
