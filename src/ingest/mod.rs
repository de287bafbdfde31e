//! # Event Ingestion
//!
//! Adapts the driver's decoded events into store mutations. Events form a
//! closed tagged-variant set mirroring the wire frames the mesh driver
//! emits (`{"type": ..., "data": ...}`); anything with an unrecognized tag
//! or a malformed payload is rejected at the boundary and logged, never
//! guessed at — and one bad event never aborts stream processing.
//!
//! Snapshot events merge per record rather than wholesale-replacing, so a
//! snapshot can be replayed at any time without clobbering optimistic local
//! sends or independently-learned node fields. Channel snapshots are the
//! one exception: the channel table is small and owned by the device, so it
//! is replaced outright.

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logutil::preview;
use crate::model::{
    AckStatus, Channel, ConnectionStatus, DeviceMetrics, Message, PathTraceResult, Position,
    BROADCAST_ID, UNKNOWN_NODE_NUM,
};
use crate::store::{ConversationStore, NodeUpdate};

/// Decoded domain events delivered by the transport driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// Full node table fetch; merged per node.
    NodeSnapshot(Vec<NodeUpdate>),
    /// Channel table fetch; replaced wholesale.
    ChannelSnapshot(Vec<Channel>),
    /// Message history fetch for a conversation; merged per message.
    MessageSnapshot(Vec<MessageEvent>),
    /// Push: a node was sighted or updated.
    NodeUpdate(NodeUpdate),
    /// Push: a position report, independent of other node fields.
    Position(PositionEvent),
    /// Push: a device-telemetry report, independent of other node fields.
    Telemetry(TelemetryEvent),
    /// Push: a text message.
    Message(MessageEvent),
    /// Push: routing result for a previously sent packet.
    Ack(AckEvent),
    /// Push: the device link state changed.
    ConnectionStatus(ConnectionStatus),
    /// Push: a path-trace response.
    Traceroute(TraceEvent),
}

/// Wire shape of a message event. Identity may be partial: the driver
/// usually supplies `packet_id` only, and history snapshots may carry a
/// stable `id` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_id: Option<u32>,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default)]
    pub channel: u32,
    pub text: String,
    /// Unix seconds (the radio's rx time). Absent on some firmware; the
    /// ingestion timestamp is used as a fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "snr")]
    pub rx_snr: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hop_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_status: Option<AckStatus>,
    #[serde(default)]
    pub is_outgoing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_metrics: Option<DeviceMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckEvent {
    pub packet_id: u32,
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u32>,
    pub from: String,
    #[serde(default)]
    pub route: Vec<u32>,
    #[serde(default)]
    pub route_back: Vec<u32>,
    #[serde(default)]
    pub snr_towards: Vec<f32>,
    #[serde(default)]
    pub snr_back: Vec<f32>,
}

/// Apply one decoded event to the store.
pub fn apply_event(store: &mut ConversationStore, event: Event) {
    match event {
        Event::NodeSnapshot(nodes) => {
            debug!("node snapshot: {} entries", nodes.len());
            store.replace_nodes(nodes);
        }
        Event::ChannelSnapshot(channels) => {
            debug!("channel snapshot: {} entries", channels.len());
            store.replace_channels(channels);
        }
        Event::MessageSnapshot(messages) => {
            debug!("message snapshot: {} entries", messages.len());
            for event in messages {
                store.apply_message_event(into_message(event));
            }
        }
        Event::NodeUpdate(update) => store.apply_node_update(update),
        Event::Position(position) => {
            let mut update = NodeUpdate::position(
                position.from,
                Position {
                    latitude: position.latitude,
                    longitude: position.longitude,
                    altitude: position.altitude,
                },
            );
            update.last_heard = position.time;
            store.apply_node_update(update);
        }
        Event::Telemetry(telemetry) => {
            let Some(metrics) = telemetry.device_metrics else {
                return;
            };
            store.apply_node_update(NodeUpdate::telemetry(telemetry.from, metrics));
        }
        Event::Message(event) => {
            debug!(
                "message from {} ch={} text={}",
                event.sender,
                event.channel,
                preview(&event.text, 40)
            );
            store.apply_message_event(into_message(event));
        }
        Event::Ack(ack) => {
            if let Some(reason) = &ack.error {
                debug!("routing error for packet {}: {}", ack.packet_id, reason);
            }
            store.update_ack_status(ack.packet_id, ack.status);
        }
        Event::ConnectionStatus(status) => store.set_status(status),
        Event::Traceroute(trace) => store.set_trace_result(into_trace_result(trace)),
    }
}

/// Parse one JSON frame and apply it. Unknown tags and malformed payloads
/// are logged and skipped; the error is returned for callers that want to
/// count failures, but the store is untouched by a bad frame.
pub fn apply_json(store: &mut ConversationStore, frame: &str) -> Result<(), serde_json::Error> {
    match serde_json::from_str::<Event>(frame) {
        Ok(event) => {
            apply_event(store, event);
            Ok(())
        }
        Err(err) => {
            warn!("rejecting event frame: {} ({})", err, preview(frame, 80));
            Err(err)
        }
    }
}

/// Promote a wire message event to a stored [`Message`].
///
/// Identity preference: explicit `id`, then the packet id, then a fresh
/// uuid. The `^all` broadcast sentinel is normalized to an absent receiver.
pub fn into_message(event: MessageEvent) -> Message {
    let id = event
        .id
        .or_else(|| event.packet_id.map(|p| p.to_string()))
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let receiver = event.receiver.filter(|r| r != BROADCAST_ID);
    Message {
        id,
        packet_id: event.packet_id,
        sender: event.sender,
        receiver,
        channel: event.channel,
        text: event.text,
        timestamp: event
            .timestamp
            .and_then(unix_to_datetime)
            .unwrap_or_else(Utc::now),
        ack_status: event.ack_status.unwrap_or(AckStatus::Received),
        is_outgoing: event.is_outgoing,
        reply_id: event.reply_id,
        rx_snr: event.rx_snr,
        hop_limit: event.hop_limit,
    }
}

/// Drop hop entries the firmware marks unknown/encrypted before the result
/// reaches the store.
fn into_trace_result(trace: TraceEvent) -> PathTraceResult {
    let keep = |hops: Vec<u32>| -> Vec<u32> {
        hops.into_iter()
            .filter(|&n| n != UNKNOWN_NODE_NUM && n != 0)
            .collect()
    };
    PathTraceResult {
        from: trace.from,
        route: keep(trace.route),
        snr_towards: trace.snr_towards,
        route_back: keep(trace.route_back),
        snr_back: trace.snr_back,
    }
}

fn unix_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TraceState;

    #[test]
    fn message_frame_round_trips_through_json() {
        let mut store = ConversationStore::new();
        let frame = r#"{"type":"message","data":{"packet_id":321,"sender":"!aa000001","receiver":"^all","channel":2,"text":"hi mesh","timestamp":1700000000}}"#;
        apply_json(&mut store, frame).unwrap();

        let stored = &store.messages()[0];
        assert_eq!(stored.packet_id, Some(321));
        assert_eq!(stored.receiver, None, "broadcast sentinel is normalized");
        assert_eq!(stored.channel, 2);
        assert_eq!(stored.ack_status, AckStatus::Received);
    }

    #[test]
    fn unknown_tag_is_rejected_without_corrupting_the_store() {
        let mut store = ConversationStore::new();
        assert!(apply_json(&mut store, r#"{"type":"wat","data":{}}"#).is_err());
        assert!(apply_json(&mut store, "not even json").is_err());

        // The stream keeps working afterwards.
        let frame = r#"{"type":"message","data":{"packet_id":1,"sender":"!aa000001","channel":0,"text":"still alive"}}"#;
        apply_json(&mut store, frame).unwrap();
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn position_and_telemetry_merge_into_one_node() {
        let mut store = ConversationStore::new();
        apply_event(
            &mut store,
            Event::Position(PositionEvent {
                from: "!aa000001".into(),
                latitude: Some(51.5),
                longitude: Some(-0.12),
                altitude: None,
                time: Some(1700000000),
            }),
        );
        apply_event(
            &mut store,
            Event::Telemetry(TelemetryEvent {
                from: "!aa000001".into(),
                device_metrics: Some(DeviceMetrics {
                    battery_level: Some(71),
                    voltage: Some(3.9),
                    channel_utilization: None,
                    air_util_tx: None,
                }),
            }),
        );

        assert_eq!(store.nodes().len(), 1);
        let node = store.node("!aa000001").unwrap();
        assert_eq!(node.position.unwrap().latitude, Some(51.5));
        assert_eq!(node.device_metrics.unwrap().battery_level, Some(71));
        assert_eq!(node.last_heard, Some(1700000000));
    }

    #[test]
    fn traceroute_event_filters_unknown_hops() {
        let mut store = ConversationStore::new();
        store.begin_trace("!bb000002");
        apply_event(
            &mut store,
            Event::Traceroute(TraceEvent {
                request_id: Some(9),
                from: "!bb000002".into(),
                route: vec![10, UNKNOWN_NODE_NUM, 0, 11],
                route_back: vec![UNKNOWN_NODE_NUM],
                snr_towards: vec![4.0, -1.0],
                snr_back: vec![],
            }),
        );

        match store.trace_state() {
            TraceState::Complete(result) => {
                assert_eq!(result.route, vec![10, 11]);
                assert!(result.route_back.is_empty());
            }
            other => panic!("unexpected trace state: {other:?}"),
        }
    }

    #[test]
    fn snapshot_messages_merge_with_optimistic_sends() {
        let mut store = ConversationStore::new();
        // A locally-originated send that already got its packet id.
        let local = into_message(MessageEvent {
            id: Some("local-1".into()),
            packet_id: Some(500),
            sender: "!me000001".into(),
            receiver: None,
            channel: 0,
            text: "outgoing".into(),
            timestamp: Some(1700000100),
            rx_snr: None,
            hop_limit: None,
            reply_id: None,
            ack_status: Some(AckStatus::Pending),
            is_outgoing: true,
        });
        store.apply_message_event(local);

        apply_event(
            &mut store,
            Event::MessageSnapshot(vec![MessageEvent {
                id: None,
                packet_id: Some(500),
                sender: "!me000001".into(),
                receiver: None,
                channel: 0,
                text: "outgoing".into(),
                timestamp: Some(1700000100),
                rx_snr: None,
                hop_limit: None,
                reply_id: None,
                ack_status: Some(AckStatus::Ack),
                is_outgoing: true,
            }]),
        );

        assert_eq!(store.messages().len(), 1, "snapshot must merge, not append");
        assert_eq!(store.messages()[0].id, "local-1");
        assert_eq!(store.messages()[0].ack_status, AckStatus::Ack);
    }
}
