//! # Conversation Store
//!
//! The authoritative in-memory state for one device session: nodes,
//! channels, messages, connection status, unread counts, and the latest
//! path-trace state. Every mutation rule lives here; ingestion and the
//! command façade only call into this API, and projection only reads.
//!
//! The store is deliberately synchronous. Serialization of writers is the
//! engine's job (one task owns the store); keeping the store free of I/O and
//! locking makes every merge rule unit-testable in isolation.
//!
//! ## Merge rules
//!
//! The event stream is duplicate-prone and unordered, so the store never
//! trusts arrival order:
//!
//! - Nodes merge field-by-field. A metrics-only sighting must not erase a
//!   previously learned position, and vice versa.
//! - Messages dedup on `packet_id` first (merge into the existing record),
//!   then on `id` (discard), then append.
//! - Ack updates are targeted merges by `packet_id`; an ack for a packet we
//!   have not seen yet is dropped, and a confirmed status is never regressed
//!   to `Pending` by a later partial event.

use std::collections::HashMap;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::model::{
    AckStatus, Channel, ChatTarget, ConnectionStatus, DeviceMetrics, Message, Node,
    PathTraceResult, Position, TraceState,
};

/// Partial node sighting. Only the fields the event actually carried are
/// set; everything else stays `None` and leaves the stored record alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heard: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_metrics: Option<DeviceMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
}

impl NodeUpdate {
    /// Update carrying only a position fix, keyed by node id.
    pub fn position(id: impl Into<String>, position: Position) -> Self {
        Self {
            id: Some(id.into()),
            position: Some(position),
            ..Self::default()
        }
    }

    /// Update carrying only device telemetry, keyed by node id.
    pub fn telemetry(id: impl Into<String>, metrics: DeviceMetrics) -> Self {
        Self {
            id: Some(id.into()),
            device_metrics: Some(metrics),
            ..Self::default()
        }
    }
}

impl From<Node> for NodeUpdate {
    fn from(node: Node) -> Self {
        Self {
            id: Some(node.id),
            num: Some(node.num),
            long_name: node.long_name,
            short_name: node.short_name,
            last_heard: node.last_heard,
            snr: node.snr,
            position: node.position,
            device_metrics: node.device_metrics,
            is_favorite: Some(node.is_favorite),
        }
    }
}

/// Parse a node number out of the firmware's `!hex` id format.
pub fn node_num_from_id(id: &str) -> Option<u32> {
    u32::from_str_radix(id.strip_prefix('!')?, 16).ok()
}

/// Render a node number as the firmware's `!hex` id format.
pub fn node_id_from_num(num: u32) -> String {
    format!("!{num:08x}")
}

/// What `apply_message_event` did with an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageApplied {
    /// New message, appended to the log.
    Appended,
    /// Matched an existing record by `packet_id`; fields merged in place.
    Merged,
    /// Matched an existing record by `id` with no packet correlation; the
    /// event is a duplicate and was discarded.
    Duplicate,
}

/// Authoritative session state. See the module docs for the merge rules.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    nodes: Vec<Node>,
    channels: Vec<Channel>,
    messages: Vec<Message>,
    status: ConnectionStatus,
    active_target: Option<ChatTarget>,
    foregrounded: bool,
    unread: HashMap<String, u32>,
    trace: TraceState,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            foregrounded: true,
            ..Self::default()
        }
    }

    // --- node mutations ---

    /// Merge a partial sighting into the node set.
    ///
    /// Lookup is by `id` first, then by `num`. Fields the update does not
    /// carry are left untouched on the stored record. Updates that identify
    /// no node at all are dropped.
    pub fn apply_node_update(&mut self, update: NodeUpdate) {
        let existing = self.nodes.iter_mut().find(|n| {
            update.id.as_deref().is_some_and(|id| n.id == id)
                || update.num.is_some_and(|num| n.num == num)
        });

        if let Some(node) = existing {
            merge_node(node, update);
            return;
        }

        // First sighting: we need some identity to file it under. Either
        // side of the id/num pair can be derived from the other.
        let (id, num) = match (update.id.clone(), update.num) {
            (Some(id), Some(num)) => (id, num),
            (Some(id), None) => {
                let num = node_num_from_id(&id).unwrap_or(0);
                (id, num)
            }
            (None, Some(num)) => (node_id_from_num(num), num),
            (None, None) => {
                debug!("dropping node update with no id and no num");
                return;
            }
        };
        let mut node = Node::new(id, num);
        merge_node(&mut node, update);
        trace!("new node {} (num={})", node.id, node.num);
        self.nodes.push(node);
    }

    /// Apply a node snapshot. Each entry is merged per the sighting rules
    /// rather than blindly written, so replaying a snapshot is idempotent
    /// and a sparse snapshot cannot erase independently-learned fields.
    /// Nodes missing from the snapshot are kept.
    pub fn replace_nodes(&mut self, nodes: Vec<NodeUpdate>) {
        for update in nodes {
            self.apply_node_update(update);
        }
    }

    pub fn replace_channels(&mut self, channels: Vec<Channel>) {
        self.channels = channels;
    }

    // --- message mutations ---

    /// Merge an incoming message into the log.
    ///
    /// Order of checks: `packet_id` correlation (merge), `id` duplicate
    /// (discard), append. Appending a non-outgoing message bumps the unread
    /// count of its conversation unless that conversation is focused.
    pub fn apply_message_event(&mut self, incoming: Message) -> MessageApplied {
        if let Some(packet_id) = incoming.packet_id {
            if let Some(existing) = self
                .messages
                .iter_mut()
                .find(|m| m.packet_id == Some(packet_id))
            {
                merge_message(existing, incoming);
                return MessageApplied::Merged;
            }
        }

        if self.messages.iter().any(|m| m.id == incoming.id) {
            trace!("duplicate message id {}, discarding", incoming.id);
            return MessageApplied::Duplicate;
        }

        if !incoming.is_outgoing {
            let key = incoming.conversation_key(self.status.my_node_id.as_deref());
            if !self.is_focused(&key) {
                *self.unread.entry(key).or_insert(0) += 1;
            }
        }
        self.messages.push(incoming);
        MessageApplied::Appended
    }

    /// Targeted ack merge keyed purely by `packet_id`.
    ///
    /// Unknown packet ids are a no-op: the event source may be ahead of the
    /// snapshot, and a later full message event carries the correct status.
    pub fn update_ack_status(&mut self, packet_id: u32, status: AckStatus) {
        match self
            .messages
            .iter_mut()
            .find(|m| m.packet_id == Some(packet_id))
        {
            Some(message) => message.ack_status = merge_ack(message.ack_status, status),
            None => debug!("ack for unknown packet {packet_id}, dropping"),
        }
    }

    /// Attach the radio-assigned packet id to a locally-synthesized record.
    /// Used by the façade once the transport confirms a send.
    pub fn attach_packet_id(&mut self, message_id: &str, packet_id: u32) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) {
            message.packet_id = Some(packet_id);
        }
    }

    /// Mark a locally-synthesized record as failed (the transport rejected
    /// the send outright).
    pub fn mark_send_failed(&mut self, message_id: &str) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) {
            message.ack_status = AckStatus::Failed;
        }
    }

    // --- connection status ---

    /// Replace the connection status. A transition to disconnected clears
    /// session state: nodes, messages, unread counts, the active target,
    /// and any trace state.
    pub fn set_status(&mut self, status: ConnectionStatus) {
        if !status.connected {
            self.disconnect_clear();
        }
        self.status = status;
    }

    fn disconnect_clear(&mut self) {
        self.nodes.clear();
        self.messages.clear();
        self.unread.clear();
        self.active_target = None;
        self.trace = TraceState::Idle;
    }

    // --- conversation focus ---

    /// Select (or clear) the conversation being projected. Selecting a
    /// target while foregrounded marks it read.
    pub fn set_active_target(&mut self, target: Option<ChatTarget>) {
        self.active_target = target;
        if self.foregrounded {
            self.mark_active_read();
        }
    }

    /// Consumer-supplied visibility signal. Coming to the foreground marks
    /// the active conversation read.
    pub fn set_foreground(&mut self, foregrounded: bool) {
        self.foregrounded = foregrounded;
        if foregrounded {
            self.mark_active_read();
        }
    }

    fn mark_active_read(&mut self) {
        if let Some(target) = &self.active_target {
            self.unread.remove(&target.conversation_key());
        }
    }

    fn is_focused(&self, conversation_key: &str) -> bool {
        self.foregrounded
            && self
                .active_target
                .as_ref()
                .is_some_and(|t| t.conversation_key() == conversation_key)
    }

    // --- path trace ---

    /// Begin a new trace toward `target`, superseding any prior state.
    pub fn begin_trace(&mut self, target: impl Into<String>) {
        self.trace = TraceState::Pending {
            target: target.into(),
        };
    }

    /// Transition a pending trace to the timed-out state. A stale timer for
    /// a target that is no longer current is a no-op.
    pub fn trace_timed_out(&mut self, target: &str) {
        if matches!(&self.trace, TraceState::Pending { target: t } if t == target) {
            self.trace = TraceState::TimedOut {
                target: target.to_string(),
            };
        }
    }

    /// Accept a trace result for the current target. A result arriving after
    /// the timeout still completes it; a result for an abandoned target is
    /// ignored.
    pub fn set_trace_result(&mut self, result: PathTraceResult) {
        if self.trace.target() == Some(result.from.as_str()) {
            self.trace = TraceState::Complete(result);
        } else {
            debug!(
                "trace result from {} does not match current request",
                result.from
            );
        }
    }

    pub fn clear_trace(&mut self) {
        self.trace = TraceState::Idle;
    }

    // --- read accessors ---

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Find a node by its string id or by its decimal node number.
    pub fn node(&self, id_or_num: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.id == id_or_num || n.num.to_string() == id_or_num)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn active_target(&self) -> Option<&ChatTarget> {
        self.active_target.as_ref()
    }

    pub fn is_foregrounded(&self) -> bool {
        self.foregrounded
    }

    pub fn unread_counts(&self) -> &HashMap<String, u32> {
        &self.unread
    }

    pub fn unread_count(&self, conversation_key: &str) -> u32 {
        self.unread.get(conversation_key).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.values().sum()
    }

    pub fn trace_state(&self) -> &TraceState {
        &self.trace
    }
}

fn merge_node(node: &mut Node, update: NodeUpdate) {
    if let Some(id) = update.id {
        node.id = id;
    }
    if let Some(num) = update.num {
        node.num = num;
    }
    if update.long_name.is_some() {
        node.long_name = update.long_name;
    }
    if update.short_name.is_some() {
        node.short_name = update.short_name;
    }
    if update.last_heard.is_some() {
        node.last_heard = update.last_heard;
    }
    if update.snr.is_some() {
        node.snr = update.snr;
    }
    if update.position.is_some() {
        node.position = update.position;
    }
    if update.device_metrics.is_some() {
        node.device_metrics = update.device_metrics;
    }
    if let Some(favorite) = update.is_favorite {
        node.is_favorite = favorite;
    }
}

/// Field-level merge of a correlated message event into the stored record.
/// The stored `id` and first-seen timestamp are kept; empty text is treated
/// as absent so ack-only updates do not blank the payload.
fn merge_message(existing: &mut Message, incoming: Message) {
    if !incoming.text.is_empty() {
        existing.text = incoming.text;
    }
    if !incoming.sender.is_empty() && existing.sender.is_empty() {
        existing.sender = incoming.sender;
    }
    if incoming.receiver.is_some() {
        existing.receiver = incoming.receiver;
    }
    if incoming.reply_id.is_some() {
        existing.reply_id = incoming.reply_id;
    }
    if incoming.rx_snr.is_some() {
        existing.rx_snr = incoming.rx_snr;
    }
    if incoming.hop_limit.is_some() {
        existing.hop_limit = incoming.hop_limit;
    }
    existing.is_outgoing = existing.is_outgoing || incoming.is_outgoing;
    existing.ack_status = merge_ack(existing.ack_status, incoming.ack_status);
}

/// Keep the more definitive of two ack states. A confirmed status never
/// regresses to `Pending`/`None` when a later partial event merges in.
fn merge_ack(existing: AckStatus, incoming: AckStatus) -> AckStatus {
    if existing.is_confirmed() && !incoming.is_confirmed() {
        existing
    } else {
        incoming
    }
}
