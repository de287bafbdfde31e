//! # Conversation Projection
//!
//! Pure read-side derivation of the display view for one conversation:
//! filter by target, order by timestamp, fold emoji-only reactions onto
//! their preceding message, and resolve reply references. No step here
//! mutates the store or performs I/O; the whole projection is a function of
//! a store snapshot plus the selected [`ChatTarget`].
//!
//! Reaction detection is heuristic — the mesh has no explicit reaction
//! protocol, so a message whose whole text is pictographic is folded onto
//! the previous bubble. The predicate is kept as one isolated function so
//! it can be swapped for a real protocol without touching anything else.

use serde::{Deserialize, Serialize};

use crate::model::{ChatTarget, Message, BROADCAST_ID};
use crate::store::ConversationStore;

/// Aggregated reactions for one emoji: who sent it, in first-seen order,
/// deduplicated by sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionTally {
    pub emoji: String,
    pub senders: Vec<String>,
}

/// Quoted context for a message that replies to an earlier packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyContext {
    pub id: String,
    pub sender: String,
    pub text: String,
}

/// One display bubble: the stored message plus everything derived at
/// projection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub message: Message,
    pub reactions: Vec<ReactionTally>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyContext>,
}

/// Project the ordered, reaction-folded, reply-linked view of one
/// conversation out of the raw store state.
pub fn project_conversation(
    store: &ConversationStore,
    target: &ChatTarget,
) -> Vec<ConversationMessage> {
    let mut selected: Vec<&Message> = store
        .messages()
        .iter()
        .filter(|m| belongs_to(m, target))
        .collect();
    // Timestamps are not guaranteed to arrive in order. The sort is stable,
    // so equal timestamps keep arrival order.
    selected.sort_by_key(|m| m.timestamp);

    let mut view: Vec<ConversationMessage> = Vec::with_capacity(selected.len());
    for message in selected {
        if is_emoji_only(&message.text) {
            // A reaction with nothing before it has no anchor; drop it.
            if let Some(previous) = view.last_mut() {
                attach_reaction(previous, message.text.trim(), &message.sender);
            }
            continue;
        }
        let reply = message
            .reply_id
            .and_then(|reply_id| resolve_reply(store, reply_id));
        view.push(ConversationMessage {
            message: message.clone(),
            reactions: Vec::new(),
            reply,
        });
    }
    view
}

/// Conversation membership test.
///
/// Channel targets take broadcast traffic on that index. Direct targets
/// take traffic to or from the peer that names a concrete receiver —
/// channel 0 carries both kinds, so a concrete receiver always means
/// direct, never broadcast.
fn belongs_to(message: &Message, target: &ChatTarget) -> bool {
    match target {
        ChatTarget::Channel { index, .. } => {
            message.channel == *index
                && matches!(message.receiver.as_deref(), None | Some(BROADCAST_ID))
        }
        ChatTarget::Direct { node_id, .. } => {
            message.is_direct()
                && (message.sender == *node_id || message.receiver.as_deref() == Some(node_id))
        }
    }
}

fn attach_reaction(bubble: &mut ConversationMessage, emoji: &str, sender: &str) {
    match bubble.reactions.iter_mut().find(|r| r.emoji == emoji) {
        Some(tally) => {
            if !tally.senders.iter().any(|s| s == sender) {
                tally.senders.push(sender.to_string());
            }
        }
        None => bubble.reactions.push(ReactionTally {
            emoji: emoji.to_string(),
            senders: vec![sender.to_string()],
        }),
    }
}

fn resolve_reply(store: &ConversationStore, reply_id: u32) -> Option<ReplyContext> {
    let as_id = reply_id.to_string();
    store
        .messages()
        .iter()
        .find(|m| m.packet_id == Some(reply_id) || m.id == as_id)
        .map(|m| ReplyContext {
            id: m.id.clone(),
            sender: m.sender.clone(),
            text: m.text.clone(),
        })
}

/// Heuristic reaction predicate: trimmed text is non-empty, every character
/// is pictographic or whitespace, and at least one character is an actual
/// pictographic base (not just joiners/selectors).
pub fn is_emoji_only(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    let mut saw_base = false;
    for ch in trimmed.chars() {
        if ch.is_whitespace() || is_emoji_component(ch) {
            continue;
        }
        if is_pictographic(ch) {
            saw_base = true;
            continue;
        }
        return false;
    }
    saw_base
}

/// Characters that ride along inside emoji sequences without being
/// pictographic themselves: ZWJ, variation selectors, keycap combiner.
fn is_emoji_component(ch: char) -> bool {
    matches!(ch as u32, 0x200D | 0xFE00..=0xFE0F | 0x20E3)
}

fn is_pictographic(ch: char) -> bool {
    matches!(
        ch as u32,
        0x1F1E6..=0x1F1FF  // regional indicators (flags)
        | 0x1F300..=0x1FAFF // pictographs, emoticons, transport, supplemental
        | 0x2600..=0x27BF   // misc symbols + dingbats
        | 0x2B00..=0x2BFF   // arrows/stars block (⭐ ⬆ ...)
        | 0x2190..=0x21FF   // classic arrows with emoji presentation
        | 0x203C | 0x2049   // !! and !? with emoji presentation
        | 0x2122 | 0x2139   // ™ and ℹ
        | 0x3030 | 0x303D
        | 0x3297 | 0x3299
    )
}
