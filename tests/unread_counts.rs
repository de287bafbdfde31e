//! Unread accounting: background/inactive conversations accumulate counts,
//! focusing a conversation clears exactly its share of the total, and
//! merged duplicates never inflate anything.

mod common;

use common::{broadcast, direct};
use meshchat::model::{ChatTarget, ConnectionStatus};
use meshchat::store::ConversationStore;

fn channel(index: u32) -> ChatTarget {
    ChatTarget::Channel {
        index,
        name: format!("Channel {index}"),
    }
}

#[test]
fn three_background_messages_count_three() {
    let mut store = ConversationStore::new();
    store.set_active_target(Some(channel(1)));
    store.set_foreground(false);

    for (i, id) in ["m1", "m2", "m3"].iter().enumerate() {
        store.apply_message_event(broadcast(id, i as u32 + 1, "!aa000001", 0, "msg", i as i64));
    }

    assert_eq!(store.unread_count("channel:0"), 3);
    assert_eq!(store.total_unread(), 3);

    // Focusing the conversation clears exactly those three.
    store.set_foreground(true);
    store.set_active_target(Some(channel(0)));
    assert_eq!(store.unread_count("channel:0"), 0);
    assert_eq!(store.total_unread(), 0);
}

#[test]
fn focused_conversation_accumulates_nothing() {
    let mut store = ConversationStore::new();
    store.set_active_target(Some(channel(0)));
    store.apply_message_event(broadcast("m1", 1, "!aa000001", 0, "live", 0));
    assert_eq!(store.total_unread(), 0);
}

#[test]
fn active_but_backgrounded_conversation_still_counts() {
    let mut store = ConversationStore::new();
    store.set_active_target(Some(channel(0)));
    store.set_foreground(false);
    store.apply_message_event(broadcast("m1", 1, "!aa000001", 0, "while away", 0));
    assert_eq!(store.unread_count("channel:0"), 1);

    // Coming back to the foreground marks the active conversation read.
    store.set_foreground(true);
    assert_eq!(store.unread_count("channel:0"), 0);
}

#[test]
fn direct_and_channel_conversations_count_separately() {
    let mut store = ConversationStore::new();
    store.set_status(ConnectionStatus {
        connected: true,
        connection_type: None,
        address: None,
        my_node_id: Some("!me000001".into()),
        my_node_num: None,
    });

    store.apply_message_event(broadcast("m1", 1, "!aa000001", 0, "public", 0));
    store.apply_message_event(direct("m2", 2, "!aa000001", "!me000001", "private", 1));

    assert_eq!(store.unread_count("channel:0"), 1);
    assert_eq!(store.unread_count("dm:!aa000001"), 1);
    assert_eq!(store.total_unread(), 2);
}

#[test]
fn own_outgoing_messages_never_count_as_unread() {
    let mut store = ConversationStore::new();
    let mut msg = broadcast("m1", 1, "!me000001", 0, "mine", 0);
    msg.is_outgoing = true;
    store.apply_message_event(msg);
    assert_eq!(store.total_unread(), 0);
}

#[test]
fn merged_duplicate_does_not_double_count() {
    let mut store = ConversationStore::new();
    store.apply_message_event(broadcast("m1", 5, "!aa000001", 0, "once", 0));
    store.apply_message_event(broadcast("m2", 5, "!aa000001", 0, "once", 1));
    assert_eq!(store.unread_count("channel:0"), 1);
}
