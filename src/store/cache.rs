//! Confirmed-message cache, keyed by conversation.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::models::{Message, MessagePatch};

/// Callback invoked for every message actually inserted by `add_message`.
pub type MessageListener = Box<dyn FnMut(&str, &Message) + Send>;

/// Result of an `add_message` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Inserted at this position of the confirmed list.
    Inserted { index: usize },
    /// A message with the same identifier is already present.
    DuplicateId,
    /// Same sender and content as a message within the dedup window.
    DuplicateContent,
}

impl AddOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, AddOutcome::Inserted { .. })
    }
}

/// True if `a` and `b` are at most `window` apart, in either direction.
pub(crate) fn within(a: DateTime<Utc>, b: DateTime<Utc>, window: Duration) -> bool {
    (a - b).abs() <= window
}

/// Authoritative store of confirmed messages.
///
/// Each conversation's list is kept ascending by `created_at`; messages with
/// equal timestamps stay in insertion order.
pub struct MessageCache {
    conversations: HashMap<String, Vec<Message>>,
    listeners: Vec<MessageListener>,
    dedup_window: Duration,
}

impl MessageCache {
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            conversations: HashMap::new(),
            listeners: Vec::new(),
            dedup_window,
        }
    }

    /// Replace the confirmed list for a conversation.
    ///
    /// The input is stably sorted and repeated identifiers are dropped
    /// (first occurrence wins).
    pub fn set_messages(&mut self, conversation_id: &str, mut messages: Vec<Message>) {
        messages.sort_by_key(|m| m.created_at);
        let mut seen = HashSet::new();
        messages.retain(|m| seen.insert(m.id.clone()));

        tracing::debug!(
            "Cache: set {} messages for {}",
            messages.len(),
            conversation_id
        );
        self.conversations
            .insert(conversation_id.to_string(), messages);
    }

    /// Insert one confirmed message unless it duplicates one already held.
    pub fn add_message(&mut self, conversation_id: &str, message: Message) -> AddOutcome {
        let list = self
            .conversations
            .entry(conversation_id.to_string())
            .or_default();

        if list.iter().any(|m| m.id == message.id) {
            tracing::debug!("Cache: {} already present, skipping", message.id);
            return AddOutcome::DuplicateId;
        }

        let window = self.dedup_window;
        if list.iter().any(|m| {
            m.sender_type == message.sender_type
                && m.content == message.content
                && within(m.created_at, message.created_at, window)
        }) {
            tracing::debug!(
                "Cache: {} matches a recent message by content, skipping",
                message.id
            );
            return AddOutcome::DuplicateContent;
        }

        // After any equal timestamps, so ties keep insertion order.
        let index = list.partition_point(|m| m.created_at <= message.created_at);
        list.insert(index, message);

        let inserted = &list[index];
        for listener in self.listeners.iter_mut() {
            listener(conversation_id, inserted);
        }

        AddOutcome::Inserted { index }
    }

    /// Merge `patch` into the message with this identifier.
    ///
    /// Returns false if no such message exists.
    pub fn update_message(
        &mut self,
        conversation_id: &str,
        id: &str,
        patch: &MessagePatch,
    ) -> bool {
        let Some(msg) = self
            .conversations
            .get_mut(conversation_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == id))
        else {
            tracing::debug!("Cache: update for unknown message {} ignored", id);
            return false;
        };
        msg.apply(patch);
        true
    }

    pub fn remove_conversation(&mut self, conversation_id: &str) {
        self.conversations.remove(conversation_id);
    }

    /// Confirmed messages for a conversation, ascending by time.
    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.conversations
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Register a listener for inserted messages.
    pub fn subscribe(&mut self, listener: MessageListener) {
        self.listeners.push(listener);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{MessageStatus, SenderType};
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    pub(crate) fn at(secs: i64, millis: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap() + Duration::milliseconds(millis)
    }

    pub(crate) fn msg(id: &str, content: &str, sender: SenderType, ts: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "conv-1".to_string(),
            content: content.to_string(),
            sender_type: sender,
            created_at: ts,
            status: MessageStatus::Sent,
            metadata: None,
        }
    }

    fn cache() -> MessageCache {
        MessageCache::new(Duration::seconds(2))
    }

    fn ids(cache: &MessageCache) -> Vec<&str> {
        cache.messages("conv-1").iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_add_keeps_time_order() {
        let mut c = cache();
        c.add_message("conv-1", msg("b", "two", SenderType::Customer, at(10, 0)));
        c.add_message("conv-1", msg("a", "one", SenderType::Customer, at(0, 0)));
        c.add_message("conv-1", msg("c", "three", SenderType::Customer, at(20, 0)));
        c.add_message("conv-1", msg("d", "mid", SenderType::Operator, at(15, 0)));

        assert_eq!(ids(&c), vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let mut c = cache();
        c.add_message("conv-1", msg("x", "first", SenderType::Customer, at(5, 0)));
        c.add_message("conv-1", msg("y", "second", SenderType::Operator, at(5, 0)));
        c.add_message("conv-1", msg("z", "third", SenderType::Agent, at(5, 0)));

        assert_eq!(ids(&c), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_duplicate_id_is_idempotent() {
        let mut c = cache();
        let m = msg("m2", "hello", SenderType::Operator, at(1, 0));
        assert!(c.add_message("conv-1", m.clone()).is_inserted());
        let before = c.messages("conv-1").to_vec();

        assert_eq!(c.add_message("conv-1", m), AddOutcome::DuplicateId);
        assert_eq!(c.messages("conv-1"), before.as_slice());
    }

    #[test]
    fn test_double_submit_within_window_is_dropped() {
        let mut c = cache();
        c.add_message("conv-1", msg("m1", "hello", SenderType::Operator, at(0, 0)));
        let outcome = c.add_message("conv-1", msg("m2", "hello", SenderType::Operator, at(0, 900)));

        assert_eq!(outcome, AddOutcome::DuplicateContent);
        assert_eq!(ids(&c), vec!["m1"]);
    }

    #[test]
    fn test_same_content_outside_window_is_kept() {
        let mut c = cache();
        c.add_message("conv-1", msg("m1", "ok", SenderType::Customer, at(0, 0)));
        c.add_message("conv-1", msg("m2", "ok", SenderType::Customer, at(2, 1)));
        // Different sender inside the window is a different message.
        c.add_message("conv-1", msg("m3", "ok", SenderType::Operator, at(2, 500)));

        assert_eq!(ids(&c), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_dedup_window_is_inclusive() {
        let mut c = cache();
        c.add_message("conv-1", msg("m1", "hello", SenderType::Operator, at(0, 0)));
        let outcome = c.add_message("conv-1", msg("m2", "hello", SenderType::Operator, at(2, 0)));

        assert_eq!(outcome, AddOutcome::DuplicateContent);
    }

    #[test]
    fn test_dedup_window_keeps_sub_millisecond_precision() {
        let mut c = cache();
        c.add_message("conv-1", msg("m1", "hello", SenderType::Operator, at(0, 0)));
        let late = at(2, 0) + Duration::microseconds(900);
        let outcome = c.add_message("conv-1", msg("m2", "hello", SenderType::Operator, late));

        assert!(outcome.is_inserted());
        assert_eq!(ids(&c), vec!["m1", "m2"]);
    }

    #[test]
    fn test_set_messages_sorts_and_drops_repeated_ids() {
        let mut c = cache();
        c.add_message("conv-1", msg("old", "gone", SenderType::System, at(0, 0)));

        c.set_messages(
            "conv-1",
            vec![
                msg("m3", "c", SenderType::Customer, at(30, 0)),
                msg("m1", "a", SenderType::Customer, at(10, 0)),
                msg("m3", "dup", SenderType::Customer, at(30, 0)),
                msg("m2", "b", SenderType::Operator, at(20, 0)),
            ],
        );

        assert_eq!(ids(&c), vec!["m1", "m2", "m3"]);
        assert_eq!(c.messages("conv-1")[2].content, "c");
    }

    #[test]
    fn test_update_message() {
        let mut c = cache();
        c.add_message("conv-1", msg("m1", "hi", SenderType::Customer, at(0, 0)));

        let patch = MessagePatch {
            status: Some(MessageStatus::Read),
            ..Default::default()
        };
        assert!(c.update_message("conv-1", "m1", &patch));
        assert_eq!(c.messages("conv-1")[0].status, MessageStatus::Read);

        assert!(!c.update_message("conv-1", "missing", &patch));
        assert!(!c.update_message("conv-2", "m1", &patch));
    }

    #[test]
    fn test_listener_sees_only_inserted() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut c = cache();
        let sink = Arc::clone(&seen);
        c.subscribe(Box::new(move |conv, m| {
            sink.lock().unwrap().push(format!("{}/{}", conv, m.id));
        }));

        let m = msg("m1", "hi", SenderType::Customer, at(0, 0));
        c.add_message("conv-1", m.clone());
        c.add_message("conv-1", m);

        assert_eq!(*seen.lock().unwrap(), vec!["conv-1/m1"]);
    }

    #[test]
    fn test_remove_conversation() {
        let mut c = cache();
        c.add_message("conv-1", msg("m1", "hi", SenderType::Customer, at(0, 0)));
        c.remove_conversation("conv-1");
        assert!(c.messages("conv-1").is_empty());
    }
}
