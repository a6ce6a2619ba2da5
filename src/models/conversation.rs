//! Conversation-related models

use super::message::{Entry, Message};

/// Point-in-time copy of everything held for one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessageSet {
    pub conversation_id: String,
    /// Confirmed messages, ascending by `created_at`.
    pub confirmed: Vec<Message>,
    /// In-flight entries in insertion order. Only `Entry::Speculative`.
    pub speculative: Vec<Entry>,
    pub unread: usize,
}
