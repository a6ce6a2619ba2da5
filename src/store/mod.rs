//! Per-conversation message store: confirmed cache plus optimistic overlay.
//!
//! `MessageStore` is the single object the UI layer renders from. It is
//! shared as `SharedStore` between the dispatcher and the real-time push
//! task; the lock is only ever held for synchronous mutations, never across
//! an `.await`.

pub mod cache;
pub mod overlay;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;

use crate::models::{ConversationMessageSet, Draft, Entry, Message, MessagePatch, MessageView};

use cache::MessageCache;
use overlay::OptimisticOverlay;

pub use cache::{AddOutcome, MessageListener};

/// Time tolerances used to decide that two messages are the same event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Confirmed vs confirmed: same sender and content (double submit).
    pub dedup_window: Duration,
    /// Speculative vs confirmed: slow round trips.
    pub reconcile_window: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            dedup_window: Duration::milliseconds(2000),
            reconcile_window: Duration::milliseconds(5000),
        }
    }
}

/// Store handle shared between the dispatcher and push consumers.
pub type SharedStore = Arc<Mutex<MessageStore>>;

/// Lock a shared store, recovering the data if a holder panicked.
pub fn lock(store: &SharedStore) -> MutexGuard<'_, MessageStore> {
    store.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct MessageStore {
    cache: MessageCache,
    overlay: OptimisticOverlay,
    unread: HashMap<String, usize>,
}

impl MessageStore {
    pub fn new(settings: ReconcileSettings) -> Self {
        Self {
            cache: MessageCache::new(settings.dedup_window),
            overlay: OptimisticOverlay::new(settings.reconcile_window),
            unread: HashMap::new(),
        }
    }

    pub fn shared(settings: ReconcileSettings) -> SharedStore {
        Arc::new(Mutex::new(Self::new(settings)))
    }

    pub fn set_messages(&mut self, conversation_id: &str, messages: Vec<Message>) {
        self.cache.set_messages(conversation_id, messages);
    }

    /// Accept a confirmed message from any source (send response or push).
    ///
    /// A matching speculative entry is dropped in the same step the confirmed
    /// one is inserted. Messages that did not replace a local entry count as
    /// unread.
    pub fn add_message(&mut self, conversation_id: &str, message: Message) -> AddOutcome {
        let reconciled = self.overlay.reconcile(conversation_id, &message).is_some();
        let outcome = self.cache.add_message(conversation_id, message);
        if outcome.is_inserted() && !reconciled {
            *self.unread.entry(conversation_id.to_string()).or_default() += 1;
        }
        outcome
    }

    /// Accept the backend's answer to our own send of `temp_id`.
    ///
    /// Reconciles as `add_message` does. When nothing matched (e.g. the
    /// backend normalized the content) `temp_id` itself is dropped, so one
    /// confirmed message never removes more than one entry. Own sends never
    /// count as unread.
    pub fn confirm_send(
        &mut self,
        conversation_id: &str,
        temp_id: &str,
        message: Message,
    ) -> AddOutcome {
        if self.overlay.reconcile(conversation_id, &message).is_none() {
            self.overlay.remove_speculative(conversation_id, temp_id);
        }
        self.cache.add_message(conversation_id, message)
    }

    pub fn update_message(
        &mut self,
        conversation_id: &str,
        id: &str,
        patch: &MessagePatch,
    ) -> bool {
        self.cache.update_message(conversation_id, id, patch)
    }

    pub fn add_speculative(&mut self, conversation_id: &str, draft: Draft) -> String {
        self.overlay.add_speculative(conversation_id, draft)
    }

    pub fn remove_speculative(&mut self, conversation_id: &str, temp_id: &str) -> bool {
        self.overlay.remove_speculative(conversation_id, temp_id)
    }

    /// Forget everything held for the conversation.
    pub fn remove_conversation(&mut self, conversation_id: &str) {
        self.cache.remove_conversation(conversation_id);
        self.overlay.remove_conversation(conversation_id);
        self.unread.remove(conversation_id);
    }

    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.cache.messages(conversation_id)
    }

    /// Confirmed and speculative entries merged, ascending by time.
    ///
    /// Each confirmed message hides at most one speculative entry: the one
    /// `reconcile` would pick among drafts no later than it. On equal
    /// timestamps confirmed entries come first.
    pub fn combined_entries(&self, conversation_id: &str) -> Vec<Entry> {
        let confirmed = self.cache.messages(conversation_id);

        let mut entries: Vec<Entry> = confirmed
            .iter()
            .map(|m| Entry::Confirmed { message: m.clone() })
            .collect();
        entries.extend(self.overlay.unpaired_entries(conversation_id, confirmed));

        entries.sort_by_key(Entry::created_at);
        entries
    }

    /// The read-only view handed to the presentation layer.
    pub fn combined_view(&self, conversation_id: &str) -> Vec<MessageView> {
        self.combined_entries(conversation_id)
            .iter()
            .map(Entry::to_view)
            .collect()
    }

    pub fn snapshot(&self, conversation_id: &str) -> ConversationMessageSet {
        ConversationMessageSet {
            conversation_id: conversation_id.to_string(),
            confirmed: self.messages(conversation_id).to_vec(),
            speculative: self.overlay.entries(conversation_id),
            unread: self.unread_count(conversation_id),
        }
    }

    pub fn unread_count(&self, conversation_id: &str) -> usize {
        self.unread.get(conversation_id).copied().unwrap_or(0)
    }

    pub fn mark_read(&mut self, conversation_id: &str) {
        self.unread.remove(conversation_id);
    }

    /// Register a listener for every message inserted into the cache.
    pub fn subscribe(&mut self, listener: MessageListener) {
        self.cache.subscribe(listener);
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(ReconcileSettings::default())
    }
}
