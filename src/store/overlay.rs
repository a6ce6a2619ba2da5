//! Speculative entries for sends still in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};

use super::cache::within;
use crate::models::{Draft, Entry, Message};

/// Process-wide counter so temp ids never collide, even across overlays.
static TEMP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_temp_id() -> String {
    let n = TEMP_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tmp-{}-{}", Utc::now().timestamp_millis(), n)
}

struct Speculative {
    temp_id: String,
    draft: Draft,
}

/// Locally originated messages shown before the backend confirms them.
pub struct OptimisticOverlay {
    /// Per conversation, in insertion order.
    pending: HashMap<String, Vec<Speculative>>,
    reconcile_window: Duration,
}

impl OptimisticOverlay {
    pub fn new(reconcile_window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            reconcile_window,
        }
    }

    /// Store a draft and return the temp id assigned to it.
    pub fn add_speculative(&mut self, conversation_id: &str, draft: Draft) -> String {
        let temp_id = next_temp_id();
        tracing::debug!("Overlay: {} pending in {}", temp_id, conversation_id);
        self.pending
            .entry(conversation_id.to_string())
            .or_default()
            .push(Speculative {
                temp_id: temp_id.clone(),
                draft,
            });
        temp_id
    }

    /// Drop a speculative entry. Returns false if it was already gone.
    pub fn remove_speculative(&mut self, conversation_id: &str, temp_id: &str) -> bool {
        let Some(list) = self.pending.get_mut(conversation_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.temp_id != temp_id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.pending.remove(conversation_id);
        }
        removed
    }

    /// Same sender, same trimmed content, inside the window.
    fn matches(&self, s: &Speculative, confirmed: &Message) -> bool {
        s.draft.sender_type == confirmed.sender_type
            && s.draft.content.trim() == confirmed.content.trim()
            && within(s.draft.created_at, confirmed.created_at, self.reconcile_window)
    }

    /// Index of the entry `confirmed` would replace. Earliest draft wins;
    /// insertion order breaks ties.
    fn find_match(&self, conversation_id: &str, confirmed: &Message) -> Option<usize> {
        let list = self.pending.get(conversation_id)?;
        list.iter()
            .enumerate()
            .filter(|(_, s)| self.matches(s, confirmed))
            .min_by_key(|(_, s)| s.draft.created_at)
            .map(|(i, _)| i)
    }

    /// Remove the speculative entry replaced by `confirmed`, if any, and
    /// return its temp id. At most one entry is removed per call.
    pub fn reconcile(&mut self, conversation_id: &str, confirmed: &Message) -> Option<String> {
        let index = self.find_match(conversation_id, confirmed)?;
        let list = self.pending.get_mut(conversation_id)?;
        let replaced = list.remove(index);
        if list.is_empty() {
            self.pending.remove(conversation_id);
        }
        tracing::debug!(
            "Overlay: {} reconciled with {} in {}",
            replaced.temp_id,
            confirmed.id,
            conversation_id
        );
        Some(replaced.temp_id)
    }

    /// Speculative entries for a conversation, in insertion order.
    pub fn entries(&self, conversation_id: &str) -> Vec<Entry> {
        self.pending
            .get(conversation_id)
            .map(|list| {
                list.iter()
                    .map(|s| Entry::Speculative {
                        temp_id: s.temp_id.clone(),
                        conversation_id: conversation_id.to_string(),
                        draft: s.draft.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Speculative entries that no message of `confirmed` accounts for.
    ///
    /// `confirmed` must be ascending by time. Each confirmed message pairs
    /// with at most one entry, picked as `reconcile` would, and only with
    /// drafts composed no later than itself.
    pub fn unpaired_entries(&self, conversation_id: &str, confirmed: &[Message]) -> Vec<Entry> {
        let Some(list) = self.pending.get(conversation_id) else {
            return Vec::new();
        };

        let mut paired = vec![false; list.len()];
        for message in confirmed {
            let found = list
                .iter()
                .enumerate()
                .filter(|(i, s)| {
                    !paired[*i]
                        && s.draft.created_at <= message.created_at
                        && self.matches(s, message)
                })
                .min_by_key(|(_, s)| s.draft.created_at)
                .map(|(i, _)| i);
            if let Some(i) = found {
                paired[i] = true;
            }
        }

        list.iter()
            .zip(paired)
            .filter(|(_, paired)| !paired)
            .map(|(s, _)| Entry::Speculative {
                temp_id: s.temp_id.clone(),
                conversation_id: conversation_id.to_string(),
                draft: s.draft.clone(),
            })
            .collect()
    }

    pub fn remove_conversation(&mut self, conversation_id: &str) {
        self.pending.remove(conversation_id);
    }
}
