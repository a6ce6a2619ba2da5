//! Push event payloads and how they land in the store

use serde::Deserialize;
use thiserror::Error;

use crate::models::{Message, MessagePatch};
use crate::store::{AddOutcome, MessageStore};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("malformed push frame")]
    Malformed(#[from] serde_json::Error),
}

/// One event delivered over the real-time channel, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum PushEvent {
    #[serde(rename = "message.created")]
    MessageCreated { message: Message },

    #[serde(rename = "message.updated", rename_all = "camelCase")]
    MessageUpdated {
        conversation_id: String,
        id: String,
        patch: MessagePatch,
    },

    #[serde(rename = "conversation.deleted", rename_all = "camelCase")]
    ConversationDeleted { conversation_id: String },

    /// Acks, pongs and anything newer than this client.
    #[serde(other)]
    Unknown,
}

/// What applying an event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Added(AddOutcome),
    Updated(bool),
    Removed,
    Ignored,
}

impl PushEvent {
    /// Decode a text frame.
    pub fn parse(frame: &str) -> Result<Self, PushError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Feed the event into the store the same way a send response is fed.
    pub fn apply(self, store: &mut MessageStore) -> Applied {
        match self {
            PushEvent::MessageCreated { message } => {
                let conversation_id = message.conversation_id.clone();
                Applied::Added(store.add_message(&conversation_id, message))
            }
            PushEvent::MessageUpdated {
                conversation_id,
                id,
                patch,
            } => Applied::Updated(store.update_message(&conversation_id, &id, &patch)),
            PushEvent::ConversationDeleted { conversation_id } => {
                store.remove_conversation(&conversation_id);
                Applied::Removed
            }
            PushEvent::Unknown => Applied::Ignored,
        }
    }
}
