//! Message-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    /// End user on the widget side.
    Customer,
    /// Human support operator.
    Operator,
    /// Automated agent (bot / AI assistant).
    Agent,
    System,
}

impl std::str::FromStr for SenderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customer" | "user" => Ok(Self::Customer),
            "operator" | "human" => Ok(Self::Operator),
            "agent" | "bot" | "ai" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            other => Err(format!(
                "unknown sender type '{}' (expected customer, operator, agent, system)",
                other
            )),
        }
    }
}

impl std::fmt::Display for SenderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Customer => "customer",
            Self::Operator => "operator",
            Self::Agent => "agent",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    #[default]
    Sent,
    Delivered,
    Read,
    Failed,
}

/// A message confirmed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned identifier.
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub sender_type: SenderType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Message {
    /// Apply a partial update in place.
    ///
    /// Metadata keys are merged into the existing map rather than replacing it.
    pub fn apply(&mut self, patch: &MessagePatch) {
        if let Some(ref content) = patch.content {
            self.content = content.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(ref metadata) = patch.metadata {
            let existing = self.metadata.get_or_insert_with(Map::new);
            for (k, v) in metadata {
                existing.insert(k.clone(), v.clone());
            }
        }
    }
}

/// Partial fields accepted by `update_message`.
///
/// Identifier, conversation and timestamp are fixed once a message is
/// confirmed, so they are not patchable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// A locally composed message that has not been acknowledged yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub content: String,
    pub sender_type: SenderType,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<Map<String, Value>>,
}

impl Draft {
    /// Draft stamped with the current time.
    pub fn new(content: impl Into<String>, sender_type: SenderType) -> Self {
        Self {
            content: content.into(),
            sender_type,
            created_at: Utc::now(),
            metadata: None,
        }
    }
}

/// Request body for the create-message call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub content: String,
    pub sender_type: SenderType,
}

impl From<&Draft> for NewMessage {
    fn from(draft: &Draft) -> Self {
        Self {
            content: draft.content.clone(),
            sender_type: draft.sender_type,
        }
    }
}

/// One entry of a conversation: either still in flight or confirmed.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Speculative {
        temp_id: String,
        conversation_id: String,
        draft: Draft,
    },
    Confirmed {
        message: Message,
    },
}

impl Entry {
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Entry::Speculative { draft, .. } => draft.created_at,
            Entry::Confirmed { message } => message.created_at,
        }
    }

    /// Flatten into the read-only shape handed to the presentation layer.
    pub fn to_view(&self) -> MessageView {
        match self {
            Entry::Speculative {
                temp_id,
                conversation_id,
                draft,
            } => MessageView {
                id: temp_id.clone(),
                conversation_id: conversation_id.clone(),
                content: draft.content.clone(),
                sender_type: draft.sender_type,
                created_at: draft.created_at,
                status: MessageStatus::Sending,
                metadata: draft.metadata.clone(),
                is_optimistic: true,
            },
            Entry::Confirmed { message } => MessageView {
                id: message.id.clone(),
                conversation_id: message.conversation_id.clone(),
                content: message.content.clone(),
                sender_type: message.sender_type,
                created_at: message.created_at,
                status: message.status,
                metadata: message.metadata.clone(),
                is_optimistic: false,
            },
        }
    }
}

/// Snapshot row of the combined view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub sender_type: SenderType,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    pub is_optimistic: bool,
}
