//! Backend API for support conversations

pub mod client;

use thiserror::Error;

use crate::models::{Message, NewMessage};

pub use client::ApiClient;

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("401 Unauthorized for {url}. Check api_token with 'deskchat config --token'.")]
    Unauthorized { url: String },

    #[error("HTTP {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// The two outbound calls the dispatcher makes.
#[allow(async_fn_in_trait)]
pub trait MessageBackend {
    /// Full message history of a conversation.
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, BackendError>;

    /// Create a message and return the server's record of it.
    async fn create_message(
        &self,
        conversation_id: &str,
        message: &NewMessage,
    ) -> Result<Message, BackendError>;
}
