//! Authenticated HTTP client for the support backend
//!
//! Wraps reqwest::Client with base URL handling and optional bearer auth.

use serde::de::DeserializeOwned;

use super::{BackendError, MessageBackend};
use crate::config::Config;
use crate::models::{Message, NewMessage};

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_url.clone(), config.api_token.clone())
    }

    fn messages_url(&self, conversation_id: &str) -> String {
        format!(
            "{}/conversations/{}/messages",
            self.base_url, conversation_id
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// GET and decode a JSON body.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, BackendError> {
        tracing::debug!("API GET {}", url);

        let resp = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|source| BackendError::Transport {
                url: url.to_string(),
                source,
            })?;

        decode(check_response(resp, url).await?, url).await
    }

    /// POST a JSON body and decode the JSON reply.
    async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, BackendError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        tracing::debug!("API POST {}", url);

        let resp = self
            .authorize(self.http.post(url))
            .json(body)
            .send()
            .await
            .map_err(|source| BackendError::Transport {
                url: url.to_string(),
                source,
            })?;

        decode(check_response(resp, url).await?, url).await
    }
}

impl MessageBackend for ApiClient {
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, BackendError> {
        let url = self.messages_url(conversation_id);
        let messages: Vec<Message> = self.get_json(&url).await?;
        tracing::debug!("Fetched {} messages for {}", messages.len(), conversation_id);
        Ok(messages)
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        message: &NewMessage,
    ) -> Result<Message, BackendError> {
        let url = self.messages_url(conversation_id);
        self.post_json(&url, message).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(
    resp: reqwest::Response,
    url: &str,
) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(BackendError::Unauthorized {
            url: url.to_string(),
        });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        });
    }
    Ok(resp)
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response, url: &str) -> Result<T, BackendError> {
    resp.json().await.map_err(|source| BackendError::Decode {
        url: url.to_string(),
        source,
    })
}
