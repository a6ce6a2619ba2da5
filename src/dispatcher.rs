//! Send/load facade between the store and the backend.
//!
//! The only suspension points are the two backend calls. Every store
//! mutation happens under a short synchronous lock, so a push event racing
//! an in-flight send is resolved by the store's dedup and reconcile rules.

use thiserror::Error;

use crate::api::{BackendError, MessageBackend};
use crate::models::{Draft, Message, NewMessage, SenderType};
use crate::realtime::{Applied, PushEvent};
use crate::store::{self, SharedStore};

/// Bulk history fetch failed; cached state was left untouched.
#[derive(Debug, Error)]
#[error("failed to load messages for {conversation_id}")]
pub struct LoadError {
    pub conversation_id: String,
    #[source]
    pub source: BackendError,
}

/// A send attempt failed; its speculative entry has been removed.
#[derive(Debug, Error)]
#[error("failed to send message to {conversation_id}")]
pub struct SendError {
    pub conversation_id: String,
    pub temp_id: String,
    /// Original text, for a retry.
    pub content: String,
    #[source]
    pub source: BackendError,
}

/// Issues backend calls and feeds their results into the store.
pub struct Dispatcher<B> {
    backend: B,
    store: SharedStore,
}

impl<B: MessageBackend> Dispatcher<B> {
    pub fn new(backend: B, store: SharedStore) -> Self {
        Self { backend, store }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Replace the conversation's confirmed list with the backend's history.
    ///
    /// Returns the number of messages loaded.
    pub async fn load(&self, conversation_id: &str) -> Result<usize, LoadError> {
        let messages = self
            .backend
            .fetch_messages(conversation_id)
            .await
            .map_err(|source| LoadError {
                conversation_id: conversation_id.to_string(),
                source,
            })?;

        let count = messages.len();
        store::lock(&self.store).set_messages(conversation_id, messages);
        tracing::info!("Loaded {} messages for {}", count, conversation_id);
        Ok(count)
    }

    /// Send with an optimistic entry visible until the backend answers.
    ///
    /// The speculative entry is added before the first await. No retry is
    /// attempted on failure.
    pub async fn send(
        &self,
        conversation_id: &str,
        content: &str,
        sender_type: SenderType,
    ) -> Result<Message, SendError> {
        let draft = Draft::new(content, sender_type);
        let body = NewMessage::from(&draft);
        let temp_id = store::lock(&self.store).add_speculative(conversation_id, draft);

        match self.backend.create_message(conversation_id, &body).await {
            Ok(message) => {
                let outcome = store::lock(&self.store).confirm_send(
                    conversation_id,
                    &temp_id,
                    message.clone(),
                );
                tracing::debug!("Send {} confirmed as {}: {:?}", temp_id, message.id, outcome);
                Ok(message)
            }
            Err(source) => {
                store::lock(&self.store).remove_speculative(conversation_id, &temp_id);
                tracing::warn!("Send {} to {} failed: {}", temp_id, conversation_id, source);
                Err(SendError {
                    conversation_id: conversation_id.to_string(),
                    temp_id,
                    content: content.to_string(),
                    source,
                })
            }
        }
    }

    /// Apply an event delivered by the real-time channel.
    pub fn apply_push(&self, event: PushEvent) -> Applied {
        event.apply(&mut store::lock(&self.store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageStatus;
    use crate::store::{MessageStore, ReconcileSettings};
    use chrono::{Duration, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

    type Reply = Result<Message, BackendError>;

    /// In-memory backend. `history = None` makes loads fail; each send
    /// consumes one queued reply channel.
    #[derive(Default)]
    struct FakeBackend {
        history: Mutex<Option<Vec<Message>>>,
        replies: Mutex<VecDeque<oneshot::Receiver<Reply>>>,
        sent: Mutex<Vec<NewMessage>>,
    }

    impl FakeBackend {
        fn with_history(messages: Vec<Message>) -> Self {
            let backend = Self::default();
            *backend.history.lock().unwrap() = Some(messages);
            backend
        }

        fn reply(&self) -> oneshot::Sender<Reply> {
            let (tx, rx) = oneshot::channel();
            self.replies.lock().unwrap().push_back(rx);
            tx
        }
    }

    fn unavailable() -> BackendError {
        BackendError::Status {
            status: 503,
            url: "http://backend.test/conversations".to_string(),
            body: "unavailable".to_string(),
        }
    }

    impl MessageBackend for FakeBackend {
        async fn fetch_messages(&self, _conversation_id: &str) -> Result<Vec<Message>, BackendError> {
            let history = self.history.lock().unwrap().clone();
            history.ok_or_else(unavailable)
        }

        async fn create_message(
            &self,
            _conversation_id: &str,
            message: &NewMessage,
        ) -> Result<Message, BackendError> {
            self.sent.lock().unwrap().push(message.clone());
            let rx = self.replies.lock().unwrap().pop_front();
            match rx {
                Some(rx) => rx.await.unwrap_or_else(|_| Err(unavailable())),
                None => Err(unavailable()),
            }
        }
    }

    fn confirmed(id: &str, content: &str, sender: SenderType, offset_ms: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "conv-1".to_string(),
            content: content.to_string(),
            sender_type: sender,
            created_at: Utc::now() + Duration::milliseconds(offset_ms),
            status: MessageStatus::Sent,
            metadata: None,
        }
    }

    fn dispatcher(backend: FakeBackend) -> Dispatcher<FakeBackend> {
        Dispatcher::new(backend, MessageStore::shared(ReconcileSettings::default()))
    }

    #[tokio::test]
    async fn test_load_populates_view() {
        let m1 = confirmed("m1", "hi", SenderType::Customer, 0);
        let d = dispatcher(FakeBackend::with_history(vec![m1.clone()]));

        assert_eq!(d.load("conv-1").await.unwrap(), 1);

        let view = store::lock(d.store()).combined_view("conv-1");
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, "m1");
        assert!(!view[0].is_optimistic);
    }

    #[tokio::test]
    async fn test_load_failure_keeps_cached_state() {
        let d = dispatcher(FakeBackend::default());
        store::lock(d.store()).set_messages(
            "conv-1",
            vec![confirmed("m1", "stale", SenderType::Customer, 0)],
        );

        let err = d.load("conv-1").await.unwrap_err();
        assert_eq!(err.conversation_id, "conv-1");
        assert!(matches!(err.source, BackendError::Status { status: 503, .. }));

        assert_eq!(store::lock(d.store()).messages("conv-1").len(), 1);
    }

    #[test]
    fn test_send_shows_optimistic_then_confirmed() {
        let backend = FakeBackend::default();
        let tx = backend.reply();
        let d = dispatcher(backend);

        let mut send = task::spawn(d.send("conv-1", "hello", SenderType::Operator));
        assert_pending!(send.poll());

        let view = store::lock(d.store()).combined_view("conv-1");
        assert_eq!(view.len(), 1);
        assert!(view[0].is_optimistic);
        assert_eq!(view[0].content, "hello");

        tx.send(Ok(confirmed("m2", "hello", SenderType::Operator, 1000)))
            .unwrap();
        assert!(send.is_woken());
        let message = assert_ready_ok!(send.poll());
        assert_eq!(message.id, "m2");
        drop(send);

        let view = store::lock(d.store()).combined_view("conv-1");
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, "m2");
        assert!(!view[0].is_optimistic);
    }

    #[test]
    fn test_send_failure_leaves_no_trace() {
        let backend = FakeBackend::with_history(vec![]);
        let tx = backend.reply();
        let d = dispatcher(backend);
        store::lock(d.store()).set_messages(
            "conv-1",
            vec![confirmed("m1", "hi", SenderType::Customer, -5000)],
        );
        let before = store::lock(d.store()).combined_view("conv-1");

        let mut send = task::spawn(d.send("conv-1", "hello", SenderType::Operator));
        assert_pending!(send.poll());
        assert_eq!(store::lock(d.store()).combined_view("conv-1").len(), 2);

        tx.send(Err(unavailable())).unwrap();
        let err = assert_ready_err!(send.poll());
        assert_eq!(err.content, "hello");
        assert!(err.temp_id.starts_with("tmp-"));
        assert!(matches!(err.source, BackendError::Status { status: 503, .. }));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source, Some(unavailable().to_string()));
        drop(send);

        let store = store::lock(d.store());
        assert_eq!(store.combined_view("conv-1"), before);
        assert!(store.snapshot("conv-1").speculative.is_empty());
    }

    #[tokio::test]
    async fn test_double_submit_keeps_one() {
        let backend = FakeBackend::default();
        backend
            .reply()
            .send(Ok(confirmed("m1", "hello", SenderType::Operator, 100)))
            .unwrap();
        backend
            .reply()
            .send(Ok(confirmed("m2", "hello", SenderType::Operator, 900)))
            .unwrap();
        let d = dispatcher(backend);

        d.send("conv-1", "hello", SenderType::Operator).await.unwrap();
        d.send("conv-1", "hello", SenderType::Operator).await.unwrap();

        let snap = store::lock(d.store()).snapshot("conv-1");
        assert_eq!(snap.confirmed.len(), 1);
        assert_eq!(snap.confirmed[0].id, "m1");
        assert!(snap.speculative.is_empty());
        assert_eq!(d.backend.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_push_during_send_is_not_duplicated() {
        let backend = FakeBackend::default();
        let tx = backend.reply();
        let d = dispatcher(backend);
        let server_copy = confirmed("m2", "hello", SenderType::Operator, 500);

        let mut send = task::spawn(d.send("conv-1", "hello", SenderType::Operator));
        assert_pending!(send.poll());

        d.apply_push(PushEvent::MessageCreated {
            message: server_copy.clone(),
        });
        assert_eq!(store::lock(d.store()).combined_view("conv-1").len(), 1);

        tx.send(Ok(server_copy)).unwrap();
        assert_ready_ok!(send.poll());
        drop(send);

        let store = store::lock(d.store());
        let view = store.combined_view("conv-1");
        assert_eq!(view.len(), 1);
        assert!(!view[0].is_optimistic);
        assert_eq!(store.unread_count("conv-1"), 0);
    }
}
