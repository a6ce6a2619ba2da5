//! Real-time push consumer
//!
//! Connects to the backend's WebSocket channel, subscribes to the watched
//! conversations and feeds every event through the dispatcher into the shared store.

pub mod events;
pub mod websocket;

use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::time;

use crate::api::MessageBackend;
use crate::dispatcher::Dispatcher;

pub use events::{Applied, PushEvent};

/// Reason the inner connection loop exited.
enum DisconnectReason {
    /// Clean shutdown (Ctrl+C). Do not reconnect.
    Shutdown,
    /// Error or server-initiated close. Should reconnect.
    Error(anyhow::Error),
}

/// Run the push connection with automatic reconnection.
///
/// On transient errors or server-initiated disconnects, reconnects with
/// exponential backoff (1s, 2s, 4s, ... capped at 64s). A session that
/// stayed up for at least a minute resets the backoff. On Ctrl+C, exits
/// immediately.
pub async fn connect_and_run<B: MessageBackend>(
    url: &str,
    token: Option<&str>,
    conversation_ids: &[String],
    dispatcher: &Dispatcher<B>,
) -> Result<()> {
    let mut backoff = 1u64;

    loop {
        let delay = match run_session(url, token, conversation_ids, dispatcher).await {
            Ok(DisconnectReason::Shutdown) => return Ok(()),
            Ok(DisconnectReason::Error(e)) => {
                backoff = 1;
                tracing::warn!(
                    "Push channel disconnected after stable session: {:#}. Reconnecting in 1s...",
                    e
                );
                1
            }
            Err(e) => {
                tracing::warn!(
                    "Push channel disconnected: {:#}. Reconnecting in {}s...",
                    e,
                    backoff
                );
                let d = backoff;
                backoff = (backoff * 2).min(64);
                d
            }
        };

        tokio::select! {
            _ = time::sleep(Duration::from_secs(delay)) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                return Ok(());
            }
        }
    }
}

/// One connection: connect, subscribe, event loop.
///
/// Returns `Ok` for a clean shutdown or for an error after a stable
/// session, `Err` when the connection failed early.
async fn run_session<B: MessageBackend>(
    url: &str,
    token: Option<&str>,
    conversation_ids: &[String],
    dispatcher: &Dispatcher<B>,
) -> Result<DisconnectReason> {
    let mut ws = websocket::PushSocket::connect(url, token).await?;
    for id in conversation_ids {
        ws.subscribe(id).await?;
    }

    let connected_at = Instant::now();
    let stability_threshold = Duration::from_secs(60);
    let mut heartbeat = time::interval(Duration::from_secs(30));
    heartbeat.tick().await; // skip first immediate tick

    println!("Listening for events... (Ctrl-C to stop)");

    let reason = loop {
        tokio::select! {
            frame = ws.recv_frame() => {
                match frame {
                    Ok(Some(text)) => {
                        handle_frame(&text, dispatcher);
                    }
                    Ok(None) => {
                        break DisconnectReason::Error(anyhow::anyhow!("WebSocket closed by server"));
                    }
                    Err(e) => {
                        break DisconnectReason::Error(e.context("WebSocket recv error"));
                    }
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = ws.send_text(websocket::PING_FRAME).await {
                    break DisconnectReason::Error(e.context("Heartbeat send failed"));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break DisconnectReason::Shutdown;
            }
        }
    };

    if connected_at.elapsed() >= stability_threshold {
        return Ok(reason);
    }

    match reason {
        DisconnectReason::Shutdown => Ok(DisconnectReason::Shutdown),
        DisconnectReason::Error(e) => Err(e),
    }
}

/// Decode one text frame and apply it. Bad frames are logged and dropped.
fn handle_frame<B: MessageBackend>(frame: &str, dispatcher: &Dispatcher<B>) -> Applied {
    let event = match PushEvent::parse(frame) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Dropping frame: {:#}: {}", e, frame);
            return Applied::Ignored;
        }
    };

    if event == PushEvent::Unknown {
        tracing::debug!("Ignoring frame: {}", frame);
        return Applied::Ignored;
    }

    let applied = dispatcher.apply_push(event);
    tracing::debug!("Push applied: {:?}", applied);
    applied
}
