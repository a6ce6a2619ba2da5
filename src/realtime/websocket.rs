//! Real-time WebSocket connection and frame handling

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct PushSocket {
    stream: WsStream,
}

impl PushSocket {
    /// Connect to the push endpoint. `https://` URLs are mapped to `wss://`.
    pub async fn connect(url: &str, token: Option<&str>) -> Result<Self> {
        let mut ws_url = url
            .replace("https://", "wss://")
            .replace("http://", "ws://");
        if let Some(token) = token {
            let sep = if ws_url.contains('?') { '&' } else { '?' };
            ws_url = format!("{}{}token={}", ws_url, sep, token);
        }

        tracing::info!("Connecting WebSocket to {}", url);

        let (stream, response) = connect_async(ws_url.as_str())
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, msg: &str) -> Result<()> {
        tracing::debug!("WS send: {}", msg);
        self.stream
            .send(Message::Text(msg.to_string()))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Ask the server for events of one conversation.
    pub async fn subscribe(&mut self, conversation_id: &str) -> Result<()> {
        let frame = subscribe_frame(conversation_id);
        self.send_text(&frame).await
    }

    /// Receive the next event frame.
    ///
    /// Transport pings and JSON `ping` frames are answered here; JSON `pong`
    /// replies to our heartbeat are swallowed. Returns `Ok(None)` once the
    /// server closes the connection.
    pub async fn recv_frame(&mut self) -> Result<Option<String>> {
        while let Some(msg) = self.stream.next().await {
            match msg.context("WebSocket receive error")? {
                Message::Text(text) => match Heartbeat::classify(&text) {
                    Some(Heartbeat::Ping) => {
                        tracing::debug!("WS app ping, answering");
                        self.send_text(PONG_FRAME).await?;
                    }
                    Some(Heartbeat::Pong) => tracing::debug!("WS heartbeat acknowledged"),
                    None => {
                        tracing::debug!("WS recv: {}", text);
                        return Ok(Some(text));
                    }
                },
                Message::Ping(data) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Message::Close(frame) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                other => tracing::debug!("WS frame (ignored): {:?}", other),
            }
        }
        Ok(None)
    }
}

pub(crate) const PING_FRAME: &str = r#"{"type":"ping"}"#;
const PONG_FRAME: &str = r#"{"type":"pong"}"#;

/// Application-level keepalive frames, as opposed to events.
#[derive(Debug, PartialEq, Eq)]
enum Heartbeat {
    Ping,
    Pong,
}

impl Heartbeat {
    fn classify(text: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        match value.get("type")?.as_str()? {
            "ping" => Some(Heartbeat::Ping),
            "pong" => Some(Heartbeat::Pong),
            _ => None,
        }
    }
}

fn subscribe_frame(conversation_id: &str) -> String {
    serde_json::json!({
        "type": "subscribe",
        "conversationId": conversation_id,
    })
    .to_string()
}
