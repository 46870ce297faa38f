//! Replay transports
//!
//! `EventSink`/`CommandSource` over an axum WebSocket, plus an in-process
//! channel pair for driving a session without a socket.

use super::session::{CommandSource, EventSink, SinkClosed};
use crate::models::ServerEvent;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Split a WebSocket into the session's sink and command source.
pub fn split_socket(socket: WebSocket) -> (WsEventSink, WsCommandSource) {
    let (tx, rx) = socket.split();
    (WsEventSink(tx), WsCommandSource(rx))
}

pub struct WsEventSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl EventSink for WsEventSink {
    async fn send(&mut self, event: &ServerEvent) -> Result<(), SinkClosed> {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize replay event: {}", e);
                return Ok(());
            }
        };
        self.0.send(Message::Text(text)).await.map_err(|_| SinkClosed)
    }
}

pub struct WsCommandSource(SplitStream<WebSocket>);

#[async_trait]
impl CommandSource for WsCommandSource {
    async fn recv(&mut self) -> Option<String> {
        while let Some(frame) = self.0.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) => return None,
                Ok(other) => trace!(?other, "ignoring non-text frame"),
                Err(e) => {
                    trace!("websocket read error: {}", e);
                    return None;
                }
            }
        }
        None
    }
}

/// Sink half of an in-process transport.
pub struct ChannelSink(mpsc::UnboundedSender<ServerEvent>);

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, event: &ServerEvent) -> Result<(), SinkClosed> {
        self.0.send(event.clone()).map_err(|_| SinkClosed)
    }
}

/// Command half of an in-process transport.
pub struct ChannelCommandSource(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl CommandSource for ChannelCommandSource {
    async fn recv(&mut self) -> Option<String> {
        self.0.recv().await
    }
}

/// Client end of an in-process transport.
pub struct ChannelTransport {
    pub commands: mpsc::UnboundedSender<String>,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl ChannelTransport {
    /// Send a raw command frame. Silently dropped once the session is gone.
    pub fn send(&self, frame: &str) {
        let _ = self.commands.send(frame.to_string());
    }
}

/// Build a connected (sink, command source, client) triple.
pub fn channel_transport() -> (ChannelSink, ChannelCommandSource, ChannelTransport) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    (
        ChannelSink(event_tx),
        ChannelCommandSource(command_rx),
        ChannelTransport {
            commands: command_tx,
            events: event_rx,
        },
    )
}
