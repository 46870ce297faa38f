//! Shared replay data model
//!
//! Bars in, events out. Everything that crosses the WebSocket is defined here
//! so the scheduler, the session controller and the transport agree on one
//! wire shape.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One OHLCV sample for a symbol at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// OHLCV snapshot attached to real ticks.
    pub fn candle(&self) -> Candle {
        Candle {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Symbol-less bar, as returned by the day data endpoint and produced by CSV ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl BarRecord {
    pub fn into_bar(self, symbol: &str) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Where a tick's price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSource {
    Real,
    Interpolated,
}

/// One emitted price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub is_synthetic: bool,
    pub source: TickSource,
    /// Present only on real ticks. Serialized as `null` otherwise.
    pub real_candle: Option<Candle>,
}

impl Tick {
    /// Real tick for `bar`, priced at `price` (the close, or the open after a session gap).
    pub fn real(bar: &Bar, price: f64) -> Self {
        Self {
            timestamp: bar.timestamp,
            price,
            is_synthetic: false,
            source: TickSource::Real,
            real_candle: Some(bar.candle()),
        }
    }

    pub fn interpolated(timestamp: NaiveDateTime, price: f64) -> Self {
        Self {
            timestamp,
            price,
            is_synthetic: true,
            source: TickSource::Interpolated,
            real_candle: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    MarketClosed,
}

/// Interval between two bars wider than the session gap threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionGap {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    pub gap_seconds: f64,
    pub reason: GapReason,
}

/// Scheduler output.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    Tick(Tick),
    SessionGap(SessionGap),
}

impl ReplayEvent {
    pub fn as_tick(&self) -> Option<&Tick> {
        match self {
            ReplayEvent::Tick(tick) => Some(tick),
            ReplayEvent::SessionGap(_) => None,
        }
    }
}

/// Messages sent to the replay client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Tick(Tick),
    SessionGap(SessionGap),
    Error { message: String },
}

impl From<ReplayEvent> for ServerEvent {
    fn from(event: ReplayEvent) -> Self {
        match event {
            ReplayEvent::Tick(tick) => ServerEvent::Tick(tick),
            ReplayEvent::SessionGap(gap) => ServerEvent::SessionGap(gap),
        }
    }
}

/// Playback commands sent by the replay client: `{"command": "play"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    Play,
    Pause,
    Stop,
}

impl ClientCommand {
    /// Lenient parse. Malformed JSON and unknown commands yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
