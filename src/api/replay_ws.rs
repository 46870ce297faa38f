//! `/ws/replay`: one replay session per WebSocket connection.
//!
//! The session starts paused; the client drives it with
//! `{"command": "play" | "pause" | "stop"}` frames.

use super::AppState;
use crate::ingest::parse_timestamp;
use crate::models::Bar;
use crate::replay::transport::split_socket;
use crate::replay::{ReplayConfig, ReplaySession};
use crate::store::{normalize_symbol, BarStore};
use anyhow::{anyhow, Context};
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
};
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{info_span, Instrument};

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayParams {
    pub symbol: String,
    pub start: String,
    pub end: String,
    #[serde(default = "default_realtime")]
    pub realtime: bool,
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
    #[serde(default = "default_gap_scale")]
    pub gap_scale: f64,
    #[serde(default)]
    pub interpolate: bool,
    #[serde(default = "default_interpolate_step")]
    pub interpolate_step_sec: u64,
}

fn default_realtime() -> bool {
    true
}

fn default_time_scale() -> f64 {
    1.0
}

fn default_gap_scale() -> f64 {
    60.0
}

fn default_interpolate_step() -> u64 {
    1
}

impl ReplayParams {
    pub fn replay_config(&self) -> ReplayConfig {
        ReplayConfig {
            realtime: self.realtime,
            time_scale: self.time_scale,
            gap_scale: self.gap_scale,
            interpolate: self.interpolate,
            interpolate_step_seconds: self.interpolate_step_sec,
        }
    }

    /// Parsed `start`/`end`, inclusive.
    pub fn time_range(&self) -> anyhow::Result<(NaiveDateTime, NaiveDateTime)> {
        let start = parse_timestamp(&self.start)
            .ok_or_else(|| anyhow!("Invalid start timestamp: {:?}", self.start))?;
        let end = parse_timestamp(&self.end)
            .ok_or_else(|| anyhow!("Invalid end timestamp: {:?}", self.end))?;
        Ok((start, end))
    }
}

pub async fn replay_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ReplayParams>,
) -> Response {
    ws.on_upgrade(move |socket| run_replay(socket, state, params))
}

async fn run_replay(socket: axum::extract::ws::WebSocket, state: AppState, params: ReplayParams) {
    let (sink, commands) = split_socket(socket);
    let session = ReplaySession::new(sink, commands).with_options(state.session_options.clone());
    let span = info_span!("replay", session = %session.id(), symbol = %params.symbol);

    let config = params.replay_config();
    let load = load_bars(state.store.clone(), params);

    session.run(config, load).instrument(span).await;
}

async fn load_bars(store: BarStore, params: ReplayParams) -> anyhow::Result<Vec<Bar>> {
    let (start, end) = params.time_range()?;
    let symbol = normalize_symbol(&params.symbol);
    tokio::task::spawn_blocking(move || store.load_range(&symbol, start, end))
        .await
        .context("Bar loader task failed")?
}
