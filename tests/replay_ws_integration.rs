//! Integration tests for the `/ws/replay` socket
//!
//! Each test serves the full router on an ephemeral port, backed by an
//! on-disk bar database, and drives it with a real WebSocket client.

use chronotick_backend::{
    api::{create_router, AppState},
    models::BarRecord,
    BarStore,
};
use chrono::{NaiveDate, NaiveDateTime};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn ts(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2015, 1, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn bar(timestamp: NaiveDateTime, open: f64, close: f64) -> BarRecord {
    BarRecord {
        timestamp,
        open,
        high: open.max(close) + 2.0,
        low: open.min(close) - 2.0,
        close,
        volume: 1000.0,
    }
}

/// Serve the app over a fresh database seeded with two NIFTY sessions.
async fn spawn_server(db: &NamedTempFile) -> SocketAddr {
    let store = BarStore::open(db.path().to_str().unwrap()).unwrap();
    store
        .insert_bars(
            "NIFTY",
            &[
                bar(ts(9, 15, 28), 8290.0, 8295.0),
                bar(ts(9, 15, 29), 8295.0, 8284.0),
                bar(ts(12, 9, 15), 8349.0, 8352.0),
            ],
        )
        .unwrap();

    let app = create_router(AppState::new(store), &[]);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{}/ws/replay?{}", addr, query);
    let (client, _) = connect_async(url).await.unwrap();
    client
}

async fn next_event(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_command(client: &mut Client, command: &str) {
    let frame = format!(r#"{{"command":"{}"}}"#, command);
    client.send(Message::Text(frame)).await.unwrap();
}

const SCALED: &str = "symbol=nifty&start=2015-01-09T00:00:00&end=2015-01-12T23:59:00\
                      &realtime=false&time_scale=600&gap_scale=10000000";

#[tokio::test]
async fn test_replay_streams_ticks_and_session_gap() {
    let db = NamedTempFile::new().unwrap();
    let addr = spawn_server(&db).await;
    let mut client = connect(addr, SCALED).await;

    send_command(&mut client, "play").await;

    let first = next_event(&mut client).await;
    assert_eq!(first["event"], "tick");
    assert_eq!(first["timestamp"], "2015-01-09T15:28:00");
    assert_eq!(first["price"], 8295.0);
    assert_eq!(first["source"], "real");
    assert_eq!(first["is_synthetic"], false);
    assert_eq!(first["real_candle"]["open"], 8290.0);

    let second = next_event(&mut client).await;
    assert_eq!(second["event"], "tick");
    assert_eq!(second["price"], 8284.0);

    let gap = next_event(&mut client).await;
    assert_eq!(gap["event"], "session_gap");
    assert_eq!(gap["from"], "2015-01-09T15:29:00");
    assert_eq!(gap["to"], "2015-01-12T09:15:00");
    assert_eq!(gap["reason"], "market_closed");

    let open = next_event(&mut client).await;
    assert_eq!(open["event"], "tick");
    assert_eq!(open["timestamp"], "2015-01-12T09:15:00");
    assert_eq!(open["price"], 8349.0);
}

#[tokio::test]
async fn test_session_starts_paused() {
    let db = NamedTempFile::new().unwrap();
    let addr = spawn_server(&db).await;
    let mut client = connect(addr, SCALED).await;

    let idle = tokio::time::timeout(Duration::from_millis(300), client.next()).await;
    assert!(idle.is_err(), "no event may be delivered before play");

    send_command(&mut client, "play").await;
    let first = next_event(&mut client).await;
    assert_eq!(first["price"], 8295.0);
}

#[tokio::test]
async fn test_invalid_start_reports_error_event() {
    let db = NamedTempFile::new().unwrap();
    let addr = spawn_server(&db).await;
    let mut client = connect(addr, "symbol=NIFTY&start=soon&end=2015-01-12").await;

    let event = next_event(&mut client).await;
    assert_eq!(event["event"], "error");
    assert_eq!(event["message"], "Invalid start timestamp: \"soon\"");
}

#[tokio::test]
async fn test_invalid_time_scale_reports_error_event() {
    let db = NamedTempFile::new().unwrap();
    let addr = spawn_server(&db).await;
    let mut client = connect(
        addr,
        "symbol=NIFTY&start=2015-01-09&end=2015-01-12&realtime=false&time_scale=0",
    )
    .await;

    let event = next_event(&mut client).await;
    assert_eq!(event["event"], "error");
    assert_eq!(event["message"], "time_scale must be > 0 (got 0)");
}
