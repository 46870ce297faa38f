//! ChronoTick Backend Library
//!
//! Historical bar replay over WebSocket: storage, ingest, the replay
//! scheduler and session controller, and the HTTP surface around them.

pub mod api;
pub mod config;
pub mod ingest;
pub mod middleware;
pub mod models;
pub mod replay;
pub mod store;

pub use config::ServerConfig;
pub use store::BarStore;
