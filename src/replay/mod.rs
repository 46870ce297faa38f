//! Market replay: scheduler, session controller, transports.

pub mod engine;
pub mod session;
pub mod transport;

pub use engine::{
    is_session_gap, ReplayConfig, ReplayError, ReplayScheduler, SESSION_GAP_THRESHOLD_SECS,
};
pub use session::{
    CommandSource, EventSink, ReplaySession, SessionOptions, SessionOutcome, SessionState,
    SinkClosed, StopReason,
};
